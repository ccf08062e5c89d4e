mod conversation;
mod outbound;
mod typing;

pub use conversation::ConversationStore;
pub use outbound::OutboundQueue;
pub use typing::TypingSignal;

#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    #[error("message is empty")]
    EmptyMessage,

    #[error(transparent)]
    Api(#[from] burrow_api::ApiError),

    #[error("event bus error: {0}")]
    EventBus(String),
}
