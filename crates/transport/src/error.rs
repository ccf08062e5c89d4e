use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("failed to connect: {0}")]
    Connect(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("connection is not open")]
    NotOpen,

    #[error("connection manager is already running")]
    AlreadyRunning,

    #[error("event bus error: {0}")]
    EventBus(String),
}
