use std::sync::Arc;

use tracing::{debug, warn};

use burrow_core::event::{Channel, Event, EventBus, EventPayload, EventSource};
use burrow_core::frame::{FrameDecodeError, InboundFrame};

/// Routes each decoded inbound frame to exactly one `chat.*` channel.
///
/// Undecodable frames are dropped with a log line; nothing here affects
/// connection state.
pub struct FrameDispatcher {
    event_bus: Arc<dyn EventBus>,
}

impl FrameDispatcher {
    pub fn new(event_bus: Arc<dyn EventBus>) -> Self {
        Self { event_bus }
    }

    pub fn dispatch(&self, raw: &str) {
        let frame = match InboundFrame::decode(raw) {
            Ok(frame) => frame,
            Err(FrameDecodeError::Unrecognized) => {
                warn!("dropping untagged frame with unknown shape");
                return;
            }
            Err(e) => {
                debug!(error = %e, "dropping undecodable frame");
                return;
            }
        };

        let (channel, payload) = match frame {
            InboundFrame::Message {
                content,
                author_id,
                conversation_id,
            } => (
                "chat.message.received",
                EventPayload::MessageReceived {
                    content,
                    author_id,
                    conversation_id,
                },
            ),
            InboundFrame::Ack {
                temp_id,
                conversation_id,
            } => (
                "chat.ack.received",
                EventPayload::AckReceived {
                    temp_id,
                    conversation_id,
                },
            ),
            InboundFrame::Typing { conversation_id } => (
                "chat.typing.received",
                EventPayload::TypingReceived { conversation_id },
            ),
            InboundFrame::UserStatus { id, is_online } => (
                "chat.contact.status",
                EventPayload::ContactStatusChanged {
                    contact_id: id,
                    online: is_online,
                },
            ),
        };

        let channel = match Channel::new(channel) {
            Ok(channel) => channel,
            Err(e) => {
                warn!(error = %e, "frame routing produced an invalid channel");
                return;
            }
        };

        if let Err(e) = self
            .event_bus
            .publish(Event::new(channel, EventSource::Transport, payload))
        {
            warn!(error = %e, "failed to publish dispatched frame");
        }
    }
}
