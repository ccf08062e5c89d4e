use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{debug, error, warn};

use burrow_core::error::EventBusError;
use burrow_core::event::{Channel, Event, EventBus, EventPayload, EventSource};
use burrow_core::frame::OutboundFrame;
use burrow_core::session::Session;
use burrow_core::types::{DeliveryState, Direction, Message};

use crate::MessagingError;

/// Locally-originated messages in flight.
///
/// Each send renders an optimistic message immediately and, when the
/// connection is open, transmits a frame tagged with a correlation id. A
/// send while disconnected fails on the spot: nothing is queued or
/// persisted for retry. Acknowledgements resolve pending ids exactly once.
pub struct OutboundQueue {
    session: Arc<Session>,
    event_bus: Arc<dyn EventBus>,
    online: AtomicBool,
    inner: Mutex<QueueState>,
}

#[derive(Default)]
struct QueueState {
    last_temp_id: i64,
    pending: HashSet<i64>,
}

impl OutboundQueue {
    pub fn new(session: Arc<Session>, event_bus: Arc<dyn EventBus>) -> Self {
        Self {
            session,
            event_bus,
            online: AtomicBool::new(false),
            inner: Mutex::new(QueueState::default()),
        }
    }

    /// Send `content` to `recipient_id`. `conversation_id` is `None` for the
    /// first message to a new contact; the server creates the conversation
    /// and the ack carries its id back.
    pub fn send(
        &self,
        conversation_id: Option<i64>,
        recipient_id: i64,
        content: &str,
    ) -> Result<Message, MessagingError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(MessagingError::EmptyMessage);
        }

        let temp_id = self.next_temp_id();
        let online = self.online.load(Ordering::SeqCst);

        let delivery = if online {
            let frame = OutboundFrame::Message {
                content: content.to_string(),
                conversation_id: conversation_id.unwrap_or(0),
                recipient_id,
                temp_id,
            };
            self.emit("ui.frame.send", EventPayload::FrameSendRequested { frame });
            self.inner.lock().unwrap().pending.insert(temp_id);
            DeliveryState::Pending
        } else {
            warn!(recipient_id, "send while disconnected, message failed");
            DeliveryState::Failed
        };

        let message = Message {
            server_id: None,
            conversation_id,
            author_id: self.session.user_id(),
            content: content.to_string(),
            sent_at: Utc::now(),
            direction: Direction::Outgoing,
            delivery,
            temp_id: Some(temp_id),
        };

        self.emit(
            "ui.message.composed",
            EventPayload::MessageComposed {
                message: message.clone(),
            },
        );

        Ok(message)
    }

    pub fn handle_event(&self, event: &Event) {
        match &event.payload {
            EventPayload::AckReceived {
                temp_id,
                conversation_id,
            } => {
                let matched = self.inner.lock().unwrap().pending.remove(temp_id);
                if !matched {
                    debug!(temp_id, "ack with no matching pending message");
                    return;
                }
                self.emit(
                    "ui.message.delivered",
                    EventPayload::MessageAcknowledged {
                        temp_id: *temp_id,
                        conversation_id: *conversation_id,
                    },
                );
            }
            EventPayload::ConnectionEstablished => {
                self.online.store(true, Ordering::SeqCst);
            }
            EventPayload::ConnectionLost { .. } => {
                self.online.store(false, Ordering::SeqCst);
            }
            _ => {}
        }
    }

    pub async fn run(self: Arc<Self>) -> Result<(), MessagingError> {
        let mut sub = self
            .event_bus
            .subscribe("{system,chat}.**")
            .map_err(|e| MessagingError::EventBus(e.to_string()))?;

        loop {
            match sub.recv().await {
                Ok(event) => self.handle_event(&event),
                Err(EventBusError::ChannelClosed) => {
                    debug!("event bus closed, outbound queue stopping");
                    return Ok(());
                }
                Err(EventBusError::Lagged(count)) => {
                    warn!(count, "outbound queue lagged, some events dropped");
                }
                Err(e) => {
                    error!(error = %e, "outbound queue subscription error");
                    return Err(MessagingError::EventBus(e.to_string()));
                }
            }
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub fn pending_count(&self) -> usize {
        self.inner.lock().unwrap().pending.len()
    }

    /// Correlation ids are a wall-clock reading clamped to be strictly
    /// increasing within the session; uniqueness beyond that is not needed,
    /// acks only ever match against this client's own ids.
    fn next_temp_id(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let mut inner = self.inner.lock().unwrap();
        let id = now.max(inner.last_temp_id + 1);
        inner.last_temp_id = id;
        id
    }

    fn emit(&self, channel: &str, payload: EventPayload) {
        let Ok(channel) = Channel::new(channel) else {
            return;
        };
        let _ = self.event_bus.publish(Event::new(
            channel,
            EventSource::System("outbound".into()),
            payload,
        ));
    }
}
