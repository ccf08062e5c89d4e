use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, warn};

use burrow_core::error::EventBusError;
use burrow_core::event::{Channel, Event, EventBus, EventPayload, EventSource};
use burrow_core::frame::OutboundFrame;
use burrow_core::session::Session;

use crate::MessagingError;

/// Ephemeral typing state, both directions.
///
/// Outbound: input notifications are coalesced to at most one `typing`
/// frame per send interval. Inbound: a typing frame for the open
/// conversation shows an indicator that expires after a fixed lifetime
/// unless refreshed; frames for any other conversation are ignored.
pub struct TypingSignal {
    session: Arc<Session>,
    event_bus: Arc<dyn EventBus>,
    expiry: Duration,
    send_interval: Duration,
    online: AtomicBool,
    inner: Mutex<TypingState>,
}

#[derive(Default)]
struct TypingState {
    last_sent_at: Option<Instant>,
    /// Conversation with an active remote-typing indicator
    indicator: Option<i64>,
    /// Bumped on every refresh so a superseded expiry timer stands down
    generation: u64,
}

impl TypingSignal {
    pub fn new(
        session: Arc<Session>,
        event_bus: Arc<dyn EventBus>,
        expiry: Duration,
        send_interval: Duration,
    ) -> Self {
        Self {
            session,
            event_bus,
            expiry,
            send_interval,
            online: AtomicBool::new(false),
            inner: Mutex::new(TypingState::default()),
        }
    }

    /// Called on every local content-input event. Sends at most one typing
    /// frame per interval, and only while connected with a conversation
    /// open.
    pub fn notify_input(&self) {
        if !self.online.load(Ordering::SeqCst) {
            return;
        }
        let Some(conversation_id) = self.session.current_conversation() else {
            return;
        };

        {
            let mut inner = self.inner.lock().unwrap();
            let now = Instant::now();
            if let Some(last) = inner.last_sent_at {
                if now.duration_since(last) < self.send_interval {
                    return;
                }
            }
            inner.last_sent_at = Some(now);
        }

        self.emit(
            "ui.frame.send",
            EventPayload::FrameSendRequested {
                frame: OutboundFrame::Typing { conversation_id },
            },
        );
    }

    /// Conversation currently showing a remote-typing indicator.
    pub fn active_indicator(&self) -> Option<i64> {
        self.inner.lock().unwrap().indicator
    }

    pub fn handle_event(self: &Arc<Self>, event: &Event) {
        match &event.payload {
            EventPayload::TypingReceived { conversation_id } => {
                if !self.session.is_conversation_open(*conversation_id) {
                    return;
                }
                self.show_indicator(*conversation_id);
            }
            EventPayload::MessageReceived {
                conversation_id, ..
            } => {
                // The awaited message arrived; the indicator has done its job
                self.clear_indicator(*conversation_id);
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

    fn show_indicator(self: &Arc<Self>, conversation_id: i64) {
        let (fresh, generation) = {
            let mut inner = self.inner.lock().unwrap();
            let fresh = inner.indicator != Some(conversation_id);
            inner.indicator = Some(conversation_id);
            inner.generation += 1;
            (fresh, inner.generation)
        };

        if fresh {
            self.emit(
                "ui.typing.started",
                EventPayload::TypingStarted { conversation_id },
            );
        }

        let signal = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(signal.expiry).await;
            let expired = {
                let mut inner = signal.inner.lock().unwrap();
                if inner.generation == generation && inner.indicator == Some(conversation_id) {
                    inner.indicator = None;
                    true
                } else {
                    false
                }
            };
            if expired {
                signal.emit(
                    "ui.typing.cleared",
                    EventPayload::TypingCleared { conversation_id },
                );
            }
        });
    }

    fn clear_indicator(&self, conversation_id: i64) {
        let cleared = {
            let mut inner = self.inner.lock().unwrap();
            if inner.indicator == Some(conversation_id) {
                inner.indicator = None;
                true
            } else {
                false
            }
        };
        if cleared {
            self.emit(
                "ui.typing.cleared",
                EventPayload::TypingCleared { conversation_id },
            );
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
                    debug!("event bus closed, typing signal stopping");
                    return Ok(());
                }
                Err(EventBusError::Lagged(count)) => {
                    warn!(count, "typing signal lagged, some events dropped");
                }
                Err(e) => {
                    error!(error = %e, "typing signal subscription error");
                    return Err(MessagingError::EventBus(e.to_string()));
                }
            }
        }
    }

    fn emit(&self, channel: &str, payload: EventPayload) {
        let Ok(channel) = Channel::new(channel) else {
            return;
        };
        let _ = self.event_bus.publish(Event::new(
            channel,
            EventSource::System("typing".into()),
            payload,
        ));
    }
}
