use std::sync::{Arc, Mutex};

use tracing::{debug, error, warn};

use burrow_core::error::EventBusError;
use burrow_core::event::{Channel, Event, EventBus, EventPayload, EventSource};
use burrow_core::session::Session;

use crate::RosterError;

/// Process-wide unseen-message counter behind the chat button badge.
///
/// Counts inbound messages for conversations other than the open one while
/// the chat surface is hidden; visibility or opening a conversation resets
/// it. The badge label caps at "9+".
pub struct UnreadTracker {
    session: Arc<Session>,
    event_bus: Arc<dyn EventBus>,
    state: Mutex<TrackerState>,
}

#[derive(Debug, Default)]
struct TrackerState {
    count: u32,
    visible: bool,
}

impl UnreadTracker {
    const BADGE_CAP: u32 = 9;

    pub fn new(session: Arc<Session>, event_bus: Arc<dyn EventBus>) -> Self {
        Self {
            session,
            event_bus,
            state: Mutex::new(TrackerState::default()),
        }
    }

    pub fn count(&self) -> u32 {
        self.state.lock().unwrap().count
    }

    /// Badge text, `None` when there is nothing unseen.
    pub fn badge(&self) -> Option<String> {
        let count = self.count();
        match count {
            0 => None,
            c if c > Self::BADGE_CAP => Some("9+".to_string()),
            c => Some(c.to_string()),
        }
    }

    pub fn handle_event(&self, event: &Event) {
        match &event.payload {
            EventPayload::MessageReceived {
                conversation_id, ..
            } => {
                let changed = {
                    let mut state = self.state.lock().unwrap();
                    if !state.visible && !self.session.is_conversation_open(*conversation_id) {
                        state.count = state.count.saturating_add(1);
                        true
                    } else {
                        false
                    }
                };
                if changed {
                    self.publish_badge();
                }
            }
            EventPayload::SurfaceShown => {
                let mut state = self.state.lock().unwrap();
                state.visible = true;
                state.count = 0;
                drop(state);
                self.publish_badge();
            }
            EventPayload::SurfaceHidden => {
                self.state.lock().unwrap().visible = false;
            }
            EventPayload::ConversationOpened { .. } => {
                self.state.lock().unwrap().count = 0;
                self.publish_badge();
            }
            _ => {}
        }
    }

    pub async fn run(self: Arc<Self>) -> Result<(), RosterError> {
        let mut sub = self
            .event_bus
            .subscribe("{chat,ui}.**")
            .map_err(|e| RosterError::EventBus(e.to_string()))?;

        loop {
            match sub.recv().await {
                Ok(event) => self.handle_event(&event),
                Err(EventBusError::ChannelClosed) => {
                    debug!("event bus closed, unread tracker stopping");
                    return Ok(());
                }
                Err(EventBusError::Lagged(count)) => {
                    warn!(count, "unread tracker lagged, some events dropped");
                }
                Err(e) => {
                    error!(error = %e, "unread tracker subscription error");
                    return Err(RosterError::EventBus(e.to_string()));
                }
            }
        }
    }

    fn publish_badge(&self) {
        let Ok(channel) = Channel::new("ui.badge.updated") else {
            return;
        };
        let _ = self.event_bus.publish(Event::new(
            channel,
            EventSource::System("unread".into()),
            EventPayload::BadgeUpdated {
                label: self.badge(),
            },
        ));
    }
}
