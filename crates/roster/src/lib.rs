pub mod unread;

use std::cmp::Ordering;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use tracing::{debug, error, warn};

use burrow_core::error::EventBusError;
use burrow_core::event::{Channel, Event, EventBus, EventPayload, EventSource};
use burrow_core::session::Session;
use burrow_core::types::{Contact, Direction};

pub use unread::UnreadTracker;

#[derive(Debug, thiserror::Error)]
pub enum RosterError {
    #[error("event bus error: {0}")]
    EventBus(String),
}

/// Partial update shallow-merged into a contact.
#[derive(Debug, Default, Clone)]
pub struct ContactUpdate {
    pub online: Option<bool>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub last_message_preview: Option<String>,
    pub unread_count: Option<u32>,
    pub conversation_id: Option<i64>,
}

/// Display order of the roster: online contacts first; within each group,
/// contacts with a last message first, most recent first; ties broken by
/// case-insensitive full name.
pub fn roster_order(a: &Contact, b: &Contact) -> Ordering {
    b.online
        .cmp(&a.online)
        .then_with(|| match (a.last_message_at, b.last_message_at) {
            (Some(a_at), Some(b_at)) => b_at.cmp(&a_at),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| {
            a.full_name()
                .to_lowercase()
                .cmp(&b.full_name().to_lowercase())
        })
}

/// All known contacts with presence and last-message metadata.
///
/// The roster grows only through [`load`](RosterModel::load) (the initial
/// bulk fetch); push events merge into existing entries and unknown ids are
/// ignored. Every effective merge re-sorts the whole list — rosters are
/// small — and announces a re-render.
pub struct RosterModel {
    session: Arc<Session>,
    event_bus: Arc<dyn EventBus>,
    contacts: RwLock<Vec<Contact>>,
}

impl RosterModel {
    pub fn new(session: Arc<Session>, event_bus: Arc<dyn EventBus>) -> Self {
        Self {
            session,
            event_bus,
            contacts: RwLock::new(Vec::new()),
        }
    }

    /// Replace the roster from the bulk fetch.
    pub fn load(&self, mut contacts: Vec<Contact>) {
        contacts.sort_by(roster_order);
        *self.contacts.write().unwrap() = contacts;
        self.publish_updated();
    }

    /// Shallow-merge `update` into the matching contact, then re-sort and
    /// announce. A no-op for ids the bulk load never produced.
    pub fn merge(&self, contact_id: i64, update: ContactUpdate) {
        {
            let mut contacts = self.contacts.write().unwrap();
            let Some(contact) = contacts.iter_mut().find(|c| c.id == contact_id) else {
                debug!(contact_id, "merge for unknown contact ignored");
                return;
            };

            if let Some(online) = update.online {
                contact.online = online;
            }
            if let Some(at) = update.last_message_at {
                contact.last_message_at = Some(at);
            }
            if let Some(preview) = update.last_message_preview {
                contact.last_message_preview = Some(preview);
            }
            if let Some(unread) = update.unread_count {
                contact.unread_count = unread;
            }
            if let Some(conversation_id) = update.conversation_id {
                contact.conversation_id = Some(conversation_id);
            }

            contacts.sort_by(roster_order);
        }
        self.publish_updated();
    }

    /// Sorted snapshot for rendering.
    pub fn contacts(&self) -> Vec<Contact> {
        self.contacts.read().unwrap().clone()
    }

    pub fn online_count(&self) -> usize {
        self.contacts.read().unwrap().iter().filter(|c| c.online).count()
    }

    pub fn handle_event(&self, event: &Event) {
        match &event.payload {
            EventPayload::ContactStatusChanged { contact_id, online } => {
                debug!(contact_id, online, "contact presence changed");
                self.merge(
                    *contact_id,
                    ContactUpdate {
                        online: Some(*online),
                        ..ContactUpdate::default()
                    },
                );
            }
            EventPayload::MessageReceived {
                content,
                author_id,
                conversation_id,
            } => {
                let unread = if self.session.is_conversation_open(*conversation_id) {
                    0
                } else {
                    self.unread_of(*author_id).saturating_add(1)
                };
                self.merge(
                    *author_id,
                    ContactUpdate {
                        last_message_at: Some(Utc::now()),
                        last_message_preview: Some(content.clone()),
                        unread_count: Some(unread),
                        conversation_id: Some(*conversation_id),
                        ..ContactUpdate::default()
                    },
                );
            }
            EventPayload::MessageComposed { message } => {
                // A locally sent message refreshes the recipient's row
                if message.direction == Direction::Outgoing {
                    if let Some(contact_id) = self.session.current_contact() {
                        self.merge(
                            contact_id,
                            ContactUpdate {
                                last_message_at: Some(message.sent_at),
                                last_message_preview: Some(message.content.clone()),
                                ..ContactUpdate::default()
                            },
                        );
                    }
                }
            }
            EventPayload::ConversationOpened { contact_id, .. } => {
                self.merge(
                    *contact_id,
                    ContactUpdate {
                        unread_count: Some(0),
                        ..ContactUpdate::default()
                    },
                );
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
                    debug!("event bus closed, roster model stopping");
                    return Ok(());
                }
                Err(EventBusError::Lagged(count)) => {
                    warn!(count, "roster model lagged, some events dropped");
                }
                Err(e) => {
                    error!(error = %e, "roster model subscription error");
                    return Err(RosterError::EventBus(e.to_string()));
                }
            }
        }
    }

    fn unread_of(&self, contact_id: i64) -> u32 {
        self.contacts
            .read()
            .unwrap()
            .iter()
            .find(|c| c.id == contact_id)
            .map(|c| c.unread_count)
            .unwrap_or(0)
    }

    fn publish_updated(&self) {
        let contacts = self.contacts();
        let Ok(channel) = Channel::new("ui.roster.updated") else {
            return;
        };
        let _ = self.event_bus.publish(Event::new(
            channel,
            EventSource::System("roster".into()),
            EventPayload::RosterUpdated { contacts },
        ));
    }
}
