use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{debug, error, warn};

use burrow_api::{ChatApi, MessageRecord};
use burrow_core::error::EventBusError;
use burrow_core::event::{
    Channel, Event, EventBus, EventPayload, EventSource, HistoryPlacement,
};
use burrow_core::session::Session;
use burrow_core::types::{DeliveryState, Direction, Message};

use crate::MessagingError;

/// Message history of the currently open conversation.
///
/// Pages are fetched strictly older than the cursor and arrive newest
/// first; the store reverses them before insertion so the list is always
/// ascending. Older-page loads are single-flight: overlapping triggers are
/// dropped, never queued. A page that comes back after the user switched
/// conversations is discarded on arrival.
pub struct ConversationStore {
    session: Arc<Session>,
    api: Arc<ChatApi>,
    event_bus: Arc<dyn EventBus>,
    page_size: u32,
    state: Mutex<StoreState>,
}

#[derive(Default)]
struct StoreState {
    contact_id: Option<i64>,
    conversation_id: Option<i64>,
    messages: Vec<Message>,
    oldest_loaded_id: Option<i64>,
    end_of_history: bool,
    loading: bool,
}

impl ConversationStore {
    pub fn new(
        session: Arc<Session>,
        api: Arc<ChatApi>,
        event_bus: Arc<dyn EventBus>,
        page_size: u32,
    ) -> Self {
        Self {
            session,
            api,
            event_bus,
            page_size,
            state: Mutex::new(StoreState::default()),
        }
    }

    /// Open a conversation: reset pagination, record it in the session, and
    /// load the most recent page. A contact with no conversation yet opens
    /// an empty view without a fetch.
    pub async fn open(
        &self,
        contact_id: i64,
        conversation_id: Option<i64>,
    ) -> Result<(), MessagingError> {
        {
            let mut state = self.state.lock().unwrap();
            *state = StoreState {
                contact_id: Some(contact_id),
                conversation_id,
                ..StoreState::default()
            };
        }
        self.session.open_conversation(contact_id, conversation_id);
        self.emit(
            "ui.conversation.opened",
            EventPayload::ConversationOpened {
                contact_id,
                conversation_id,
            },
        );

        match conversation_id {
            Some(conversation_id) => self.load_page(conversation_id, None).await,
            None => Ok(()),
        }
    }

    /// Load the page older than the current cursor. A no-op once the history
    /// is exhausted or while another load is in flight.
    pub async fn load_older(&self) -> Result<(), MessagingError> {
        let (conversation_id, cursor) = {
            let state = self.state.lock().unwrap();
            let Some(conversation_id) = state.conversation_id else {
                return Ok(());
            };
            if state.end_of_history || state.loading {
                return Ok(());
            }
            let Some(cursor) = state.oldest_loaded_id else {
                // Nothing loaded yet; the initial page is still the way in
                return Ok(());
            };
            (conversation_id, cursor)
        };

        self.load_page(conversation_id, Some(cursor)).await
    }

    async fn load_page(
        &self,
        conversation_id: i64,
        cursor: Option<i64>,
    ) -> Result<(), MessagingError> {
        {
            let mut state = self.state.lock().unwrap();
            if state.loading {
                return Ok(());
            }
            state.loading = true;
        }

        let result = self
            .api
            .conversation_page(conversation_id, cursor, self.page_size)
            .await;

        let mut state = self.state.lock().unwrap();

        // The fetch was tagged with its conversation; a result for a
        // conversation that is no longer open is dropped here, and the
        // in-flight flag it would clear belongs to the new conversation.
        if state.conversation_id != Some(conversation_id) {
            debug!(conversation_id, "discarding page for closed conversation");
            return Ok(());
        }
        state.loading = false;

        let records = match result {
            Ok(records) => records,
            Err(e) => {
                warn!(conversation_id, error = %e, "history load failed");
                drop(state);
                self.emit(
                    "ui.history.failed",
                    EventPayload::HistoryLoadFailed {
                        conversation_id,
                        reason: e.to_string(),
                    },
                );
                return Err(e.into());
            }
        };

        if records.is_empty() {
            state.end_of_history = true;
            drop(state);
            self.emit(
                "ui.history.end",
                EventPayload::EndOfHistory { conversation_id },
            );
            return Ok(());
        }

        // Server order is newest first; insertion order is ascending
        let mut page: Vec<Message> = records
            .into_iter()
            .rev()
            .map(|record| self.message_from_record(conversation_id, record))
            .collect();

        let count = page.len();
        let placement = if cursor.is_none() {
            state.messages.append(&mut page);
            HistoryPlacement::Append
        } else {
            page.extend(state.messages.drain(..));
            state.messages = page;
            HistoryPlacement::Prepend
        };
        state.oldest_loaded_id = state.messages.first().and_then(|m| m.server_id);
        drop(state);

        self.emit(
            "ui.history.loaded",
            EventPayload::HistoryLoaded {
                conversation_id,
                placement,
                anchor: cursor,
                count,
            },
        );

        self.mark_seen(conversation_id);
        Ok(())
    }

    /// Fire-and-forget: tell the server this conversation was seen. A
    /// failure is logged and otherwise invisible.
    fn mark_seen(&self, conversation_id: i64) {
        let api = self.api.clone();
        tokio::spawn(async move {
            if let Err(e) = api.mark_seen(conversation_id).await {
                debug!(conversation_id, error = %e, "mark seen failed");
            }
        });
    }

    pub fn handle_event(&self, event: &Event) {
        match &event.payload {
            EventPayload::MessageReceived {
                content,
                author_id,
                conversation_id,
            } => {
                let mut state = self.state.lock().unwrap();
                if state.conversation_id != Some(*conversation_id) {
                    return;
                }
                let direction = if *author_id == self.session.user_id() {
                    Direction::Outgoing
                } else {
                    Direction::Incoming
                };
                state.messages.push(Message {
                    server_id: None,
                    conversation_id: Some(*conversation_id),
                    author_id: *author_id,
                    content: content.clone(),
                    sent_at: Utc::now(),
                    direction,
                    delivery: DeliveryState::Delivered,
                    temp_id: None,
                });
            }
            EventPayload::MessageComposed { message } => {
                let mut state = self.state.lock().unwrap();
                if state.contact_id.is_some() {
                    state.messages.push(message.clone());
                }
            }
            EventPayload::MessageAcknowledged {
                temp_id,
                conversation_id,
            } => {
                let mut state = self.state.lock().unwrap();
                if let Some(message) = state
                    .messages
                    .iter_mut()
                    .find(|m| m.temp_id == Some(*temp_id))
                {
                    message.delivery = DeliveryState::Delivered;
                    message.conversation_id = Some(*conversation_id);
                    message.temp_id = None;
                }
                // First message to a new contact: the conversation now exists
                if state.conversation_id.is_none() && state.contact_id.is_some() {
                    state.conversation_id = Some(*conversation_id);
                }
                drop(state);
                self.session.adopt_conversation(*conversation_id);
            }
            _ => {}
        }
    }

    pub async fn run(self: Arc<Self>) -> Result<(), MessagingError> {
        let mut sub = self
            .event_bus
            .subscribe("{chat,ui}.**")
            .map_err(|e| MessagingError::EventBus(e.to_string()))?;

        loop {
            match sub.recv().await {
                Ok(event) => self.handle_event(&event),
                Err(EventBusError::ChannelClosed) => {
                    debug!("event bus closed, conversation store stopping");
                    return Ok(());
                }
                Err(EventBusError::Lagged(count)) => {
                    warn!(count, "conversation store lagged, some events dropped");
                }
                Err(e) => {
                    error!(error = %e, "conversation store subscription error");
                    return Err(MessagingError::EventBus(e.to_string()));
                }
            }
        }
    }

    /// Snapshot of the open conversation, ascending by history order.
    pub fn messages(&self) -> Vec<Message> {
        self.state.lock().unwrap().messages.clone()
    }

    pub fn end_of_history(&self) -> bool {
        self.state.lock().unwrap().end_of_history
    }

    pub fn is_loading(&self) -> bool {
        self.state.lock().unwrap().loading
    }

    fn message_from_record(&self, conversation_id: i64, record: MessageRecord) -> Message {
        Message {
            server_id: Some(record.id),
            conversation_id: Some(conversation_id),
            author_id: if record.is_outgoing {
                self.session.user_id()
            } else {
                self.session.current_contact().unwrap_or_default()
            },
            content: record.content,
            sent_at: record.sent_at,
            direction: if record.is_outgoing {
                Direction::Outgoing
            } else {
                Direction::Incoming
            },
            delivery: DeliveryState::Delivered,
            temp_id: None,
        }
    }

    fn emit(&self, channel: &str, payload: EventPayload) {
        let Ok(channel) = Channel::new(channel) else {
            return;
        };
        let _ = self.event_bus.publish(Event::new(
            channel,
            EventSource::System("conversation".into()),
            payload,
        ));
    }
}
