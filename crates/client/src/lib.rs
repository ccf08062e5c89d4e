//! The assembled chat client runtime.
//!
//! [`ChatClient::connect`] bootstraps identity and roster over the HTTP
//! endpoints, wires every manager to one event bus and session context,
//! and drives the socket. The embedding surface (a UI shell, a test) talks
//! to the facade and renders from bus events; routing, authentication, and
//! rendering stay outside.

use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, warn};

use burrow_api::{ApiError, ChatApi};
use burrow_core::config::ClientConfig;
use burrow_core::event::{
    BroadcastEventBus, Channel, Event, EventBus, EventPayload, EventSource, EventSubscription,
};
use burrow_core::session::Session;
use burrow_core::types::{Contact, CurrentUser, Message};
use burrow_messaging::{ConversationStore, MessagingError, OutboundQueue, TypingSignal};
use burrow_roster::{RosterError, RosterModel, UnreadTracker};
use burrow_transport::{
    ConnectionError, ConnectionManager, ConnectionState, Transport, WebSocketTransport,
};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Messaging(#[from] MessagingError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Roster(#[from] RosterError),

    #[error("event bus error: {0}")]
    EventBus(String),
}

pub struct ChatClient<T: Transport = WebSocketTransport> {
    session: Arc<Session>,
    event_bus: Arc<dyn EventBus>,
    connection: Arc<ConnectionManager<T>>,
    roster: Arc<RosterModel>,
    unread: Arc<UnreadTracker>,
    store: Arc<ConversationStore>,
    outbound: Arc<OutboundQueue>,
    typing: Arc<TypingSignal>,
    api: Arc<ChatApi>,
    manager_tasks: Vec<JoinHandle<()>>,
    _connection_task: JoinHandle<()>,
}

impl<T: Transport + 'static> ChatClient<T> {
    /// Bootstrap a session: fetch the authenticated identity, start the
    /// socket, and load the roster. The caller owns redirecting
    /// unauthenticated users; an auth failure surfaces here as the identity
    /// endpoint's error.
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let api = Arc::new(ChatApi::new(&config)?);
        let user = api.current_user().await?;
        let session = Arc::new(Session::new(user));
        let event_bus: Arc<dyn EventBus> = Arc::new(BroadcastEventBus::default());

        let connection = Arc::new(ConnectionManager::<T>::new(&config, event_bus.clone()));
        let roster = Arc::new(RosterModel::new(session.clone(), event_bus.clone()));
        let unread = Arc::new(UnreadTracker::new(session.clone(), event_bus.clone()));
        let store = Arc::new(ConversationStore::new(
            session.clone(),
            api.clone(),
            event_bus.clone(),
            config.page_size,
        ));
        let outbound = Arc::new(OutboundQueue::new(session.clone(), event_bus.clone()));
        let typing = Arc::new(TypingSignal::new(
            session.clone(),
            event_bus.clone(),
            config.typing_expiry(),
            config.typing_send_interval(),
        ));

        let mut manager_tasks = Vec::new();
        manager_tasks.push(spawn_loop("roster", roster.clone().run()));
        manager_tasks.push(spawn_loop("unread", unread.clone().run()));
        manager_tasks.push(spawn_loop("conversation", store.clone().run()));
        manager_tasks.push(spawn_loop("outbound", outbound.clone().run()));
        manager_tasks.push(spawn_loop("typing", typing.clone().run()));
        let connection_task = spawn_loop("connection", connection.clone().run());

        let client = Self {
            session,
            event_bus,
            connection,
            roster,
            unread,
            store,
            outbound,
            typing,
            api,
            manager_tasks,
            _connection_task: connection_task,
        };
        client.refresh_roster().await;
        Ok(client)
    }

    /// Re-fetch the roster. A failure is announced as an inline error and
    /// leaves the previous roster in place.
    pub async fn refresh_roster(&self) {
        match self.api.recent_contacts().await {
            Ok(contacts) => self.roster.load(contacts),
            Err(e) => {
                warn!(error = %e, "roster load failed");
                self.emit(
                    "ui.roster.failed",
                    EventPayload::RosterLoadFailed {
                        reason: e.to_string(),
                    },
                );
            }
        }
    }

    pub async fn open_conversation(
        &self,
        contact_id: i64,
        conversation_id: Option<i64>,
    ) -> Result<(), ClientError> {
        Ok(self.store.open(contact_id, conversation_id).await?)
    }

    pub async fn load_older(&self) -> Result<(), ClientError> {
        Ok(self.store.load_older().await?)
    }

    /// Send to the open conversation's peer. Validation failures (empty
    /// content) come back as [`MessagingError::EmptyMessage`].
    pub fn send_message(&self, recipient_id: i64, content: &str) -> Result<Message, ClientError> {
        Ok(self
            .outbound
            .send(self.session.current_conversation(), recipient_id, content)?)
    }

    pub fn notify_typing(&self) {
        self.typing.notify_input();
    }

    /// Tell the runtime whether the chat surface is on screen; drives the
    /// unread badge reset/counting split.
    pub fn set_surface_visible(&self, visible: bool) {
        if visible {
            self.emit("ui.surface.shown", EventPayload::SurfaceShown);
        } else {
            self.emit("ui.surface.hidden", EventPayload::SurfaceHidden);
        }
    }

    pub fn user(&self) -> &CurrentUser {
        self.session.user()
    }

    pub fn roster(&self) -> Vec<Contact> {
        self.roster.contacts()
    }

    pub fn online_count(&self) -> usize {
        self.roster.online_count()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.store.messages()
    }

    pub fn end_of_history(&self) -> bool {
        self.store.end_of_history()
    }

    pub fn unread_badge(&self) -> Option<String> {
        self.unread.badge()
    }

    pub fn typing_indicator(&self) -> Option<i64> {
        self.typing.active_indicator()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Subscribe to render signals (`ui.**`) or any other event pattern.
    pub fn subscribe(&self, pattern: &str) -> Result<EventSubscription, ClientError> {
        self.event_bus
            .subscribe(pattern)
            .map_err(|e| ClientError::EventBus(e.to_string()))
    }

    /// Graceful shutdown: closes the socket without scheduling a reconnect
    /// and stops the manager loops. The connection task winds itself down
    /// after publishing its final state.
    pub fn close(&mut self) {
        self.connection.close();
        for task in self.manager_tasks.drain(..) {
            task.abort();
        }
    }

    fn emit(&self, channel: &str, payload: EventPayload) {
        let Ok(channel) = Channel::new(channel) else {
            return;
        };
        let _ = self
            .event_bus
            .publish(Event::new(channel, EventSource::Ui, payload));
    }
}

fn spawn_loop<E>(
    name: &'static str,
    future: impl std::future::Future<Output = Result<(), E>> + Send + 'static,
) -> JoinHandle<()>
where
    E: std::fmt::Display,
{
    tokio::spawn(async move {
        if let Err(e) = future.await {
            error!(manager = name, error = %e, "manager loop ended with error");
        }
    })
}
