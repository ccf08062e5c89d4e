#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;
    use tokio::time::timeout;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use burrow_api::ChatApi;
    use burrow_core::config::ClientConfig;
    use burrow_core::event::{
        BroadcastEventBus, Channel, Event, EventBus, EventPayload, EventSource,
    };
    use burrow_core::session::Session;
    use burrow_core::types::{Contact, CurrentUser, DeliveryState};
    use burrow_messaging::{ConversationStore, OutboundQueue, TypingSignal};
    use burrow_roster::{RosterModel, UnreadTracker};
    use burrow_transport::FrameDispatcher;

    const TIMEOUT: Duration = Duration::from_millis(500);

    fn make_session() -> Arc<Session> {
        Arc::new(Session::new(CurrentUser {
            id: 1,
            username: "me".into(),
            first_name: "Me".into(),
            last_name: "User".into(),
        }))
    }

    fn contact(id: i64, name: &str, online: bool, conversation_id: Option<i64>) -> Contact {
        Contact {
            id,
            first_name: name.to_string(),
            last_name: "Tester".to_string(),
            username: name.to_lowercase(),
            avatar_url: None,
            online,
            last_message_at: None,
            last_message_preview: None,
            unread_count: 0,
            conversation_id,
        }
    }

    fn online_event() -> Event {
        Event::new(
            Channel::new("system.connection.established").unwrap(),
            EventSource::Transport,
            EventPayload::ConnectionEstablished,
        )
    }

    async fn backend_with_history() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/conversation"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": 22, "content": "how are you?", "sent_at": "2024-05-01T12:01:00Z", "is_outgoing": false},
                {"id": 21, "content": "hi", "sent_at": "2024-05-01T12:00:00Z", "is_outgoing": true}
            ])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/mark-seen"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        server
    }

    // ── 1. Inbound frame fan-out ─────────────────────────────────────
    // One raw frame through the dispatcher reaches roster and unread
    // tracker with the right split of effects.

    #[tokio::test]
    async fn message_frame_fans_out_to_roster_and_badge() {
        let session = make_session();
        let bus: Arc<dyn EventBus> = Arc::new(BroadcastEventBus::default());
        let dispatcher = FrameDispatcher::new(bus.clone());

        let roster = Arc::new(RosterModel::new(session.clone(), bus.clone()));
        let unread = Arc::new(UnreadTracker::new(session.clone(), bus.clone()));
        roster.load(vec![
            contact(2, "Ada", true, Some(20)),
            contact(3, "Bob", true, Some(30)),
        ]);

        let mut chat_sub = bus.subscribe("chat.**").unwrap();
        dispatcher
            .dispatch(r#"{"kind":"message","content":"lunch?","author_id":3,"conversation_id":30}"#);

        let event = timeout(TIMEOUT, chat_sub.recv()).await.unwrap().unwrap();
        roster.handle_event(&event);
        unread.handle_event(&event);

        // Bob has the newest message now: first in the roster, one unread
        let contacts = roster.contacts();
        assert_eq!(contacts[0].id, 3);
        assert_eq!(contacts[0].unread_count, 1);
        assert_eq!(contacts[0].last_message_preview.as_deref(), Some("lunch?"));
        assert_eq!(unread.badge().as_deref(), Some("1"));
    }

    // ── 2. Optimistic send → ack reconciliation ─────────────────────
    // OutboundQueue composes, ConversationStore renders, the ack resolves
    // the pending message and the new conversation id is adopted everywhere.

    #[tokio::test]
    async fn first_message_to_new_contact_reconciles_on_ack() {
        let server = MockServer::start().await;
        let config = ClientConfig {
            api_base_url: server.uri(),
            ..ClientConfig::default()
        };
        let session = make_session();
        let bus: Arc<dyn EventBus> = Arc::new(BroadcastEventBus::default());
        let api = Arc::new(ChatApi::new(&config).unwrap());

        let store = Arc::new(ConversationStore::new(
            session.clone(),
            api,
            bus.clone(),
            config.page_size,
        ));
        let outbound = Arc::new(OutboundQueue::new(session.clone(), bus.clone()));
        outbound.handle_event(&online_event());

        // No conversation exists with this contact yet
        store.open(7, None).await.unwrap();

        let mut composed_sub = bus.subscribe("ui.message.composed").unwrap();
        let mut frame_sub = bus.subscribe("ui.frame.send").unwrap();
        let mut delivered_sub = bus.subscribe("ui.message.delivered").unwrap();

        let message = outbound.send(None, 7, "first contact").unwrap();
        assert_eq!(message.delivery, DeliveryState::Pending);
        let temp_id = message.temp_id.unwrap();

        // The optimistic message lands in the store via the bus
        let composed = timeout(TIMEOUT, composed_sub.recv()).await.unwrap().unwrap();
        store.handle_event(&composed);
        assert_eq!(store.messages().len(), 1);
        assert_eq!(store.messages()[0].delivery, DeliveryState::Pending);

        // The frame carries the correlation id
        let frame = timeout(TIMEOUT, frame_sub.recv()).await.unwrap().unwrap();
        assert!(matches!(
            frame.payload,
            EventPayload::FrameSendRequested {
                frame: burrow_core::frame::OutboundFrame::Message {
                    temp_id: frame_temp,
                    conversation_id: 0,
                    ..
                }
            } if frame_temp == temp_id
        ));

        // Server acks and assigns the conversation
        outbound.handle_event(&Event::new(
            Channel::new("chat.ack.received").unwrap(),
            EventSource::Transport,
            EventPayload::AckReceived {
                temp_id,
                conversation_id: 70,
            },
        ));
        let delivered = timeout(TIMEOUT, delivered_sub.recv()).await.unwrap().unwrap();
        store.handle_event(&delivered);

        let messages = store.messages();
        assert_eq!(messages[0].delivery, DeliveryState::Delivered);
        assert_eq!(messages[0].conversation_id, Some(70));
        assert!(session.is_conversation_open(70));
    }

    // ── 3. Open conversation: history + live messages + unread zero ──

    #[tokio::test]
    async fn opening_a_conversation_loads_history_and_keeps_unread_zero() {
        let server = backend_with_history().await;
        let config = ClientConfig {
            api_base_url: server.uri(),
            ..ClientConfig::default()
        };
        let session = make_session();
        let bus: Arc<dyn EventBus> = Arc::new(BroadcastEventBus::default());
        let api = Arc::new(ChatApi::new(&config).unwrap());

        let store = Arc::new(ConversationStore::new(
            session.clone(),
            api,
            bus.clone(),
            config.page_size,
        ));
        let roster = Arc::new(RosterModel::new(session.clone(), bus.clone()));
        let unread = Arc::new(UnreadTracker::new(session.clone(), bus.clone()));
        let mut ada = contact(2, "Ada", true, Some(20));
        ada.unread_count = 5;
        roster.load(vec![ada]);

        let mut opened_sub = bus.subscribe("ui.conversation.opened").unwrap();
        store.open(2, Some(20)).await.unwrap();

        // History arrived ascending
        let contents: Vec<String> =
            store.messages().iter().map(|m| m.content.clone()).collect();
        assert_eq!(contents, vec!["hi", "how are you?"]);

        // The opened event clears the contact's unread count
        let opened = timeout(TIMEOUT, opened_sub.recv()).await.unwrap().unwrap();
        roster.handle_event(&opened);
        unread.handle_event(&opened);
        assert_eq!(roster.contacts()[0].unread_count, 0);

        // A live message for the open conversation: rendered, not counted
        let live = Event::new(
            Channel::new("chat.message.received").unwrap(),
            EventSource::Transport,
            EventPayload::MessageReceived {
                content: "still there?".into(),
                author_id: 2,
                conversation_id: 20,
            },
        );
        store.handle_event(&live);
        roster.handle_event(&live);
        unread.handle_event(&live);

        assert_eq!(store.messages().len(), 3);
        assert_eq!(roster.contacts()[0].unread_count, 0);
        assert_eq!(unread.count(), 0);
    }

    // ── 4. Presence flip reorders the roster ─────────────────────────

    #[tokio::test]
    async fn status_frame_moves_contact_to_the_online_group() {
        let session = make_session();
        let bus: Arc<dyn EventBus> = Arc::new(BroadcastEventBus::default());
        let dispatcher = FrameDispatcher::new(bus.clone());
        let roster = Arc::new(RosterModel::new(session.clone(), bus.clone()));

        let bob = contact(3, "Bob", false, Some(30));
        let mut ada = contact(2, "Ada", true, Some(20));
        ada.last_message_at = Some("2024-01-01T00:00:00Z".parse().unwrap());
        roster.load(vec![bob, ada]);

        let mut chat_sub = bus.subscribe("chat.contact.status").unwrap();
        dispatcher.dispatch(r#"{"kind":"user_status","id":3,"isOnline":true}"#);
        let event = timeout(TIMEOUT, chat_sub.recv()).await.unwrap().unwrap();
        roster.handle_event(&event);

        // Both online now; Ada has history so she stays first
        let ids: Vec<i64> = roster.contacts().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![2, 3]);
        assert_eq!(roster.online_count(), 2);
    }

    // ── 5. Typing round trip with the run loop live ──────────────────

    #[tokio::test(start_paused = true)]
    async fn typing_indicator_round_trip_through_the_bus() {
        let session = make_session();
        let bus: Arc<dyn EventBus> = Arc::new(BroadcastEventBus::default());
        let dispatcher = FrameDispatcher::new(bus.clone());
        let typing = Arc::new(TypingSignal::new(
            session.clone(),
            bus.clone(),
            Duration::from_millis(3000),
            Duration::from_millis(1000),
        ));
        session.open_conversation(2, Some(20));

        let typing_task = tokio::spawn(typing.clone().run());
        tokio::task::yield_now().await;

        let mut started_sub = bus.subscribe("ui.typing.started").unwrap();
        dispatcher.dispatch(r#"{"kind":"typing","conversation_id":20}"#);

        let started = timeout(TIMEOUT, started_sub.recv()).await.unwrap().unwrap();
        assert!(matches!(
            started.payload,
            EventPayload::TypingStarted { conversation_id: 20 }
        ));
        assert_eq!(typing.active_indicator(), Some(20));

        // No refresh: the indicator expires on its own
        tokio::time::sleep(Duration::from_millis(3100)).await;
        tokio::task::yield_now().await;
        assert_eq!(typing.active_indicator(), None);

        typing_task.abort();
    }

    // ── 6. Full client lifecycle over a scripted transport ───────────
    // Socket frames in, roster/badge/store effects out, optimistic send
    // acked, graceful close.

    mod scripted {
        use std::collections::VecDeque;
        use std::sync::{Mutex, OnceLock};

        use burrow_transport::{ConnectionError, Transport};

        fn inbox() -> &'static Mutex<VecDeque<String>> {
            static INBOX: OnceLock<Mutex<VecDeque<String>>> = OnceLock::new();
            INBOX.get_or_init(|| Mutex::new(VecDeque::new()))
        }

        pub fn push_frame(raw: &str) {
            inbox().lock().unwrap().push_back(raw.to_string());
        }

        /// Transport fed frame-by-frame from the test body.
        pub struct ScriptedTransport;

        impl Transport for ScriptedTransport {
            async fn connect(_url: &str) -> Result<Self, ConnectionError> {
                Ok(Self)
            }

            async fn send(&mut self, _text: &str) -> Result<(), ConnectionError> {
                Ok(())
            }

            async fn recv(&mut self) -> Result<Option<String>, ConnectionError> {
                loop {
                    if let Some(raw) = inbox().lock().unwrap().pop_front() {
                        return Ok(Some(raw));
                    }
                    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                }
            }

            async fn close(&mut self) -> Result<(), ConnectionError> {
                Ok(())
            }
        }
    }

    async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for: {what}");
    }

    #[tokio::test]
    async fn full_client_lifecycle_over_the_socket() {
        use burrow_client::ChatClient;
        use burrow_core::frame::OutboundFrame;
        use burrow_transport::ConnectionState;
        use scripted::{ScriptedTransport, push_frame};

        let server = backend_with_history().await;
        Mock::given(method("POST"))
            .and(path("/me"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 1,
                "username": "me",
                "first_name": "Me",
                "last_name": "User"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/recent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": 2, "first_name": "Ada", "last_name": "L", "username": "ada",
                 "is_online": true, "conversation_id": 20,
                 "last_message_at": "2024-05-01T12:01:00Z"},
                {"id": 3, "first_name": "Bob", "last_name": "M", "username": "bob",
                 "is_online": false, "conversation_id": 0}
            ])))
            .mount(&server)
            .await;

        let config = ClientConfig {
            api_base_url: server.uri(),
            ..ClientConfig::default()
        };
        let mut client = ChatClient::<ScriptedTransport>::connect(config).await.unwrap();
        eventually("socket open", || {
            client.connection_state() == ConnectionState::Open
        })
        .await;
        // Let every manager loop reach its subscription before frames flow
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Presence push moves Bob into the online group
        push_frame(r#"{"kind":"user_status","id":3,"isOnline":true}"#);
        eventually("bob online", || client.roster()[1].online).await;
        assert_eq!(client.online_count(), 2);

        // Open Ada's conversation: history loads ascending
        client.open_conversation(2, Some(20)).await.unwrap();
        assert_eq!(client.messages().len(), 2);

        // Remote typing shows an indicator for the open conversation
        push_frame(r#"{"kind":"typing","conversation_id":20}"#);
        eventually("typing indicator", || client.typing_indicator() == Some(20)).await;

        // The awaited message arrives: appended, indicator cleared, no badge
        push_frame(
            r#"{"kind":"message","content":"here now","author_id":2,"conversation_id":20}"#,
        );
        eventually("live message", || client.messages().len() == 3).await;
        assert_eq!(client.typing_indicator(), None);
        assert_eq!(client.unread_badge(), None);

        // Optimistic send, then the server acks it
        let mut frame_sub = client.subscribe("ui.frame.send").unwrap();
        let message = client.send_message(2, "hello ada").unwrap();
        assert_eq!(message.delivery, DeliveryState::Pending);
        let temp_id = message.temp_id.unwrap();

        let frame_event = timeout(TIMEOUT, frame_sub.recv()).await.unwrap().unwrap();
        assert!(matches!(
            frame_event.payload,
            EventPayload::FrameSendRequested {
                frame: OutboundFrame::Message { temp_id: sent, .. }
            } if sent == temp_id
        ));

        push_frame(&format!(
            r#"{{"kind":"ack","temp_id":{temp_id},"conversation_id":20}}"#
        ));
        eventually("message delivered", || {
            client
                .messages()
                .iter()
                .any(|m| m.delivery == DeliveryState::Delivered && m.content == "hello ada")
        })
        .await;

        // A message for a different, closed conversation only moves the badge
        push_frame(
            r#"{"kind":"message","content":"psst","author_id":3,"conversation_id":99}"#,
        );
        eventually("badge", || client.unread_badge().as_deref() == Some("1")).await;
        assert_eq!(client.messages().len(), 4);

        client.close();
        eventually("socket closed", || {
            client.connection_state() == ConnectionState::Closed
        })
        .await;
    }

    // ── 7. Send while offline stays failed even after reconnect ──────

    #[tokio::test]
    async fn offline_send_is_not_retried_after_reconnect() {
        let session = make_session();
        let bus: Arc<dyn EventBus> = Arc::new(BroadcastEventBus::default());
        let outbound = Arc::new(OutboundQueue::new(session.clone(), bus.clone()));

        let mut frame_sub = bus.subscribe("ui.frame.send").unwrap();

        let message = outbound.send(Some(20), 2, "lost words").unwrap();
        assert_eq!(message.delivery, DeliveryState::Failed);

        // Connection comes up afterwards: nothing is replayed
        outbound.handle_event(&online_event());
        let nothing = timeout(Duration::from_millis(50), frame_sub.recv()).await;
        assert!(nothing.is_err(), "failed messages are not queued for retry");
        assert_eq!(outbound.pending_count(), 0);
    }
}
