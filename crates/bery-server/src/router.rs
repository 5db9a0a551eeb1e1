//! Message router.
//!
//! Central dispatch for every envelope a connection sends. Routing never
//! fails outward: problems become a `failed` status for the sender or a
//! log line, never an error for the transport.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use bery_shared::constants::{
    ASSISTANT_DELAY_MS, ASSISTANT_ID, ASSISTANT_NAME, DELIVERED_DELAY_MS, GROUP_PREFIX,
    READ_DELAY_MS,
};
use bery_shared::protocol::{ChatMessage, Registration};
use bery_shared::{ConnectionId, DeliveryStatus, Envelope, MessageId};

use crate::assistant::Responder;
use crate::error::RouteFailure;
use crate::registry::SharedRegistry;
use crate::status::StatusEmitter;

/// Delays for the relay-generated envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayTimings {
    /// Sender sees "delivered" this long after the relay accepts a message.
    pub delivered: Duration,
    /// Sender sees "read" this long after acceptance. Must exceed `delivered`.
    pub read: Duration,
    /// Simulated thinking time before the assistant replies.
    pub assistant: Duration,
}

impl Default for RelayTimings {
    fn default() -> Self {
        Self {
            delivered: Duration::from_millis(DELIVERED_DELAY_MS),
            read: Duration::from_millis(READ_DELAY_MS),
            assistant: Duration::from_millis(ASSISTANT_DELAY_MS),
        }
    }
}

/// Where a message for a given contact goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Assistant,
    Peer(ConnectionId),
}

#[derive(Clone)]
pub struct MessageRouter {
    registry: SharedRegistry,
    emitter: StatusEmitter,
    responder: Arc<dyn Responder>,
    timings: RelayTimings,
}

impl MessageRouter {
    pub fn new(
        registry: SharedRegistry,
        responder: Arc<dyn Responder>,
        timings: RelayTimings,
    ) -> Self {
        Self {
            emitter: StatusEmitter::new(registry.clone()),
            registry,
            responder,
            timings,
        }
    }

    /// Handle one decoded envelope from connection `from`.
    pub fn dispatch(&self, from: ConnectionId, envelope: Envelope) {
        match envelope {
            Envelope::Connect(_) => {
                debug!(conn = %from, "Client connect acknowledged");
            }
            Envelope::Register(registration) => self.register(from, registration),
            Envelope::Typing(typing) => {
                let relayed = self
                    .registry
                    .read()
                    .broadcast_except(&from, &Envelope::Typing(typing));
                debug!(conn = %from, relayed, "Typing indicator relayed");
            }
            Envelope::Message(message) => self.route_message(from, message),
            Envelope::Media(media) => self.route_message(from, ChatMessage::from(media)),
            other @ (Envelope::Status(_) | Envelope::Registered(_)) => {
                debug!(conn = %from, kind = other.kind(), "Ignoring server-only envelope from client");
            }
            Envelope::Unknown => {
                debug!(conn = %from, "Dropping envelope of unknown type");
            }
        }
    }

    fn register(&self, from: ConnectionId, registration: Registration) {
        let mut registry = self.registry.write();
        if !registry.register(from, &registration.user_id, &registration.user_name) {
            warn!(conn = %from, user = %registration.user_id, "Register from unknown connection");
            return;
        }
        registry.send(
            &from,
            Envelope::registered(registration.user_id, registration.user_name),
        );
    }

    /// The message/media path.
    ///
    /// Delivered and read ticks are scheduled for every accepted message,
    /// whatever the routing outcome, so a sender can see both ticks and a
    /// `failed` status for the same message id.
    fn route_message(&self, from: ConnectionId, message: ChatMessage) {
        let contact = message.contact_id.clone();
        let message_id = message.message_id.clone();

        self.emitter.schedule(
            from,
            Envelope::status(&contact, message_id.clone(), DeliveryStatus::Delivered),
            self.timings.delivered,
        );
        self.emitter.schedule(
            from,
            Envelope::status(&contact, message_id.clone(), DeliveryStatus::Read),
            self.timings.read,
        );

        let route = self.resolve(&contact);
        debug!(conn = %from, contact = %contact, message = %message_id, ?route, "Routing message");

        match route {
            Ok(Route::Assistant) => self.reply_as_assistant(from, &message),
            Ok(Route::Peer(target)) => {
                let registry = self.registry.read();
                let sender = registry.get(&from);
                let forwarded = ChatMessage {
                    contact_id: registry.label(&from),
                    sender_name: sender
                        .and_then(|c| c.display_name.clone())
                        .or(message.sender_name),
                    ..message
                };
                if !registry.send(&target, Envelope::Message(forwarded)) {
                    registry.send(
                        &from,
                        Envelope::failed(contact, message_id, RouteFailure::NotOnline.to_string()),
                    );
                }
            }
            Err(failure) => {
                debug!(conn = %from, contact = %contact, %failure, "Message not routable");
                self.registry
                    .read()
                    .send(&from, Envelope::failed(contact, message_id, failure.to_string()));
            }
        }
    }

    fn resolve(&self, contact: &str) -> Result<Route, RouteFailure> {
        if contact == ASSISTANT_ID {
            return Ok(Route::Assistant);
        }
        if contact.starts_with(GROUP_PREFIX) {
            return Err(RouteFailure::GroupUnsupported);
        }

        let registry = self.registry.read();
        match registry.resolve(contact) {
            Some(target) => Ok(Route::Peer(target)),
            None if registry.has_seen(contact) => Err(RouteFailure::NotOnline),
            None => Err(RouteFailure::NotFound),
        }
    }

    /// The reply text is chosen now; its id and timestamp are taken when it
    /// is actually sent.
    fn reply_as_assistant(&self, to: ConnectionId, message: &ChatMessage) {
        let text = self.responder.respond(message.text.as_deref().unwrap_or_default());

        self.emitter.schedule_with(to, self.timings.assistant, move || {
            let mut reply = ChatMessage::text(ASSISTANT_ID, MessageId::generate(), text);
            reply.sender_name = Some(ASSISTANT_NAME.to_string());
            Envelope::Message(reply)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::KeywordResponder;
    use crate::registry::ConnectionRegistry;
    use bery_shared::protocol::{StatusUpdate, Typing};
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    struct Harness {
        registry: SharedRegistry,
        router: MessageRouter,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_timings(RelayTimings::default())
        }

        fn with_timings(timings: RelayTimings) -> Self {
            let registry = ConnectionRegistry::shared();
            let router =
                MessageRouter::new(registry.clone(), Arc::new(KeywordResponder::new()), timings);
            Self { registry, router }
        }

        fn connect(&self) -> (ConnectionId, mpsc::Receiver<Envelope>) {
            let (tx, rx) = mpsc::channel(64);
            let id = self.registry.write().accept(tx);
            (id, rx)
        }

        /// Connect and register, consuming the `registered` confirmation.
        fn login(&self, user: &str) -> (ConnectionId, mpsc::Receiver<Envelope>) {
            let (id, mut rx) = self.connect();
            self.router.dispatch(id, Envelope::register(user, user.to_uppercase()));
            assert!(matches!(rx.try_recv(), Ok(Envelope::Registered(_))));
            (id, rx)
        }
    }

    fn text_to(contact: &str, id: i64, text: &str) -> Envelope {
        Envelope::Message(ChatMessage {
            timestamp: "2024-05-01T10:00:00.000Z".to_string(),
            ..ChatMessage::text(contact, MessageId::Number(id), text)
        })
    }

    /// Paused-clock timers fire on millisecond ticks.
    fn assert_elapsed(start: Instant, millis: u64) {
        let elapsed = start.elapsed();
        assert!(
            elapsed >= Duration::from_millis(millis) && elapsed < Duration::from_millis(millis + 5),
            "expected ~{millis}ms, got {elapsed:?}"
        );
    }

    fn expect_status(envelope: Envelope) -> StatusUpdate {
        match envelope {
            Envelope::Status(status) => status,
            other => panic!("expected status, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_register_confirms() {
        let harness = Harness::new();
        let (id, mut rx) = harness.connect();

        harness.router.dispatch(id, Envelope::register("alice", "Alice"));

        assert_eq!(rx.try_recv().unwrap(), Envelope::registered("alice", "Alice"));
        assert_eq!(harness.registry.read().resolve("alice"), Some(id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_direct_message_and_ticks() {
        let harness = Harness::new();
        let (alice, mut alice_rx) = harness.login("alice");
        let (_bob, mut bob_rx) = harness.login("bob");
        let start = Instant::now();

        harness.router.dispatch(alice, text_to("bob", 1001, "hi"));

        let Envelope::Message(received) = bob_rx.try_recv().unwrap() else {
            panic!("bob should receive a message");
        };
        assert_eq!(received.contact_id, "alice");
        assert_eq!(received.message_id, MessageId::Number(1001));
        assert_eq!(received.text.as_deref(), Some("hi"));
        assert_eq!(received.timestamp, "2024-05-01T10:00:00.000Z");
        assert_eq!(received.sender_name.as_deref(), Some("ALICE"));

        let delivered = expect_status(alice_rx.recv().await.unwrap());
        assert_elapsed(start, 300);
        assert_eq!(delivered.contact_id, "bob");
        assert_eq!(delivered.message_id, MessageId::Number(1001));
        assert_eq!(delivered.status, DeliveryStatus::Delivered);

        let read = expect_status(alice_rx.recv().await.unwrap());
        assert_elapsed(start, 1000);
        assert_eq!(read.status, DeliveryStatus::Read);

        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_assistant_reply_without_registration() {
        let harness = Harness::new();
        let (alice, mut alice_rx) = harness.login("alice");
        let start = Instant::now();

        harness.router.dispatch(alice, text_to(ASSISTANT_ID, 2002, "hello"));

        let delivered = expect_status(alice_rx.recv().await.unwrap());
        assert_eq!(delivered.status, DeliveryStatus::Delivered);
        assert_eq!(delivered.contact_id, ASSISTANT_ID);
        let read = expect_status(alice_rx.recv().await.unwrap());
        assert_eq!(read.status, DeliveryStatus::Read);

        let Envelope::Message(reply) = alice_rx.recv().await.unwrap() else {
            panic!("expected assistant reply");
        };
        assert_elapsed(start, 1500);
        assert_eq!(reply.contact_id, ASSISTANT_ID);
        assert_eq!(reply.sender_name.as_deref(), Some(ASSISTANT_NAME));
        assert_ne!(reply.message_id, MessageId::Number(2002));
        assert_eq!(
            reply.text.as_deref(),
            Some(KeywordResponder::new().respond("hello").as_str())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_back_to_back_assistant_replies_get_distinct_ids() {
        let harness = Harness::new();
        let (alice, mut alice_rx) = harness.login("alice");

        harness.router.dispatch(alice, text_to(ASSISTANT_ID, 1, "balance"));
        harness.router.dispatch(alice, text_to(ASSISTANT_ID, 2, "invest"));

        let mut replies = Vec::new();
        while replies.len() < 2 {
            if let Envelope::Message(reply) = alice_rx.recv().await.unwrap() {
                replies.push(reply);
            }
        }
        assert_ne!(replies[0].message_id, replies[1].message_id);
    }

    #[tokio::test]
    async fn test_assistant_reply_stamped_when_sent() {
        let harness = Harness::with_timings(RelayTimings {
            delivered: Duration::from_millis(10),
            read: Duration::from_millis(20),
            assistant: Duration::from_millis(100),
        });
        let (alice, mut alice_rx) = harness.login("alice");

        let dispatched_at = chrono::Utc::now();
        harness.router.dispatch(alice, text_to(ASSISTANT_ID, 1, "hello"));

        let reply = loop {
            if let Envelope::Message(reply) = alice_rx.recv().await.unwrap() {
                break reply;
            }
        };
        let stamped = chrono::DateTime::parse_from_rfc3339(&reply.timestamp)
            .unwrap()
            .with_timezone(&chrono::Utc);
        assert!(stamped >= dispatched_at + chrono::Duration::milliseconds(90));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_recipient_fails_once() {
        let harness = Harness::new();
        let (alice, mut alice_rx) = harness.login("alice");
        let (_bob, mut bob_rx) = harness.login("bob");

        harness.router.dispatch(alice, text_to("charlie", 3003, "hey"));

        let failed = expect_status(alice_rx.try_recv().unwrap());
        assert_eq!(failed.status, DeliveryStatus::Failed);
        assert_eq!(failed.contact_id, "charlie");
        assert_eq!(failed.message_id, MessageId::Number(3003));
        assert_eq!(failed.error.as_deref(), Some("User not found"));

        // the cosmetic ticks still arrive
        let statuses: Vec<DeliveryStatus> = vec![
            expect_status(alice_rx.recv().await.unwrap()).status,
            expect_status(alice_rx.recv().await.unwrap()).status,
        ];
        assert_eq!(statuses, vec![DeliveryStatus::Delivered, DeliveryStatus::Read]);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(alice_rx.try_recv().is_err());
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_recipient() {
        let harness = Harness::new();
        let (alice, mut alice_rx) = harness.login("alice");
        let (charlie, _charlie_rx) = harness.login("charlie");
        harness.registry.write().close(charlie);

        harness.router.dispatch(alice, text_to("charlie", 7, "still there?"));

        let failed = expect_status(alice_rx.try_recv().unwrap());
        assert_eq!(failed.error.as_deref(), Some("User not online"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_group_contact_is_rejected() {
        let harness = Harness::new();
        let (alice, mut alice_rx) = harness.login("alice");

        harness.router.dispatch(alice, text_to("group-family", 9, "hi all"));

        let failed = expect_status(alice_rx.try_recv().unwrap());
        assert_eq!(failed.error.as_deref(), Some("Group chat not supported"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_routes_to_newest_registration() {
        let harness = Harness::new();
        let (_old, mut old_rx) = harness.login("alice");
        let (_new, mut new_rx) = harness.login("alice");
        let (bob, _bob_rx) = harness.login("bob");

        harness.router.dispatch(bob, text_to("alice", 1, "which one?"));

        assert!(matches!(new_rx.try_recv(), Ok(Envelope::Message(_))));
        assert!(old_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbound_sender_uses_connection_id() {
        let harness = Harness::new();
        let (anon, _anon_rx) = harness.connect();
        let (_bob, mut bob_rx) = harness.login("bob");

        harness.router.dispatch(anon, text_to("bob", 5, "guess who"));

        let Envelope::Message(received) = bob_rx.try_recv().unwrap() else {
            panic!("expected message");
        };
        assert_eq!(received.contact_id, anon.to_string());
        assert_eq!(received.sender_name, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_media_forwarded_as_message() {
        let harness = Harness::new();
        let (alice, _alice_rx) = harness.login("alice");
        let (_bob, mut bob_rx) = harness.login("bob");

        let media = Envelope::decode(
            r#"{"type":"media","contactId":"bob","messageId":42,
                "mediaUrl":"https://cdn/cat.png","mediaType":"image","mediaName":"cat.png"}"#,
        )
        .unwrap();
        harness.router.dispatch(alice, media);

        let Envelope::Message(received) = bob_rx.try_recv().unwrap() else {
            panic!("expected message");
        };
        assert_eq!(received.contact_id, "alice");
        assert_eq!(received.message_id, MessageId::Number(42));
        assert_eq!(received.media().unwrap().name.as_deref(), Some("cat.png"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sender_gone_before_ticks() {
        let harness = Harness::new();
        let (alice, mut alice_rx) = harness.login("alice");
        let (_bob, _bob_rx) = harness.login("bob");

        harness.router.dispatch(alice, text_to("bob", 1, "bye"));
        let closed = harness.registry.write().close(alice);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(alice_rx.try_recv().is_err());
        drop(closed);
    }

    #[tokio::test]
    async fn test_typing_broadcast_to_others() {
        let harness = Harness::new();
        let (alice, mut alice_rx) = harness.login("alice");
        let (_bob, mut bob_rx) = harness.login("bob");
        let (_anon, mut anon_rx) = harness.connect();

        let mut extra = serde_json::Map::new();
        extra.insert("isTyping".into(), serde_json::Value::Bool(true));
        let typing = Envelope::Typing(Typing {
            contact_id: "bob".into(),
            extra,
        });
        harness.router.dispatch(alice, typing.clone());

        assert_eq!(bob_rx.try_recv().unwrap(), typing);
        assert_eq!(anon_rx.try_recv().unwrap(), typing);
        assert!(alice_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_connect_and_unknown_are_silent() {
        let harness = Harness::new();
        let (alice, mut alice_rx) = harness.login("alice");

        harness.router.dispatch(alice, Envelope::decode(r#"{"type":"connect"}"#).unwrap());
        harness.router.dispatch(alice, Envelope::Unknown);
        harness.router.dispatch(
            alice,
            Envelope::status("bob", MessageId::Number(1), DeliveryStatus::Read),
        );

        assert!(alice_rx.try_recv().is_err());
    }
}
