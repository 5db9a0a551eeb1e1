//! End-to-end scenarios over real WebSocket connections.

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use bery_server::api::{serve_listener, AppState};
use bery_server::config::ServerConfig;
use bery_server::router::RelayTimings;
use bery_shared::protocol::ChatMessage;
use bery_shared::{DeliveryStatus, Envelope, MessageId};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_relay() -> SocketAddr {
    let config = ServerConfig {
        timings: RelayTimings {
            delivered: Duration::from_millis(30),
            read: Duration::from_millis(60),
            assistant: Duration::from_millis(90),
        },
        ..ServerConfig::default()
    };
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve_listener(AppState::new(config), listener));
    addr
}

async fn open(addr: SocketAddr) -> Socket {
    let (socket, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    socket
}

async fn send(socket: &mut Socket, envelope: &Envelope) {
    socket
        .send(Message::Text(envelope.encode().unwrap()))
        .await
        .unwrap();
}

async fn recv(socket: &mut Socket) -> Envelope {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(2), socket.next())
            .await
            .expect("timed out waiting for envelope")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = frame {
            return Envelope::decode(&text).unwrap();
        }
    }
}

async fn login(addr: SocketAddr, user: &str) -> Socket {
    let mut socket = open(addr).await;
    send(&mut socket, &Envelope::register(user, user)).await;
    assert_eq!(recv(&mut socket).await, Envelope::registered(user, user));
    socket
}

fn status_of(envelope: Envelope) -> (String, MessageId, DeliveryStatus, Option<String>) {
    match envelope {
        Envelope::Status(s) => (s.contact_id, s.message_id, s.status, s.error),
        other => panic!("expected status, got {other:?}"),
    }
}

#[tokio::test]
async fn test_alice_messages_bob() {
    let addr = start_relay().await;
    let mut alice = login(addr, "alice").await;
    let mut bob = login(addr, "bob").await;

    send(
        &mut alice,
        &Envelope::Message(ChatMessage::text("bob", MessageId::Number(1001), "hi")),
    )
    .await;

    let Envelope::Message(received) = recv(&mut bob).await else {
        panic!("bob should receive a message");
    };
    assert_eq!(received.contact_id, "alice");
    assert_eq!(received.message_id, MessageId::Number(1001));
    assert_eq!(received.text.as_deref(), Some("hi"));

    let delivered = status_of(recv(&mut alice).await);
    assert_eq!(
        delivered,
        ("bob".into(), MessageId::Number(1001), DeliveryStatus::Delivered, None)
    );
    let read = status_of(recv(&mut alice).await);
    assert_eq!(read.2, DeliveryStatus::Read);
}

#[tokio::test]
async fn test_assistant_answers_unregistered_identity() {
    let addr = start_relay().await;
    let mut alice = login(addr, "alice").await;

    send(
        &mut alice,
        &Envelope::Message(ChatMessage::text("bery-ai", MessageId::Number(2002), "hello")),
    )
    .await;

    assert_eq!(status_of(recv(&mut alice).await).2, DeliveryStatus::Delivered);
    assert_eq!(status_of(recv(&mut alice).await).2, DeliveryStatus::Read);

    let Envelope::Message(reply) = recv(&mut alice).await else {
        panic!("expected assistant reply");
    };
    assert_eq!(reply.contact_id, "bery-ai");
    assert!(reply.text.unwrap().contains("Bery AI"));
}

#[tokio::test]
async fn test_unknown_recipient_and_malformed_frames() {
    let addr = start_relay().await;
    let mut alice = login(addr, "alice").await;

    // ignored without closing the connection
    alice.send(Message::Text("{not json".into())).await.unwrap();

    send(
        &mut alice,
        &Envelope::Message(ChatMessage::text("charlie", MessageId::Number(3003), "hey")),
    )
    .await;

    let failed = status_of(recv(&mut alice).await);
    assert_eq!(failed.2, DeliveryStatus::Failed);
    assert_eq!(failed.3.as_deref(), Some("User not found"));
    assert_eq!(status_of(recv(&mut alice).await).2, DeliveryStatus::Delivered);
    assert_eq!(status_of(recv(&mut alice).await).2, DeliveryStatus::Read);
}

#[tokio::test]
async fn test_disconnect_unbinds_identity() {
    let addr = start_relay().await;
    let mut alice = login(addr, "alice").await;
    let bob = login(addr, "bob").await;

    drop(bob);
    tokio::time::sleep(Duration::from_millis(100)).await;

    send(
        &mut alice,
        &Envelope::Message(ChatMessage::text("bob", MessageId::Number(4), "gone?")),
    )
    .await;
    let failed = status_of(recv(&mut alice).await);
    assert_eq!(failed.3.as_deref(), Some("User not online"));
}
