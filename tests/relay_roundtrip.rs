//! End-to-end: two sessions sharing topics through the websocket relay.

use std::net::SocketAddr;
use std::sync::Arc;

use chat_presence::relay::{self, RelayState};
use chat_presence::topic::TopicNaming;
use chat_presence::transport::Transport;
use chat_presence::transport::local::LocalBroker;
use chat_presence::transport::ws::WsTransport;
use chat_presence::{PresenceConfig, PresenceError, PresenceSession, PresenceStore};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant, timeout};
use uuid::Uuid;

const WAIT: Duration = Duration::from_secs(3);

async fn start_relay() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind relay");
    let addr = listener.local_addr().expect("relay addr");
    let state = RelayState::new(LocalBroker::new(), TopicNaming::default(), 64);
    tokio::spawn(async move {
        relay::serve(listener, state).await.expect("relay server failed");
    });
    addr
}

fn transport(addr: SocketAddr) -> Arc<WsTransport> {
    Arc::new(WsTransport::new(format!("ws://{addr}/presence")))
}

async fn wait_until<F>(store: &PresenceStore, pred: F)
where
    F: Fn(&PresenceStore) -> bool,
{
    let mut rx = store.subscribe();
    let deadline = Instant::now() + WAIT;
    while !pred(store) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        timeout(remaining, rx.changed())
            .await
            .expect("store condition not reached in time")
            .expect("store dropped");
    }
}

#[tokio::test]
async fn sessions_see_each_other_through_the_relay() {
    let addr = start_relay().await;
    let config = PresenceConfig::default();
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let conversation = Uuid::new_v4();

    let a = PresenceSession::start(transport(addr), alice, &config).await.expect("alice starts");
    let b = PresenceSession::start(transport(addr), bob, &config).await.expect("bob starts");
    a.set_active_conversation(Some(conversation)).await.expect("alice opens chat");
    b.set_active_conversation(Some(conversation)).await.expect("bob opens chat");

    wait_until(a.store(), |s| s.is_online(bob)).await;
    wait_until(b.store(), |s| s.is_online(alice)).await;
    wait_until(a.store(), |s| {
        s.topic_members(chat_presence::Topic::Conversation(conversation))
            .contains(&bob)
    })
    .await;

    b.shutdown().await;

    wait_until(a.store(), |s| !s.is_online(bob)).await;
    assert!(a.last_seen_of(bob).is_some());

    a.shutdown().await;
}

#[tokio::test]
async fn relay_rejects_unknown_topics() {
    let addr = start_relay().await;
    let (tx, _rx) = mpsc::channel(4);

    let err = transport(addr)
        .connect("lobby", Uuid::new_v4(), tx)
        .await
        .err()
        .expect("unknown topic should be refused");

    assert!(matches!(err, PresenceError::Connection { .. }));
}

#[tokio::test]
async fn unreachable_relay_is_a_connection_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let err = PresenceSession::start(transport(addr), Uuid::new_v4(), &PresenceConfig::default())
        .await
        .err()
        .expect("start should fail");

    assert_eq!(err.to_string().split(':').next(), Some("connection to online_users failed"));
}

#[tokio::test]
async fn healthz_answers_ok() {
    let addr = start_relay().await;
    let mut stream = TcpStream::connect(addr).await.expect("connect");
    stream
        .write_all(b"GET /healthz HTTP/1.1\r\nHost: relay\r\nConnection: close\r\n\r\n")
        .await
        .expect("write request");

    let mut response = String::new();
    timeout(WAIT, stream.read_to_string(&mut response))
        .await
        .expect("response timed out")
        .expect("read response");

    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
}
