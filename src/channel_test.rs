use super::*;
use crate::test_helpers::{ScriptedTransport, connect_peer, recv_matching, wait_for, wait_until};
use crate::topic::TopicNaming;
use crate::transport::local::LocalBroker;
use uuid::Uuid;

const WAIT: Duration = Duration::from_millis(500);

async fn open_on(transport: &dyn Transport, store: &Arc<PresenceStore>, topic: Topic, key: ParticipantId) -> Subscription {
    Subscription::open(
        transport,
        ChannelOptions {
            topic,
            name: TopicNaming::default().name(topic),
            presence_key: key,
            store,
            queue_capacity: 16,
            connect_timeout: WAIT,
        },
    )
    .await
    .expect("channel should open")
}

#[tokio::test]
async fn subscribe_publishes_initial_online_record() {
    let broker = LocalBroker::new();
    let store = Arc::new(PresenceStore::default());
    let (_peer, mut peer_rx) = connect_peer(&broker, "online_users", Uuid::new_v4()).await;
    let me = Uuid::new_v4();

    let sub = open_on(&broker, &store, Topic::Global, me).await;
    sub.wait_subscribed(WAIT).await.unwrap();

    let event = recv_matching(&mut peer_rx, |e| matches!(e, TransportEvent::Join { .. })).await;
    let TransportEvent::Join { key, records } = event else {
        panic!("expected join");
    };
    assert_eq!(key, me);
    assert!(records[0].online);
    assert_eq!(sub.state(), SubscriptionState::Subscribed);
    wait_until(&store, |s| s.is_online(me)).await;
}

#[tokio::test]
async fn sync_seeds_the_store_with_existing_members() {
    let broker = LocalBroker::new();
    let store = Arc::new(PresenceStore::default());
    let other = Uuid::new_v4();
    let (peer, _peer_rx) = connect_peer(&broker, "online_users", other).await;
    peer.track(PresenceRecord::online_at(1234)).await.unwrap();

    let _sub = open_on(&broker, &store, Topic::Global, Uuid::new_v4()).await;

    wait_until(&store, |s| s.is_online(other)).await;
    assert_eq!(store.last_seen_of(other), Some(1234));
}

#[tokio::test]
async fn track_before_subscribed_is_a_publish_error() {
    let transport = ScriptedTransport::default();
    let store = Arc::new(PresenceStore::default());
    let sub = open_on(&transport, &store, Topic::Global, Uuid::new_v4()).await;

    let err = sub.track(PresenceRecord::online_at(1)).await.unwrap_err();

    assert_eq!(err, PresenceError::Publish { topic: "online_users".into(), reason: "subscription is opening".into() });
    assert!(transport.tracks_on("online_users").is_empty());
}

#[tokio::test]
async fn close_while_opening_never_publishes() {
    let transport = ScriptedTransport::default();
    let store = Arc::new(PresenceStore::default());
    let sub = open_on(&transport, &store, Topic::Global, Uuid::new_v4()).await;
    let events = transport.sender("online_users");

    sub.close().await;
    assert!(events.send(TransportEvent::Subscribed).await.is_err(), "pump should be gone");

    assert_eq!(sub.state(), SubscriptionState::Closed);
    assert!(transport.tracks_on("online_users").is_empty());
    assert_eq!(transport.closed_topics(), vec!["online_users".to_string()]);
    assert!(store.attached_topics().is_empty());
}

#[tokio::test]
async fn close_is_idempotent() {
    let transport = ScriptedTransport::default();
    let store = Arc::new(PresenceStore::default());
    let sub = open_on(&transport, &store, Topic::Global, Uuid::new_v4()).await;

    sub.close().await;
    let revision = store.revision();
    sub.close().await;

    assert_eq!(sub.state(), SubscriptionState::Closed);
    assert_eq!(store.revision(), revision);
    assert!(!sub.is_open());
}

#[tokio::test]
async fn events_after_close_are_not_applied() {
    let broker = LocalBroker::new();
    let store = Arc::new(PresenceStore::default());
    let sub = open_on(&broker, &store, Topic::Global, Uuid::new_v4()).await;
    sub.wait_subscribed(WAIT).await.unwrap();
    sub.close().await;

    let late = Uuid::new_v4();
    let (peer, _rx) = connect_peer(&broker, "online_users", late).await;
    peer.track(PresenceRecord::online_at(1)).await.unwrap();

    assert_eq!(store.record_of(late), None);
    assert!(store.attached_topics().is_empty());
}

#[tokio::test]
async fn transport_loss_closes_and_detaches() {
    let broker = LocalBroker::new();
    let store = Arc::new(PresenceStore::default());
    let other = Uuid::new_v4();
    let (peer, _peer_rx) = connect_peer(&broker, "online_users", other).await;
    peer.track(PresenceRecord::online_at(1)).await.unwrap();
    let sub = open_on(&broker, &store, Topic::Global, Uuid::new_v4()).await;
    wait_until(&store, |s| s.is_online(other)).await;

    broker.disconnect_all("online_users", "relay restarted");

    wait_until(&store, |s| s.attached_topics().is_empty()).await;
    assert_eq!(sub.state(), SubscriptionState::Closed);
    assert!(!store.is_online(other));
    assert_eq!(store.last_seen_of(other), Some(1));
}

#[tokio::test]
async fn wait_subscribed_times_out_without_ack() {
    let transport = ScriptedTransport::default();
    let store = Arc::new(PresenceStore::default());
    let sub = open_on(&transport, &store, Topic::Global, Uuid::new_v4()).await;

    let err = sub.wait_subscribed(Duration::from_millis(50)).await.unwrap_err();

    assert!(matches!(err, PresenceError::Connection { .. }));
    assert_eq!(sub.state(), SubscriptionState::Opening);
}

#[tokio::test]
async fn failed_connect_attaches_nothing() {
    let transport = ScriptedTransport::default();
    transport.refuse.store(true, std::sync::atomic::Ordering::SeqCst);
    let store = Arc::new(PresenceStore::default());

    let err = Subscription::open(
        &transport,
        ChannelOptions {
            topic: Topic::Global,
            name: "online_users".into(),
            presence_key: Uuid::new_v4(),
            store: &store,
            queue_capacity: 4,
            connect_timeout: WAIT,
        },
    )
    .await
    .unwrap_err();

    assert_eq!(err.to_string(), "connection to online_users failed: refused");
    assert!(store.attached_topics().is_empty());
}

#[tokio::test]
async fn scripted_subscribe_triggers_initial_track() {
    let transport = ScriptedTransport::default();
    let store = Arc::new(PresenceStore::default());
    let sub = open_on(&transport, &store, Topic::Global, Uuid::new_v4()).await;

    transport.sender("online_users").send(TransportEvent::Subscribed).await.unwrap();
    sub.wait_subscribed(WAIT).await.unwrap();

    let deadline = tokio::time::Instant::now() + WAIT;
    while transport.tracks_on("online_users").is_empty() {
        assert!(tokio::time::Instant::now() < deadline, "initial track not published");
        tokio::task::yield_now().await;
    }
    assert!(transport.tracks_on("online_users")[0].online);
}

#[tokio::test]
async fn dropped_subscription_detaches_and_closes_transport() {
    let transport = ScriptedTransport::default();
    let store = Arc::new(PresenceStore::default());
    let sub = open_on(&transport, &store, Topic::Global, Uuid::new_v4()).await;

    drop(sub);

    assert!(store.attached_topics().is_empty());
    wait_for("transport close", || transport.closed_topics() == vec!["online_users".to_string()]).await;
}

#[tokio::test]
async fn dropped_subscription_leaves_the_room() {
    let broker = LocalBroker::new();
    let store = Arc::new(PresenceStore::default());
    let (_peer, mut peer_rx) = connect_peer(&broker, "online_users", Uuid::new_v4()).await;
    let me = Uuid::new_v4();
    let sub = open_on(&broker, &store, Topic::Global, me).await;
    recv_matching(&mut peer_rx, |e| matches!(e, TransportEvent::Join { key, .. } if *key == me)).await;

    drop(sub);

    assert_eq!(recv_matching(&mut peer_rx, |e| matches!(e, TransportEvent::Leave { .. })).await, TransportEvent::Leave { key: me });
    assert_eq!(broker.connection_count("online_users"), 1);
}

#[tokio::test]
async fn drop_after_close_does_not_close_twice() {
    let transport = ScriptedTransport::default();
    let store = Arc::new(PresenceStore::default());
    let sub = open_on(&transport, &store, Topic::Global, Uuid::new_v4()).await;

    sub.close().await;
    drop(sub);
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(transport.closed_topics(), vec!["online_users".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn stalled_connect_times_out() {
    let transport = ScriptedTransport::default();
    transport.stall.store(true, std::sync::atomic::Ordering::SeqCst);
    let store = Arc::new(PresenceStore::default());

    let err = Subscription::open(
        &transport,
        ChannelOptions {
            topic: Topic::Global,
            name: "online_users".into(),
            presence_key: Uuid::new_v4(),
            store: &store,
            queue_capacity: 4,
            connect_timeout: Duration::from_secs(5),
        },
    )
    .await
    .unwrap_err();

    assert_eq!(
        err,
        PresenceError::Connection { topic: "online_users".into(), reason: "timed out after 5000ms".into() }
    );
    assert!(store.attached_topics().is_empty());
}
