use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::time::Duration;
use uuid::Uuid;

use super::*;
use crate::config::PresenceConfig;
use crate::record::now_ms;
use crate::store::PresenceStore;
use crate::test_helpers::{ScriptedTransport, wait_until};
use crate::topic::Topic;
use crate::transport::TransportEvent;
use crate::transport::local::LocalBroker;

const INTERVAL: Duration = Duration::from_secs(300);

async fn scripted_registry(transport: &Arc<ScriptedTransport>, conversation: Option<Uuid>) -> ChannelRegistry {
    let store = Arc::new(PresenceStore::default());
    let mut registry =
        ChannelRegistry::new(transport.clone(), store, Uuid::new_v4(), &PresenceConfig::default());
    registry.ensure_global_open().await.unwrap();
    registry.set_active_conversation(conversation).await.unwrap();
    for topic in registry.open_topics() {
        let name = crate::topic::TopicNaming::default().name(topic);
        transport.sender(&name).send(TransportEvent::Subscribed).await.unwrap();
        registry
            .subscription(topic)
            .unwrap()
            .wait_subscribed(Duration::from_millis(500))
            .await
            .unwrap();
    }
    settle().await;
    registry
}

/// Let spawned tasks run to their next await point.
async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn refresh_tracks_on_every_open_channel() {
    let transport = Arc::new(ScriptedTransport::default());
    let c = Uuid::new_v4();
    let registry = scripted_registry(&transport, Some(c)).await;

    assert_eq!(refresh(&registry).await, 2);

    let global = transport.tracks_on("online_users");
    let conversation = transport.tracks_on(&format!("chat:{c}"));
    assert_eq!(global.len(), 2, "initial track plus refresh");
    assert_eq!(conversation.len(), 2);
    assert!(global.iter().all(|r| r.online));
    assert!(global[1].last_seen >= global[0].last_seen);
}

#[tokio::test]
async fn refresh_continues_past_a_lost_channel() {
    let broker = LocalBroker::new();
    let store = Arc::new(PresenceStore::default());
    let c = Uuid::new_v4();
    let mut registry =
        ChannelRegistry::new(Arc::new(broker.clone()), Arc::clone(&store), Uuid::new_v4(), &PresenceConfig::default());
    registry.ensure_global_open().await.unwrap();
    registry.set_active_conversation(Some(c)).await.unwrap();
    registry
        .subscription(Topic::Global)
        .unwrap()
        .wait_subscribed(Duration::from_millis(500))
        .await
        .unwrap();

    broker.disconnect_all(&format!("chat:{c}"), "dropped");
    wait_until(&store, |s| s.attached_topics() == vec![Topic::Global]).await;

    assert_eq!(refresh(&registry).await, 1);
}

#[tokio::test]
async fn failing_tracks_are_counted_out() {
    let transport = Arc::new(ScriptedTransport::default());
    let registry = scripted_registry(&transport, None).await;
    transport.fail_tracks.store(true, std::sync::atomic::Ordering::SeqCst);

    assert_eq!(refresh(&registry).await, 0);
}

#[tokio::test(start_paused = true)]
async fn scheduler_ticks_once_per_interval() {
    let transport = Arc::new(ScriptedTransport::default());
    let registry = Arc::new(Mutex::new(scripted_registry(&transport, None).await));
    assert_eq!(transport.tracks_on("online_users").len(), 1);

    let heartbeat = HeartbeatScheduler::spawn(Arc::clone(&registry), INTERVAL);
    settle().await;

    tokio::time::advance(INTERVAL - Duration::from_secs(1)).await;
    settle().await;
    assert_eq!(transport.tracks_on("online_users").len(), 1, "no tick before the first interval");

    tokio::time::advance(Duration::from_secs(1)).await;
    settle().await;
    assert_eq!(transport.tracks_on("online_users").len(), 2);

    tokio::time::advance(INTERVAL).await;
    settle().await;
    assert_eq!(transport.tracks_on("online_users").len(), 3);

    heartbeat.stop().await;
}

#[tokio::test(start_paused = true)]
async fn stop_prevents_further_ticks() {
    let transport = Arc::new(ScriptedTransport::default());
    let registry = Arc::new(Mutex::new(scripted_registry(&transport, None).await));
    let heartbeat = HeartbeatScheduler::spawn(Arc::clone(&registry), INTERVAL);
    settle().await;

    heartbeat.stop().await;
    tokio::time::advance(INTERVAL * 3).await;
    settle().await;

    assert_eq!(transport.tracks_on("online_users").len(), 1);
}

#[tokio::test]
async fn tick_refreshes_local_last_seen_on_every_topic() {
    let broker = LocalBroker::new();
    let store = Arc::new(PresenceStore::default());
    let me = Uuid::new_v4();
    let c = Uuid::new_v4();
    let mut registry =
        ChannelRegistry::new(Arc::new(broker.clone()), Arc::clone(&store), me, &PresenceConfig::default());
    registry.ensure_global_open().await.unwrap();
    registry.set_active_conversation(Some(c)).await.unwrap();
    for topic in [Topic::Global, Topic::Conversation(c)] {
        wait_until(&store, |s| s.topic_members(topic).contains(&me)).await;
    }
    let before = store.last_seen_of(me).unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    let tick = now_ms();
    assert!(tick > before);
    assert_eq!(refresh(&registry).await, 2);

    wait_until(&store, |s| s.last_seen_of(me).is_some_and(|seen| seen >= tick)).await;
    assert!(store.is_online(me));
    assert_eq!(broker.members("online_users"), vec![me]);
    assert_eq!(broker.members(&format!("chat:{c}")), vec![me]);
}
