//! In-process presence broker.
//!
//! DESIGN
//! ======
//! Rooms are keyed by topic name. Each connection carries its participant
//! key and at most one tracked record; a participant connected twice (two
//! devices) shows up with two payloads in the room snapshot.
//!
//! - connect → `Subscribed` then `Sync` to the new connection only
//! - track   → `Join` with the new record to every connection in the room
//! - close   → `Leave` to the rest of the room, but only once the key has no
//!   tracked connection left
//!
//! Delivery uses `try_send` so the broker lock is never held across an
//! await; a full queue drops the event with a warning.
//!
//! The relay server serves this broker over websockets; tests use it
//! directly, together with `set_offline`, `resync` and `disconnect_all` to
//! simulate outages, transport resyncs and connection loss.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use super::{Transport, TransportEvent, TransportHandle};
use crate::error::PresenceError;
use crate::record::{ParticipantId, PresenceRecord};
use crate::topic::TopicSnapshot;

#[derive(Clone, Default)]
pub struct LocalBroker {
    inner: Arc<Mutex<BrokerInner>>,
}

#[derive(Default)]
struct BrokerInner {
    rooms: HashMap<String, Room>,
    next_conn_id: u64,
    offline: bool,
}

#[derive(Default)]
struct Room {
    /// Ordered by connection id so snapshots list payloads in join order.
    conns: BTreeMap<u64, Connection>,
}

struct Connection {
    key: ParticipantId,
    events: mpsc::Sender<TransportEvent>,
    tracked: Option<PresenceRecord>,
}

impl LocalBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline, every `connect` fails with a connection error.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Re-send the room snapshot to every connection on `topic`.
    pub fn resync(&self, topic: &str) -> usize {
        let inner = self.lock();
        let Some(room) = inner.rooms.get(topic) else {
            return 0;
        };
        let snapshot = room.snapshot();
        for (conn_id, conn) in &room.conns {
            deliver(topic, *conn_id, &conn.events, TransportEvent::Sync(snapshot.clone()));
        }
        room.conns.len()
    }

    /// Drop every connection on `topic`, telling each one it is closed.
    pub fn disconnect_all(&self, topic: &str, reason: &str) -> usize {
        let Some(room) = self.lock().rooms.remove(topic) else {
            return 0;
        };
        let count = room.conns.len();
        for (conn_id, conn) in room.conns {
            deliver(topic, conn_id, &conn.events, TransportEvent::Closed { reason: reason.to_string() });
        }
        warn!(topic, count, reason, "broker dropped all connections");
        count
    }

    /// Participants with at least one tracked connection on `topic`.
    #[must_use]
    pub fn members(&self, topic: &str) -> Vec<ParticipantId> {
        let mut members = self
            .lock()
            .rooms
            .get(topic)
            .map(|room| room.snapshot().into_keys().collect::<Vec<_>>())
            .unwrap_or_default();
        members.sort_unstable();
        members
    }

    #[must_use]
    pub fn connection_count(&self, topic: &str) -> usize {
        self.lock()
            .rooms
            .get(topic)
            .map_or(0, |room| room.conns.len())
    }

    fn register(
        &self,
        topic: &str,
        key: ParticipantId,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<u64, PresenceError> {
        let mut inner = self.lock();
        if inner.offline {
            return Err(PresenceError::Connection { topic: topic.to_string(), reason: "broker offline".into() });
        }
        let conn_id = inner.next_conn_id;
        inner.next_conn_id += 1;

        let room = inner.rooms.entry(topic.to_string()).or_default();
        let snapshot = room.snapshot();
        deliver(topic, conn_id, &events, TransportEvent::Subscribed);
        deliver(topic, conn_id, &events, TransportEvent::Sync(snapshot));
        room.conns.insert(conn_id, Connection { key, events, tracked: None });
        Ok(conn_id)
    }

    fn track(&self, topic: &str, conn_id: u64, record: PresenceRecord) -> Result<(), PresenceError> {
        let mut inner = self.lock();
        let Some(conn) = inner
            .rooms
            .get_mut(topic)
            .and_then(|room| room.conns.get_mut(&conn_id))
        else {
            return Err(PresenceError::Publish { topic: topic.to_string(), reason: "connection closed".into() });
        };
        conn.tracked = Some(record);
        let key = conn.key;

        if let Some(room) = inner.rooms.get(topic) {
            room.broadcast(topic, &TransportEvent::Join { key, records: vec![record] });
        }
        Ok(())
    }

    fn unregister(&self, topic: &str, conn_id: u64) {
        let mut inner = self.lock();
        let Some(room) = inner.rooms.get_mut(topic) else {
            return;
        };
        let Some(conn) = room.conns.remove(&conn_id) else {
            return;
        };
        // EDGE: another device of the same participant keeps it tracked.
        if conn.tracked.is_some() && !room.is_tracked(conn.key) {
            room.broadcast(topic, &TransportEvent::Leave { key: conn.key });
        }
        if room.conns.is_empty() {
            inner.rooms.remove(topic);
        }
        debug!(topic, conn_id, participant = %conn.key, "broker connection closed");
    }

    fn lock(&self) -> MutexGuard<'_, BrokerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Room {
    fn snapshot(&self) -> TopicSnapshot {
        let mut snapshot = TopicSnapshot::new();
        for conn in self.conns.values() {
            if let Some(record) = conn.tracked {
                snapshot.entry(conn.key).or_default().push(record);
            }
        }
        snapshot
    }

    fn is_tracked(&self, key: ParticipantId) -> bool {
        self.conns
            .values()
            .any(|c| c.key == key && c.tracked.is_some())
    }

    fn broadcast(&self, topic: &str, event: &TransportEvent) {
        for (conn_id, conn) in &self.conns {
            deliver(topic, *conn_id, &conn.events, event.clone());
        }
    }
}

fn deliver(topic: &str, conn_id: u64, events: &mpsc::Sender<TransportEvent>, event: TransportEvent) {
    match events.try_send(event) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            warn!(topic, conn_id, "presence event queue full; dropping event");
        }
        Err(TrySendError::Closed(_)) => {
            debug!(topic, conn_id, "presence event queue closed; dropping event");
        }
    }
}

// =============================================================================
// TRANSPORT
// =============================================================================

struct LocalHandle {
    broker: LocalBroker,
    topic: String,
    conn_id: u64,
}

#[async_trait::async_trait]
impl Transport for LocalBroker {
    async fn connect(
        &self,
        topic: &str,
        presence_key: ParticipantId,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Box<dyn TransportHandle>, PresenceError> {
        let conn_id = self.register(topic, presence_key, events)?;
        info!(topic, conn_id, participant = %presence_key, "broker connection opened");
        Ok(Box::new(LocalHandle { broker: self.clone(), topic: topic.to_string(), conn_id }))
    }
}

#[async_trait::async_trait]
impl TransportHandle for LocalHandle {
    async fn track(&self, record: PresenceRecord) -> Result<(), PresenceError> {
        self.broker.track(&self.topic, self.conn_id, record)
    }

    async fn close(&self) {
        self.broker.unregister(&self.topic, self.conn_id);
    }
}

#[cfg(test)]
#[path = "local_test.rs"]
mod tests;
