//! Presence store: the merged read model.
//!
//! DESIGN
//! ======
//! The store folds tagged events (`Sync`/`Join`/`Leave` × topic) into one
//! participant → record map. It keeps each attached topic's membership and
//! derives `online` as a logical OR across them: a participant is online
//! while at least one attached topic reports it, and drops to offline (with
//! its last `last_seen` kept) once no attached topic does. Records are never
//! deleted.
//!
//! Only topics attached by an open channel accept events. Detaching a topic
//! drops its membership and re-evaluates every participant it reported, so
//! closing a conversation channel cannot clear presence still carried by
//! the global one.
//!
//! CONCURRENCY
//! ===========
//! One `RwLock` serializes writers; each event is applied entirely under the
//! write guard, so readers observe either the state before or after it.
//! Reads clone out under a shared guard. Every applied mutation bumps a
//! `watch` revision for observers.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::watch;
use tracing::debug;

use crate::error::PresenceError;
use crate::event::PresenceEvent;
use crate::record::{ParticipantId, PresenceRecord, SnapshotFold, Timestamp};
use crate::topic::{Topic, TopicSnapshot};

pub struct PresenceStore {
    inner: RwLock<StoreInner>,
    revision: watch::Sender<u64>,
    fold: SnapshotFold,
}

#[derive(Default)]
struct StoreInner {
    /// Attached topics and the folded record each reports per participant.
    topics: HashMap<Topic, HashMap<ParticipantId, PresenceRecord>>,
    /// Merged view across topics.
    merged: HashMap<ParticipantId, PresenceRecord>,
}

impl PresenceStore {
    #[must_use]
    pub fn new(fold: SnapshotFold) -> Self {
        let (revision, _) = watch::channel(0);
        Self { inner: RwLock::new(StoreInner::default()), revision, fold }
    }

    #[must_use]
    pub fn fold(&self) -> SnapshotFold {
        self.fold
    }

    // =========================================================================
    // TOPIC ATTACHMENT
    // =========================================================================

    /// Start accepting events for `topic`. Returns `false` if already attached.
    pub fn attach(&self, topic: Topic) -> bool {
        let mut inner = self.write();
        if inner.topics.contains_key(&topic) {
            return false;
        }
        inner.topics.insert(topic, HashMap::new());
        true
    }

    /// Stop accepting events for `topic` and drop its membership. Returns the
    /// number of participants that went offline as a result.
    pub fn detach(&self, topic: Topic) -> usize {
        let went_offline = {
            let mut inner = self.write();
            let Some(members) = inner.topics.remove(&topic) else {
                return 0;
            };
            members
                .keys()
                .filter(|key| inner.mark_offline_if_absent(**key))
                .count()
        };
        self.bump();
        went_offline
    }

    // =========================================================================
    // REDUCER
    // =========================================================================

    /// Fold one event into the merged view.
    ///
    /// Events for a detached topic are discarded.
    ///
    /// # Errors
    ///
    /// Returns [`PresenceError::MergeInconsistency`] for a leave of a
    /// participant the topic never reported, or a join without payload. The
    /// state is left untouched in that case.
    pub fn apply(&self, event: PresenceEvent) -> Result<(), PresenceError> {
        let topic = event.topic();
        let kind = event.kind();
        let result = {
            let mut inner = self.write();
            if !inner.topics.contains_key(&topic) {
                debug!(%topic, kind, "event for detached topic discarded");
                return Ok(());
            }
            match event {
                PresenceEvent::Sync { snapshot, .. } => {
                    inner.apply_sync(topic, &snapshot, self.fold);
                    Ok(())
                }
                PresenceEvent::Join { key, records, .. } => inner.apply_join(topic, key, &records, self.fold),
                PresenceEvent::Leave { key, .. } => inner.apply_leave(topic, key),
            }
        };

        match &result {
            Ok(()) => self.bump(),
            Err(e) => debug!(%topic, kind, error = %e, "presence event ignored"),
        }
        result
    }

    // =========================================================================
    // READS
    // =========================================================================

    #[must_use]
    pub fn is_online(&self, participant: ParticipantId) -> bool {
        self.read()
            .merged
            .get(&participant)
            .is_some_and(|r| r.online)
    }

    #[must_use]
    pub fn last_seen_of(&self, participant: ParticipantId) -> Option<Timestamp> {
        self.read().merged.get(&participant).map(|r| r.last_seen)
    }

    #[must_use]
    pub fn record_of(&self, participant: ParticipantId) -> Option<PresenceRecord> {
        self.read().merged.get(&participant).copied()
    }

    /// Clone of the whole merged map.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<ParticipantId, PresenceRecord> {
        self.read().merged.clone()
    }

    #[must_use]
    pub fn online_participants(&self) -> Vec<ParticipantId> {
        let mut online = self
            .read()
            .merged
            .iter()
            .filter(|(_, r)| r.online)
            .map(|(id, _)| *id)
            .collect::<Vec<_>>();
        online.sort_unstable();
        online
    }

    /// Participants the given topic currently reports. Empty when detached.
    #[must_use]
    pub fn topic_members(&self, topic: Topic) -> Vec<ParticipantId> {
        let mut members = self
            .read()
            .topics
            .get(&topic)
            .map(|m| m.keys().copied().collect::<Vec<_>>())
            .unwrap_or_default();
        members.sort_unstable();
        members
    }

    #[must_use]
    pub fn attached_topics(&self) -> Vec<Topic> {
        let mut topics = self.read().topics.keys().copied().collect::<Vec<_>>();
        topics.sort_unstable();
        topics
    }

    /// Monotonic counter bumped on every applied mutation.
    #[must_use]
    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    /// Observe store changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    fn read(&self) -> RwLockReadGuard<'_, StoreInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev = rev.wrapping_add(1));
    }
}

impl Default for PresenceStore {
    fn default() -> Self {
        Self::new(SnapshotFold::default())
    }
}

impl StoreInner {
    fn apply_sync(&mut self, topic: Topic, snapshot: &TopicSnapshot, fold: SnapshotFold) {
        let folded = snapshot
            .iter()
            .filter_map(|(key, records)| fold.fold(records).map(|r| (*key, r)))
            .collect::<HashMap<_, _>>();
        let previous = self.topics.insert(topic, folded.clone()).unwrap_or_default();

        for (key, record) in &folded {
            self.mark_online(*key, record.last_seen);
        }
        // EDGE: absent from this sync only matters if absent everywhere.
        for key in previous.keys().filter(|k| !folded.contains_key(k)) {
            self.mark_offline_if_absent(*key);
        }
    }

    fn apply_join(
        &mut self,
        topic: Topic,
        key: ParticipantId,
        records: &[PresenceRecord],
        fold: SnapshotFold,
    ) -> Result<(), PresenceError> {
        let Some(record) = fold.fold(records) else {
            return Err(PresenceError::MergeInconsistency { topic: topic.to_string(), participant: key });
        };
        if let Some(members) = self.topics.get_mut(&topic) {
            members.insert(key, record);
        }
        self.mark_online(key, record.last_seen);
        Ok(())
    }

    fn apply_leave(&mut self, topic: Topic, key: ParticipantId) -> Result<(), PresenceError> {
        let removed = self
            .topics
            .get_mut(&topic)
            .and_then(|members| members.remove(&key));
        if removed.is_none() {
            return Err(PresenceError::MergeInconsistency { topic: topic.to_string(), participant: key });
        }
        self.mark_offline_if_absent(key);
        Ok(())
    }

    fn present_anywhere(&self, key: ParticipantId) -> bool {
        self.topics.values().any(|members| members.contains_key(&key))
    }

    /// `last_seen` only moves forward: the stored value is the max of the
    /// previous and incoming timestamps, not the payload verbatim. A peer
    /// whose clock lags, or a stale sync replayed after a fresher join,
    /// cannot pull the displayed value backwards.
    fn mark_online(&mut self, key: ParticipantId, last_seen: Timestamp) {
        let last_seen = self
            .merged
            .get(&key)
            .map_or(last_seen, |prev| prev.last_seen.max(last_seen));
        self.merged.insert(key, PresenceRecord::online_at(last_seen));
    }

    /// Returns `true` if the participant flipped from online to offline.
    fn mark_offline_if_absent(&mut self, key: ParticipantId) -> bool {
        if self.present_anywhere(key) {
            return false;
        }
        let Some(prev) = self.merged.get(&key).copied() else {
            return false;
        };
        if !prev.online {
            return false;
        }
        self.merged.insert(key, PresenceRecord::offline_at(prev.last_seen));
        true
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
