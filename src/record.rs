//! Presence record: one participant's last-known activity.
//!
//! DESIGN
//! ======
//! A record is an immutable `{online, last_seen}` pair. Updates replace the
//! whole value; the two fields never change independently.

use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PresenceError;

/// Participant identifier. Also the presence key on every topic.
pub type ParticipantId = Uuid;

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

/// Current time as milliseconds since Unix epoch.
#[must_use]
pub fn now_ms() -> Timestamp {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

// =============================================================================
// RECORD
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub online: bool,
    pub last_seen: Timestamp,
}

impl PresenceRecord {
    #[must_use]
    pub fn online_at(last_seen: Timestamp) -> Self {
        Self { online: true, last_seen }
    }

    #[must_use]
    pub fn offline_at(last_seen: Timestamp) -> Self {
        Self { online: false, last_seen }
    }

    /// `{online: true, last_seen: now}`: the record published on subscribe,
    /// on heartbeat and on foreground.
    #[must_use]
    pub fn online_now() -> Self {
        Self::online_at(now_ms())
    }

    /// `{online: false, last_seen: now}`: the advisory record published when
    /// the app goes to the background or closes.
    #[must_use]
    pub fn offline_now() -> Self {
        Self::offline_at(now_ms())
    }

    /// Display label for presence indicators.
    #[must_use]
    pub fn label(self) -> &'static str {
        if self.online { "Online" } else { "Offline" }
    }
}

// =============================================================================
// SNAPSHOT FOLD
// =============================================================================

/// How a participant's tracked payloads on one topic collapse into a single
/// record. A participant tracking from two devices has two payloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SnapshotFold {
    /// Use the first payload in the topic's list.
    #[default]
    First,
    /// Use the payload with the most recent `last_seen`.
    Latest,
}

impl SnapshotFold {
    /// Collapse a payload list. Returns `None` for an empty list.
    #[must_use]
    pub fn fold(self, records: &[PresenceRecord]) -> Option<PresenceRecord> {
        match self {
            Self::First => records.first().copied(),
            Self::Latest => records.iter().copied().max_by_key(|r| r.last_seen),
        }
    }
}

impl FromStr for SnapshotFold {
    type Err = PresenceError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "first" => Ok(Self::First),
            "latest" => Ok(Self::Latest),
            _ => Err(PresenceError::Config { key: "PRESENCE_SNAPSHOT_FOLD", value: raw.to_string() }),
        }
    }
}

#[cfg(test)]
#[path = "record_test.rs"]
mod tests;
