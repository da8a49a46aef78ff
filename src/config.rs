//! Presence configuration parsed from environment variables.
//!
//! Optional (all have defaults):
//! - `PRESENCE_HEARTBEAT_SECS`: heartbeat interval, default 300, must be > 0
//! - `PRESENCE_GLOBAL_TOPIC`: global topic name, default `online_users`
//! - `PRESENCE_CONVERSATION_PREFIX`: conversation topic prefix, default `chat:`
//! - `PRESENCE_EVENT_QUEUE_CAPACITY`: per-channel event queue, default 256
//! - `PRESENCE_SIGNAL_QUEUE_CAPACITY`: lifecycle signal queue, default 16
//! - `PRESENCE_CONNECT_TIMEOUT_SECS`: limit on opening one channel, default 10, must be > 0
//! - `PRESENCE_SNAPSHOT_FOLD`: `first` (default) or `latest`
//! - `PRESENCE_RELAY_URL`: websocket relay endpoint

use std::time::Duration;

use crate::error::PresenceError;
use crate::record::SnapshotFold;
use crate::topic::{CONVERSATION_PREFIX, GLOBAL_TOPIC, TopicNaming};

pub const DEFAULT_HEARTBEAT_SECS: u64 = 5 * 60;
pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 256;
pub const DEFAULT_SIGNAL_QUEUE_CAPACITY: usize = 16;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_RELAY_URL: &str = "ws://127.0.0.1:4000/presence";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceConfig {
    pub heartbeat_interval: Duration,
    pub naming: TopicNaming,
    pub event_queue_capacity: usize,
    pub signal_queue_capacity: usize,
    pub connect_timeout: Duration,
    pub snapshot_fold: SnapshotFold,
    pub relay_url: String,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_SECS),
            naming: TopicNaming::default(),
            event_queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
            signal_queue_capacity: DEFAULT_SIGNAL_QUEUE_CAPACITY,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            snapshot_fold: SnapshotFold::default(),
            relay_url: DEFAULT_RELAY_URL.to_string(),
        }
    }
}

impl PresenceConfig {
    /// Build config from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`PresenceError::Config`] for a zero heartbeat interval, a zero
    /// queue capacity or connect timeout, or an unknown snapshot fold.
    pub fn from_env() -> Result<Self, PresenceError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup. Unparseable numbers fall
    /// back to their defaults.
    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, PresenceError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let heartbeat_secs = parse_or(&lookup, "PRESENCE_HEARTBEAT_SECS", DEFAULT_HEARTBEAT_SECS);
        if heartbeat_secs == 0 {
            return Err(PresenceError::Config { key: "PRESENCE_HEARTBEAT_SECS", value: "0".into() });
        }

        let event_queue_capacity = parse_or(&lookup, "PRESENCE_EVENT_QUEUE_CAPACITY", DEFAULT_EVENT_QUEUE_CAPACITY);
        if event_queue_capacity == 0 {
            return Err(PresenceError::Config { key: "PRESENCE_EVENT_QUEUE_CAPACITY", value: "0".into() });
        }
        let signal_queue_capacity =
            parse_or(&lookup, "PRESENCE_SIGNAL_QUEUE_CAPACITY", DEFAULT_SIGNAL_QUEUE_CAPACITY);
        if signal_queue_capacity == 0 {
            return Err(PresenceError::Config { key: "PRESENCE_SIGNAL_QUEUE_CAPACITY", value: "0".into() });
        }

        let connect_timeout_secs =
            parse_or(&lookup, "PRESENCE_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS);
        if connect_timeout_secs == 0 {
            return Err(PresenceError::Config { key: "PRESENCE_CONNECT_TIMEOUT_SECS", value: "0".into() });
        }

        let snapshot_fold = match lookup("PRESENCE_SNAPSHOT_FOLD") {
            Some(raw) => raw.parse::<SnapshotFold>()?,
            None => SnapshotFold::default(),
        };

        let naming = TopicNaming {
            global: lookup("PRESENCE_GLOBAL_TOPIC").unwrap_or_else(|| GLOBAL_TOPIC.to_string()),
            conversation_prefix: lookup("PRESENCE_CONVERSATION_PREFIX")
                .unwrap_or_else(|| CONVERSATION_PREFIX.to_string()),
        };

        let relay_url = lookup("PRESENCE_RELAY_URL")
            .unwrap_or_else(|| DEFAULT_RELAY_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            heartbeat_interval: Duration::from_secs(heartbeat_secs),
            naming,
            event_queue_capacity,
            signal_queue_capacity,
            connect_timeout: Duration::from_secs(connect_timeout_secs),
            snapshot_fold,
            relay_url,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr + Copy,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
