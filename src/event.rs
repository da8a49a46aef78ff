//! Presence events: the reducer input.
//!
//! Every event a channel delivers is tagged with its topic so one store can
//! fold events from any number of channels.

use crate::record::{ParticipantId, PresenceRecord};
use crate::topic::{Topic, TopicSnapshot};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEvent {
    /// Full snapshot of a topic's tracked participants.
    Sync { topic: Topic, snapshot: TopicSnapshot },
    /// A participant started tracking (or re-tracked) on a topic.
    Join { topic: Topic, key: ParticipantId, records: Vec<PresenceRecord> },
    /// A participant untracked or disconnected from a topic.
    Leave { topic: Topic, key: ParticipantId },
}

impl PresenceEvent {
    #[must_use]
    pub fn topic(&self) -> Topic {
        match self {
            Self::Sync { topic, .. } | Self::Join { topic, .. } | Self::Leave { topic, .. } => *topic,
        }
    }

    /// Short kind label for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Sync { .. } => "sync",
            Self::Join { .. } => "join",
            Self::Leave { .. } => "leave",
        }
    }
}
