//! Topic naming.
//!
//! One fixed global topic carries "everyone using the app"; each viewed
//! conversation gets its own topic named `<prefix><conversation id>`.

use std::collections::HashMap;
use std::fmt;

use uuid::Uuid;

use crate::record::{ParticipantId, PresenceRecord};

pub const GLOBAL_TOPIC: &str = "online_users";
pub const CONVERSATION_PREFIX: &str = "chat:";

/// A topic's own presence view: every tracked payload per participant.
pub type TopicSnapshot = HashMap<ParticipantId, Vec<PresenceRecord>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Topic {
    Global,
    Conversation(Uuid),
}

impl Topic {
    #[must_use]
    pub fn conversation_id(self) -> Option<Uuid> {
        match self {
            Self::Global => None,
            Self::Conversation(id) => Some(id),
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&TopicNaming::default().name(*self))
    }
}

// =============================================================================
// NAMING
// =============================================================================

/// Maps topics to transport names and back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicNaming {
    pub global: String,
    pub conversation_prefix: String,
}

impl Default for TopicNaming {
    fn default() -> Self {
        Self { global: GLOBAL_TOPIC.to_string(), conversation_prefix: CONVERSATION_PREFIX.to_string() }
    }
}

impl TopicNaming {
    #[must_use]
    pub fn name(&self, topic: Topic) -> String {
        match topic {
            Topic::Global => self.global.clone(),
            Topic::Conversation(id) => format!("{}{id}", self.conversation_prefix),
        }
    }

    /// Inverse of [`TopicNaming::name`]. Unknown names yield `None`.
    #[must_use]
    pub fn parse(&self, name: &str) -> Option<Topic> {
        if name == self.global {
            return Some(Topic::Global);
        }
        let id = name.strip_prefix(self.conversation_prefix.as_str())?;
        match Uuid::parse_str(id) {
            Ok(id) => Some(Topic::Conversation(id)),
            Err(_) => None,
        }
    }
}

#[cfg(test)]
#[path = "topic_test.rs"]
mod tests;
