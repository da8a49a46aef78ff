//! Error taxonomy for the presence subsystem.
//!
//! ERROR HANDLING
//! ==============
//! Nothing here is fatal to the application. Connection and publish failures
//! surface to the caller (or get logged by best-effort drivers); merge
//! inconsistencies are reducer no-ops. The worst outcome is stale or missing
//! presence for some participants.

use crate::record::ParticipantId;

/// Grepable error code and retryable flag, mirrored from the frame layer.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PresenceError {
    /// The transport could not be established, or was lost.
    #[error("connection to {topic} failed: {reason}")]
    Connection { topic: String, reason: String },

    /// A track was attempted while not subscribed, or failed in transit.
    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },

    /// An event contradicted the known state (e.g. leave for an unseen key).
    #[error("merge inconsistency on {topic}: participant {participant} is not present")]
    MergeInconsistency { topic: String, participant: ParticipantId },

    /// The authentication provider could not resolve the current user.
    #[error("auth provider failed: {0}")]
    Auth(String),

    /// A configuration value could not be used.
    #[error("invalid config value for {key}: {value:?}")]
    Config { key: &'static str, value: String },
}

impl ErrorCode for PresenceError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "E_CONNECTION",
            Self::Publish { .. } => "E_PUBLISH",
            Self::MergeInconsistency { .. } => "E_MERGE_INCONSISTENCY",
            Self::Auth(_) => "E_AUTH",
            Self::Config { .. } => "E_CONFIG",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Publish { .. })
    }
}

#[cfg(test)]
#[path = "error_test.rs"]
mod tests;
