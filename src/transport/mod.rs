//! Transport seam: the pub/sub endpoint a channel binds to.
//!
//! DESIGN
//! ======
//! `Transport::connect` establishes one topic-scoped connection keyed by the
//! local participant and returns a handle for publishing. Everything the
//! remote side emits (subscribe acknowledgement, sync/join/leave, loss of
//! the connection) arrives as `TransportEvent`s on the supplied queue.
//!
//! Implementations:
//! - `local::LocalBroker`: in-process broker with full presence semantics.
//! - `ws::WsTransport`: websocket client for the relay server.

pub mod local;
pub mod ws;

use tokio::sync::mpsc;

use crate::error::PresenceError;
use crate::record::{ParticipantId, PresenceRecord};
use crate::topic::TopicSnapshot;

/// Everything a connection can report back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Handshake finished; tracking is allowed from now on.
    Subscribed,
    /// Full snapshot of the topic.
    Sync(TopicSnapshot),
    /// A participant tracked one or more payloads.
    Join { key: ParticipantId, records: Vec<PresenceRecord> },
    /// A participant is no longer tracked.
    Leave { key: ParticipantId },
    /// The connection is gone and will not come back.
    Closed { reason: String },
}

#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection scoped to `topic`, using `presence_key` as the local
    /// participant's key.
    ///
    /// # Errors
    ///
    /// Returns [`PresenceError::Connection`] if the connection cannot be
    /// established. No retry is attempted.
    async fn connect(
        &self,
        topic: &str,
        presence_key: ParticipantId,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Box<dyn TransportHandle>, PresenceError>;
}

#[async_trait::async_trait]
pub trait TransportHandle: Send + Sync {
    /// Publish the local participant's record to the topic.
    ///
    /// # Errors
    ///
    /// Returns [`PresenceError::Publish`] if the connection is closed or the
    /// write fails.
    async fn track(&self, record: PresenceRecord) -> Result<(), PresenceError>;

    /// Tear the connection down. Idempotent.
    async fn close(&self);
}
