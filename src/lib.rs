//! Presence synchronization core for a multi-user chat application.
//!
//! ARCHITECTURE
//! ============
//! Leaf to root:
//! - `transport`: pub/sub endpoints (in-process broker, websocket client).
//! - `channel`: one `Subscription` per open topic, pumping transport events.
//! - `store`: the merged participant → presence read model.
//! - `registry`: owns the global and the active conversation subscription.
//! - `heartbeat` / `lifecycle`: re-track drivers (timer and app signals).
//! - `session`: composes everything behind explicit start / shutdown.
//!
//! `relay` exposes an in-process broker over websockets so that separate
//! processes can share topics.

pub mod auth;
pub mod channel;
pub mod config;
pub mod error;
pub mod event;
pub mod heartbeat;
pub mod lifecycle;
pub mod record;
pub mod registry;
pub mod relay;
pub mod session;
pub mod store;
pub mod topic;
pub mod transport;
pub mod wire;

pub use config::PresenceConfig;
pub use error::{ErrorCode, PresenceError};
pub use event::PresenceEvent;
pub use lifecycle::LifecycleSignal;
pub use record::{ParticipantId, PresenceRecord, SnapshotFold, Timestamp};
pub use session::PresenceSession;
pub use store::PresenceStore;
pub use topic::Topic;

#[cfg(test)]
#[path = "helpers_test.rs"]
pub(crate) mod test_helpers;
