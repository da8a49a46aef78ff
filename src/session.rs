//! Presence session: the composed subsystem with explicit start/shutdown.
//!
//! LIFECYCLE
//! =========
//! 1. `start` → open the global channel, spawn heartbeat + lifecycle bridge
//! 2. `set_active_conversation` as the user navigates
//! 3. `shutdown` → stop the bridge and the heartbeat, publish the advisory
//!    offline record, close every channel
//!
//! The store outlives the session (callers may keep the `Arc`) and retains
//! the last merged view with everyone marked offline.

use std::fmt;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::auth::AuthProvider;
use crate::config::PresenceConfig;
use crate::error::PresenceError;
use crate::heartbeat::HeartbeatScheduler;
use crate::lifecycle::{self, LifecycleBridge, LifecycleSignal, LifecycleSignals};
use crate::record::{ParticipantId, PresenceRecord, Timestamp};
use crate::registry::{ChannelRegistry, SharedRegistry};
use crate::store::PresenceStore;
use crate::transport::Transport;

pub struct PresenceSession {
    local_id: ParticipantId,
    store: Arc<PresenceStore>,
    registry: SharedRegistry,
    heartbeat: HeartbeatScheduler,
    lifecycle: LifecycleBridge,
}

impl PresenceSession {
    /// Start presence for `local_id`.
    ///
    /// # Errors
    ///
    /// Returns [`PresenceError::Connection`] if the global channel cannot be
    /// opened. Nothing keeps running in that case.
    pub async fn start(
        transport: Arc<dyn Transport>,
        local_id: ParticipantId,
        config: &PresenceConfig,
    ) -> Result<Self, PresenceError> {
        let store = Arc::new(PresenceStore::new(config.snapshot_fold));
        let mut registry = ChannelRegistry::new(transport, Arc::clone(&store), local_id, config);
        registry.ensure_global_open().await?;

        let registry = Arc::new(Mutex::new(registry));
        let heartbeat = HeartbeatScheduler::spawn(Arc::clone(&registry), config.heartbeat_interval);
        let lifecycle = LifecycleBridge::spawn(Arc::clone(&registry), config.signal_queue_capacity);
        info!(participant = %local_id, "presence session started");

        Ok(Self { local_id, store, registry, heartbeat, lifecycle })
    }

    /// Start presence for whoever the auth provider reports. Returns
    /// `Ok(None)` when nobody is signed in.
    ///
    /// # Errors
    ///
    /// Propagates auth provider failures and [`PresenceSession::start`]
    /// errors.
    pub async fn start_for_current_user(
        auth: &dyn AuthProvider,
        transport: Arc<dyn Transport>,
        config: &PresenceConfig,
    ) -> Result<Option<Self>, PresenceError> {
        let Some(user) = auth.current_user().await? else {
            info!("no signed-in user; presence not started");
            return Ok(None);
        };
        Self::start(transport, user, config).await.map(Some)
    }

    #[must_use]
    pub fn local_id(&self) -> ParticipantId {
        self.local_id
    }

    #[must_use]
    pub fn store(&self) -> &Arc<PresenceStore> {
        &self.store
    }

    #[must_use]
    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    #[must_use]
    pub fn is_online(&self, participant: ParticipantId) -> bool {
        self.store.is_online(participant)
    }

    #[must_use]
    pub fn last_seen_of(&self, participant: ParticipantId) -> Option<Timestamp> {
        self.store.last_seen_of(participant)
    }

    #[must_use]
    pub fn record_of(&self, participant: ParticipantId) -> Option<PresenceRecord> {
        self.store.record_of(participant)
    }

    /// Sender for platform activity signals.
    #[must_use]
    pub fn signals(&self) -> LifecycleSignals {
        self.lifecycle.signals()
    }

    /// Reopen the global channel if the transport dropped it.
    ///
    /// # Errors
    ///
    /// Returns [`PresenceError::Connection`] if the reopen fails.
    pub async fn ensure_global_open(&self) -> Result<(), PresenceError> {
        self.registry.lock().await.ensure_global_open().await
    }

    /// # Errors
    ///
    /// Returns [`PresenceError::Connection`] if the conversation channel
    /// cannot be opened.
    pub async fn set_active_conversation(&self, conversation: Option<Uuid>) -> Result<(), PresenceError> {
        self.registry
            .lock()
            .await
            .set_active_conversation(conversation)
            .await
    }

    /// Tear everything down. The drivers stop before any channel closes.
    pub async fn shutdown(self) {
        let Self { local_id, store: _, registry, heartbeat, lifecycle } = self;
        lifecycle.stop().await;
        heartbeat.stop().await;

        let mut registry = registry.lock().await;
        lifecycle::handle_signal(&registry, LifecycleSignal::Closing).await;
        registry.close_all().await;
        info!(participant = %local_id, "presence session stopped");
    }
}

impl fmt::Debug for PresenceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PresenceSession")
            .field("local_id", &self.local_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
