//! Lifecycle bridge: app activity signals into presence tracks.
//!
//! The platform layer holds a `LifecycleSignals` sender and reports
//! transitions; the bridge task re-tracks on every open channel:
//! - `Foregrounded` → `{online: true, last_seen: now}`
//! - `Backgrounded` / `Closing` → `{online: false, last_seen: now}`
//!
//! Offline tracks are advisory. A process that is going away may tear the
//! transport down before the record reaches peers; failures are logged only.

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::record::PresenceRecord;
use crate::registry::{ChannelRegistry, SharedRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
    /// The user is interacting with the app again.
    Foregrounded,
    /// The app lost visibility.
    Backgrounded,
    /// The process is about to terminate.
    Closing,
}

impl LifecycleSignal {
    /// Record to publish for this signal, stamped now.
    #[must_use]
    pub fn record(self) -> PresenceRecord {
        match self {
            Self::Foregrounded => PresenceRecord::online_now(),
            Self::Backgrounded | Self::Closing => PresenceRecord::offline_now(),
        }
    }
}

/// Sender side handed to the platform layer.
#[derive(Debug, Clone)]
pub struct LifecycleSignals {
    tx: mpsc::Sender<LifecycleSignal>,
}

impl LifecycleSignals {
    /// Report a transition. Returns `false` if the bridge is gone or its
    /// queue is full; the signal is dropped in that case.
    pub fn notify(&self, signal: LifecycleSignal) -> bool {
        match self.tx.try_send(signal) {
            Ok(()) => true,
            Err(e) => {
                warn!(?signal, error = %e, "lifecycle signal dropped");
                false
            }
        }
    }
}

pub struct LifecycleBridge {
    signals: LifecycleSignals,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl LifecycleBridge {
    #[must_use]
    pub fn spawn(registry: SharedRegistry, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel(capacity.max(1));
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => break,
                    signal = rx.recv() => {
                        let Some(signal) = signal else { break };
                        let guard = registry.lock().await;
                        handle_signal(&guard, signal).await;
                    }
                }
            }
            debug!("lifecycle bridge stopped");
        });

        Self { signals: LifecycleSignals { tx }, shutdown, task: Some(task) }
    }

    #[must_use]
    pub fn signals(&self) -> LifecycleSignals {
        self.signals.clone()
    }

    /// Unsubscribe from signals and wait for the bridge to exit. Signals sent
    /// afterwards are dropped.
    pub async fn stop(mut self) {
        self.shutdown.send_replace(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "lifecycle bridge task failed");
            }
        }
    }
}

impl Drop for LifecycleBridge {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Publish the record for `signal` on every open channel. Returns how many
/// channels accepted it.
pub async fn handle_signal(registry: &ChannelRegistry, signal: LifecycleSignal) -> usize {
    let record = signal.record();
    let outcomes = registry.track_all(record).await;
    let mut delivered = 0;
    for (topic, outcome) in outcomes {
        match outcome {
            Ok(()) => delivered += 1,
            Err(e) => warn!(%topic, ?signal, error = %e, "lifecycle track failed"),
        }
    }
    info!(?signal, online = record.online, delivered, "lifecycle presence update");
    delivered
}

#[cfg(test)]
#[path = "lifecycle_test.rs"]
mod tests;
