//! Heartbeat scheduler: periodic presence refresh.
//!
//! DESIGN
//! ======
//! Every interval the local participant re-tracks `{online: true, last_seen:
//! now}` on every open channel so peers never see a stale `last_seen`. The
//! first tick fires one full interval after start; the subscribe-time track
//! covers the moment before it.
//!
//! ERROR HANDLING
//! ==============
//! Refresh is best-effort. A channel that fails to track is logged and the
//! tick carries on with the remaining channels; the next tick runs as usual.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::record::PresenceRecord;
use crate::registry::{ChannelRegistry, SharedRegistry};

pub struct HeartbeatScheduler {
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl HeartbeatScheduler {
    /// Spawn the refresh loop.
    #[must_use]
    pub fn spawn(registry: SharedRegistry, interval: Duration) -> Self {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        info!(interval_secs = interval.as_secs(), "presence heartbeat configured");

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        let guard = registry.lock().await;
                        refresh(&guard).await;
                    }
                }
            }
            debug!("presence heartbeat stopped");
        });

        Self { shutdown, task: Some(task) }
    }

    /// Stop the loop and wait for it to exit. No tick runs after this returns.
    pub async fn stop(mut self) {
        self.shutdown.send_replace(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "presence heartbeat task failed");
            }
        }
    }
}

impl Drop for HeartbeatScheduler {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Re-track the local participant as online on every open channel. Returns
/// how many channels accepted the refresh.
pub async fn refresh(registry: &ChannelRegistry) -> usize {
    let outcomes = registry.track_all(PresenceRecord::online_now()).await;
    let mut refreshed = 0;
    for (topic, outcome) in outcomes {
        match outcome {
            Ok(()) => refreshed += 1,
            Err(e) => warn!(%topic, error = %e, "heartbeat track failed"),
        }
    }
    debug!(refreshed, "presence heartbeat tick");
    refreshed
}

#[cfg(test)]
#[path = "heartbeat_test.rs"]
mod tests;
