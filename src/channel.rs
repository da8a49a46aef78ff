//! Topic channel: one live subscription to one presence topic.
//!
//! LIFECYCLE
//! =========
//! `Opening → Subscribed` when the transport acknowledges the subscription,
//! `Opening → Closed` when the handshake fails, `Subscribed → Closed` on an
//! explicit close or an unrecoverable transport loss. `Closed` is terminal.
//!
//! DESIGN
//! ======
//! A pump task drains the transport's event queue, tags each event with the
//! topic, and folds it into the store. On the transition to `Subscribed` the
//! pump publishes the initial `{online: true, last_seen: now}` record. A
//! subscription closed while still `Opening` never runs that step.
//!
//! Closing aborts the pump and waits for it to stop before detaching the
//! topic from the store, so no event from this channel is applied after
//! `close` returns. A subscription dropped without `close` aborts its pump,
//! detaches, and closes the transport on a spawned task.
//!
//! Connecting is bounded by `connect_timeout`; callers hold the registry lock
//! across `open`, and the heartbeat and lifecycle drivers wait on that lock.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::PresenceError;
use crate::event::PresenceEvent;
use crate::record::{ParticipantId, PresenceRecord};
use crate::store::PresenceStore;
use crate::topic::Topic;
use crate::transport::{Transport, TransportEvent, TransportHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Opening,
    Subscribed,
    Closed,
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Opening => "opening",
            Self::Subscribed => "subscribed",
            Self::Closed => "closed",
        })
    }
}

/// Parameters for opening a channel.
pub struct ChannelOptions<'a> {
    pub topic: Topic,
    /// Transport-level topic name.
    pub name: String,
    pub presence_key: ParticipantId,
    pub store: &'a Arc<PresenceStore>,
    pub queue_capacity: usize,
    pub connect_timeout: Duration,
}

pub struct Subscription {
    topic: Topic,
    name: String,
    state: Arc<watch::Sender<SubscriptionState>>,
    handle: Arc<dyn TransportHandle>,
    store: Arc<PresenceStore>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl Subscription {
    /// Connect to the topic and start delivering its events into the store.
    ///
    /// The returned subscription is `Opening` until the transport confirms.
    ///
    /// # Errors
    ///
    /// Returns [`PresenceError::Connection`] if the transport cannot connect
    /// within `connect_timeout`. Nothing is attached to the store in that case.
    pub async fn open(transport: &dyn Transport, options: ChannelOptions<'_>) -> Result<Self, PresenceError> {
        let ChannelOptions { topic, name, presence_key, store, queue_capacity, connect_timeout } = options;
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));

        let connected = tokio::time::timeout(connect_timeout, transport.connect(&name, presence_key, tx)).await;
        let Ok(connected) = connected else {
            warn!(%topic, name, timeout_ms = connect_timeout.as_millis(), "channel connect timed out");
            return Err(PresenceError::Connection {
                topic: name,
                reason: format!("timed out after {}ms", connect_timeout.as_millis()),
            });
        };
        let handle: Arc<dyn TransportHandle> = Arc::from(connected?);
        store.attach(topic);

        let (state, _) = watch::channel(SubscriptionState::Opening);
        let state = Arc::new(state);
        let pump = tokio::spawn(pump_events(
            topic,
            name.clone(),
            rx,
            Arc::clone(store),
            Arc::clone(&state),
            Arc::clone(&handle),
        ));
        info!(%topic, name, "channel opening");

        Ok(Self { topic, name, state, handle, store: Arc::clone(store), pump: Mutex::new(Some(pump)) })
    }

    #[must_use]
    pub fn topic(&self) -> Topic {
        self.topic
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn state(&self) -> SubscriptionState {
        *self.state.borrow()
    }

    /// `Opening` or `Subscribed`.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() != SubscriptionState::Closed
    }

    /// Wait until the subscription leaves `Opening`, up to `limit`.
    ///
    /// # Errors
    ///
    /// Returns [`PresenceError::Connection`] if the subscription ends up
    /// `Closed` or is still `Opening` after `limit`.
    pub async fn wait_subscribed(&self, limit: Duration) -> Result<(), PresenceError> {
        let mut rx = self.state.subscribe();
        let settled = tokio::time::timeout(limit, rx.wait_for(|s| *s != SubscriptionState::Opening)).await;
        match settled {
            Ok(Ok(state)) if *state == SubscriptionState::Subscribed => Ok(()),
            Ok(_) => Err(self.connection_error("subscription closed")),
            Err(_) => Err(self.connection_error("timed out waiting for subscription")),
        }
    }

    /// Publish the local record on this topic.
    ///
    /// # Errors
    ///
    /// Returns [`PresenceError::Publish`] unless the subscription is
    /// `Subscribed`, or if the transport write fails.
    pub async fn track(&self, record: PresenceRecord) -> Result<(), PresenceError> {
        let state = self.state();
        if state != SubscriptionState::Subscribed {
            return Err(PresenceError::Publish { topic: self.name.clone(), reason: format!("subscription is {state}") });
        }
        self.handle.track(record).await
    }

    /// Tear down the transport and detach the topic from the store.
    /// Idempotent.
    pub async fn close(&self) {
        let previous = self.state.send_replace(SubscriptionState::Closed);

        let pump = self.pump.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(pump) = pump {
            pump.abort();
            if let Err(e) = pump.await {
                if !e.is_cancelled() {
                    warn!(topic = %self.topic, error = %e, "channel pump ended abnormally");
                }
            }
        }

        self.handle.close().await;
        if previous == SubscriptionState::Closed {
            return;
        }
        let went_offline = self.store.detach(self.topic);
        info!(topic = %self.topic, went_offline, "channel closed");
    }

    fn connection_error(&self, reason: &str) -> PresenceError {
        PresenceError::Connection { topic: self.name.clone(), reason: reason.to_string() }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // `close` already ran when the pump is gone.
        let Some(pump) = self.pump.get_mut().unwrap_or_else(PoisonError::into_inner).take() else {
            return;
        };
        pump.abort();
        let previous = self.state.send_replace(SubscriptionState::Closed);
        if previous != SubscriptionState::Closed {
            let went_offline = self.store.detach(self.topic);
            debug!(topic = %self.topic, went_offline, "dropped channel detached");
        }

        let handle = Arc::clone(&self.handle);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move { handle.close().await });
            }
            Err(e) => warn!(topic = %self.topic, error = %e, "channel dropped outside a runtime; transport left open"),
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("name", &self.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// PUMP
// =============================================================================

async fn pump_events(
    topic: Topic,
    name: String,
    mut rx: mpsc::Receiver<TransportEvent>,
    store: Arc<PresenceStore>,
    state: Arc<watch::Sender<SubscriptionState>>,
    handle: Arc<dyn TransportHandle>,
) {
    while let Some(event) = rx.recv().await {
        if *state.borrow() == SubscriptionState::Closed {
            break;
        }
        let presence = match event {
            TransportEvent::Subscribed => {
                let promoted = state.send_if_modified(|s| {
                    if *s == SubscriptionState::Opening {
                        *s = SubscriptionState::Subscribed;
                        true
                    } else {
                        false
                    }
                });
                if promoted {
                    info!(%topic, name, "channel subscribed");
                    if let Err(e) = handle.track(PresenceRecord::online_now()).await {
                        warn!(%topic, error = %e, "initial track failed");
                    }
                }
                continue;
            }
            TransportEvent::Closed { reason } => {
                state.send_replace(SubscriptionState::Closed);
                let went_offline = store.detach(topic);
                warn!(%topic, name, %reason, went_offline, "channel lost");
                break;
            }
            TransportEvent::Sync(snapshot) => PresenceEvent::Sync { topic, snapshot },
            TransportEvent::Join { key, records } => PresenceEvent::Join { topic, key, records },
            TransportEvent::Leave { key } => PresenceEvent::Leave { topic, key },
        };

        if let Err(e) = store.apply(presence) {
            debug!(%topic, error = %e, "presence event not applied");
        }
    }
}

#[cfg(test)]
#[path = "channel_test.rs"]
mod tests;
