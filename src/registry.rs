//! Channel registry: owns every open subscription of a session.
//!
//! DESIGN
//! ======
//! At most two subscriptions exist at a time: the global one, kept open for
//! the whole authenticated session, and the one for the conversation being
//! viewed. Switching conversations closes the old conversation channel
//! before opening the new one and never touches the global channel.
//!
//! ERROR HANDLING
//! ==============
//! A failed or timed-out open is returned to the caller and leaves no entry
//! behind, so calling the same method again is the retry. A subscription the transport
//! closed underneath us counts as not open and is replaced on the next
//! `ensure_global_open` / `set_active_conversation`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::channel::{ChannelOptions, Subscription};
use crate::config::PresenceConfig;
use crate::error::PresenceError;
use crate::record::{ParticipantId, PresenceRecord};
use crate::store::PresenceStore;
use crate::topic::{Topic, TopicNaming};
use crate::transport::Transport;

/// Registry handle shared by the session, heartbeat and lifecycle bridge.
pub type SharedRegistry = Arc<Mutex<ChannelRegistry>>;

pub struct ChannelRegistry {
    transport: Arc<dyn Transport>,
    store: Arc<PresenceStore>,
    local_id: ParticipantId,
    naming: TopicNaming,
    queue_capacity: usize,
    connect_timeout: Duration,
    global: Option<Subscription>,
    conversation: Option<Subscription>,
}

impl ChannelRegistry {
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<PresenceStore>,
        local_id: ParticipantId,
        config: &PresenceConfig,
    ) -> Self {
        Self {
            transport,
            store,
            local_id,
            naming: config.naming.clone(),
            queue_capacity: config.event_queue_capacity,
            connect_timeout: config.connect_timeout,
            global: None,
            conversation: None,
        }
    }

    #[must_use]
    pub fn local_id(&self) -> ParticipantId {
        self.local_id
    }

    /// Open the global channel unless it is already open.
    ///
    /// # Errors
    ///
    /// Returns [`PresenceError::Connection`] if the transport refuses.
    pub async fn ensure_global_open(&mut self) -> Result<(), PresenceError> {
        if self.global.as_ref().is_some_and(Subscription::is_open) {
            return Ok(());
        }
        if let Some(stale) = self.global.take() {
            stale.close().await;
        }
        self.global = Some(self.open(Topic::Global).await?);
        Ok(())
    }

    /// Point the conversation channel at `conversation`, or close it for
    /// `None`. Re-selecting the open conversation is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`PresenceError::Connection`] if the new channel cannot be
    /// opened. The previous conversation channel is closed regardless.
    pub async fn set_active_conversation(&mut self, conversation: Option<Uuid>) -> Result<(), PresenceError> {
        let target = conversation.map(Topic::Conversation);
        if let (Some(current), Some(target)) = (&self.conversation, target) {
            if current.topic() == target && current.is_open() {
                return Ok(());
            }
        }

        if let Some(previous) = self.conversation.take() {
            previous.close().await;
        }
        let Some(topic) = target else {
            return Ok(());
        };
        self.conversation = Some(self.open(topic).await?);
        Ok(())
    }

    /// Close every channel. Called once at session end.
    pub async fn close_all(&mut self) {
        if let Some(conversation) = self.conversation.take() {
            conversation.close().await;
        }
        if let Some(global) = self.global.take() {
            global.close().await;
        }
        info!(participant = %self.local_id, "all presence channels closed");
    }

    /// Track `record` on every open channel. One channel failing does not
    /// stop the others.
    pub async fn track_all(&self, record: PresenceRecord) -> Vec<(Topic, Result<(), PresenceError>)> {
        let mut outcomes = Vec::with_capacity(2);
        for sub in self.subscriptions() {
            outcomes.push((sub.topic(), sub.track(record).await));
        }
        outcomes
    }

    /// Topics with a subscription that is `Opening` or `Subscribed`.
    #[must_use]
    pub fn open_topics(&self) -> Vec<Topic> {
        self.subscriptions()
            .filter(|sub| sub.is_open())
            .map(Subscription::topic)
            .collect()
    }

    #[must_use]
    pub fn active_conversation(&self) -> Option<Uuid> {
        self.conversation
            .as_ref()
            .filter(|sub| sub.is_open())
            .and_then(|sub| sub.topic().conversation_id())
    }

    #[must_use]
    pub fn subscription(&self, topic: Topic) -> Option<&Subscription> {
        self.subscriptions().find(|sub| sub.topic() == topic)
    }

    fn subscriptions(&self) -> impl Iterator<Item = &Subscription> {
        self.global.iter().chain(self.conversation.iter())
    }

    async fn open(&self, topic: Topic) -> Result<Subscription, PresenceError> {
        Subscription::open(
            self.transport.as_ref(),
            ChannelOptions {
                topic,
                name: self.naming.name(topic),
                presence_key: self.local_id,
                store: &self.store,
                queue_capacity: self.queue_capacity,
                connect_timeout: self.connect_timeout,
            },
        )
        .await
    }
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;
