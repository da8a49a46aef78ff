//! Authentication seam.
//!
//! Sessions and tokens belong to an external provider; presence only needs
//! to know who the current user is, if anyone.

use crate::error::PresenceError;
use crate::record::ParticipantId;

#[async_trait::async_trait]
pub trait AuthProvider: Send + Sync {
    /// The signed-in participant, or `None` when nobody is signed in.
    ///
    /// # Errors
    ///
    /// Returns [`PresenceError::Auth`] if the provider cannot be reached.
    async fn current_user(&self) -> Result<Option<ParticipantId>, PresenceError>;
}

/// A provider with a fixed identity, for CLIs and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticAuth {
    user: Option<ParticipantId>,
}

impl StaticAuth {
    #[must_use]
    pub fn signed_in(user: ParticipantId) -> Self {
        Self { user: Some(user) }
    }

    #[must_use]
    pub fn signed_out() -> Self {
        Self { user: None }
    }
}

#[async_trait::async_trait]
impl AuthProvider for StaticAuth {
    async fn current_user(&self) -> Result<Option<ParticipantId>, PresenceError> {
        Ok(self.user)
    }
}
