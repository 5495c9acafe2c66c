//! Client session state.

use crate::{TokenPair, UserProfile};
use serde::{Deserialize, Serialize};

/// Credentials and profile of the signed-in user.
///
/// `access_token` is `None` exactly when the session is unauthenticated.
/// `user` may still be `None` right after sign-in, until the profile fetch
/// completes.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub user: Option<UserProfile>,
}

impl Session {
    /// An unauthenticated session.
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn is_authenticated(&self) -> bool {
        self.access_token.is_some()
    }

    /// Whether the user finished onboarding. `false` while the profile is unknown.
    pub fn onboarding_complete(&self) -> bool {
        self.user.as_ref().is_some_and(|u| u.onboarding_complete)
    }

    pub fn apply_tokens(&mut self, pair: &TokenPair) {
        self.access_token = Some(pair.access_token.clone());
        self.refresh_token = Some(pair.refresh_token.clone());
    }

    pub fn clear(&mut self) {
        *self = Self::anonymous();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("authenticated", &self.access_token.is_some())
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("user", &self.user.as_ref().map(|u| u.id))
            .finish()
    }
}
