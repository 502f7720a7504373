//! crates/rewards_core/src/auth.rs
//!
//! A fixed-identity `AuthProvider`, resolved once per request by the caller.

use futures::stream::{self, StreamExt};

use crate::domain::UserId;
use crate::ports::{AuthProvider, AuthStateStream};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticAuth {
    user: Option<UserId>,
}

impl StaticAuth {
    pub fn signed_in(user: impl Into<UserId>) -> Self {
        Self {
            user: Some(user.into()),
        }
    }

    pub fn signed_out() -> Self {
        Self { user: None }
    }
}

impl AuthProvider for StaticAuth {
    fn current_user_id(&self) -> Option<UserId> {
        self.user.clone()
    }

    fn auth_state_changes(&self) -> AuthStateStream {
        // The identity never changes, so the stream is just the current state.
        stream::iter([self.user.clone()]).boxed()
    }
}
