//! Credential lifecycle state machine.
//!
//! ```text
//! Unauthenticated -> Authorizing -> AwaitingCallback -> Exchanging -> Authenticated
//!                         |               |                 |
//!                         +---------------+-----------------+--> Failed
//! Authenticated | Unauthenticated | Failed -> Refreshing -> Authenticated | Unauthenticated
//! ```
//!
//! `Authenticated -> Authorizing` is a re-login over a stored credential, and
//! `Unauthenticated -> Authenticated` is a credential found on disk.

use std::fmt;

use crate::{AuthError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    Authorizing,
    AwaitingCallback,
    Exchanging,
    Authenticated,
    Refreshing,
    Failed,
}

impl AuthState {
    pub fn can_transition_to(self, next: AuthState) -> bool {
        use AuthState::*;

        matches!(
            (self, next),
            (Unauthenticated, Authorizing)
                | (Failed, Authorizing)
                | (Authenticated, Authorizing)
                | (Authorizing, AwaitingCallback)
                | (AwaitingCallback, Exchanging)
                | (Exchanging, Authenticated)
                | (Authorizing, Failed)
                | (AwaitingCallback, Failed)
                | (Exchanging, Failed)
                | (Unauthenticated, Authenticated)
                | (Authenticated, Refreshing)
                | (Unauthenticated, Refreshing)
                | (Failed, Refreshing)
                | (Refreshing, Authenticated)
                | (Refreshing, Unauthenticated)
                | (Authenticated, Unauthenticated)
                | (Failed, Unauthenticated)
        )
    }

    /// Validated transition.
    pub fn transition(self, next: AuthState) -> Result<AuthState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(AuthError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuthState::Unauthenticated => "unauthenticated",
            AuthState::Authorizing => "authorizing",
            AuthState::AwaitingCallback => "awaiting_callback",
            AuthState::Exchanging => "exchanging",
            AuthState::Authenticated => "authenticated",
            AuthState::Refreshing => "refreshing",
            AuthState::Failed => "failed",
        };
        f.write_str(s)
    }
}
