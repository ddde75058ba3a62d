//! Claudex Auth - upstream OAuth credential lifecycle.
//!
//! Owns the single delegated credential the proxy uses to talk to the upstream
//! chat vendor:
//! - interactive authorization-code flow with PKCE and a local callback listener
//! - persisted credential file (atomic, owner-only writes)
//! - transparent refresh with a single-flight guard

pub mod callback;
pub mod client;
pub mod config;
pub mod credential;
pub mod error;
pub mod manager;
pub mod pkce;
pub mod state;
pub mod storage;

pub use callback::{CallbackListener, CallbackParams};
pub use client::TokenClient;
pub use config::OAuthConfig;
pub use credential::Credential;
pub use error::{AuthError, Result};
pub use manager::{CredentialManager, CredentialStatus};
pub use pkce::{generate_pkce, generate_state, PkceChallenge};
pub use state::AuthState;
pub use storage::CredentialStore;

pub use secrecy;
