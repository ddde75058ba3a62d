use thiserror::Error;

use crate::state::AuthState;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("state mismatch on OAuth callback (possible CSRF)")]
    Csrf,

    #[error("OAuth callback did not include an authorization code")]
    MissingCode,

    #[error("authorization denied by provider: {0}")]
    OAuthDenied(String),

    #[error("no OAuth callback received within {0} seconds")]
    CallbackTimeout(u64),

    #[error("OAuth callback listener closed before a callback arrived")]
    CallbackCancelled,

    #[error("token endpoint returned HTTP {status}: {body}")]
    TokenEndpoint { status: u16, body: String },

    #[error("invalid auth state transition: {from} -> {to}")]
    InvalidTransition { from: AuthState, to: AuthState },

    #[error("callback listener error: {0}")]
    Listener(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

pub type Result<T> = std::result::Result<T, AuthError>;
