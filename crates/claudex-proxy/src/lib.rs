//! Claudex Proxy - serve Anthropic Messages API traffic from an OpenAI-style upstream.
//!
//! Clients speak Anthropic's `/v1/messages` API. This crate exposes a
//! compatible HTTP surface, translates each request to an OpenAI-style
//! `chat/completions` payload, authenticates upstream with the delegated OAuth
//! credential from `claudex-auth`, and translates responses back (including
//! SSE streaming).
//!
//! Design goals:
//! - Accept Anthropic wire format, including intercepted auth/account calls.
//! - Forward chat to a single upstream with one OAuth credential.
//! - Reproduce Anthropic's SSE framing regardless of upstream chunking.

pub mod config;
pub mod error;
pub mod mock;
pub mod relay;
pub mod router;
pub mod server;
pub mod translation;
pub mod types;

pub use config::ProxyConfig;
pub use error::{ProxyError, ServeError};
pub use router::{Classification, Router};
pub use relay::{Relay, RelayStats};
pub use server::{dispatch, serve, AppState};
