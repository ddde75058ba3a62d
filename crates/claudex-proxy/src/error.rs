//! Caller-facing errors.
//!
//! Every error leaves the gateway as `{"error": {"type", "message"}}`; internal
//! detail stays in the logs.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    /// Missing/invalid inbound key, or no usable upstream credential.
    #[error("{0}")]
    Authentication(String),

    /// Malformed request body.
    #[error("{0}")]
    InvalidRequest(String),

    /// Upstream transport failure, error status, or unparsable payload.
    #[error("{0}")]
    Upstream(String),
}

impl ProxyError {
    pub fn error_type(&self) -> &'static str {
        match self {
            ProxyError::Authentication(_) => "authentication_error",
            ProxyError::InvalidRequest(_) => "invalid_request_error",
            ProxyError::Upstream(_) => "api_error",
        }
    }
}

impl ResponseError for ProxyError {
    fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::Authentication(_) => StatusCode::UNAUTHORIZED,
            ProxyError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "type": self.error_type(),
                "message": self.to_string(),
            }
        }))
    }
}

/// Fatal startup conditions.
#[derive(Debug, Error)]
pub enum ServeError {
    #[error("no valid upstream credential; run `claudex login` first")]
    NotAuthenticated,

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}
