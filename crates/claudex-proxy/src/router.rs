//! Request classification.
//!
//! Traffic reaches the gateway through host redirection, so one listener sees
//! requests meant for several of the source vendor's hosts. Classification
//! looks at host and path only; it never fails.

use actix_web::http::Method;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    ChatCompletion,
    AuthMock,
    HealthCheck,
    Passthrough,
}

#[derive(Debug, Clone)]
pub struct Router {
    chat_hosts: Vec<String>,
    chat_path_prefixes: Vec<String>,
    auth_hosts: Vec<String>,
    auth_path_prefixes: Vec<String>,
    health_path: String,
}

const CHAT_HOSTS: &[&str] = &["api.anthropic.com"];
const CHAT_PATH_PREFIXES: &[&str] = &["/v1/messages"];
const AUTH_HOSTS: &[&str] = &["claude.ai", "console.anthropic.com", "platform.claude.com"];
const AUTH_PATH_PREFIXES: &[&str] = &[
    "/api/oauth",
    "/api/auth",
    "/oauth",
    "/v1/oauth",
    "/api/account",
    "/v1/api_key",
];

impl Default for Router {
    fn default() -> Self {
        Self::new(
            CHAT_HOSTS.iter().copied(),
            CHAT_PATH_PREFIXES.iter().copied(),
            AUTH_HOSTS.iter().copied(),
            AUTH_PATH_PREFIXES.iter().copied(),
            "/health",
        )
    }
}

impl Router {
    /// Hosts are matched case-insensitively; prefixes match whole path segments.
    pub fn new<I, S>(
        chat_hosts: I,
        chat_path_prefixes: I,
        auth_hosts: I,
        auth_path_prefixes: I,
        health_path: impl Into<String>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            chat_hosts: lowercase_all(chat_hosts),
            chat_path_prefixes: chat_path_prefixes.into_iter().map(Into::into).collect(),
            auth_hosts: lowercase_all(auth_hosts),
            auth_path_prefixes: auth_path_prefixes.into_iter().map(Into::into).collect(),
            health_path: health_path.into(),
        }
    }

    pub fn classify(&self, _method: &Method, host: &str, path: &str) -> Classification {
        let host = normalize_host(host);
        let path = path.split('?').next().unwrap_or(path);

        let auth_path = self
            .auth_path_prefixes
            .iter()
            .any(|prefix| path_has_prefix(path, prefix));

        if self
            .chat_path_prefixes
            .iter()
            .any(|prefix| path_has_prefix(path, prefix))
        {
            return Classification::ChatCompletion;
        }

        // The chat API host also serves account calls; those stay mocked.
        if self.chat_hosts.contains(&host) && !auth_path {
            return Classification::ChatCompletion;
        }

        if auth_path || self.auth_hosts.contains(&host) {
            return Classification::AuthMock;
        }

        if path == self.health_path {
            return Classification::HealthCheck;
        }

        Classification::Passthrough
    }
}

fn lowercase_all<I, S>(hosts: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    hosts
        .into_iter()
        .map(|h| Into::<String>::into(h).to_ascii_lowercase())
        .collect()
}

/// Lowercase host without any `:port` suffix.
fn normalize_host(host: &str) -> String {
    let host = host.trim();
    let without_port = match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    };
    without_port.to_ascii_lowercase()
}

/// `/v1/messages` matches `/v1/messages` and `/v1/messages/...`, not `/v1/messagesX`.
fn path_has_prefix(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}
