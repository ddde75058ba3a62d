//! OAuth client configuration.
//!
//! Everything the credential lifecycle needs (issuer, client id, ports, file
//! paths, timing) lives in one value injected at construction, so several
//! managers can coexist in one process.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

pub const DEFAULT_ISSUER: &str = "https://auth.openai.com";
pub const DEFAULT_CLIENT_ID: &str = "app_EMoamEEZ73f0CkXaXp7hrann";
pub const DEFAULT_CALLBACK_PORT: u16 = 1455;
pub const DEFAULT_CALLBACK_PATH: &str = "/auth/callback";

#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub issuer: String,
    pub client_id: String,
    pub scopes: Vec<String>,
    /// Port for the local callback listener. `0` binds an ephemeral port.
    pub callback_port: u16,
    pub callback_path: String,
    pub credential_path: PathBuf,
    /// Refresh when the token expires within this window.
    pub refresh_margin: Duration,
    /// How long the interactive flow waits for the browser callback.
    pub callback_timeout: Duration,
    pub open_browser: bool,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            issuer: DEFAULT_ISSUER.to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            scopes: vec![
                "openid".to_string(),
                "profile".to_string(),
                "email".to_string(),
                "offline_access".to_string(),
            ],
            callback_port: DEFAULT_CALLBACK_PORT,
            callback_path: DEFAULT_CALLBACK_PATH.to_string(),
            credential_path: default_credential_path(),
            refresh_margin: Duration::from_secs(5 * 60),
            callback_timeout: Duration::from_secs(5 * 60),
            open_browser: true,
        }
    }
}

impl OAuthConfig {
    pub fn authorize_endpoint(&self) -> String {
        format!("{}/oauth/authorize", self.issuer_trimmed())
    }

    pub fn token_endpoint(&self) -> String {
        format!("{}/oauth/token", self.issuer_trimmed())
    }

    pub fn redirect_uri(&self, port: u16) -> String {
        format!("http://localhost:{}{}", port, self.callback_path)
    }

    pub fn scope(&self) -> String {
        self.scopes.join(" ")
    }

    /// Build the authorization URL for one flow attempt.
    pub fn authorization_url(
        &self,
        redirect_uri: &str,
        challenge: &str,
        state: &str,
    ) -> Result<Url, url::ParseError> {
        let mut url = Url::parse(&self.authorize_endpoint())?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("scope", &self.scope())
            .append_pair("code_challenge", challenge)
            .append_pair("code_challenge_method", "S256")
            .append_pair("state", state);
        Ok(url)
    }

    fn issuer_trimmed(&self) -> &str {
        self.issuer.trim_end_matches('/')
    }
}

fn default_credential_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("claudex")
        .join("credential.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_tolerate_trailing_slash() {
        let config = OAuthConfig {
            issuer: "https://issuer.example/".to_string(),
            ..OAuthConfig::default()
        };
        assert_eq!(
            config.token_endpoint(),
            "https://issuer.example/oauth/token"
        );
        assert_eq!(
            config.authorize_endpoint(),
            "https://issuer.example/oauth/authorize"
        );
    }

    #[test]
    fn authorization_url_carries_pkce_and_state() {
        let config = OAuthConfig::default();
        let url = config
            .authorization_url(&config.redirect_uri(1455), "chal", "st")
            .unwrap();
        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();

        assert_eq!(pairs["response_type"], "code");
        assert_eq!(pairs["client_id"], DEFAULT_CLIENT_ID);
        assert_eq!(pairs["redirect_uri"], "http://localhost:1455/auth/callback");
        assert_eq!(pairs["code_challenge"], "chal");
        assert_eq!(pairs["code_challenge_method"], "S256");
        assert_eq!(pairs["state"], "st");
        assert_eq!(pairs["scope"], "openid profile email offline_access");
    }
}
