//! Token endpoint client (authorization-code exchange and refresh).

use std::time::Duration;

use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::{credential::now_millis, AuthError, Credential, OAuthConfig, Result};

/// Lifetime assumed when the token response omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct TokenClient {
    http: Client,
    config: OAuthConfig,
}

impl TokenClient {
    pub fn new(config: OAuthConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { http, config })
    }

    pub async fn exchange_code(
        &self,
        code: &str,
        verifier: &str,
        redirect_uri: &str,
    ) -> Result<Credential> {
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", self.config.client_id.as_str()),
            ("code_verifier", verifier),
        ];

        let response = self.post_form(&form).await?;
        response.into_credential(None)
    }

    pub async fn refresh(&self, refresh_token: &SecretString) -> Result<Credential> {
        let scope = self.config.scope();
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.expose_secret()),
            ("client_id", self.config.client_id.as_str()),
            ("scope", scope.as_str()),
        ];

        let response = self.post_form(&form).await?;
        response.into_credential(Some(refresh_token))
    }

    async fn post_form(&self, form: &[(&str, &str)]) -> Result<TokenResponse> {
        let response = self
            .http
            .post(self.config.token_endpoint())
            .header("Accept", "application/json")
            .form(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::TokenEndpoint {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json().await?)
    }
}

impl TokenResponse {
    /// Build a fully populated credential; a response without a new refresh
    /// token keeps the previous one.
    fn into_credential(self, previous_refresh: Option<&SecretString>) -> Result<Credential> {
        let refresh_token = match (self.refresh_token, previous_refresh) {
            (Some(fresh), _) => fresh,
            (None, Some(previous)) => previous.expose_secret().to_string(),
            (None, None) => {
                return Err(AuthError::TokenEndpoint {
                    status: 200,
                    body: "token response did not include a refresh_token".to_string(),
                })
            }
        };

        let expires_in = self
            .expires_in
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_EXPIRES_IN_SECS);

        Ok(Credential::new(
            self.access_token,
            refresh_token,
            now_millis() + expires_in * 1000,
        ))
    }
}
