//! Credential manager: authorization flow, persistence, and transparent refresh.

use std::time::{Duration, Instant};

use secrecy::{ExposeSecret, SecretString};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::{
    credential::now_millis, generate_pkce, generate_state, AuthError, AuthState, CallbackListener,
    CallbackParams, Credential, CredentialStore, OAuthConfig, Result, TokenClient,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialStatus {
    Unauthenticated,
    Authenticated {
        expires_at: i64,
        needs_refresh: bool,
        expired: bool,
    },
}

/// How long a failed refresh answers for the same credential.
const REFRESH_RETRY_AFTER: Duration = Duration::from_secs(30);

/// The credential whose refresh last failed.
struct RefreshFailure {
    expires_at: i64,
    refresh_token: SecretString,
    at: Instant,
}

impl RefreshFailure {
    fn covers(&self, credential: &Credential) -> bool {
        self.expires_at == credential.expires_at
            && self.refresh_token.expose_secret() == credential.refresh_token.expose_secret()
            && self.at.elapsed() < REFRESH_RETRY_AFTER
    }
}

pub struct CredentialManager {
    config: OAuthConfig,
    store: CredentialStore,
    tokens: TokenClient,
    state: parking_lot::Mutex<AuthState>,
    /// Single-flight guard: one refresh exchange at a time. Holds the last
    /// failed attempt so waiters behind it do not repeat it.
    refresh_lock: AsyncMutex<Option<RefreshFailure>>,
}

impl CredentialManager {
    pub fn new(config: OAuthConfig) -> Result<Self> {
        let store = CredentialStore::new(config.credential_path.clone());
        let tokens = TokenClient::new(config.clone())?;
        let initial = if store.load().is_some() {
            AuthState::Authenticated
        } else {
            AuthState::Unauthenticated
        };

        Ok(Self {
            config,
            store,
            tokens,
            state: parking_lot::Mutex::new(initial),
            refresh_lock: AsyncMutex::new(None),
        })
    }

    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    pub fn state(&self) -> AuthState {
        *self.state.lock()
    }

    pub fn load(&self) -> Option<Credential> {
        self.store.load()
    }

    pub fn save(&self, credential: &Credential) -> Result<()> {
        self.store.save(credential)
    }

    /// Log out: remove the stored credential.
    pub fn clear(&self) -> Result<()> {
        self.store.clear()?;
        self.advance(AuthState::Unauthenticated);
        Ok(())
    }

    pub fn status(&self) -> CredentialStatus {
        match self.store.load() {
            Some(credential) => {
                let now = now_millis();
                CredentialStatus::Authenticated {
                    expires_at: credential.expires_at,
                    needs_refresh: credential.needs_refresh(now, self.config.refresh_margin),
                    expired: credential.is_expired(now),
                }
            }
            None => CredentialStatus::Unauthenticated,
        }
    }

    /// Run the interactive authorization-code flow.
    ///
    /// `on_url` receives the authorization URL so the caller can show it to the
    /// operator; the browser is also opened when the config allows it.
    pub async fn authorize<F>(&self, on_url: F) -> Result<Credential>
    where
        F: FnOnce(&str),
    {
        self.transition(AuthState::Authorizing)?;

        match self.run_authorization(on_url).await {
            Ok(credential) => {
                self.transition(AuthState::Authenticated)?;
                info!(expires_at = credential.expires_at, "upstream authorization complete");
                Ok(credential)
            }
            Err(e) => {
                self.advance(AuthState::Failed);
                warn!(error = %e, "upstream authorization failed");
                Err(e)
            }
        }
    }

    async fn run_authorization<F>(&self, on_url: F) -> Result<Credential>
    where
        F: FnOnce(&str),
    {
        let pkce = generate_pkce();
        let state = generate_state();

        let mut listener =
            CallbackListener::bind(self.config.callback_port, &self.config.callback_path)?;
        let redirect_uri = self.config.redirect_uri(listener.port());

        let outcome = self
            .await_callback(&mut listener, &redirect_uri, &pkce.challenge, &state, on_url)
            .await;
        listener.shutdown().await;
        let code = outcome?;

        self.transition(AuthState::Exchanging)?;
        let credential = self
            .tokens
            .exchange_code(&code, &pkce.verifier, &redirect_uri)
            .await?;
        self.store.save(&credential)?;

        Ok(credential)
    }

    async fn await_callback<F>(
        &self,
        listener: &mut CallbackListener,
        redirect_uri: &str,
        challenge: &str,
        state: &str,
        on_url: F,
    ) -> Result<String>
    where
        F: FnOnce(&str),
    {
        let url = self
            .config
            .authorization_url(redirect_uri, challenge, state)?;

        self.transition(AuthState::AwaitingCallback)?;
        on_url(url.as_str());

        if self.config.open_browser {
            if let Err(e) = open::that(url.as_str()) {
                warn!(error = %e, "could not open a browser; open the URL manually");
            }
        }

        let params = listener.wait(self.config.callback_timeout).await?;
        validate_callback(params, state)
    }

    /// Exchange the stored refresh token for a new credential.
    pub async fn refresh(&self, credential: &Credential) -> Result<Credential> {
        self.tokens.refresh(&credential.refresh_token).await
    }

    /// A usable access token, refreshing first when it is about to expire.
    ///
    /// Returns `None` when there is no credential or the refresh failed;
    /// callers treat both as "not authenticated". Callers that queued behind
    /// a failed refresh of the same credential get `None` without another
    /// exchange; the credential is retried once `REFRESH_RETRY_AFTER` passes.
    pub async fn get_valid_access_token(&self) -> Option<SecretString> {
        let credential = self.store.load()?;
        let margin = self.config.refresh_margin;
        if !credential.needs_refresh(now_millis(), margin) {
            return Some(credential.access_token);
        }

        let mut last_failure = self.refresh_lock.lock().await;

        // Another caller may have refreshed while we waited for the guard.
        let current = self.store.load()?;
        if !current.needs_refresh(now_millis(), margin) {
            debug!("credential refreshed by a concurrent caller");
            return Some(current.access_token);
        }
        if last_failure.as_ref().is_some_and(|f| f.covers(&current)) {
            debug!("refresh of this credential failed recently; not retrying yet");
            return None;
        }

        self.advance(AuthState::Refreshing);
        match self.refresh(&current).await {
            Ok(fresh) => {
                *last_failure = None;
                if let Err(e) = self.store.save(&fresh) {
                    warn!(error = %e, "refreshed credential could not be persisted");
                }
                self.advance(AuthState::Authenticated);
                info!(expires_at = fresh.expires_at, "upstream token refreshed");
                Some(fresh.access_token)
            }
            Err(e) => {
                *last_failure = Some(RefreshFailure {
                    expires_at: current.expires_at,
                    refresh_token: current.refresh_token,
                    at: Instant::now(),
                });
                self.advance(AuthState::Unauthenticated);
                warn!(error = %e, "upstream token refresh failed");
                None
            }
        }
    }

    fn transition(&self, next: AuthState) -> Result<()> {
        let mut state = self.state.lock();
        *state = state.transition(next)?;
        Ok(())
    }

    /// Best-effort transition for paths that may start from several states.
    fn advance(&self, next: AuthState) {
        let mut state = self.state.lock();
        let current = *state;
        if current.can_transition_to(next) {
            *state = next;
        } else if current != next {
            debug!(from = %current, to = %next, "skipping auth state transition");
        }
    }
}

pub(crate) fn validate_callback(params: CallbackParams, expected_state: &str) -> Result<String> {
    if params.state.as_deref() != Some(expected_state) {
        return Err(AuthError::Csrf);
    }

    if let Some(error) = params.error {
        let detail = match params.error_description {
            Some(desc) => format!("{}: {}", error, desc),
            None => error,
        };
        return Err(AuthError::OAuthDenied(detail));
    }

    params
        .code
        .filter(|code| !code.is_empty())
        .ok_or(AuthError::MissingCode)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(code: Option<&str>, state: Option<&str>) -> CallbackParams {
        CallbackParams {
            code: code.map(str::to_string),
            state: state.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn callback_with_matching_state_yields_code() {
        let code = validate_callback(params(Some("abc"), Some("s1")), "s1").unwrap();
        assert_eq!(code, "abc");
    }

    #[test]
    fn state_mismatch_is_csrf() {
        let err = validate_callback(params(Some("abc"), Some("other")), "s1").unwrap_err();
        assert!(matches!(err, AuthError::Csrf));

        let err = validate_callback(params(Some("abc"), None), "s1").unwrap_err();
        assert!(matches!(err, AuthError::Csrf));
    }

    #[test]
    fn missing_or_empty_code() {
        let err = validate_callback(params(None, Some("s1")), "s1").unwrap_err();
        assert!(matches!(err, AuthError::MissingCode));

        let err = validate_callback(params(Some(""), Some("s1")), "s1").unwrap_err();
        assert!(matches!(err, AuthError::MissingCode));
    }

    #[test]
    fn provider_error_is_reported() {
        let mut p = params(None, Some("s1"));
        p.error = Some("access_denied".to_string());
        p.error_description = Some("user cancelled".to_string());

        let err = validate_callback(p, "s1").unwrap_err();
        assert!(matches!(err, AuthError::OAuthDenied(ref d) if d == "access_denied: user cancelled"));
    }
}
