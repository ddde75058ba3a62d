use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// The single upstream credential. Persisted as
/// `{access_token, refresh_token, expires_at}` with `expires_at` in epoch
/// milliseconds.
#[derive(Debug, Serialize, Deserialize)]
pub struct Credential {
    #[serde(with = "secret_string_serde")]
    pub access_token: SecretString,
    #[serde(with = "secret_string_serde")]
    pub refresh_token: SecretString,
    pub expires_at: i64,
}

impl Credential {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_at: i64,
    ) -> Self {
        Self {
            access_token: SecretString::from(access_token.into()),
            refresh_token: SecretString::from(refresh_token.into()),
            expires_at,
        }
    }

    /// True once `now` is inside the refresh margin before expiry.
    pub fn needs_refresh(&self, now_ms: i64, margin: Duration) -> bool {
        let margin_ms = i64::try_from(margin.as_millis()).unwrap_or(i64::MAX);
        now_ms >= self.expires_at.saturating_sub(margin_ms)
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at
    }
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

mod secret_string_serde {
    use super::*;

    pub fn serialize<S>(secret: &SecretString, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        secret.expose_secret().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer).map(SecretString::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE_MS: i64 = 60_000;

    #[test]
    fn serializes_to_flat_json_with_epoch_millis() {
        let credential = Credential::new("at", "rt", 1_700_000_000_000);
        let value = serde_json::to_value(&credential).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "access_token": "at",
                "refresh_token": "rt",
                "expires_at": 1_700_000_000_000i64
            })
        );
    }

    #[test]
    fn debug_output_redacts_tokens() {
        let credential = Credential::new("super-secret-access", "super-secret-refresh", 0);
        let debug = format!("{:?}", credential);
        assert!(!debug.contains("super-secret-access"));
        assert!(!debug.contains("super-secret-refresh"));
    }

    #[test]
    fn refresh_margin_is_inclusive() {
        let now = 1_000 * MINUTE_MS;
        let margin = Duration::from_secs(5 * 60);

        let four_minutes_left = Credential::new("a", "r", now + 4 * MINUTE_MS);
        assert!(four_minutes_left.needs_refresh(now, margin));

        let exactly_at_margin = Credential::new("a", "r", now + 5 * MINUTE_MS);
        assert!(exactly_at_margin.needs_refresh(now, margin));

        let plenty_left = Credential::new("a", "r", now + 30 * MINUTE_MS);
        assert!(!plenty_left.needs_refresh(now, margin));
        assert!(!plenty_left.is_expired(now));
    }

    #[test]
    fn missing_field_fails_to_parse() {
        let parsed = serde_json::from_str::<Credential>(r#"{"access_token":"a","expires_at":1}"#);
        assert!(parsed.is_err());
    }
}
