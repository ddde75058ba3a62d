//! Configuration from environment variables and `claudex.yml`.
//!
//! ```yaml
//! port: 8787
//! upstream_url: "https://api.openai.com/v1/chat/completions"
//! default_model: "gpt-5.2-codex"
//! models:
//!   claude-sonnet-4-5-20250929: "gpt-5.2-codex"
//! auth:
//!   callback_port: 1455
//! ```
//!
//! **Environment variables:**
//! - `PORT`: server port (default: 8787)
//! - `HOST`: bind address (default: 127.0.0.1)
//! - `CLAUDEX_UPSTREAM_URL`: upstream chat completions URL
//! - `REQUEST_TIMEOUT_SECS`: upstream request timeout (default: 600)
//! - `CLAUDEX_KEY_PREFIX`: required prefix of inbound API keys (default: `sk-ant-`)
//! - `CLAUDEX_CREDENTIAL_PATH`: where the upstream credential is stored

use anyhow::{Context, Result};
use claudex_auth::OAuthConfig;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "claudex.yml";
pub const DEFAULT_UPSTREAM_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_TARGET_MODEL: &str = "gpt-5.2-codex";
pub const DEFAULT_KEY_PREFIX: &str = "sk-ant-";
pub const DEFAULT_INSTRUCTIONS: &str = "You are a coding assistant running inside a terminal \
coding agent. Follow the conversation's system message and answer in plain text.";

const BUILTIN_MODELS: &[(&str, &str)] = &[
    ("claude-sonnet-4-5-20250929", "gpt-5.2-codex"),
    ("claude-sonnet-4-5", "gpt-5.2-codex"),
    ("claude-opus-4-5-20251101", "gpt-5.2-codex"),
    ("claude-opus-4-1-20250805", "gpt-5.2-codex"),
    ("claude-haiku-4-5-20251001", "gpt-5.1-codex-mini"),
    ("claude-3-5-haiku-20241022", "gpt-5.1-codex-mini"),
];

/// Source model id -> upstream model id. Total: misses use the default.
#[derive(Debug, Clone)]
pub struct ModelMap {
    table: HashMap<String, String>,
    default: String,
}

impl Default for ModelMap {
    fn default() -> Self {
        Self {
            table: BUILTIN_MODELS
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            default: DEFAULT_TARGET_MODEL.to_string(),
        }
    }
}

impl ModelMap {
    pub fn resolve(&self, source_model: &str) -> &str {
        self.table
            .get(source_model)
            .map(String::as_str)
            .unwrap_or(&self.default)
    }

    pub fn insert(&mut self, source: impl Into<String>, target: impl Into<String>) {
        self.table.insert(source.into(), target.into());
    }

    pub fn set_default(&mut self, target: impl Into<String>) {
        self.default = target.into();
    }

    pub fn default_target(&self) -> &str {
        &self.default
    }
}

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
    pub upstream_url: String,
    pub request_timeout_secs: u64,
    /// Inbound API keys must start with this literal.
    pub key_prefix: String,
    /// Sent as the upstream `instructions` field when set.
    pub instructions: Option<String>,
    pub models: ModelMap,
    pub auth: OAuthConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ClaudexYamlConfig {
    host: Option<String>,
    port: Option<u16>,
    upstream_url: Option<String>,
    request_timeout_secs: Option<u64>,
    key_prefix: Option<String>,
    instructions: Option<String>,
    default_model: Option<String>,
    models: HashMap<String, String>,
    auth: AuthYamlConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AuthYamlConfig {
    issuer: Option<String>,
    client_id: Option<String>,
    callback_port: Option<u16>,
    credential_path: Option<PathBuf>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        let mut auth = OAuthConfig::default();
        if let Ok(path) = env::var("CLAUDEX_CREDENTIAL_PATH") {
            auth.credential_path = PathBuf::from(path);
        }

        Self {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8787),
            upstream_url: env::var("CLAUDEX_UPSTREAM_URL")
                .unwrap_or_else(|_| DEFAULT_UPSTREAM_URL.to_string()),
            request_timeout_secs: env::var("REQUEST_TIMEOUT_SECS")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(600),
            key_prefix: env::var("CLAUDEX_KEY_PREFIX")
                .unwrap_or_else(|_| DEFAULT_KEY_PREFIX.to_string()),
            instructions: Some(DEFAULT_INSTRUCTIONS.to_string()),
            models: ModelMap::default(),
            auth,
        }
    }
}

impl ProxyConfig {
    /// Defaults, overlaid with `path` when given, else with `./claudex.yml` if present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::from_yaml_file(p),
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
                Self::from_yaml_file(DEFAULT_CONFIG_FILE)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read claudex config from {:?}", path))?;
        Self::from_yaml_str(&content)
            .with_context(|| format!("Failed to parse claudex config {:?}", path))
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let yaml: ClaudexYamlConfig = serde_yaml_ng::from_str(content)?;
        let mut config = Self::default();

        if let Some(host) = yaml.host {
            config.host = host;
        }
        if let Some(port) = yaml.port {
            config.port = port;
        }
        if let Some(url) = yaml.upstream_url {
            config.upstream_url = url;
        }
        if let Some(secs) = yaml.request_timeout_secs {
            config.request_timeout_secs = secs;
        }
        if let Some(prefix) = yaml.key_prefix {
            config.key_prefix = prefix;
        }
        if let Some(instructions) = yaml.instructions {
            // An explicit empty string turns the field off.
            config.instructions = Some(instructions).filter(|s| !s.is_empty());
        }
        if let Some(default_model) = yaml.default_model {
            config.models.set_default(default_model);
        }
        for (source, target) in yaml.models {
            config.models.insert(source, target);
        }

        if let Some(issuer) = yaml.auth.issuer {
            config.auth.issuer = issuer;
        }
        if let Some(client_id) = yaml.auth.client_id {
            config.auth.client_id = client_id;
        }
        if let Some(port) = yaml.auth.callback_port {
            config.auth.callback_port = port;
        }
        if let Some(path) = yaml.auth.credential_path {
            config.auth.credential_path = path;
        }

        Ok(config)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
