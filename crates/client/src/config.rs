// Client configuration.
//
// File: `~/.parlance/config.toml`. Environment variables override the
// file; credentials only ever come from the environment and are never
// written back.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::{Host, Url};
use uuid::Uuid;

use parlance_common::types::UserRef;

use crate::typing::EmitterConfig;

/// Root directory for Parlance client state: `~/.parlance/`.
pub fn config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".parlance"))
}

/// Path to the config file: `~/.parlance/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// REST base, e.g. `https://chat.example.com/api`.
    pub api_base_url: String,
    /// Realtime channel endpoint, e.g. `wss://chat.example.com`.
    pub ws_url: String,
    pub refresh_timeout_ms: u64,
    /// History page size for `load`.
    pub page_size: u32,
    /// Per-stream broadcast capacity on the realtime channel.
    pub channel_capacity: usize,
    pub log_filter: String,
    pub typing: TypingConfig,
    #[serde(skip)]
    pub access_token: Option<String>,
    #[serde(skip)]
    pub refresh_token: Option<String>,
    #[serde(skip)]
    pub user_id: Option<Uuid>,
    #[serde(skip)]
    pub username: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:3000/api".into(),
            ws_url: "ws://localhost:3000".into(),
            refresh_timeout_ms: 10_000,
            page_size: 50,
            channel_capacity: 256,
            log_filter: "info".into(),
            typing: TypingConfig::default(),
            access_token: None,
            refresh_token: None,
            user_id: None,
            username: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TypingConfig {
    /// Quiet period before a local stop.
    pub debounce_ms: u64,
    /// Ceiling on one local typing burst.
    pub failsafe_ms: u64,
    /// Lifetime of a remote typing entry without refresh.
    pub expiry_ms: u64,
}

impl Default for TypingConfig {
    fn default() -> Self {
        Self { debounce_ms: 1000, failsafe_ms: 3000, expiry_ms: 3000 }
    }
}

impl TypingConfig {
    pub fn emitter(&self) -> EmitterConfig {
        EmitterConfig {
            debounce: Duration::from_millis(self.debounce_ms),
            failsafe: Duration::from_millis(self.failsafe_ms),
        }
    }

    pub fn expiry(&self) -> Duration {
        Duration::from_millis(self.expiry_ms)
    }
}

impl ClientConfig {
    /// Load from `~/.parlance/config.toml`, falling back to defaults if the
    /// file is missing or unreadable, then apply environment overrides.
    pub fn load() -> Self {
        let mut config =
            config_path().and_then(|p| Self::load_from(&p).ok()).unwrap_or_default();
        config.apply_env();
        config
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Save to a specific path (creates parent directories).
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn apply_env(&mut self) {
        self.apply_env_fn(|key| std::env::var(key));
    }

    /// Testable override step that accepts an environment lookup function.
    /// Unparseable numbers keep the current value.
    pub fn apply_env_fn<F>(&mut self, env: F)
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        if let Ok(url) = env("PARLANCE_API_URL") {
            self.api_base_url = url;
        }
        if let Ok(url) = env("PARLANCE_WS_URL") {
            self.ws_url = url;
        }
        if let Some(ms) = env("PARLANCE_REFRESH_TIMEOUT_MS").ok().and_then(|v| v.parse().ok()) {
            self.refresh_timeout_ms = ms;
        }
        if let Ok(filter) = env("PARLANCE_LOG_FILTER") {
            self.log_filter = filter;
        }
        if let Ok(token) = env("PARLANCE_TOKEN") {
            self.access_token = Some(token);
        }
        if let Ok(token) = env("PARLANCE_REFRESH_TOKEN") {
            self.refresh_token = Some(token);
        }
        if let Some(id) = env("PARLANCE_USER_ID").ok().and_then(|v| v.parse().ok()) {
            self.user_id = Some(id);
        }
        if let Ok(name) = env("PARLANCE_USERNAME") {
            self.username = Some(name);
        }
    }

    /// The signed-in user, when an id was supplied.
    pub fn identity(&self) -> Option<UserRef> {
        let id = self.user_id?;
        Some(UserRef::new(id, self.username.clone().unwrap_or_else(|| "me".into())))
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_millis(self.refresh_timeout_ms)
    }

    /// REST base URL. Must be `https` unless it points at a loopback host.
    pub fn api_url(&self) -> Result<Url, ConfigError> {
        parse_secure_url("api_base_url", &self.api_base_url, "https", "http")
    }

    /// Channel URL. Must be `wss` unless it points at a loopback host.
    pub fn ws_endpoint(&self) -> Result<Url, ConfigError> {
        parse_secure_url("ws_url", &self.ws_url, "wss", "ws")
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.api_url()?;
        self.ws_endpoint()?;
        if self.page_size == 0 {
            return Err(ConfigError::Invalid { field: "page_size", reason: "must be positive".into() });
        }
        Ok(())
    }
}

fn parse_secure_url(
    field: &'static str,
    value: &str,
    secure: &str,
    local_only: &str,
) -> Result<Url, ConfigError> {
    let url = Url::parse(value)
        .map_err(|e| ConfigError::Invalid { field, reason: format!("`{value}`: {e}") })?;
    let scheme = url.scheme();
    if scheme == secure || (scheme == local_only && is_loopback(&url)) {
        return Ok(url);
    }
    Err(ConfigError::Invalid {
        field,
        reason: format!("must use {secure} ({local_only} is allowed only for localhost)"),
    })
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(addr)) => addr.is_loopback(),
        Some(Host::Ipv6(addr)) => addr.is_loopback(),
        None => false,
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
