//! Sync configuration shared by the CLI and embedding applications.
//!
//! Settings are read from a JSON file and then overlaid with environment
//! variables. Every field has a default, so a missing file is not an error.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::sync::{ConflictPolicy, RetryPolicy};
use crate::util::{is_http_url, normalize_text_option};

pub const ENV_API_URL: &str = "NOTESYNC_API_URL";
pub const ENV_AUTH_TOKEN: &str = "NOTESYNC_AUTH_TOKEN";
pub const ENV_ENVIRONMENT: &str = "NOTESYNC_ENV";

/// Deployment the client talks to when no explicit base URL is set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Default for Environment {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Development
        } else {
            Self::Production
        }
    }
}

impl Environment {
    #[must_use]
    pub const fn default_base_url(self) -> &'static str {
        match self {
            Self::Development => "https://dev-api.example.com",
            Self::Staging => "https://staging-api.example.com",
            Self::Production => "https://api.example.com",
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }
}

impl std::str::FromStr for Environment {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "staging" => Ok(Self::Staging),
            "production" | "prod" => Ok(Self::Production),
            other => Err(Error::Config(format!("unknown environment '{other}'"))),
        }
    }
}

/// Client-side sync settings
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncSettings {
    #[serde(default)]
    pub environment: Environment,
    /// Overrides the environment's default base URL
    #[serde(default)]
    pub api_base_url: Option<String>,
    /// Bearer token sent with every request
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_reachability_ttl_secs")]
    pub reachability_ttl_secs: u64,
    /// Disables automatic sync; explicit `sync` runs still work
    #[serde(default = "default_sync_enabled")]
    pub sync_enabled: bool,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_cycle_timeout_secs")]
    pub cycle_timeout_secs: u64,
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
}

const fn default_request_timeout_secs() -> u64 {
    30
}

const fn default_reachability_ttl_secs() -> u64 {
    5
}

const fn default_sync_enabled() -> bool {
    true
}

const fn default_interval_secs() -> u64 {
    60
}

const fn default_debounce_ms() -> u64 {
    500
}

const fn default_cycle_timeout_secs() -> u64 {
    120
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            api_base_url: None,
            auth_token: None,
            request_timeout_secs: default_request_timeout_secs(),
            reachability_ttl_secs: default_reachability_ttl_secs(),
            sync_enabled: default_sync_enabled(),
            retry: RetryPolicy::default(),
            interval_secs: default_interval_secs(),
            debounce_ms: default_debounce_ms(),
            cycle_timeout_secs: default_cycle_timeout_secs(),
            conflict_policy: ConflictPolicy::default(),
        }
    }
}

impl fmt::Debug for SyncSettings {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SyncSettings")
            .field("environment", &self.environment)
            .field("api_base_url", &self.api_base_url)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("reachability_ttl_secs", &self.reachability_ttl_secs)
            .field("sync_enabled", &self.sync_enabled)
            .field("retry", &self.retry)
            .field("interval_secs", &self.interval_secs)
            .field("debounce_ms", &self.debounce_ms)
            .field("cycle_timeout_secs", &self.cycle_timeout_secs)
            .field("conflict_policy", &self.conflict_policy)
            .finish()
    }
}

impl SyncSettings {
    /// Parse settings from a JSON payload
    pub fn from_json(payload: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(payload)
            .map_err(|error| Error::Config(format!("invalid settings JSON: {error}")))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from `path`; a missing file yields the defaults
    pub fn load_from_path(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(payload) => Self::from_json(&payload).map_err(|error| match error {
                Error::Config(message) => Error::Config(format!("{}: {message}", path.display())),
                other => other,
            }),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No settings file at {}; using defaults", path.display());
                Ok(Self::default())
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Write settings as pretty JSON, creating parent directories
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let payload = serde_json::to_string_pretty(self)?;
        std::fs::write(path, payload)?;
        Ok(())
    }

    /// Overlay `NOTESYNC_*` environment variables
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Overlay values from `lookup`, keyed by environment variable name
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(environment) = normalize_text_option(lookup(ENV_ENVIRONMENT)) {
            self.environment = environment.parse()?;
        }
        if let Some(url) = normalize_text_option(lookup(ENV_API_URL)) {
            self.api_base_url = Some(url);
        }
        if let Some(token) = normalize_text_option(lookup(ENV_AUTH_TOKEN)) {
            self.auth_token = Some(token);
        }
        self.validate()
    }

    /// Effective base URL: explicit override or the environment default
    #[must_use]
    pub fn api_base_url(&self) -> String {
        normalize_text_option(self.api_base_url.clone()).map_or_else(
            || self.environment.default_base_url().to_string(),
            |url| url.trim_end_matches('/').to_string(),
        )
    }

    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    #[must_use]
    pub const fn reachability_ttl(&self) -> Duration {
        Duration::from_secs(self.reachability_ttl_secs)
    }

    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    #[must_use]
    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    #[must_use]
    pub const fn cycle_timeout(&self) -> Duration {
        Duration::from_secs(self.cycle_timeout_secs)
    }

    fn validate(&self) -> Result<()> {
        if let Some(url) = normalize_text_option(self.api_base_url.clone()) {
            if !is_http_url(&url) {
                return Err(Error::Config(
                    "api_base_url must include http:// or https://".to_string(),
                ));
            }
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::Config("request_timeout_secs must be positive".to_string()));
        }
        if self.interval_secs == 0 {
            return Err(Error::Config("interval_secs must be positive".to_string()));
        }
        if self.cycle_timeout_secs == 0 {
            return Err(Error::Config("cycle_timeout_secs must be positive".to_string()));
        }
        if self.retry.base_delay_ms == 0 || self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(Error::Config(
                "retry delays must satisfy 0 < base_delay_ms <= max_delay_ms".to_string(),
            ));
        }
        Ok(())
    }
}
