use std::collections::HashMap;
use std::env;
use std::fmt;

use thiserror::Error;

pub const ENV_BIND_ADDR: &str = "NOTESYNC_API_BIND_ADDR";
pub const ENV_API_TOKEN: &str = "NOTESYNC_API_TOKEN";

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: String,
    /// Bearer token clients must present; `None` disables auth
    pub api_token: Option<String>,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr =
            optional_trimmed(&lookup, ENV_BIND_ADDR).unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        if !bind_addr.contains(':') {
            return Err(ConfigError::Invalid(format!(
                "{ENV_BIND_ADDR} must be host:port, got `{bind_addr}`"
            )));
        }

        let api_token = optional_trimmed(&lookup, ENV_API_TOKEN);
        if api_token.as_deref().is_some_and(|token| token.contains(char::is_whitespace)) {
            return Err(ConfigError::Invalid(format!(
                "{ENV_API_TOKEN} must not contain whitespace"
            )));
        }

        Ok(Self {
            bind_addr,
            api_token,
        })
    }
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<&str, &str> = pairs.iter().copied().collect();
        AppConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
    }

    #[test]
    fn config_defaults_to_local_bind_without_auth() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.api_token, None);
    }

    #[test]
    fn config_rejects_invalid_values() {
        assert!(config_from(&[(ENV_BIND_ADDR, "localhost")]).is_err());
        assert!(config_from(&[(ENV_API_TOKEN, "two words")]).is_err());
    }

    #[test]
    fn config_redacts_token_in_debug() {
        let config = config_from(&[
            (ENV_BIND_ADDR, " 0.0.0.0:9000 "),
            (ENV_API_TOKEN, "sensitive-token"),
        ])
        .unwrap();

        assert_eq!(config.bind_addr, "0.0.0.0:9000");
        let debug_output = format!("{config:?}");
        assert!(!debug_output.contains("sensitive-token"));
        assert!(debug_output.contains("[REDACTED]"));
    }
}
