//! Client configuration read from the environment.

use std::str::FromStr;

pub const API_URL_VAR: &str = "FEED_API_URL";
pub const MODE_VAR: &str = "FEED_ENV";
pub const DEFAULT_API_URL: &str = "http://localhost:3000";

/// Build mode. It only decides how often failed queries are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    Development,
    #[default]
    Production,
}

impl Mode {
    /// Development fails fast so errors show up immediately.
    pub fn default_retry_count(self) -> u32 {
        match self {
            Mode::Development => 0,
            Mode::Production => 3,
        }
    }
}

impl FromStr for Mode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Mode::Development),
            "production" | "prod" | "" => Ok(Mode::Production),
            other => Err(ConfigError::InvalidValue {
                field: MODE_VAR,
                reason: format!("unknown mode `{other}`"),
            }),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub api_url: String,
    pub mode: Mode,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            mode: Mode::default(),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_url = lookup(API_URL_VAR).unwrap_or_else(|| DEFAULT_API_URL.to_string());
        if !api_url.starts_with("http://") && !api_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue {
                field: API_URL_VAR,
                reason: format!("`{api_url}` is not an http(s) URL"),
            });
        }
        let mode = match lookup(MODE_VAR) {
            Some(raw) => raw.parse()?,
            None => Mode::default(),
        };
        Ok(Self { api_url, mode })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_to_production_on_localhost() {
        let config = ClientConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.mode.default_retry_count(), 3);
    }

    #[test]
    fn development_disables_retries() {
        let config = ClientConfig::from_lookup(lookup(&[(MODE_VAR, "Development")])).unwrap();
        assert_eq!(config.mode, Mode::Development);
        assert_eq!(config.mode.default_retry_count(), 0);
    }

    #[test]
    fn reads_api_url() {
        let config =
            ClientConfig::from_lookup(lookup(&[(API_URL_VAR, "https://api.example.com")])).unwrap();
        assert_eq!(config.api_url, "https://api.example.com");
    }

    #[test]
    fn rejects_unknown_mode() {
        let err = ClientConfig::from_lookup(lookup(&[(MODE_VAR, "staging")])).unwrap_err();
        assert!(err.to_string().contains("staging"));
    }

    #[test]
    fn rejects_non_http_url() {
        assert!(ClientConfig::from_lookup(lookup(&[(API_URL_VAR, "localhost:3000")])).is_err());
    }
}
