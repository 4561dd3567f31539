//! Store configuration model and JSON loader.
//!
//! # Responsibility
//! - Describe the process-wide store settings: default namespace, storage
//!   location, client policy and logging.
//! - Load and validate them from a JSON file.
//!
//! # Invariants
//! - Every field has a default, so an empty JSON object is a valid config.
//! - `default_namespace` is never empty and `timeout_ms` is never zero
//!   after `validate()`.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_NAMESPACE: &str = "test";

/// Top-level store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Namespace used by repositories built without an explicit one.
    pub default_namespace: String,
    /// SQLite file location; `None` keeps the store in memory.
    pub database_path: Option<PathBuf>,
    pub client_policy: ClientPolicy,
    pub logging: LoggingConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            default_namespace: DEFAULT_NAMESPACE.to_string(),
            database_path: None,
            client_policy: ClientPolicy::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl StoreConfig {
    /// Checks cross-field constraints not expressible in the serde model.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_namespace.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "default_namespace cannot be empty".to_string(),
            ));
        }
        if self.client_policy.timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "client_policy.timeout_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Timeout, retry and credential policy applied to every store call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientPolicy {
    pub timeout_ms: u64,
    /// Extra attempts after a busy/locked failure.
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    /// TTL stamped on every write; `0` never expires.
    pub default_ttl_secs: u32,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl Default for ClientPolicy {
    fn default() -> Self {
        Self {
            timeout_ms: 1000,
            max_retries: 2,
            retry_backoff_ms: 10,
            default_ttl_secs: 0,
            user: None,
            password: None,
        }
    }
}

impl ClientPolicy {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Rolling file logger settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Absolute directory; `None` disables file logging.
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: crate::logging::LogLevel::for_build().as_str().to_string(),
            log_dir: None,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "cannot read config: {err}"),
            Self::Parse(err) => write!(f, "cannot parse config: {err}"),
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

/// Reads, parses and validates a JSON config file.
pub fn load_config(path: impl AsRef<Path>) -> Result<StoreConfig, ConfigError> {
    let raw = std::fs::read_to_string(path)?;
    let config: StoreConfig = serde_json::from_str(&raw)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::{load_config, ConfigError, StoreConfig};
    use std::io::Write;

    #[test]
    fn empty_object_yields_defaults() {
        let config: StoreConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, StoreConfig::default());
        assert_eq!(config.default_namespace, "test");
        assert!(config.database_path.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn load_config_reads_partial_policy() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"default_namespace": "bar", "client_policy": {{"timeout_ms": 250, "default_ttl_secs": 60}}}}"#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.default_namespace, "bar");
        assert_eq!(config.client_policy.timeout_ms, 250);
        assert_eq!(config.client_policy.default_ttl_secs, 60);
        assert_eq!(config.client_policy.max_retries, 2);
    }

    #[test]
    fn load_config_rejects_blank_namespace() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"default_namespace": "  "}}"#).unwrap();

        let err = load_config(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn load_config_reports_parse_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        let err = load_config(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
