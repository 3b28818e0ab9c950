//! Configuration parsing and management.
//!
//! Configuration is read from a TOML file. Every section is optional:
//!
//! ```toml
//! [store]
//! path = "/var/lib/connlog/conn.db"
//! read_only = true
//!
//! [view]
//! resolve_address = true
//! poll_interval_ms = 500
//!
//! [view.host_names]
//! "192.168.1.1" = "router.lan"
//!
//! [log]
//! level = "info"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ConnLogConfig {
    /// Connection log location.
    #[serde(default)]
    pub store: StoreConfig,

    /// Table view settings.
    #[serde(default)]
    pub view: ViewConfig,

    /// Logging settings.
    #[serde(default)]
    pub log: LogConfig,
}

impl ConnLogConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails validation.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Checks values serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] for an empty store path or a zero
    /// poll interval.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.path.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "store.path must not be empty".to_string(),
            ));
        }
        if self.view.poll_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "view.poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Connection log location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path of the `SQLite` database.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    /// Open the database without write access.
    #[serde(default)]
    pub read_only: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            read_only: false,
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("connlog.db")
}

/// Table view settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewConfig {
    /// Show host names instead of addresses where known.
    #[serde(default)]
    pub resolve_address: bool,

    /// Interval between range checks while watching.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Known host names, keyed by address text.
    #[serde(default)]
    pub host_names: BTreeMap<String, String>,
}

impl ViewConfig {
    /// The poll interval as a duration.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            resolve_address: false,
            poll_interval_ms: default_poll_interval_ms(),
            host_names: BTreeMap::new(),
        }
    }
}

const fn default_poll_interval_ms() -> u64 {
    1000
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default filter directive (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error reading configuration file.
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Validation error.
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = ConnLogConfig::from_toml("").unwrap();

        assert_eq!(config, ConnLogConfig::default());
        assert_eq!(config.store.path, PathBuf::from("connlog.db"));
        assert!(!config.store.read_only);
        assert!(!config.view.resolve_address);
        assert_eq!(config.view.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.log.level, "warn");
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [store]
            path = "/var/lib/connlog/conn.db"
            read_only = true

            [view]
            resolve_address = true
            poll_interval_ms = 250

            [view.host_names]
            "192.168.1.1" = "router.lan"

            [log]
            level = "debug"
        "#;

        let config = ConnLogConfig::from_toml(toml).unwrap();
        assert_eq!(config.store.path, PathBuf::from("/var/lib/connlog/conn.db"));
        assert!(config.store.read_only);
        assert!(config.view.resolve_address);
        assert_eq!(config.view.poll_interval(), Duration::from_millis(250));
        assert_eq!(
            config.view.host_names.get("192.168.1.1").map(String::as_str),
            Some("router.lan")
        );
        assert_eq!(config.log.level, "debug");
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let err = ConnLogConfig::from_toml("[view]\npoll_interval_ms = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_empty_store_path_rejected() {
        let err = ConnLogConfig::from_toml("[store]\npath = \"\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_invalid_toml() {
        let err = ConnLogConfig::from_toml("[view\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_toml_roundtrip() {
        let mut config = ConnLogConfig::default();
        config.view.resolve_address = true;
        config
            .view
            .host_names
            .insert("10.0.0.1".to_string(), "gateway".to_string());

        let text = config.to_toml().unwrap();
        assert_eq!(ConnLogConfig::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn test_from_missing_file() {
        let err = ConnLogConfig::from_file(Path::new("/nonexistent/connlog.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
