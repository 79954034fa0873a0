//! Configuration types for Parley.
//!
//! `StoreConfig` represents the optional `config.toml` in the data directory.
//! Every field has a default, so an empty or missing file is valid.

use serde::{Deserialize, Serialize};

use std::path::PathBuf;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Settings for the SQLite binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Explicit database file. Defaults to `{data_dir}/parley.db`.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// How long a writer waits on a locked database before failing.
    #[serde(default = "default_busy_timeout_secs")]
    pub busy_timeout_secs: u64,

    /// Size of the read-only connection pool.
    #[serde(default = "default_max_reader_connections")]
    pub max_reader_connections: u32,
}

fn default_busy_timeout_secs() -> u64 {
    5
}

fn default_max_reader_connections() -> u32 {
    8
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_secs: default_busy_timeout_secs(),
            max_reader_connections: default_max_reader_connections(),
        }
    }
}

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Settings for the tracing subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is not set.
    #[serde(default = "default_log_filter")]
    pub filter: String,

    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            format: LogFormat::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_config_default_values() {
        let config = StoreConfig::default();
        assert!(config.database.path.is_none());
        assert_eq!(config.database.busy_timeout_secs, 5);
        assert_eq!(config.database.max_reader_connections, 8);
        assert_eq!(config.logging.filter, "info");
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_store_config_deserialize_empty() {
        let config: StoreConfig = toml::from_str("").unwrap();
        assert_eq!(config, StoreConfig::default());
    }

    #[test]
    fn test_store_config_deserialize_with_values() {
        let toml_str = r#"
[database]
path = "/var/lib/parley/store.db"
busy_timeout_secs = 30

[logging]
filter = "parley_infra=debug"
format = "json"
"#;
        let config: StoreConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(
            config.database.path,
            Some(PathBuf::from("/var/lib/parley/store.db"))
        );
        assert_eq!(config.database.busy_timeout_secs, 30);
        assert_eq!(config.database.max_reader_connections, 8);
        assert_eq!(config.logging.filter, "parley_infra=debug");
        assert_eq!(config.logging.format, LogFormat::Json);
    }
}
