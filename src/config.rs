use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::db::{EngineOptions, RetryPolicy};
use crate::sync::PushPolicy;

/// Source of a configuration value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Default,
    File,
    Environment,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::File => write!(f, "file"),
            ConfigSource::Environment => write!(f, "environment"),
        }
    }
}

/// A configuration value with its source
#[derive(Debug, Clone, Serialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }
}

/// Storage engine tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub max_connections: u32,
    /// Extra attempts for transient failures
    pub max_retries: u32,
    /// Linear backoff unit between attempts
    pub retry_backoff_ms: u64,
    /// Pending writes before callers wait
    pub write_queue_capacity: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_connections: 4,
            max_retries: 2,
            retry_backoff_ms: 100,
            write_queue_capacity: 256,
        }
    }
}

/// Sync configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Server URL (e.g., "http://localhost:8080" or "https://fit.example.com")
    pub server_url: Option<String>,
    /// API key sent as bearer credential
    pub api_key: Option<String>,
    /// User id injected into pushed payloads
    pub user_id: Option<String>,
    pub pull_path: String,
    pub push_path: String,
    /// Push when more than this many entries are pending
    pub push_threshold: usize,
    /// Push any pending entries after this long without a successful push
    pub push_interval_hours: i64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            api_key: None,
            user_id: None,
            pull_path: "/sync/pull".to_string(),
            push_path: "/sync/push".to_string(),
            push_threshold: 5,
            push_interval_hours: 6,
        }
    }
}

impl SyncConfig {
    /// Returns true if a server URL is set
    pub fn is_configured(&self) -> bool {
        self.server_url.is_some()
    }
}

/// Store configuration with source tracking
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Path to the SQLite database
    pub database_path: ConfigValue<PathBuf>,
    /// Default tracing filter, overridden by RUST_LOG
    pub log_filter: ConfigValue<String>,
    /// Config file path used (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
    pub storage: StorageConfig,
    pub sync: SyncConfig,
}

/// Internal struct for deserializing config file
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ConfigFile {
    database_path: Option<PathBuf>,
    log_filter: Option<String>,
    storage: Option<StorageConfig>,
    sync: Option<SyncConfig>,
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let default_db_path = Self::default_data_dir().join("store.db");

        // Start with defaults
        let mut database_path = ConfigValue::new(default_db_path, ConfigSource::Default);
        let mut log_filter = ConfigValue::new("info".to_string(), ConfigSource::Default);
        let mut config_file = None;
        let mut storage = StorageConfig::default();
        let mut sync = SyncConfig::default();

        // Try to load from config file
        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            let file_config: ConfigFile = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;

            config_file = Some(path.clone());

            if let Some(db_path) = file_config.database_path {
                // Resolve relative paths against config file's directory
                let resolved_path = if db_path.is_relative() {
                    path.parent().map(|p| p.join(&db_path)).unwrap_or(db_path)
                } else {
                    db_path
                };
                database_path = ConfigValue::new(resolved_path, ConfigSource::File);
            }
            if let Some(filter) = file_config.log_filter {
                log_filter = ConfigValue::new(filter, ConfigSource::File);
            }
            if let Some(storage_config) = file_config.storage {
                storage = storage_config;
            }
            if let Some(sync_config) = file_config.sync {
                sync = sync_config;
            }
        }

        // Apply environment variable overrides
        if let Ok(db_path) = std::env::var("FITSTORE_DATABASE_PATH") {
            database_path = ConfigValue::new(PathBuf::from(db_path), ConfigSource::Environment);
        }
        if let Ok(filter) = std::env::var("FITSTORE_LOG") {
            log_filter = ConfigValue::new(filter, ConfigSource::Environment);
        }
        if let Ok(url) = std::env::var("FITSTORE_SYNC_URL") {
            sync.server_url = Some(url);
        }
        if let Ok(key) = std::env::var("FITSTORE_API_KEY") {
            sync.api_key = Some(key);
        }
        if let Ok(user_id) = std::env::var("FITSTORE_USER_ID") {
            sync.user_id = Some(user_id);
        }

        Ok(Self {
            database_path,
            log_filter,
            config_file,
            storage,
            sync,
        })
    }

    /// Options for opening the storage engine
    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            database_path: self.database_path.value.clone(),
            max_connections: self.storage.max_connections,
            write_queue_capacity: self.storage.write_queue_capacity,
            retry: RetryPolicy {
                max_retries: self.storage.max_retries,
                backoff: Duration::from_millis(self.storage.retry_backoff_ms),
            },
        }
    }

    /// Push scheduling thresholds
    pub fn push_policy(&self) -> PushPolicy {
        PushPolicy::new(self.sync.push_threshold, self.sync.push_interval_hours)
    }

    /// Default config directory (platform-specific):
    /// - Linux: ~/.config/fitstore/
    /// - macOS: ~/Library/Application Support/fitstore/
    /// - Windows: %APPDATA%/fitstore/
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("fitstore")
    }

    /// Default data directory (platform-specific):
    /// - Linux: ~/.local/share/fitstore/
    /// - macOS: ~/Library/Application Support/fitstore/
    /// - Windows: %APPDATA%/fitstore/
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("fitstore")
    }

    /// Default config file path (platform-specific config dir + config.yaml)
    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.yaml")
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    ReadError(PathBuf, std::io::Error),
    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    ParseError(PathBuf, serde_yaml::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("nonexistent.yaml");

        let config = Config::load(Some(config_path)).unwrap();
        assert!(config
            .database_path
            .value
            .to_string_lossy()
            .contains("store.db"));
        assert!(config.config_file.is_none());
        assert_eq!(config.storage, StorageConfig::default());
        assert_eq!(config.sync.push_threshold, 5);
        assert_eq!(config.sync.pull_path, "/sync/pull");
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "database_path: /custom/path/db.sqlite").unwrap();
        writeln!(file, "log_filter: debug").unwrap();
        writeln!(file, "storage:").unwrap();
        writeln!(file, "  max_retries: 5").unwrap();
        writeln!(file, "sync:").unwrap();
        writeln!(file, "  server_url: https://fit.example.com").unwrap();
        writeln!(file, "  push_threshold: 10").unwrap();

        let config = Config::load(Some(config_path.clone())).unwrap();
        assert_eq!(
            config.database_path.value,
            PathBuf::from("/custom/path/db.sqlite")
        );
        assert_eq!(config.database_path.source, ConfigSource::File);
        assert_eq!(config.log_filter.value, "debug");
        assert_eq!(config.config_file, Some(config_path));

        // Unset keys keep their defaults
        assert_eq!(config.storage.max_retries, 5);
        assert_eq!(config.storage.retry_backoff_ms, 100);
        assert_eq!(config.sync.push_threshold, 10);
        assert_eq!(config.sync.push_interval_hours, 6);
        assert!(config.sync.is_configured());
    }

    #[test]
    fn test_relative_database_path_resolves_against_config_dir() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        std::fs::write(&config_path, "database_path: data/store.db\n").unwrap();

        let config = Config::load(Some(config_path)).unwrap();
        assert_eq!(
            config.database_path.value,
            temp_dir.path().join("data/store.db")
        );
    }

    #[test]
    fn test_env_var_overrides_file() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        std::fs::write(&config_path, "sync:\n  user_id: fromfile\n").unwrap();

        std::env::set_var("FITSTORE_USER_ID", "fromenv");
        let config = Config::load(Some(config_path)).unwrap();
        std::env::remove_var("FITSTORE_USER_ID");

        assert_eq!(config.sync.user_id.as_deref(), Some("fromenv"));
    }

    #[test]
    fn test_engine_options_and_policy() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        std::fs::write(
            &config_path,
            "storage:\n  retry_backoff_ms: 250\n  max_connections: 2\nsync:\n  push_interval_hours: 1\n",
        )
        .unwrap();

        let config = Config::load(Some(config_path)).unwrap();
        let options = config.engine_options();
        assert_eq!(options.retry.backoff, Duration::from_millis(250));
        assert_eq!(options.retry.max_retries, 2);
        assert_eq!(options.max_connections, 2);
        assert_eq!(config.push_policy(), PushPolicy::new(5, 1));
    }

    #[test]
    fn test_invalid_yaml_error() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "storage: [").unwrap();

        let result = Config::load(Some(config_path));
        assert!(matches!(result, Err(ConfigError::ParseError(_, _))));
    }
}
