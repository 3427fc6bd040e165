//! Configuration loading for backsync.
//!
//! Configuration is loaded from a TOML file (default: `backsync.toml` in the
//! data directory). Every field has a default, so the file is optional.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use sync_client::EngineConfig;
use sync_core::{BackoffPolicy, RetryLimits};

/// Name of the config file looked up in the data directory.
pub const CONFIG_FILE: &str = "backsync.toml";

/// Root configuration for backsync.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Remote service configuration.
    #[serde(default)]
    pub remote: RemoteConfig,
    /// Queue storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Engine tuning.
    #[serde(default)]
    pub engine: EngineSection,
}

/// Remote service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    /// Base URL of the sync service (default: http://127.0.0.1:8080).
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Per-request timeout in seconds (default: 30).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Queue storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// SQLite database path, relative to the data directory unless absolute.
    #[serde(default = "default_database_path")]
    pub database: PathBuf,
}

/// Engine tuning knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    /// Upload chunk size in bytes (default: 1MB).
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// First retry delay in milliseconds (default: 1000).
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Retry delay cap in milliseconds (default: 5 minutes).
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Maximum random jitter in milliseconds (default: 1000).
    #[serde(default = "default_backoff_jitter_ms")]
    pub backoff_jitter_ms: u64,
    /// Attempt ceiling for file uploads (default: 5).
    #[serde(default = "default_file_upload_retries")]
    pub file_upload_retries: u32,
    /// Attempt ceiling for data records (default: 3).
    #[serde(default = "default_data_record_retries")]
    pub data_record_retries: u32,
    /// Attempt ceiling for preferences (default: 2).
    #[serde(default = "default_preferences_retries")]
    pub preferences_retries: u32,
    /// Retry terminal errors too (default: false).
    #[serde(default)]
    pub retry_terminal_errors: bool,
}

// Default value functions
fn default_base_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_database_path() -> PathBuf {
    PathBuf::from("queue.db")
}

fn default_chunk_size() -> usize {
    1024 * 1024 // 1MB
}

fn default_backoff_base_ms() -> u64 {
    1000
}

fn default_backoff_max_ms() -> u64 {
    5 * 60 * 1000 // 5 minutes
}

fn default_backoff_jitter_ms() -> u64 {
    1000
}

fn default_file_upload_retries() -> u32 {
    5
}

fn default_data_record_retries() -> u32 {
    3
}

fn default_preferences_retries() -> u32 {
    2
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database_path(),
        }
    }
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            backoff_jitter_ms: default_backoff_jitter_ms(),
            file_upload_retries: default_file_upload_retries(),
            data_record_retries: default_data_record_retries(),
            preferences_retries: default_preferences_retries(),
            retry_terminal_errors: false,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Load an explicit config file, or `backsync.toml` from the data
    /// directory if present, or the defaults.
    pub fn resolve(explicit: Option<&Path>, data_dir: &Path) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        let path = data_dir.join(CONFIG_FILE);
        if path.exists() {
            Self::from_file(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Absolute database path.
    pub fn database_path(&self, data_dir: &Path) -> PathBuf {
        if self.storage.database.is_absolute() {
            self.storage.database.clone()
        } else {
            data_dir.join(&self.storage.database)
        }
    }

    /// Request timeout for the HTTP transport.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.remote.timeout_secs)
    }

    /// Engine configuration for this file.
    pub fn engine_config(&self) -> EngineConfig {
        let engine = &self.engine;
        EngineConfig::default()
            .with_chunk_size(engine.chunk_size)
            .with_backoff(BackoffPolicy::new(
                Duration::from_millis(engine.backoff_base_ms),
                Duration::from_millis(engine.backoff_max_ms),
                Duration::from_millis(engine.backoff_jitter_ms),
            ))
            .with_retry_limits(RetryLimits {
                file_upload: engine.file_upload_retries,
                data_record: engine.data_record_retries,
                preferences: engine.preferences_retries,
            })
            .with_retry_terminal_errors(engine.retry_terminal_errors)
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}
