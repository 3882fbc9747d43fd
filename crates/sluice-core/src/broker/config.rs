use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::error::ConfigError;
use crate::storage::ReclaimPolicy;

/// Locations searched, in order, when no explicit config path is given.
pub const CONFIG_SEARCH_PATHS: &[&str] = &["sluice.toml", "/etc/sluice/sluice.toml"];

/// Environment variable overriding `storage.data_dir`.
pub const DATA_DIR_ENV: &str = "SLUICE_DATA_DIR";

/// Top-level queue configuration, deserializable from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SluiceConfig {
    pub storage: StorageConfig,
    pub queue: QueueSettings,
    pub dead_letter: DeadLetterSettings,
    pub maintenance: MaintenanceConfig,
    pub logging: LoggingConfig,
}

/// Where the RocksDB data lives.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

/// Defaults applied to enqueue and lease requests that leave them unset.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    pub num_partitions: u32,
    pub default_lease_seconds: u64,
    pub default_max_attempts: u32,
    /// Count a reclaimed (expired) lease as a failed attempt.
    pub reclaim_counts_as_attempt: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeadLetterSettings {
    /// Tombstone dead letters on purge instead of deleting them, when the
    /// store supports it.
    pub soft_delete: bool,
    /// How long tombstones are kept before the purger removes them.
    pub retention_days: u64,
}

/// Intervals and batch sizes of the background tasks. An interval of 0
/// disables the task.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub reaper_interval_ms: u64,
    pub reaper_batch_size: usize,
    pub mover_interval_ms: u64,
    pub mover_batch_size: usize,
    pub purge_interval_ms: u64,
}

/// Log output. `RUST_LOG`, when set, replaces `filter`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
    pub filter: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Pretty in debug builds, JSON in release builds.
    #[default]
    Auto,
    Pretty,
    Json,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
        }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            num_partitions: 16,
            default_lease_seconds: 30,
            default_max_attempts: 5,
            reclaim_counts_as_attempt: false,
        }
    }
}

impl QueueSettings {
    pub fn reclaim_policy(&self) -> ReclaimPolicy {
        if self.reclaim_counts_as_attempt {
            ReclaimPolicy::CountAsAttempt
        } else {
            ReclaimPolicy::Free
        }
    }
}

impl Default for DeadLetterSettings {
    fn default() -> Self {
        Self {
            soft_delete: false,
            retention_days: 7,
        }
    }
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            reaper_interval_ms: 1000,
            reaper_batch_size: 500,
            mover_interval_ms: 5000,
            mover_batch_size: 500,
            purge_interval_ms: 3_600_000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Auto,
            filter: "info".to_string(),
        }
    }
}

impl SluiceConfig {
    /// Load configuration from `explicit` if given, otherwise from the first
    /// existing file in [`CONFIG_SEARCH_PATHS`], otherwise defaults. The
    /// `SLUICE_DATA_DIR` environment variable overrides the data directory.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match CONFIG_SEARCH_PATHS.iter().map(Path::new).find(|p| p.exists()) {
                Some(path) => Self::from_file(path)?,
                None => {
                    info!("no config file found, using defaults");
                    Self::default()
                }
            },
        };

        if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
            config.storage.data_dir = PathBuf::from(dir);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.num_partitions == 0 {
            return Err(ConfigError::Invalid(
                "queue.num_partitions must be at least 1".to_string(),
            ));
        }
        if self.queue.default_lease_seconds == 0 {
            return Err(ConfigError::Invalid(
                "queue.default_lease_seconds must be at least 1".to_string(),
            ));
        }
        if self.queue.default_max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "queue.default_max_attempts must be at least 1".to_string(),
            ));
        }
        if let Err(e) = EnvFilter::try_new(&self.logging.filter) {
            return Err(ConfigError::Invalid(format!("logging.filter: {e}")));
        }
        Ok(())
    }
}
