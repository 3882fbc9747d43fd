use std::path::PathBuf;

/// Low-level storage errors (RocksDB, serialization, corrupt indexes).
/// This is the error type for the `MessageStore` trait: store operations can
/// only fail with infrastructure errors, never domain errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("rocksdb error: {0}")]
    RocksDb(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("corrupt data: {0}")]
    CorruptData(String),
}

impl From<rocksdb::Error> for StorageError {
    fn from(err: rocksdb::Error) -> Self {
        StorageError::RocksDb(err.into_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Errors returned by `QueueService::enqueue`.
#[derive(Debug, thiserror::Error)]
pub enum EnqueueError {
    #[error("invalid enqueue request: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors returned by `QueueService::lease`.
#[derive(Debug, thiserror::Error)]
pub enum LeaseError {
    #[error("invalid lease request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors returned by admin operations that validate their input.
#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    #[error("invalid admin request: {0}")]
    InvalidRequest(String),

    #[error("dead letter not found: {0}")]
    DeadLetterNotFound(u64),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("error parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Errors from the maintenance thread lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum MaintenanceError {
    #[error("failed to spawn maintenance thread: {0}")]
    Spawn(String),

    #[error("maintenance thread panicked: {0}")]
    Panicked(&'static str),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;
