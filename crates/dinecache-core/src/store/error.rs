use thiserror::Error;

/// Failures of the local database.
///
/// `Unavailable` means the database could not be opened at all; callers
/// degrade to network-only behaviour instead of failing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Local database unavailable: {0}")]
    Unavailable(String),

    #[error("Partition '{partition}' exists with an incompatible key configuration")]
    SchemaConflict { partition: String },

    #[error("Partition not found: {0}")]
    UnknownPartition(String),

    #[error("Partition '{partition}' uses {expected} keys")]
    KeyConfigMismatch {
        partition: String,
        expected: &'static str,
    },

    #[error("Value stored in '{partition}' has no usable '{key_path}' field")]
    MissingKey { partition: String, key_path: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        StoreError::Storage(err.to_string())
    }
}
