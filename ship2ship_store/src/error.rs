//! Error types for the storage layer.

use thiserror::Error;

/// Errors that can occur while reading or writing tables.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying backend failed (I/O, corruption, ...)
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// Another writer holds the lease for this partition
    #[error("Partition {table}/{partition} is already being written")]
    PartitionBusy { table: String, partition: String },

    /// The lease was not issued by this store or has been released
    #[error("Lease for {table}/{partition} is not held by this store")]
    LeaseMismatch { table: String, partition: String },

    /// Row payload could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A stored key does not have the expected layout
    #[error("Corrupt row key in {table}: {reason}")]
    CorruptKey { table: String, reason: String },
}

impl StoreError {
    /// Creates a backend error.
    pub fn backend(msg: impl std::fmt::Display) -> Self {
        Self::Backend(msg.to_string())
    }
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;
