//! Error types for the storage module.
//!
//! Covers the key-value backends and the serialization of values stored in
//! them.

use thiserror::Error;

/// Unified error type for storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Backend failure that is not a plain IO error (remote store, lock poisoning).
    #[error("Backend error: {0}")]
    Backend(String),

    /// The key cannot be mapped onto the backend (empty, path separators).
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// JSON serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error for file operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Create a backend error with the given message.
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// Create an invalid key error with the given message.
    pub fn invalid_key(msg: impl Into<String>) -> Self {
        Self::InvalidKey(msg.into())
    }
}

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
