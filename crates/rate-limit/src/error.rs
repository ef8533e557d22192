//! Error types for rate limiting.

use thiserror::Error;

/// Errors that can occur during rate limiting.
#[derive(Debug, Error)]
pub enum RateLimitError {
    /// Storage backend error.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Errors that can occur in durable storage backends.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Failed to connect to the backend.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A command against the backend failed.
    #[error("Query error: {0}")]
    Query(String),

    /// A stored record could not be serialized or deserialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
