//! Core error types.

use thiserror::Error;

/// Storage and serialization errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Component manifest could not be parsed.
    #[error("invalid component manifest: {0}")]
    Manifest(#[from] serde_json::Error),

    /// Transaction misuse, such as committing without beginning.
    #[error("transaction error: {0}")]
    Transaction(String),
}
