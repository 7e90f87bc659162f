//! Error types for the retrieval system.

use thiserror::Error;

/// Unified error type for retrieval operations.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// Precondition violated by the caller (empty batch, empty index, bad `n`)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Identifier could not be resolved
    #[error("Not found: {0}")]
    NotFound(String),

    /// A pluggable operation failed for one item
    #[error("Operation failed: {0}")]
    OperationFailure(String),

    /// Worker pool could not be created or sized
    #[error("Resource exhaustion: {0}")]
    ResourceExhaustion(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RetrievalError {
    /// True for failures caused by a bad caller-supplied argument.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, RetrievalError::InvalidArgument(_))
    }

    /// True when an identifier did not resolve.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RetrievalError::NotFound(_))
    }
}
