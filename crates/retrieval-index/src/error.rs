//! Index error types.

use retrieval_types::RetrievalError;
use thiserror::Error;

/// Errors that can occur during index operations.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Precondition violated (empty batch, empty index, n == 0, rebuild refused)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Dimension mismatch
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// No algorithm registered under the requested name
    #[error("Unknown index algorithm '{name}' (known: {known})")]
    UnknownAlgorithm { name: String, known: String },

    /// Backend (usearch) failure
    #[error("Index error: {0}")]
    Backend(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl IndexError {
    /// True for every rejection caused by caller input rather than the backend.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            IndexError::InvalidArgument(_)
                | IndexError::DimensionMismatch { .. }
                | IndexError::UnknownAlgorithm { .. }
        )
    }
}

impl From<IndexError> for RetrievalError {
    fn from(err: IndexError) -> Self {
        if err.is_invalid_argument() {
            RetrievalError::InvalidArgument(err.to_string())
        } else {
            RetrievalError::OperationFailure(err.to_string())
        }
    }
}
