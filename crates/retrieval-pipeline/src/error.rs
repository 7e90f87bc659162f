//! Error types for the pipeline.

use retrieval_types::RetrievalError;
use thiserror::Error;

/// Errors surfaced by pipeline stages.
///
/// Per-item failures travel through the output stream at the position of the
/// item that failed; construction failures are returned before any work runs.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A per-item failure from a resolver or operation
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    /// A stage thread could not be started
    #[error("Failed to start thread for stage '{stage}': {source}")]
    Spawn {
        stage: String,
        #[source]
        source: std::io::Error,
    },

    /// Stage configuration rejected at construction time
    #[error("Invalid stage configuration: {0}")]
    Config(String),

    /// Every producer of a stage went away before the input was exhausted
    #[error("Stage '{0}' stopped before its input was exhausted")]
    Disconnected(String),
}

impl PipelineError {
    /// True when the failure belongs to a single item and siblings are unaffected.
    pub fn is_item_failure(&self) -> bool {
        matches!(
            self,
            PipelineError::Retrieval(
                RetrievalError::NotFound(_)
                    | RetrievalError::OperationFailure(_)
                    | RetrievalError::InvalidArgument(_)
                    | RetrievalError::Io(_)
                    | RetrievalError::Serialization(_)
            )
        )
    }

    /// True when the pool could not be created or sized as requested.
    pub fn is_resource_exhaustion(&self) -> bool {
        matches!(
            self,
            PipelineError::Spawn { .. }
                | PipelineError::Retrieval(RetrievalError::ResourceExhaustion(_))
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, PipelineError::Retrieval(RetrievalError::NotFound(_)))
    }

    pub fn is_operation_failure(&self) -> bool {
        matches!(
            self,
            PipelineError::Retrieval(RetrievalError::OperationFailure(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PipelineError::from(RetrievalError::NotFound("b".into()));
        assert_eq!(err.to_string(), "Not found: b");
        assert!(err.is_item_failure());
        assert!(err.is_not_found());

        let err = PipelineError::Disconnected("classify".into());
        assert_eq!(
            err.to_string(),
            "Stage 'classify' stopped before its input was exhausted"
        );
        assert!(!err.is_item_failure());
    }

    #[test]
    fn test_spawn_is_resource_exhaustion() {
        let err = PipelineError::Spawn {
            stage: "resolve".into(),
            source: std::io::Error::other("no threads left"),
        };
        assert!(err.is_resource_exhaustion());
        assert!(!err.is_item_failure());
    }
}
