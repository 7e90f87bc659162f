//! Pipeline composer.
//!
//! Chains stages so each stage's [`OrderedStream`](crate::OrderedStream)
//! is the next stage's input. Nothing is collected between stages; each
//! boundary holds at most the downstream stage's in-flight limit.

use tracing::debug;

use crate::config::StageConfig;
use crate::error::PipelineError;
use crate::stage::ParallelStage;

type BoxedStream<T> = Box<dyn Iterator<Item = Result<T, PipelineError>> + Send>;

/// A lazily evaluated chain of parallel stages.
pub struct Pipeline<T> {
    stream: BoxedStream<T>,
    stages: Vec<String>,
}

impl<T: Send + 'static> Pipeline<T> {
    /// Start a pipeline from plain input items.
    pub fn new<I>(input: I) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        Self {
            stream: Box::new(input.into_iter().map(Ok)),
            stages: Vec::new(),
        }
    }

    /// Start a pipeline from input that may already contain failures
    /// (for example lines that could not be read).
    pub fn from_results<I>(input: I) -> Self
    where
        I: IntoIterator<Item = Result<T, PipelineError>>,
        I::IntoIter: Send + 'static,
    {
        Self {
            stream: Box::new(input.into_iter()),
            stages: Vec::new(),
        }
    }

    /// Append a stage applying `op` with its own worker configuration.
    ///
    /// The stage's threads start immediately; a pool that cannot be created
    /// fails here.
    pub fn stage<U, F>(self, config: StageConfig, op: F) -> Result<Pipeline<U>, PipelineError>
    where
        U: Send + 'static,
        F: Fn(T) -> Result<U, PipelineError> + Send + Sync + 'static,
    {
        let name = config.name.clone();
        let stream = ParallelStage::new(config)?.run_fallible(self.stream, op)?;
        let mut stages = self.stages;
        stages.push(name);
        debug!(stages = ?stages, "Stage appended");
        Ok(Pipeline {
            stream: Box::new(stream),
            stages,
        })
    }

    /// Names of the appended stages, in order.
    pub fn stage_names(&self) -> &[String] {
        &self.stages
    }

    /// The final output stream.
    pub fn into_stream(self) -> impl Iterator<Item = Result<T, PipelineError>> + Send {
        self.stream
    }
}

impl<T> Iterator for Pipeline<T> {
    type Item = Result<T, PipelineError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.stream.next()
    }
}
