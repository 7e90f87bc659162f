//! Parallel batch pipeline for descriptor retrieval.
//!
//! Turns an identifier stream into a result stream through one or more
//! worker-pool stages while keeping output in input order and memory bounded
//! by the worker count rather than the input size.
//!
//! ## Key Components
//!
//! - [`ParallelStage`]: Applies one operation across a sequence with a bounded
//!   worker pool and yields an [`OrderedStream`]
//! - [`ExecutionModel`]: How a stage's workers treat a panicking operation
//! - [`Pipeline`]: Lazily chains stages so one stage's output feeds the next
//! - [`ProgressReporter`]: Counter/rate accumulator driven by the consumer
//!
//! ## Example
//!
//! ```no_run
//! use retrieval_pipeline::{Pipeline, PipelineError, StageConfig};
//!
//! let results: Vec<_> = Pipeline::new(vec![1u64, 2, 3])
//!     .stage(StageConfig::new("double").with_workers(4), |x| Ok::<_, PipelineError>(x * 2))?
//!     .collect();
//! # Ok::<(), PipelineError>(())
//! ```

pub mod compose;
pub mod config;
pub mod error;
pub mod permits;
pub(crate) mod pool;
pub mod progress;
pub mod stage;

pub use compose::Pipeline;
pub use config::{ExecutionModel, FailurePolicy, StageConfig};
pub use error::PipelineError;
pub use progress::{
    LoggingProgressSink, NoOpProgressSink, ProgressPolicy, ProgressReporter, ProgressSink,
    ProgressSnapshot, Tracked,
};
pub use stage::{OrderedStream, ParallelStage};
