//! Stage configuration.

use std::num::NonZeroUsize;

use crate::error::PipelineError;

/// Upper bound on workers per stage.
pub const MAX_WORKERS: usize = 1024;

/// How a stage's workers run the operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExecutionModel {
    /// Dedicated worker threads. A panic in the operation is re-raised on the
    /// consumer at the position of the item that panicked.
    #[default]
    Threads,
    /// Dedicated worker threads with per-item unwind isolation. A panic
    /// becomes an `OperationFailure` for that item and the worker keeps going.
    Isolated,
}

impl ExecutionModel {
    /// `Isolated` when `isolate` is set, `Threads` otherwise.
    pub fn from_isolation(isolate: bool) -> Self {
        if isolate {
            ExecutionModel::Isolated
        } else {
            ExecutionModel::Threads
        }
    }
}

/// What a stage does after a per-item failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Yield the failure in place and keep going
    #[default]
    PerItem,
    /// Yield the first failure, then end the stream and stop all work
    FailFast,
}

impl FailurePolicy {
    pub fn from_fail_fast(fail_fast: bool) -> Self {
        if fail_fast {
            FailurePolicy::FailFast
        } else {
            FailurePolicy::PerItem
        }
    }
}

/// Configuration for one parallel stage.
#[derive(Debug, Clone)]
pub struct StageConfig {
    /// Stage name used in logs and thread names
    pub name: String,
    /// Worker count (0 = one per available CPU)
    pub workers: usize,
    /// In-flight items allowed beyond the worker count
    pub queue_slack: usize,
    /// Worker execution model
    pub execution: ExecutionModel,
    /// Reaction to per-item failures
    pub failure_policy: FailurePolicy,
}

impl StageConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            workers: 0,
            queue_slack: 2,
            execution: ExecutionModel::default(),
            failure_policy: FailurePolicy::default(),
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_queue_slack(mut self, slack: usize) -> Self {
        self.queue_slack = slack;
        self
    }

    pub fn with_execution(mut self, execution: ExecutionModel) -> Self {
        self.execution = execution;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Worker count with the 0 default resolved.
    pub fn resolved_workers(&self) -> usize {
        if self.workers == 0 {
            std::thread::available_parallelism().map_or(4, NonZeroUsize::get)
        } else {
            self.workers
        }
    }

    /// Maximum items dispatched but not yet emitted.
    pub fn in_flight_limit(&self) -> usize {
        self.resolved_workers() + self.queue_slack
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.name.trim().is_empty() {
            return Err(PipelineError::Config("stage name must not be empty".into()));
        }
        if self.workers > MAX_WORKERS {
            return Err(PipelineError::Config(format!(
                "stage '{}' asks for {} workers, maximum is {}",
                self.name, self.workers, MAX_WORKERS
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StageConfig::new("resolve");
        assert_eq!(config.workers, 0);
        assert!(config.resolved_workers() >= 1);
        assert_eq!(config.in_flight_limit(), config.resolved_workers() + 2);
        assert_eq!(config.execution, ExecutionModel::Threads);
        assert_eq!(config.failure_policy, FailurePolicy::PerItem);
    }

    #[test]
    fn test_builder() {
        let config = StageConfig::new("classify")
            .with_workers(3)
            .with_queue_slack(0)
            .with_execution(ExecutionModel::Isolated)
            .with_failure_policy(FailurePolicy::FailFast);
        assert_eq!(config.in_flight_limit(), 3);
        assert_eq!(config.execution, ExecutionModel::from_isolation(true));
        assert_eq!(config.failure_policy, FailurePolicy::from_fail_fast(true));
    }

    #[test]
    fn test_validation() {
        assert!(StageConfig::new("ok").validate().is_ok());
        assert!(StageConfig::new(" ").validate().is_err());
        assert!(StageConfig::new("big")
            .with_workers(MAX_WORKERS + 1)
            .validate()
            .is_err());
    }
}
