//! Worker pool behind a parallel stage.
//!
//! A dedicated rayon pool runs one long-lived worker per thread. Workers pull
//! `(sequence, item)` jobs from a bounded queue, apply the stage operation
//! and send the outcome, tagged with its sequence number, to the stage's
//! collector. Submit/collect behaves the same for every [`ExecutionModel`];
//! the model only decides what a panicking operation turns into.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};

use rayon::{ThreadPool, ThreadPoolBuilder};
use retrieval_types::RetrievalError;
use tracing::{debug, error, warn};

use crate::config::{ExecutionModel, StageConfig};
use crate::error::PipelineError;
use crate::permits::InFlight;

/// Result of running the operation on one item.
pub(crate) enum Outcome<U> {
    Value(Result<U, PipelineError>),
    /// Panic payload to re-raise on the consumer
    Panicked(Box<dyn Any + Send>),
}

/// Messages received by a stage's collector.
pub(crate) enum Message<U> {
    Done { seq: u64, outcome: Outcome<U> },
    /// The dispatcher read `total` items and no more will follow
    Exhausted { total: u64 },
}

type JobQueue<T> = Arc<Mutex<Receiver<(u64, T)>>>;

/// Fixed-size pool of named worker threads.
///
/// Dropping a rayon pool does not wait for its jobs, so every worker holds a
/// sender of the `exited` channel and shutdown waits for it to disconnect.
pub(crate) struct WorkerPool<T> {
    stage: String,
    jobs: Option<SyncSender<(u64, T)>>,
    exited: Receiver<()>,
    threads: Option<ThreadPool>,
    workers: usize,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Start `config.resolved_workers()` workers.
    ///
    /// Fails with a resource-exhaustion error if the threads cannot be
    /// started; nothing is left running in that case.
    pub(crate) fn spawn<U, F>(
        config: &StageConfig,
        op: Arc<F>,
        results: Sender<Message<U>>,
        in_flight: Arc<InFlight>,
    ) -> Result<Self, PipelineError>
    where
        U: Send + 'static,
        F: Fn(T) -> Result<U, PipelineError> + Send + Sync + 'static,
    {
        let workers = config.resolved_workers();
        let threads = {
            let name = config.name.clone();
            let stage = config.name.clone();
            ThreadPoolBuilder::new()
                .num_threads(workers)
                .thread_name(move |i| format!("{name}-{i}"))
                .panic_handler(move |payload| {
                    error!(
                        stage = %stage,
                        panic = %panic_message(payload.as_ref()),
                        "Worker thread panicked outside an item"
                    );
                })
                .build()
                .map_err(|e| start_failure(&config.name, workers, e))?
        };

        let (job_tx, job_rx) = mpsc::sync_channel::<(u64, T)>(workers);
        let job_rx: JobQueue<T> = Arc::new(Mutex::new(job_rx));
        let (exit_tx, exit_rx) = mpsc::channel();

        for _ in 0..workers {
            let worker = Worker {
                stage: config.name.clone(),
                execution: config.execution,
                op: op.clone(),
                jobs: job_rx.clone(),
                results: results.clone(),
                in_flight: in_flight.clone(),
                _exited: exit_tx.clone(),
            };
            threads.spawn(move || worker.run());
        }

        debug!(stage = %config.name, workers = workers, "Worker pool started");
        Ok(Self {
            stage: config.name.clone(),
            jobs: Some(job_tx),
            exited: exit_rx,
            threads: Some(threads),
            workers,
        })
    }

    /// Queue one item. Blocks while the job queue is full; returns false if
    /// every worker has exited.
    pub(crate) fn submit(&self, seq: u64, item: T) -> bool {
        match &self.jobs {
            Some(jobs) => jobs.send((seq, item)).is_ok(),
            None => false,
        }
    }
}

impl<T> WorkerPool<T> {
    /// Number of workers still owned by the pool
    pub(crate) fn size(&self) -> usize {
        if self.threads.is_some() {
            self.workers
        } else {
            0
        }
    }

    /// Close the job queue and wait until every worker has exited.
    pub(crate) fn shutdown(&mut self) {
        self.jobs.take();
        let Some(threads) = self.threads.take() else {
            return;
        };
        // Disconnects once the last worker has dropped its sender.
        while self.exited.recv().is_ok() {}
        drop(threads);
        debug!(stage = %self.stage, "Worker pool stopped");
    }
}

impl<T> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Worker<T, U, F> {
    stage: String,
    execution: ExecutionModel,
    op: Arc<F>,
    jobs: JobQueue<T>,
    results: Sender<Message<U>>,
    in_flight: Arc<InFlight>,
    // Dropped last, after `op`.
    _exited: Sender<()>,
}

impl<T, U, F> Worker<T, U, F>
where
    F: Fn(T) -> Result<U, PipelineError>,
{
    fn run(self) {
        loop {
            let job = {
                let jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
                jobs.recv()
            };
            let Ok((seq, item)) = job else {
                break;
            };
            // Drain without running once the consumer has gone away.
            if self.in_flight.is_cancelled() {
                continue;
            }
            let outcome = self.apply(seq, item);
            if self.results.send(Message::Done { seq, outcome }).is_err() {
                break;
            }
        }
    }

    fn apply(&self, seq: u64, item: T) -> Outcome<U> {
        let op = &self.op;
        match panic::catch_unwind(AssertUnwindSafe(|| op(item))) {
            Ok(result) => Outcome::Value(result),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                match self.execution {
                    ExecutionModel::Threads => {
                        error!(stage = %self.stage, seq = seq, panic = %message, "Operation panicked");
                        Outcome::Panicked(payload)
                    }
                    ExecutionModel::Isolated => {
                        warn!(stage = %self.stage, seq = seq, panic = %message, "Operation panicked, isolated to item");
                        Outcome::Value(Err(RetrievalError::OperationFailure(format!(
                            "operation panicked in stage '{}': {}",
                            self.stage, message
                        ))
                        .into()))
                    }
                }
            }
        }
    }
}

/// Thread start failures are reported as resource exhaustion.
fn start_failure(stage: &str, workers: usize, cause: impl std::fmt::Display) -> PipelineError {
    RetrievalError::ResourceExhaustion(format!(
        "failed to start {workers} workers for stage '{stage}': {cause}"
    ))
    .into()
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
