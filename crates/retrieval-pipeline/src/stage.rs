//! Parallel pipeline stage.
//!
//! A stage is a dispatcher thread feeding a worker pool plus a collector
//! that runs inside [`OrderedStream::next`]. The dispatcher numbers input
//! items in read order; the collector parks out-of-order completions in a
//! reorder buffer and emits strictly by sequence number. Both sides share an
//! [`InFlight`] limiter so at most `workers + queue_slack` items exist between
//! reading an input and emitting its result.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use crate::config::{FailurePolicy, StageConfig};
use crate::error::PipelineError;
use crate::permits::InFlight;
use crate::pool::{panic_message, Message, Outcome, WorkerPool};

/// A configured parallel stage, ready to run over an input sequence.
#[derive(Debug, Clone)]
pub struct ParallelStage {
    config: StageConfig,
}

impl ParallelStage {
    /// Validate `config` and create the stage.
    pub fn new(config: StageConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    /// Apply `op` to every item of `input`.
    pub fn run<I, T, U, F>(&self, input: I, op: F) -> Result<OrderedStream<U>, PipelineError>
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
        T: Send + 'static,
        U: Send + 'static,
        F: Fn(T) -> Result<U, PipelineError> + Send + Sync + 'static,
    {
        self.run_fallible(input.into_iter().map(Ok), op)
    }

    /// Apply `op` to every successful item of `input`.
    ///
    /// Failed input items skip the operation and are emitted unchanged at
    /// their position, so failures from an earlier stage line up with the
    /// identifiers that caused them.
    ///
    /// Worker and dispatcher threads are started before this returns; a
    /// thread that cannot be started is reported here rather than on the
    /// first pull.
    pub fn run_fallible<I, T, U, F>(
        &self,
        input: I,
        op: F,
    ) -> Result<OrderedStream<U>, PipelineError>
    where
        I: IntoIterator<Item = Result<T, PipelineError>>,
        I::IntoIter: Send + 'static,
        T: Send + 'static,
        U: Send + 'static,
        F: Fn(T) -> Result<U, PipelineError> + Send + Sync + 'static,
    {
        let config = &self.config;
        let limit = config.in_flight_limit();
        let in_flight = Arc::new(InFlight::new(limit));
        let (results_tx, results_rx) = mpsc::channel();

        let pool = WorkerPool::spawn(config, Arc::new(op), results_tx.clone(), in_flight.clone())?;
        let workers = pool.size();

        let dispatcher = {
            let input = input.into_iter();
            let in_flight = in_flight.clone();
            let stage = config.name.clone();
            thread::Builder::new()
                .name(format!("{}-dispatch", config.name))
                .spawn(move || dispatch(&stage, input, pool, results_tx, in_flight))
                .map_err(|source| PipelineError::Spawn {
                    stage: config.name.clone(),
                    source,
                })?
        };

        info!(
            stage = %config.name,
            workers = workers,
            in_flight_limit = limit,
            execution = ?config.execution,
            failure_policy = ?config.failure_policy,
            "Stage started"
        );

        Ok(OrderedStream {
            stage: config.name.clone(),
            failure_policy: config.failure_policy,
            results: results_rx,
            pending: BTreeMap::new(),
            next_seq: 0,
            total: None,
            in_flight,
            dispatcher: Some(dispatcher),
            finished: false,
        })
    }
}

/// Dispatcher loop: number input items and hand them to the pool.
///
/// Returning drops `input` (tearing down any upstream stage) and `pool`
/// (joining every worker).
fn dispatch<I, T, U>(
    stage: &str,
    mut input: I,
    pool: WorkerPool<T>,
    results: Sender<Message<U>>,
    in_flight: Arc<InFlight>,
) where
    I: Iterator<Item = Result<T, PipelineError>>,
    T: Send + 'static,
{
    let mut seq: u64 = 0;
    loop {
        if !in_flight.acquire() {
            debug!(stage = stage, dispatched = seq, "Dispatch cancelled");
            break;
        }
        match panic::catch_unwind(AssertUnwindSafe(|| input.next())) {
            Ok(Some(Ok(item))) => {
                if !pool.submit(seq, item) {
                    warn!(stage = stage, "Worker pool closed before input was exhausted");
                    break;
                }
            }
            Ok(Some(Err(err))) => {
                let outcome = Outcome::Value(Err(err));
                if results.send(Message::Done { seq, outcome }).is_err() {
                    break;
                }
            }
            Ok(None) => {
                in_flight.release();
                debug!(stage = stage, total = seq, "Input exhausted");
                let _ = results.send(Message::Exhausted { total: seq });
                break;
            }
            Err(payload) => {
                // An upstream stage re-raised a worker panic; pass it along in order.
                let outcome = Outcome::Panicked(payload);
                let _ = results.send(Message::Done { seq, outcome });
                let _ = results.send(Message::Exhausted { total: seq + 1 });
                break;
            }
        }
        seq += 1;
    }
    drop(input);
    drop(pool);
}

/// Lazily produced, input-ordered results of a [`ParallelStage`].
///
/// Dropping the stream before it is exhausted cancels the stage: no new items
/// are dispatched, queued items are discarded, running items finish and their
/// results are dropped, and every stage thread is joined.
///
/// The join happens on the dropping thread, so `drop` blocks until every
/// running operation has returned. A stream over a slow or stuck operation
/// should be dropped from a thread that can afford to wait.
pub struct OrderedStream<U> {
    stage: String,
    failure_policy: FailurePolicy,
    results: Receiver<Message<U>>,
    pending: BTreeMap<u64, Outcome<U>>,
    next_seq: u64,
    total: Option<u64>,
    in_flight: Arc<InFlight>,
    dispatcher: Option<JoinHandle<()>>,
    finished: bool,
}

impl<U> OrderedStream<U> {
    /// Stage name
    pub fn stage(&self) -> &str {
        &self.stage
    }

    /// Results emitted so far.
    pub fn emitted(&self) -> u64 {
        self.next_seq
    }

    /// Completed results parked waiting for an earlier item.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    /// Whether the stage threads are still running.
    pub fn is_running(&self) -> bool {
        self.dispatcher.is_some()
    }

    /// Cancel outstanding work and join the stage threads.
    fn shutdown(&mut self) {
        self.finished = true;
        self.in_flight.cancel();
        if let Some(handle) = self.dispatcher.take() {
            if handle.join().is_err() {
                warn!(stage = %self.stage, "Dispatcher thread panicked");
            }
            self.pending.clear();
            debug!(stage = %self.stage, emitted = self.next_seq, "Stage stopped");
        }
    }
}

impl<U> Iterator for OrderedStream<U> {
    type Item = Result<U, PipelineError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        loop {
            if let Some(outcome) = self.pending.remove(&self.next_seq) {
                self.next_seq += 1;
                self.in_flight.release();
                return match outcome {
                    Outcome::Value(Ok(value)) => Some(Ok(value)),
                    Outcome::Value(Err(err)) => {
                        if self.failure_policy == FailurePolicy::FailFast {
                            warn!(stage = %self.stage, error = %err, "Failing fast");
                            self.shutdown();
                        }
                        Some(Err(err))
                    }
                    Outcome::Panicked(payload) => {
                        warn!(
                            stage = %self.stage,
                            panic = %panic_message(payload.as_ref()),
                            "Re-raising operation panic"
                        );
                        self.shutdown();
                        panic::resume_unwind(payload)
                    }
                };
            }

            if self.total == Some(self.next_seq) {
                self.shutdown();
                return None;
            }

            match self.results.recv() {
                Ok(Message::Done { seq, outcome }) => {
                    self.pending.insert(seq, outcome);
                }
                Ok(Message::Exhausted { total }) => {
                    self.total = Some(total);
                }
                Err(_) => {
                    self.shutdown();
                    return Some(Err(PipelineError::Disconnected(self.stage.clone())));
                }
            }
        }
    }
}

impl<U> Drop for OrderedStream<U> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
