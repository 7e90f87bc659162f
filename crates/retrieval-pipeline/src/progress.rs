//! Progress reporting for the consuming side of a pipeline.
//!
//! The reporter is owned and driven by the single consumer of the final
//! stream; workers never touch it, so it needs no locking.

use std::time::{Duration, Instant};

use retrieval_types::ProgressSettings;
use tracing::info;

/// Point-in-time view of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    /// Items consumed (successes + failures)
    pub processed: u64,
    /// Items that produced a result
    pub succeeded: u64,
    /// Items that produced a failure
    pub failed: u64,
    /// Expected item count, when known
    pub total: Option<u64>,
    /// Time since the reporter was created
    pub elapsed: Duration,
    /// Average items per second since start
    pub rate: f64,
    /// Items per second since the previous report
    pub interval_rate: f64,
    /// Estimated time remaining, when `total` is known
    pub eta: Option<Duration>,
}

/// Receiver of progress reports.
pub trait ProgressSink: Send {
    /// Called whenever the reporting policy says a report is due.
    fn on_progress(&self, snapshot: &ProgressSnapshot);

    /// Called once when the stream is exhausted.
    fn on_finish(&self, snapshot: &ProgressSnapshot) {
        self.on_progress(snapshot);
    }
}

/// A no-op sink for when progress reporting isn't needed.
pub struct NoOpProgressSink;

impl ProgressSink for NoOpProgressSink {
    fn on_progress(&self, _snapshot: &ProgressSnapshot) {}
}

/// A sink that logs progress at info level.
pub struct LoggingProgressSink {
    label: String,
}

impl LoggingProgressSink {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl ProgressSink for LoggingProgressSink {
    fn on_progress(&self, snapshot: &ProgressSnapshot) {
        info!(
            label = %self.label,
            processed = snapshot.processed,
            failed = snapshot.failed,
            total = ?snapshot.total,
            rate = format_args!("{:.2}", snapshot.rate),
            interval_rate = format_args!("{:.2}", snapshot.interval_rate),
            eta_secs = ?snapshot.eta.map(|d| d.as_secs()),
            "Progress"
        );
    }

    fn on_finish(&self, snapshot: &ProgressSnapshot) {
        info!(
            label = %self.label,
            processed = snapshot.processed,
            succeeded = snapshot.succeeded,
            failed = snapshot.failed,
            elapsed_ms = snapshot.elapsed.as_millis() as u64,
            rate = format_args!("{:.2}", snapshot.rate),
            "Finished"
        );
    }
}

/// When to emit a report. A report is due when either trigger fires.
#[derive(Debug, Clone, Default)]
pub struct ProgressPolicy {
    /// Every N consumed items (0 disables)
    pub every_items: u64,
    /// At most once per interval (None disables)
    pub every_interval: Option<Duration>,
}

impl ProgressPolicy {
    pub fn every_items(n: u64) -> Self {
        Self {
            every_items: n,
            every_interval: None,
        }
    }

    pub fn every_interval(interval: Duration) -> Self {
        Self {
            every_items: 0,
            every_interval: Some(interval),
        }
    }
}

/// Settings that skipped validation still convert: an interval too large for
/// a `Duration` saturates and NaN disables time-based reports.
impl From<&ProgressSettings> for ProgressPolicy {
    fn from(settings: &ProgressSettings) -> Self {
        let secs = settings.interval_secs;
        let every_interval = if secs > 0.0 && !secs.is_nan() {
            Some(Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX))
        } else {
            None
        };
        Self {
            every_items: settings.every_items,
            every_interval,
        }
    }
}

/// Counter and rate accumulator.
pub struct ProgressReporter<S: ProgressSink> {
    sink: S,
    policy: ProgressPolicy,
    total: Option<u64>,
    succeeded: u64,
    failed: u64,
    start: Instant,
    last_report: Instant,
    last_reported: u64,
    finished: Option<ProgressSnapshot>,
}

impl<S: ProgressSink> ProgressReporter<S> {
    pub fn new(sink: S, policy: ProgressPolicy) -> Self {
        let now = Instant::now();
        Self {
            sink,
            policy,
            total: None,
            succeeded: 0,
            failed: 0,
            start: now,
            last_report: now,
            last_reported: 0,
            finished: None,
        }
    }

    /// Set the expected item count so snapshots carry an ETA.
    pub fn with_total(mut self, total: u64) -> Self {
        self.total = Some(total);
        self
    }

    pub fn processed(&self) -> u64 {
        self.succeeded + self.failed
    }

    pub fn record_success(&mut self) {
        self.succeeded += 1;
        self.maybe_report();
    }

    pub fn record_failure(&mut self) {
        self.failed += 1;
        self.maybe_report();
    }

    /// Record one consumed result.
    pub fn record<T, E>(&mut self, result: &Result<T, E>) {
        match result {
            Ok(_) => self.record_success(),
            Err(_) => self.record_failure(),
        }
    }

    /// Current counters.
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.snapshot_at(Instant::now())
    }

    fn snapshot_at(&self, now: Instant) -> ProgressSnapshot {
        let processed = self.processed();
        let elapsed = now.duration_since(self.start);
        let rate = per_second(processed, elapsed);
        let interval_rate = per_second(
            processed - self.last_reported,
            now.duration_since(self.last_report),
        );
        let eta = match self.total {
            Some(total) if processed >= total => Some(Duration::ZERO),
            Some(total) if rate > 0.0 => {
                Some(Duration::from_secs_f64((total - processed) as f64 / rate))
            }
            _ => None,
        };
        ProgressSnapshot {
            processed,
            succeeded: self.succeeded,
            failed: self.failed,
            total: self.total,
            elapsed,
            rate,
            interval_rate,
            eta,
        }
    }

    fn maybe_report(&mut self) {
        let processed = self.processed();
        let by_count = self.policy.every_items > 0 && processed % self.policy.every_items == 0;
        let now = match (by_count, self.policy.every_interval) {
            (true, _) => Instant::now(),
            (false, Some(interval)) => {
                let now = Instant::now();
                if now.duration_since(self.last_report) < interval {
                    return;
                }
                now
            }
            (false, None) => return,
        };
        let snapshot = self.snapshot_at(now);
        self.sink.on_progress(&snapshot);
        self.last_report = now;
        self.last_reported = processed;
    }

    /// Emit the final summary. Later calls return the same snapshot without
    /// reporting again.
    pub fn finish(&mut self) -> ProgressSnapshot {
        if let Some(done) = &self.finished {
            return done.clone();
        }
        let snapshot = self.snapshot();
        self.sink.on_finish(&snapshot);
        self.finished = Some(snapshot.clone());
        snapshot
    }

    /// Wrap a result stream so consuming it drives this reporter.
    pub fn track<I>(self, stream: I) -> Tracked<I, S> {
        Tracked {
            stream,
            reporter: self,
        }
    }
}

fn per_second(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        count as f64 / secs
    } else {
        0.0
    }
}

/// A result stream that records every item it yields and reports the
/// final summary when exhausted.
pub struct Tracked<I, S: ProgressSink> {
    stream: I,
    reporter: ProgressReporter<S>,
}

impl<I, S: ProgressSink> Tracked<I, S> {
    pub fn reporter(&self) -> &ProgressReporter<S> {
        &self.reporter
    }

    /// Stop tracking; the reporter keeps its counters.
    pub fn into_reporter(self) -> ProgressReporter<S> {
        self.reporter
    }
}

impl<I, T, E, S> Iterator for Tracked<I, S>
where
    I: Iterator<Item = Result<T, E>>,
    S: ProgressSink,
{
    type Item = Result<T, E>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.stream.next() {
            Some(result) => {
                self.reporter.record(&result);
                Some(result)
            }
            None => {
                self.reporter.finish();
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct RecordingSink {
        reports: Arc<Mutex<Vec<ProgressSnapshot>>>,
        finishes: Arc<Mutex<Vec<ProgressSnapshot>>>,
    }

    impl ProgressSink for RecordingSink {
        fn on_progress(&self, snapshot: &ProgressSnapshot) {
            self.reports.lock().unwrap().push(snapshot.clone());
        }

        fn on_finish(&self, snapshot: &ProgressSnapshot) {
            self.finishes.lock().unwrap().push(snapshot.clone());
        }
    }

    #[test]
    fn test_reports_every_n_items() {
        let sink = RecordingSink::default();
        let mut reporter = ProgressReporter::new(sink.clone(), ProgressPolicy::every_items(3));
        for _ in 0..7 {
            reporter.record_success();
        }
        let reports = sink.reports.lock().unwrap();
        let counts: Vec<u64> = reports.iter().map(|s| s.processed).collect();
        assert_eq!(counts, vec![3, 6]);
    }

    #[test]
    fn test_interval_policy_throttles() {
        let sink = RecordingSink::default();
        let mut reporter = ProgressReporter::new(
            sink.clone(),
            ProgressPolicy::every_interval(Duration::from_secs(3600)),
        );
        for _ in 0..100 {
            reporter.record_success();
        }
        assert!(sink.reports.lock().unwrap().is_empty());
    }

    #[test]
    fn test_finish_counts_successes_and_failures_once() {
        let sink = RecordingSink::default();
        let mut reporter = ProgressReporter::new(sink.clone(), ProgressPolicy::default());
        reporter.record(&Ok::<_, ()>(1));
        reporter.record(&Err::<u8, _>("missing"));
        reporter.record_success();

        let done = reporter.finish();
        assert_eq!(done.processed, 3);
        assert_eq!(done.succeeded, 2);
        assert_eq!(done.failed, 1);

        let again = reporter.finish();
        assert_eq!(again, done);
        assert_eq!(sink.finishes.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_eta_with_total() {
        let mut reporter =
            ProgressReporter::new(NoOpProgressSink, ProgressPolicy::default()).with_total(4);
        assert_eq!(reporter.snapshot().eta, None);
        std::thread::sleep(Duration::from_millis(5));
        reporter.record_success();
        let snapshot = reporter.snapshot();
        assert_eq!(snapshot.total, Some(4));
        assert!(snapshot.eta.is_some());
        assert!(snapshot.rate > 0.0);
    }

    #[test]
    fn test_track_reports_at_exhaustion() {
        let sink = RecordingSink::default();
        let reporter = ProgressReporter::new(sink.clone(), ProgressPolicy::default());
        let items = vec![Ok(1), Err("x"), Ok(3)];
        let mut tracked = reporter.track(items.into_iter());
        let collected: Vec<_> = tracked.by_ref().collect();
        assert_eq!(collected.len(), 3);

        let finishes = sink.finishes.lock().unwrap();
        assert_eq!(finishes.len(), 1);
        assert_eq!(finishes[0].succeeded, 2);
        assert_eq!(finishes[0].failed, 1);
        assert_eq!(tracked.reporter().processed(), 3);
    }

    #[test]
    fn test_policy_from_settings() {
        let settings = ProgressSettings {
            every_items: 500,
            interval_secs: 0.0,
        };
        let policy = ProgressPolicy::from(&settings);
        assert_eq!(policy.every_items, 500);
        assert!(policy.every_interval.is_none());

        let policy = ProgressPolicy::from(&ProgressSettings::default());
        assert_eq!(policy.every_interval, Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_policy_from_unvalidated_interval() {
        let huge = ProgressSettings {
            every_items: 0,
            interval_secs: 1e20,
        };
        let policy = ProgressPolicy::from(&huge);
        assert_eq!(policy.every_interval, Some(Duration::MAX));

        let sink = RecordingSink::default();
        let mut reporter = ProgressReporter::new(sink.clone(), policy);
        reporter.record_success();
        assert!(sink.reports.lock().unwrap().is_empty());

        let nan = ProgressSettings {
            every_items: 0,
            interval_secs: f64::NAN,
        };
        assert!(ProgressPolicy::from(&nan).every_interval.is_none());
    }
}
