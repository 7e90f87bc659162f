//! Stage behaviour under real concurrency: ordering, memory bound,
//! cancellation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rand::Rng;
use retrieval_pipeline::{ParallelStage, Pipeline, PipelineError, StageConfig};

/// Live/peak counters for items that exist between construction and drop.
#[derive(Default)]
struct LiveCounter {
    live: AtomicUsize,
    peak: AtomicUsize,
}

struct Counted {
    value: u64,
    counter: Arc<LiveCounter>,
}

impl Counted {
    fn new(value: u64, counter: Arc<LiveCounter>) -> Self {
        let now = counter.live.fetch_add(1, Ordering::SeqCst) + 1;
        counter.peak.fetch_max(now, Ordering::SeqCst);
        Self { value, counter }
    }
}

impl Drop for Counted {
    fn drop(&mut self) {
        self.counter.live.fetch_sub(1, Ordering::SeqCst);
    }
}

fn jittered_identity(x: u64) -> Result<u64, PipelineError> {
    let micros = rand::rng().random_range(0..300);
    thread::sleep(Duration::from_micros(micros));
    Ok(x)
}

#[test]
fn test_identity_preserves_order_for_any_worker_count() {
    for workers in [1, 4, 64] {
        let stage = ParallelStage::new(StageConfig::new("identity").with_workers(workers)).unwrap();
        let out: Vec<u64> = stage
            .run(0..500u64, jittered_identity)
            .unwrap()
            .map(Result::unwrap)
            .collect();
        assert_eq!(out, (0..500).collect::<Vec<_>>(), "workers = {workers}");
    }
}

#[test]
fn test_default_worker_count_preserves_order() {
    let stage = ParallelStage::new(StageConfig::new("auto")).unwrap();
    let out: Vec<u64> = stage
        .run(0..200u64, jittered_identity)
        .unwrap()
        .map(Result::unwrap)
        .collect();
    assert_eq!(out, (0..200).collect::<Vec<_>>());
}

fn assert_bounded(items: u64, workers: usize, slack: usize) {
    let counter = Arc::new(LiveCounter::default());
    let config = StageConfig::new("bounded")
        .with_workers(workers)
        .with_queue_slack(slack);
    let limit = config.in_flight_limit();

    let input = {
        let counter = counter.clone();
        (0..items).map(move |i| Counted::new(i, counter.clone()))
    };
    let stream = ParallelStage::new(config)
        .unwrap()
        .run(input, |c: Counted| Ok::<_, PipelineError>(c))
        .unwrap();

    let mut expected = 0;
    for result in stream {
        let item = result.unwrap();
        assert_eq!(item.value, expected);
        expected += 1;
    }
    assert_eq!(expected, items);
    assert_eq!(counter.live.load(Ordering::SeqCst), 0);

    // Every live item holds a permit, plus the one in the consumer's hand.
    let peak = counter.peak.load(Ordering::SeqCst);
    assert!(peak <= limit + 1, "peak {peak} exceeds limit {limit} + 1");
}

#[test]
fn test_memory_bounded_by_worker_count() {
    assert_bounded(100_000, 4, 2);
}

#[test]
#[ignore = "soak: one million items"]
fn test_memory_bounded_soak() {
    assert_bounded(1_000_000, 8, 4);
}

#[test]
fn test_slow_head_does_not_grow_buffer() {
    // Item 0 is slow while the rest finish instantly; the reorder buffer
    // must stay within the in-flight limit instead of absorbing the input.
    let config = StageConfig::new("slow-head").with_workers(4).with_queue_slack(1);
    let limit = config.in_flight_limit();
    let mut stream = ParallelStage::new(config)
        .unwrap()
        .run(0..10_000u64, |x| {
            if x == 0 {
                thread::sleep(Duration::from_millis(50));
            }
            Ok::<_, PipelineError>(x)
        })
        .unwrap();

    assert_eq!(stream.next().unwrap().unwrap(), 0);
    assert!(stream.buffered() <= limit);
    let rest: Vec<u64> = stream.by_ref().map(Result::unwrap).collect();
    assert_eq!(rest.len(), 9_999);
}

#[test]
fn test_cancellation_joins_workers() {
    let token = Arc::new(());
    let op_token = token.clone();
    let stage = ParallelStage::new(StageConfig::new("slow").with_workers(4)).unwrap();
    let mut stream = stage
        .run(0u64.., move |x| {
            let _held = &op_token;
            thread::sleep(Duration::from_millis(2));
            Ok::<_, PipelineError>(x)
        })
        .unwrap();

    assert_eq!(stream.next().unwrap().unwrap(), 0);
    assert!(stream.is_running());

    let start = Instant::now();
    drop(stream);
    assert!(start.elapsed() < Duration::from_secs(5));
    // The operation lives only inside the workers; all of them are gone.
    assert_eq!(Arc::strong_count(&token), 1);
}

#[test]
fn test_drop_waits_for_running_items() {
    let finished = Arc::new(AtomicUsize::new(0));
    let (started_tx, started_rx) = std::sync::mpsc::channel();
    let started_tx = std::sync::Mutex::new(started_tx);
    let op_finished = finished.clone();
    let stage = ParallelStage::new(StageConfig::new("stuck").with_workers(1)).unwrap();
    let stream = stage
        .run(0u64..1, move |x| {
            let _ = started_tx.lock().unwrap().send(());
            thread::sleep(Duration::from_millis(200));
            op_finished.fetch_add(1, Ordering::SeqCst);
            Ok::<_, PipelineError>(x)
        })
        .unwrap();

    started_rx.recv().unwrap();
    let start = Instant::now();
    drop(stream);
    assert_eq!(finished.load(Ordering::SeqCst), 1);
    assert!(start.elapsed() >= Duration::from_millis(100));
}

#[test]
fn test_cancellation_tears_down_every_stage() {
    let first = Arc::new(());
    let second = Arc::new(());
    let (t1, t2) = (first.clone(), second.clone());

    let mut pipeline = Pipeline::new(0u64..)
        .stage(StageConfig::new("resolve").with_workers(8), move |x| {
            let _held = &t1;
            thread::sleep(Duration::from_millis(1));
            Ok::<_, PipelineError>(x)
        })
        .unwrap()
        .stage(StageConfig::new("apply").with_workers(2), move |x| {
            let _held = &t2;
            Ok::<_, PipelineError>(x * 2)
        })
        .unwrap();

    let head: Vec<u64> = pipeline.by_ref().take(3).map(Result::unwrap).collect();
    assert_eq!(head, vec![0, 2, 4]);

    let start = Instant::now();
    drop(pipeline);
    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(Arc::strong_count(&first), 1);
    assert_eq!(Arc::strong_count(&second), 1);
}

#[test]
fn test_per_stage_worker_counts_are_independent() {
    let resolve_calls = Arc::new(AtomicUsize::new(0));
    let calls = resolve_calls.clone();
    let out: Vec<u64> = Pipeline::new(0..64u64)
        .stage(StageConfig::new("io-bound").with_workers(16), move |x| {
            calls.fetch_add(1, Ordering::SeqCst);
            jittered_identity(x)
        })
        .unwrap()
        .stage(StageConfig::new("cpu-bound").with_workers(1), |x| {
            Ok::<_, PipelineError>(x + 1)
        })
        .unwrap()
        .map(Result::unwrap)
        .collect();
    assert_eq!(out, (1..65).collect::<Vec<_>>());
    assert_eq!(resolve_calls.load(Ordering::SeqCst), 64);
}
