//! Integration tests for policy executors sharing one global pool.
//!
//! These tests verify:
//! - The concurrency ceiling holds under bursts from many submitters
//! - Independent executors do not starve each other
//! - Task callbacks observe the full life cycle
//! - shutdown_now accounts for every task that never ran
//! - Async waiting on task results

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use policypool::policy::{PolicyExecutor, PolicyExecutorProvider, PolicySettings, QueueFullAction};
use policypool::pool::{GlobalExecutor, PoolConfig};
use policypool::sync::CountDownLatch;
use policypool::task::{PolicyTaskCallback, TaskError, TaskInfo, TaskState};
use policypool::telemetry::NullTelemetrySink;

// =============================================================================
// Test Helpers
// =============================================================================

fn global(name: &str, threads: usize) -> GlobalExecutor {
    GlobalExecutor::new(PoolConfig::default().with_name(name).with_threads(threads, threads))
        .unwrap()
}

/// Tracks how many tasks run at once and the highest value seen.
#[derive(Default)]
struct Concurrency {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl Concurrency {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Records callback invocations as strings.
#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl PolicyTaskCallback for Recorder {
    fn name(&self) -> Option<String> {
        Some("recorded".to_string())
    }

    fn on_submit(&self, _task: &TaskInfo, _invoke_any_count: usize) {
        self.events.lock().push("submit".to_string());
    }

    fn on_start(&self, _task: &TaskInfo) {
        self.events.lock().push("start".to_string());
    }

    fn on_end(&self, _task: &TaskInfo, aborted: bool, failure: Option<&TaskError>) {
        self.events
            .lock()
            .push(format!("end(aborted={aborted}, failed={})", failure.is_some()));
    }
}

// =============================================================================
// Concurrency Bounds
// =============================================================================

#[test]
fn test_max_concurrency_holds_under_burst() {
    let executor = PolicyExecutor::new("burst", global("burst", 16));
    executor.max_concurrency(3).unwrap();
    let tracker = Arc::new(Concurrency::default());

    let submitters: Vec<_> = (0..4)
        .map(|_| {
            let executor = executor.clone();
            let tracker = Arc::clone(&tracker);
            thread::spawn(move || {
                (0..25)
                    .map(|i| {
                        let tracker = Arc::clone(&tracker);
                        executor
                            .submit(move || {
                                tracker.enter();
                                thread::sleep(Duration::from_millis(2));
                                tracker.exit();
                                i
                            })
                            .unwrap()
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let futures: Vec<_> = submitters
        .into_iter()
        .flat_map(|s| s.join().unwrap())
        .collect();
    for future in &futures {
        future.get_timeout(Duration::from_secs(10)).unwrap();
    }
    assert_eq!(futures.len(), 100);
    assert!(tracker.peak() <= 3, "peak was {}", tracker.peak());
    assert!(tracker.peak() >= 2);

    executor.shutdown();
    assert!(executor.await_termination(Duration::from_secs(5)).unwrap());
}

#[test]
fn test_executors_share_pool_without_starving() {
    let provider = PolicyExecutorProvider::new(global("shared", 4), Arc::new(NullTelemetrySink));
    let slow = provider
        .create_with(
            "slow",
            PolicySettings {
                max_concurrency: 2,
                ..PolicySettings::default()
            },
        )
        .unwrap();
    let fast = provider.create("fast").unwrap();

    let release = Arc::new(CountDownLatch::new(1));
    let blocked: Vec<_> = (0..6)
        .map(|_| {
            let release = Arc::clone(&release);
            slow.submit(move || release.wait(Some(Duration::from_secs(10))).unwrap())
                .unwrap()
        })
        .collect();

    while slow.running_count() < 2 {
        thread::yield_now();
    }

    // Two pool threads are held by "slow"; the rest still serve "fast".
    let quick = fast.submit(|| "done").unwrap();
    assert_eq!(quick.get_timeout(Duration::from_secs(5)).unwrap(), "done");
    assert_eq!(slow.running_count(), 2);
    assert_eq!(slow.queue_len(), 4);

    release.count_down();
    for task in blocked {
        assert!(task.get_timeout(Duration::from_secs(5)).unwrap());
    }
    provider.shutdown_all();
    assert!(provider
        .await_termination_all(Duration::from_secs(5))
        .unwrap());
}

// =============================================================================
// Callbacks and Outcomes
// =============================================================================

#[test]
fn test_callbacks_see_life_cycle() {
    let executor = PolicyExecutor::new("callbacks", global("callbacks", 2));
    let succeeded = Arc::new(Recorder::default());
    let failing = Arc::new(Recorder::default());

    let ok = executor
        .submit_with(|| Ok::<_, String>(1), succeeded.clone())
        .unwrap();
    assert_eq!(ok.get().unwrap(), 1);
    assert_eq!(ok.name(), "recorded");

    let failed = executor
        .submit_with(|| Err::<u32, _>("bad input".to_string()), failing.clone())
        .unwrap();
    assert!(failed.get().unwrap_err().is_failed());
    assert_eq!(failed.state(), TaskState::Failed);

    // on_end runs after waiters are woken; termination waits for it.
    executor.shutdown();
    assert!(executor.await_termination(Duration::from_secs(5)).unwrap());
    assert_eq!(
        *succeeded.events.lock(),
        vec!["submit", "start", "end(aborted=false, failed=false)"]
    );
    assert_eq!(
        *failing.events.lock(),
        vec!["submit", "start", "end(aborted=false, failed=true)"]
    );
}

#[test]
fn test_caller_runs_when_queue_full() {
    let executor = PolicyExecutor::new("overflow", global("overflow", 2));
    executor
        .max_concurrency(1)
        .unwrap()
        .max_queue_size(1)
        .unwrap()
        .queue_full_action(QueueFullAction::CallerRuns)
        .unwrap();

    let release = Arc::new(CountDownLatch::new(1));
    let gate = Arc::clone(&release);
    let running = executor
        .submit(move || gate.wait(Some(Duration::from_secs(10))).unwrap())
        .unwrap();
    while executor.running_count() == 0 {
        thread::yield_now();
    }
    let queued = executor.submit(|| thread::current().id()).unwrap();

    let caller = thread::current().id();
    let overflow = executor.submit(|| thread::current().id()).unwrap();
    assert_eq!(overflow.get().unwrap(), caller);

    release.count_down();
    assert!(running.get().unwrap());
    assert_ne!(queued.get().unwrap(), caller);
    assert_eq!(executor.introspect().caller_runs, 1);
    executor.shutdown();
}

// =============================================================================
// Shutdown
// =============================================================================

#[test]
fn test_shutdown_now_returns_every_unstarted_task() {
    let executor = PolicyExecutor::new("drain", global("drain", 2));
    executor.max_concurrency(1).unwrap();

    let started = Arc::new(CountDownLatch::new(1));
    let signal = Arc::clone(&started);
    let running = executor
        .submit(move || {
            signal.count_down();
            // Ends promptly once interrupted.
            policypool::sync::interrupt::sleep(Duration::from_secs(10)).is_err()
        })
        .unwrap();
    assert!(started.wait(Some(Duration::from_secs(5))).unwrap());

    let queued: Vec<_> = (0..5).map(|i| executor.submit(move || i).unwrap()).collect();
    let never_ran = executor.shutdown_now();

    assert_eq!(never_ran.len(), 5);
    let mut ids: Vec<u64> = never_ran.iter().map(|t| t.id()).collect();
    ids.sort_unstable();
    let mut expected: Vec<u64> = queued.iter().map(|t| t.id()).collect();
    expected.sort_unstable();
    assert_eq!(ids, expected);

    assert!(matches!(
        running.get_timeout(Duration::from_secs(5)),
        Err(TaskError::Cancelled)
    ));
    assert!(executor.await_termination(Duration::from_secs(5)).unwrap());
    assert!(executor.is_terminated());
    assert!(executor.submit(|| 0).unwrap_err().is_rejected());
}

// =============================================================================
// Async Waiting
// =============================================================================

#[tokio::test]
async fn test_wait_async_from_tokio() {
    let executor = PolicyExecutor::new("async", global("async", 2));
    let task = executor
        .submit(|| {
            thread::sleep(Duration::from_millis(20));
            "from the pool".to_string()
        })
        .unwrap();

    let value = tokio::time::timeout(Duration::from_secs(5), task.wait_async())
        .await
        .expect("task finished in time")
        .unwrap();
    assert_eq!(value, "from the pool");
    executor.shutdown();
}

#[tokio::test]
async fn test_wait_async_sees_cancellation() {
    let executor = PolicyExecutor::new("async-cancel", global("async-cancel", 1));
    executor.max_concurrency(1).unwrap();
    let release = Arc::new(CountDownLatch::new(1));
    let gate = Arc::clone(&release);
    let _blocker = executor
        .submit(move || gate.wait(Some(Duration::from_secs(10))).unwrap())
        .unwrap();
    let queued = executor.submit(|| 5).unwrap();

    assert!(queued.cancel(false));
    let outcome = queued.wait_async().await;
    assert!(matches!(outcome, Err(TaskError::Cancelled)));

    release.count_down();
    executor.shutdown();
}
