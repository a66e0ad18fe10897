//! The shared worker pool.
//!
//! Jobs wait in one queue (unbounded lock-free by default, or a bounded ring
//! buffer) and are run by worker threads created through a
//! [`ThreadFactory`]. The pool keeps `core` workers around while idle,
//! lets extra workers up to `max` exit after `keep_alive`, and retires
//! workers above `max` whenever the bounds are lowered.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info};

use super::config::{validate_bounds, PoolConfig, QueueKind};
use super::thread_factory::{NamedThreadFactory, ThreadFactory};
use super::worker;
use crate::controller::ControlledPool;
use crate::error::{ExecutorError, RejectReason};
use crate::executor::{Executor, Job};
use crate::queue::{BoundedBuffer, ConcurrentPriorityQueue, Expedite, ExpeditedQueue};
use crate::sync::interrupt::{self, InterruptFlag, Interrupted};

// =============================================================================
// Pool Task
// =============================================================================

/// A job queued on the global pool.
pub(crate) struct PoolTask {
    pub(crate) job: Job,
    pub(crate) expedited: bool,
}

impl Expedite for PoolTask {
    fn is_expedited(&self) -> bool {
        self.expedited
    }
}

#[derive(Debug, Clone, Copy)]
struct Bounds {
    core: usize,
    max: usize,
}

// =============================================================================
// Pool State
// =============================================================================

pub(crate) struct PoolInner {
    pub(crate) name: Arc<str>,
    pub(crate) queue: Box<dyn ExpeditedQueue<PoolTask>>,
    bounds: Mutex<Bounds>,
    keep_alive: Mutex<Duration>,
    live: AtomicUsize,
    pub(crate) idle: AtomicUsize,
    active: AtomicUsize,
    completed: AtomicU64,
    peak_live: AtomicUsize,
    next_worker: AtomicUsize,
    shutdown: AtomicBool,
    pub(crate) workers: DashMap<usize, Arc<InterruptFlag>>,
    thread_factory: Arc<dyn ThreadFactory>,
    exit_lock: Mutex<()>,
    exited: Condvar,
}

impl PoolInner {
    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub(crate) fn keep_alive(&self) -> Duration {
        *self.keep_alive.lock()
    }

    fn bounds(&self) -> Bounds {
        *self.bounds.lock()
    }

    /// Decrements the live count if it is above `floor`.
    fn try_retire_above(&self, floor: usize) -> bool {
        let mut live = self.live.load(Ordering::SeqCst);
        while live > floor {
            match self.live.compare_exchange_weak(
                live,
                live - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => live = actual,
            }
        }
        false
    }

    /// Decides whether an idle worker should exit now. A true answer has
    /// already removed the worker from the live count.
    pub(crate) fn should_retire(&self, idle_since: Instant) -> bool {
        let bounds = self.bounds();
        if self.try_retire_above(bounds.max) {
            return true;
        }
        if self.is_shutdown() && self.queue.is_empty() {
            return self.try_retire_above(0);
        }
        idle_since.elapsed() >= self.keep_alive() && self.try_retire_above(bounds.core)
    }

    fn reserve_worker(&self, limit: usize) -> bool {
        let mut live = self.live.load(Ordering::SeqCst);
        while live < limit {
            match self.live.compare_exchange_weak(
                live,
                live + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    self.update_peak(live + 1);
                    return true;
                }
                Err(actual) => live = actual,
            }
        }
        false
    }

    fn update_peak(&self, current: usize) {
        let mut peak = self.peak_live.load(Ordering::Relaxed);
        while current > peak {
            match self.peak_live.compare_exchange_weak(
                peak,
                current,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(p) => peak = p,
            }
        }
    }

    /// Starts a worker if fewer than `limit` are alive.
    fn spawn_worker(self: &Arc<Self>, limit: usize, first: Option<PoolTask>) -> Result<bool, PoolTask> {
        if !self.reserve_worker(limit) {
            return match first {
                Some(task) => Err(task),
                None => Ok(false),
            };
        }
        let id = self.next_worker.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}-worker-{}", self.name, id);
        let pool = Arc::clone(self);
        let handoff = Arc::new(Mutex::new(first));
        let slot = Arc::clone(&handoff);
        let body: Job = Box::new(move || {
            let first = slot.lock().take();
            worker::run(pool, id, first);
        });
        match self.thread_factory.spawn(name.clone(), body) {
            Ok(()) => {
                debug!(pool = %self.name, worker = %name, "Worker started");
                Ok(true)
            }
            Err(e) => {
                self.live.fetch_sub(1, Ordering::SeqCst);
                error!(pool = %self.name, worker = %name, error = %e, "Failed to spawn worker thread");
                let first = handoff.lock().take();
                match first {
                    Some(task) => Err(task),
                    None => Ok(false),
                }
            }
        }
    }

    pub(crate) fn worker_exited(&self, id: usize) {
        self.workers.remove(&id);
        let _guard = self.exit_lock.lock();
        self.exited.notify_all();
    }

    pub(crate) fn run_task(&self, task: PoolTask) {
        self.active.fetch_add(1, Ordering::SeqCst);
        crate::panic::contain("pool_job", task.job);
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
        // A cancel that raced with completion must not leak into the next job.
        interrupt::take_interrupt();
    }
}

// =============================================================================
// Global Executor
// =============================================================================

/// Point-in-time view of the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub name: String,
    pub core_threads: usize,
    pub max_threads: usize,
    pub live_threads: usize,
    pub idle_threads: usize,
    pub active_threads: usize,
    pub peak_threads: usize,
    pub completed_tasks: u64,
    pub queue_depth: usize,
    pub queue: QueueKind,
}

impl fmt::Display for PoolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Pool '{}' ({} queue)", self.name, self.queue)?;
        writeln!(
            f,
            "  threads: core={} max={} live={} idle={} active={} peak={}",
            self.core_threads,
            self.max_threads,
            self.live_threads,
            self.idle_threads,
            self.active_threads,
            self.peak_threads
        )?;
        write!(
            f,
            "  tasks: completed={} queued={}",
            self.completed_tasks, self.queue_depth
        )
    }
}

/// The shared pool every policy executor dispatches into.
///
/// Cloning yields another handle to the same pool.
#[derive(Clone)]
pub struct GlobalExecutor {
    inner: Arc<PoolInner>,
    queue_kind: QueueKind,
}

impl fmt::Debug for GlobalExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalExecutor")
            .field("name", &self.inner.name)
            .field("queue", &self.queue_kind)
            .finish()
    }
}

impl GlobalExecutor {
    pub fn new(config: PoolConfig) -> Result<Self, ExecutorError> {
        Self::with_thread_factory(config, Arc::new(NamedThreadFactory::new()))
    }

    pub fn with_thread_factory(
        config: PoolConfig,
        thread_factory: Arc<dyn ThreadFactory>,
    ) -> Result<Self, ExecutorError> {
        config.validate()?;
        let queue: Box<dyn ExpeditedQueue<PoolTask>> = match config.queue {
            QueueKind::Unbounded => Box::new(ConcurrentPriorityQueue::new()),
            QueueKind::Bounded(capacity) => Box::new(BoundedBuffer::new(capacity, capacity)),
        };
        info!(
            pool = %config.name,
            core = config.core_threads,
            max = config.max_threads,
            queue = %config.queue,
            "Global executor created"
        );
        Ok(Self {
            inner: Arc::new(PoolInner {
                name: Arc::from(config.name.as_str()),
                queue,
                bounds: Mutex::new(Bounds {
                    core: config.core_threads,
                    max: config.max_threads,
                }),
                keep_alive: Mutex::new(config.keep_alive),
                live: AtomicUsize::new(0),
                idle: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                completed: AtomicU64::new(0),
                peak_live: AtomicUsize::new(0),
                next_worker: AtomicUsize::new(0),
                shutdown: AtomicBool::new(false),
                workers: DashMap::new(),
                thread_factory,
                exit_lock: Mutex::new(()),
                exited: Condvar::new(),
            }),
            queue_kind: config.queue,
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Queues a job behind any expedited work.
    pub fn execute(&self, job: Job) -> Result<(), ExecutorError> {
        self.submit(PoolTask {
            job,
            expedited: false,
        })
    }

    /// Queues a job ahead of every non-expedited job.
    pub fn execute_expedited(&self, job: Job) -> Result<(), ExecutorError> {
        self.submit(PoolTask {
            job,
            expedited: true,
        })
    }

    fn submit(&self, task: PoolTask) -> Result<(), ExecutorError> {
        let inner = &self.inner;
        if inner.is_shutdown() {
            return Err(ExecutorError::Rejected(RejectReason::Shutdown));
        }
        let bounds = inner.bounds();
        match inner.queue.offer(task) {
            Ok(()) => {
                if inner.live.load(Ordering::SeqCst) < bounds.core {
                    let _ = inner.spawn_worker(bounds.core, None);
                } else if inner.idle.load(Ordering::SeqCst) == 0 {
                    let _ = inner.spawn_worker(bounds.max, None);
                }
                Ok(())
            }
            Err(task) => match inner.spawn_worker(bounds.max, Some(task)) {
                Ok(_) => Ok(()),
                Err(_) => Err(ExecutorError::Rejected(RejectReason::PoolSaturated)),
            },
        }
    }

    /// Sets core and max thread counts.
    pub fn set_bounds(&self, core: usize, max: usize) -> Result<(), ExecutorError> {
        validate_bounds(core, max)?;
        let previous = {
            let mut bounds = self.inner.bounds.lock();
            let previous = *bounds;
            *bounds = Bounds { core, max };
            previous
        };
        if previous.core != core || previous.max != max {
            debug!(pool = %self.inner.name, core, max, "Pool bounds changed");
        }
        self.prestart_for_backlog(core);
        Ok(())
    }

    pub fn set_keep_alive(&self, keep_alive: Duration) {
        *self.inner.keep_alive.lock() = keep_alive;
    }

    /// Starts workers, up to `target`, for jobs already waiting.
    fn prestart_for_backlog(&self, target: usize) {
        let live = self.inner.live.load(Ordering::SeqCst);
        let wanted = target
            .saturating_sub(live)
            .min(self.inner.queue.len());
        for _ in 0..wanted {
            if !matches!(self.inner.spawn_worker(target, None), Ok(true)) {
                break;
            }
        }
    }

    pub fn core_threads(&self) -> usize {
        self.inner.bounds().core
    }

    pub fn max_threads(&self) -> usize {
        self.inner.bounds().max
    }

    pub fn live_threads(&self) -> usize {
        self.inner.live.load(Ordering::SeqCst)
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.is_shutdown()
    }

    /// Stops accepting jobs. Queued jobs still run.
    pub fn shutdown(&self) {
        if !self.inner.shutdown.swap(true, Ordering::SeqCst) {
            info!(pool = %self.inner.name, queued = self.inner.queue.len(), "Global executor shutting down");
        }
    }

    /// Stops accepting jobs, discards queued ones and interrupts running
    /// workers. Returns the number of discarded jobs.
    pub fn shutdown_now(&self) -> usize {
        self.shutdown();
        let mut discarded = Vec::new();
        self.inner.queue.drain_to(&mut discarded, usize::MAX);
        for flag in self.inner.workers.iter() {
            flag.value().interrupt();
        }
        discarded.len()
    }

    /// Waits for every worker to exit after a shutdown.
    pub fn await_termination(&self, timeout: Duration) -> Result<bool, Interrupted> {
        let deadline = Instant::now().checked_add(timeout);
        let mut guard = self.inner.exit_lock.lock();
        loop {
            if self.inner.is_shutdown() && self.inner.live.load(Ordering::SeqCst) == 0 {
                return Ok(true);
            }
            interrupt::check()?;
            let Some(slice) = interrupt::next_slice(deadline) else {
                return Ok(false);
            };
            self.inner.exited.wait_for(&mut guard, slice);
        }
    }

    pub fn stats(&self) -> PoolStats {
        let bounds = self.inner.bounds();
        PoolStats {
            name: self.inner.name.to_string(),
            core_threads: bounds.core,
            max_threads: bounds.max,
            live_threads: self.inner.live.load(Ordering::SeqCst),
            idle_threads: self.inner.idle.load(Ordering::SeqCst),
            active_threads: self.inner.active.load(Ordering::SeqCst),
            peak_threads: self.inner.peak_live.load(Ordering::Relaxed),
            completed_tasks: self.inner.completed.load(Ordering::SeqCst),
            queue_depth: self.inner.queue.len(),
            queue: self.queue_kind,
        }
    }
}

impl Executor for GlobalExecutor {
    fn execute(&self, job: Job) -> Result<(), ExecutorError> {
        GlobalExecutor::execute(self, job)
    }

    fn name(&self) -> &str {
        GlobalExecutor::name(self)
    }
}

impl ControlledPool for GlobalExecutor {
    fn pool_size(&self) -> usize {
        self.max_threads()
    }

    fn set_pool_size(&self, size: usize) -> Result<(), ExecutorError> {
        self.set_bounds(size, size)
    }

    fn completed_task_count(&self) -> u64 {
        self.inner.completed.load(Ordering::SeqCst)
    }

    fn queue_depth(&self) -> usize {
        self.inner.queue.len()
    }

    fn active_count(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        GlobalExecutor::name(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::CountDownLatch;
    use std::sync::mpsc;

    fn pool(core: usize, max: usize) -> GlobalExecutor {
        GlobalExecutor::new(
            PoolConfig::default()
                .with_name("test-pool")
                .with_threads(core, max)
                .with_keep_alive(Duration::from_millis(50)),
        )
        .unwrap()
    }

    #[test]
    fn test_runs_jobs() {
        let pool = pool(2, 2);
        let latch = Arc::new(CountDownLatch::new(10));
        for _ in 0..10 {
            let latch = Arc::clone(&latch);
            pool.execute(Box::new(move || {
                latch.count_down();
            }))
            .unwrap();
        }
        assert_eq!(latch.wait(Some(Duration::from_secs(5))), Ok(true));
        assert!(pool.live_threads() <= 2);
        pool.shutdown();
        assert_eq!(pool.await_termination(Duration::from_secs(5)), Ok(true));
        assert_eq!(pool.stats().completed_tasks, 10);
    }

    #[test]
    fn test_expedited_jobs_run_first() {
        let pool = pool(1, 1);
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let (order_tx, order_rx) = mpsc::channel();
        pool.execute(Box::new(move || {
            let _ = gate_rx.recv();
        }))
        .unwrap();
        std::thread::sleep(Duration::from_millis(20));

        for (label, expedited) in [("normal", false), ("expedited", true)] {
            let order_tx = order_tx.clone();
            let job: Job = Box::new(move || {
                order_tx.send(label).unwrap();
            });
            if expedited {
                pool.execute_expedited(job).unwrap();
            } else {
                pool.execute(job).unwrap();
            }
        }
        gate_tx.send(()).unwrap();
        let first = order_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let second = order_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!((first, second), ("expedited", "normal"));
    }

    #[test]
    fn test_rejects_after_shutdown() {
        let pool = pool(1, 1);
        pool.shutdown();
        assert_eq!(
            pool.execute(Box::new(|| {})),
            Err(ExecutorError::Rejected(RejectReason::Shutdown))
        );
    }

    #[test]
    fn test_panicking_job_keeps_worker_alive() {
        let pool = pool(1, 1);
        pool.execute(Box::new(|| panic!("job failure"))).unwrap();
        let (tx, rx) = mpsc::channel();
        pool.execute(Box::new(move || tx.send(1).unwrap())).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(1));
    }

    #[test]
    fn test_shrinking_bounds_retires_workers() {
        let pool = pool(4, 4);
        let latch = Arc::new(CountDownLatch::new(4));
        let release = Arc::new(CountDownLatch::new(1));
        for _ in 0..4 {
            let latch = Arc::clone(&latch);
            let release = Arc::clone(&release);
            pool.execute(Box::new(move || {
                latch.count_down();
                let _ = release.wait(Some(Duration::from_secs(5)));
            }))
            .unwrap();
        }
        assert_eq!(latch.wait(Some(Duration::from_secs(5))), Ok(true));
        assert_eq!(pool.live_threads(), 4);

        pool.set_bounds(1, 1).unwrap();
        release.count_down();
        let deadline = Instant::now() + Duration::from_secs(5);
        while pool.live_threads() > 1 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(pool.live_threads(), 1);
    }

    #[test]
    fn test_bounded_queue_saturates() {
        let pool = GlobalExecutor::new(
            PoolConfig::default()
                .with_threads(1, 1)
                .with_queue(QueueKind::Bounded(1)),
        )
        .unwrap();
        let release = Arc::new(CountDownLatch::new(1));
        let started = Arc::new(CountDownLatch::new(1));
        {
            let release = Arc::clone(&release);
            let started = Arc::clone(&started);
            pool.execute(Box::new(move || {
                started.count_down();
                let _ = release.wait(Some(Duration::from_secs(5)));
            }))
            .unwrap();
        }
        assert_eq!(started.wait(Some(Duration::from_secs(5))), Ok(true));
        pool.execute(Box::new(|| {})).unwrap();
        assert_eq!(
            pool.execute(Box::new(|| {})),
            Err(ExecutorError::Rejected(RejectReason::PoolSaturated))
        );
        release.count_down();
    }

    #[test]
    fn test_invalid_bounds_rejected() {
        let pool = pool(1, 2);
        assert!(matches!(
            pool.set_bounds(3, 2),
            Err(ExecutorError::InvalidConfiguration(_))
        ));
        assert_eq!(pool.max_threads(), 2);
    }
}
