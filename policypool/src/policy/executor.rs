//! The policy executor.
//!
//! A policy executor never owns threads. It keeps its own pending queue and
//! three permit counters, and borrows pool threads by posting polling tasks
//! to the [`GlobalExecutor`]. Each polling task runs at most one queued task.
//!
//! # Accounting
//!
//! - `queue_permits`: free queue slots. Taken on enqueue, returned when the
//!   task leaves the queue (polled, withdrawn, drained).
//! - `max_permits`: free concurrency slots. Taken per dispatched polling
//!   task, returned when the polling task finishes or is dropped unrun.
//! - `core_permits`: free expedited slots. A polling task dispatched while
//!   one is free jumps the global queue.
//! - `withheld`: queued tasks no polling task has been dispatched for yet.

use std::error::Error as StdError;
use std::fmt;
use std::sync::atomic::{AtomicIsize, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, trace, warn};

use super::config::{permit_count, MaxPolicy, PolicySettings, QueueFullAction};
use super::polling::PollingTask;
use super::state::{AtomicExecutorState, ExecutorState};
use crate::error::{ExecutorError, RejectReason};
use crate::executor::{Executor, Job};
use crate::panic::contain;
use crate::pool::GlobalExecutor;
use crate::queue::{DoubleQueue, ExpeditedQueue};
use crate::sync::interrupt;
use crate::sync::Permits;
use crate::task::{
    next_task_id, AbortReason, InvokeAnyLatch, PolicyTask, PolicyTaskCallback, QueuedTask,
    TaskError, TaskFuture, TaskInfo, TaskOwner, NewTask, Work,
};
use crate::telemetry::{NullTelemetrySink, TelemetryEvent, TelemetrySink};

/// Called once with the executor id and the remaining queue capacity.
pub type QueueSizeCallback = Box<dyn FnOnce(&str, usize) + Send>;

/// Called once with the late task and how long it waited to start.
pub type LateStartCallback = Box<dyn FnOnce(&TaskInfo, Duration) + Send>;

#[derive(Debug, Default)]
pub(super) struct Counters {
    pub(super) submitted: AtomicU64,
    pub(super) completed: AtomicU64,
    pub(super) rejected: AtomicU64,
    pub(super) caller_runs: AtomicU64,
}

// =============================================================================
// Shared State
// =============================================================================

pub(crate) struct PolicyInner {
    pub(super) id: Arc<str>,
    pub(super) global: GlobalExecutor,
    telemetry: Arc<dyn TelemetrySink>,
    pub(super) queue: DoubleQueue<Arc<dyn QueuedTask>>,
    pub(super) state: AtomicExecutorState,
    pub(super) settings: Mutex<PolicySettings>,
    pub(super) queue_permits: Permits,
    pub(super) max_permits: Permits,
    pub(super) core_permits: Permits,
    pub(super) withheld: AtomicIsize,
    pub(super) dispatched: AtomicUsize,
    pub(super) peak_dispatched: AtomicUsize,
    pub(super) running: DashMap<u64, Arc<dyn QueuedTask>>,
    pub(super) counters: Counters,
    queue_size_callback: Mutex<Option<(usize, QueueSizeCallback)>>,
    late_start_callback: Mutex<Option<(Duration, LateStartCallback)>>,
    termination_lock: Mutex<()>,
    termination: Condvar,
}

impl PolicyInner {
    fn new(
        id: &str,
        global: GlobalExecutor,
        settings: PolicySettings,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            id: Arc::from(id),
            global,
            telemetry,
            queue: DoubleQueue::new(),
            state: AtomicExecutorState::new(),
            queue_permits: Permits::new(permit_count(settings.max_queue_size)),
            max_permits: Permits::new(permit_count(settings.max_concurrency)),
            core_permits: Permits::new(permit_count(settings.core_concurrency)),
            settings: Mutex::new(settings),
            withheld: AtomicIsize::new(0),
            dispatched: AtomicUsize::new(0),
            peak_dispatched: AtomicUsize::new(0),
            running: DashMap::new(),
            counters: Counters::default(),
            queue_size_callback: Mutex::new(None),
            late_start_callback: Mutex::new(None),
            termination_lock: Mutex::new(()),
            termination: Condvar::new(),
        }
    }

    pub(super) fn settings(&self) -> PolicySettings {
        self.settings.lock().clone()
    }

    fn emit_event(&self, event: TelemetryEvent) {
        contain("telemetry", || self.telemetry.emit(event));
    }

    fn transition(&self, from: ExecutorState, to: ExecutorState) -> bool {
        if !self.state.transition(from, to) {
            return false;
        }
        self.emit_event(TelemetryEvent::ExecutorStateChanged {
            executor: Arc::clone(&self.id),
            from,
            to,
        });
        true
    }

    /// Decrements the withheld count if it is positive.
    fn claim_withheld(&self) -> bool {
        let mut current = self.withheld.load(Ordering::SeqCst);
        while current > 0 {
            match self.withheld.compare_exchange_weak(
                current,
                current - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
        false
    }

    fn update_peak(&self, current: usize) {
        let mut peak = self.peak_dispatched.load(Ordering::Relaxed);
        while current > peak {
            match self.peak_dispatched.compare_exchange_weak(
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

    pub(super) fn signal_termination(&self) {
        let _guard = self.termination_lock.lock();
        self.termination.notify_all();
    }

    // -------------------------------------------------------------------------
    // Settings
    // -------------------------------------------------------------------------

    pub(super) fn update_settings(
        self: &Arc<Self>,
        change: impl FnOnce(&mut PolicySettings),
    ) -> Result<(), ExecutorError> {
        let mut settings = self.settings.lock();
        let state = self.state.load();
        if state.is_shutdown() {
            return Err(ExecutorError::illegal_state(format!(
                "policy executor '{}' is {}",
                self.id, state
            )));
        }
        let mut next = settings.clone();
        change(&mut next);
        next.validate()?;

        self.max_permits
            .adjust(permit_delta(settings.max_concurrency, next.max_concurrency));
        self.core_permits
            .adjust(permit_delta(settings.core_concurrency, next.core_concurrency));
        self.queue_permits
            .adjust(permit_delta(settings.max_queue_size, next.max_queue_size));
        let grew = next.max_concurrency > settings.max_concurrency;
        if *settings != next {
            debug!(
                executor = %self.id,
                core = next.core_concurrency,
                max = next.max_concurrency,
                queue = next.max_queue_size,
                "Policy executor reconfigured"
            );
        }
        *settings = next;
        drop(settings);

        if grew {
            self.dispatch_if_possible();
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Task creation and admission
    // -------------------------------------------------------------------------

    pub(super) fn new_task<T: Clone + Send + 'static>(
        self: &Arc<Self>,
        work: Work<T>,
        callback: Option<Arc<dyn PolicyTaskCallback>>,
        latch: Option<Arc<InvokeAnyLatch<T>>>,
    ) -> Arc<TaskFuture<T>> {
        let owner: Weak<dyn TaskOwner> = Arc::downgrade(self) as Weak<dyn TaskOwner>;
        TaskFuture::new(NewTask {
            id: next_task_id(),
            executor: Arc::clone(&self.id),
            owner,
            work,
            callback,
            latch,
            start_timeout: self.settings.lock().start_timeout,
        })
    }

    fn reject(&self, task: &dyn QueuedTask, reason: AbortReason, error: ExecutorError) -> ExecutorError {
        task.abort(reason);
        self.counters.rejected.fetch_add(1, Ordering::Relaxed);
        error
    }

    /// Admits a task: waits for a queue slot, queues it and tries to dispatch.
    pub(super) fn enqueue(
        self: &Arc<Self>,
        task: Arc<dyn QueuedTask>,
        invoke_any_count: usize,
    ) -> Result<(), ExecutorError> {
        let shutdown = ExecutorError::Rejected(RejectReason::Shutdown);
        if self.state.load().is_shutdown() {
            return Err(self.reject(task.as_ref(), AbortReason::Shutdown, shutdown));
        }

        let settings = self.settings();
        match self.queue_permits.acquire_timeout(settings.max_wait_for_enqueue) {
            Ok(true) => {}
            Ok(false) => {
                self.emit_event(TelemetryEvent::QueueFull {
                    executor: Arc::clone(&self.id),
                    max_queue_size: settings.max_queue_size,
                });
                return match settings.queue_full_action {
                    QueueFullAction::Abort => {
                        debug!(executor = %self.id, task_id = task.id(), "Queue full, aborting task");
                        Err(self.reject(
                            task.as_ref(),
                            AbortReason::QueueFull,
                            ExecutorError::Rejected(RejectReason::QueueFull),
                        ))
                    }
                    QueueFullAction::CallerRuns => {
                        debug!(executor = %self.id, task_id = task.id(), "Queue full, running on caller");
                        if task.accept(invoke_any_count) {
                            self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                            self.counters.caller_runs.fetch_add(1, Ordering::Relaxed);
                            self.run_tracked(task);
                        }
                        Ok(())
                    }
                };
            }
            Err(interrupted) => {
                return Err(self.reject(task.as_ref(), AbortReason::Rejected, interrupted.into()));
            }
        }

        if !task.accept(invoke_any_count) {
            self.queue_permits.release(1);
            return Ok(());
        }
        let task_id = task.id();
        if self.queue.offer(task).is_err() {
            // The pending queue is unbounded; a refusal only happens if that
            // ever changes.
            self.queue_permits.release(1);
            return Err(ExecutorError::Rejected(RejectReason::QueueFull));
        }
        self.withheld.fetch_add(1, Ordering::SeqCst);
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);

        if self.state.load().is_shutdown() {
            // Lost a race with shutdown. Whoever removes the task first owns it.
            let removed = self
                .queue
                .remove_first(&mut |t: &Arc<dyn QueuedTask>| t.id() == task_id);
            if let Some(task) = removed {
                self.queue_permits.release(1);
                self.claim_withheld();
                self.signal_termination();
                return Err(self.reject(task.as_ref(), AbortReason::Shutdown, shutdown));
            }
        }
        trace!(executor = %self.id, task_id, "Task queued");

        self.check_queue_size_callback();
        self.dispatch_if_possible();
        Ok(())
    }

    fn check_queue_size_callback(&self) {
        let remaining = self.queue_permits.available().max(0) as usize;
        let fired = {
            let mut slot = self.queue_size_callback.lock();
            match slot.as_ref() {
                Some((min_remaining, _)) if remaining < *min_remaining => slot.take(),
                _ => None,
            }
        };
        if let Some((_, callback)) = fired {
            debug!(executor = %self.id, remaining, "Queue capacity callback fired");
            contain("queue_size_callback", || callback(&self.id, remaining));
        }
    }

    // -------------------------------------------------------------------------
    // Dispatch
    // -------------------------------------------------------------------------

    /// Posts polling tasks while work is withheld and concurrency is free.
    pub(super) fn dispatch_if_possible(self: &Arc<Self>) {
        loop {
            if self.withheld.load(Ordering::SeqCst) <= 0 {
                return;
            }
            if !self.max_permits.try_acquire() {
                return;
            }
            if !self.claim_withheld() {
                self.max_permits.release(1);
                continue;
            }
            let expedited = self.core_permits.try_acquire();
            let now = self.dispatched.fetch_add(1, Ordering::SeqCst) + 1;
            self.update_peak(now);

            let job = PollingTask::new(Arc::clone(self), expedited).into_job();
            let posted = if expedited {
                self.global.execute_expedited(job)
            } else {
                self.global.execute(job)
            };
            match posted {
                Ok(()) => {
                    trace!(executor = %self.id, expedited, dispatched = now, "Polling task dispatched");
                }
                Err(error) => {
                    // The dropped job already gave back its permits, and its claim
                    // unless the pool is gone.
                    warn!(executor = %self.id, error = %error, "Global executor refused polling task");
                    if let Some(task) = self.queue.poll() {
                        self.queue_permits.release(1);
                        self.claim_withheld();
                        self.reject(task.as_ref(), AbortReason::Rejected, error);
                    }
                    self.signal_termination();
                    if !self.global.is_shutdown() {
                        return;
                    }
                }
            }
        }
    }

    /// Gives back what a polling task held.
    pub(super) fn finish_polling(self: &Arc<Self>, expedited: bool, ran: bool) {
        if expedited {
            self.core_permits.release(1);
        }
        self.max_permits.release(1);
        // Dropped by a pool that will never run another polling task.
        let stranded = !ran && self.global.is_shutdown();
        if !ran && !stranded {
            self.withheld.fetch_add(1, Ordering::SeqCst);
        }
        self.dispatched.fetch_sub(1, Ordering::SeqCst);
        if ran {
            self.dispatch_if_possible();
        } else if stranded {
            self.abort_stranded();
        }
        self.signal_termination();
    }

    /// Aborts every queued task once the global pool is gone. Only tasks
    /// without a polling task in flight hold a withheld claim.
    fn abort_stranded(&self) {
        let mut aborted = 0usize;
        while let Some(task) = self.queue.poll() {
            self.queue_permits.release(1);
            self.claim_withheld();
            task.abort(AbortReason::Shutdown);
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            aborted += 1;
        }
        if aborted > 0 {
            warn!(executor = %self.id, aborted, "Global executor shut down under queued tasks");
        }
    }

    /// Runs a task on the current thread while listing it as running.
    pub(super) fn run_tracked(&self, task: Arc<dyn QueuedTask>) {
        let task_id = task.id();
        self.running.insert(task_id, Arc::clone(&task));
        task.run();
        self.running.remove(&task_id);
        self.counters.completed.fetch_add(1, Ordering::Relaxed);
        // The thread may be a caller's; an interrupt aimed at the task ends here.
        interrupt::take_interrupt();
    }

    // -------------------------------------------------------------------------
    // Termination
    // -------------------------------------------------------------------------

    fn is_quiescent(&self) -> bool {
        self.queue.is_empty()
            && self.dispatched.load(Ordering::SeqCst) == 0
            && self.running.is_empty()
    }

    fn await_termination(&self, timeout: Duration) -> Result<bool, ExecutorError> {
        let deadline = Instant::now().checked_add(timeout);
        let mut guard = self.termination_lock.lock();
        loop {
            let state = self.state.load();
            match state {
                ExecutorState::Terminated => return Ok(true),
                ExecutorState::EnqueueStopped | ExecutorState::TasksCanceled
                    if self.is_quiescent() =>
                {
                    if self.transition(state, ExecutorState::Terminated) {
                        info!(executor = %self.id, "Policy executor terminated");
                        return Ok(true);
                    }
                    continue;
                }
                _ => {}
            }
            interrupt::check()?;
            let Some(slice) = interrupt::next_slice(deadline) else {
                return Ok(false);
            };
            self.termination.wait_for(&mut guard, slice);
        }
    }
}

fn permit_delta(old: usize, new: usize) -> isize {
    permit_count(new) as isize - permit_count(old) as isize
}

impl TaskOwner for PolicyInner {
    fn withdraw(&self, task_id: u64) -> bool {
        match self.queue.remove_first(&mut |t: &Arc<dyn QueuedTask>| t.id() == task_id) {
            Some(_) => {
                self.queue_permits.release(1);
                self.claim_withheld();
                self.signal_termination();
                trace!(executor = %self.id, task_id, "Task withdrawn from queue");
                true
            }
            None => false,
        }
    }

    fn task_started(&self, info: &TaskInfo) {
        let fired = {
            let mut slot = self.late_start_callback.lock();
            match slot.as_ref() {
                Some((max_delay, _)) if info.queued_for > *max_delay => slot.take(),
                _ => None,
            }
        };
        if let Some((max_delay, callback)) = fired {
            warn!(
                executor = %self.id,
                task_id = info.id,
                queued_ms = info.queued_for.as_millis(),
                max_delay_ms = max_delay.as_millis(),
                "Task started late"
            );
            callback(info, info.queued_for);
        }
    }

    fn emit(&self, event: TelemetryEvent) {
        self.telemetry.emit(event);
    }
}

// =============================================================================
// Policy Executor
// =============================================================================

/// A constrained view of the global pool.
///
/// Cloning yields another handle to the same executor.
#[derive(Clone)]
pub struct PolicyExecutor {
    pub(super) inner: Arc<PolicyInner>,
}

impl fmt::Debug for PolicyExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyExecutor")
            .field("id", &self.inner.id)
            .field("state", &self.inner.state.load())
            .finish()
    }
}

impl PolicyExecutor {
    /// Creates an executor with default limits and no telemetry.
    pub fn new(id: impl AsRef<str>, global: GlobalExecutor) -> Self {
        Self {
            inner: Arc::new(PolicyInner::new(
                id.as_ref(),
                global,
                PolicySettings::default(),
                Arc::new(NullTelemetrySink),
            )),
        }
    }

    pub fn with_settings(
        id: impl AsRef<str>,
        global: GlobalExecutor,
        settings: PolicySettings,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Result<Self, ExecutorError> {
        settings.validate()?;
        debug!(
            executor = id.as_ref(),
            core = settings.core_concurrency,
            max = settings.max_concurrency,
            queue = settings.max_queue_size,
            "Policy executor created"
        );
        Ok(Self {
            inner: Arc::new(PolicyInner::new(id.as_ref(), global, settings, telemetry)),
        })
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn state(&self) -> ExecutorState {
        self.inner.state.load()
    }

    pub fn settings(&self) -> PolicySettings {
        self.inner.settings()
    }

    pub fn global(&self) -> &GlobalExecutor {
        &self.inner.global
    }

    /// Number of queued tasks.
    pub fn queue_len(&self) -> usize {
        self.inner.queue.len()
    }

    /// Number of tasks running right now.
    pub fn running_count(&self) -> usize {
        self.inner.running.len()
    }

    /// Number of polling tasks holding a concurrency slot.
    pub fn dispatched_count(&self) -> usize {
        self.inner.dispatched.load(Ordering::SeqCst)
    }

    // -------------------------------------------------------------------------
    // Configuration
    // -------------------------------------------------------------------------

    pub fn core_concurrency(&self, core: usize) -> Result<&Self, ExecutorError> {
        self.inner.update_settings(|s| s.core_concurrency = core)?;
        Ok(self)
    }

    pub fn max_concurrency(&self, max: usize) -> Result<&Self, ExecutorError> {
        self.inner.update_settings(|s| s.max_concurrency = max)?;
        Ok(self)
    }

    pub fn max_queue_size(&self, size: usize) -> Result<&Self, ExecutorError> {
        self.inner.update_settings(|s| s.max_queue_size = size)?;
        Ok(self)
    }

    pub fn max_wait_for_enqueue(&self, wait: Duration) -> Result<&Self, ExecutorError> {
        self.inner.update_settings(|s| s.max_wait_for_enqueue = wait)?;
        Ok(self)
    }

    pub fn queue_full_action(&self, action: QueueFullAction) -> Result<&Self, ExecutorError> {
        self.inner.update_settings(|s| s.queue_full_action = action)?;
        Ok(self)
    }

    /// Sets the default start-by limit for tasks submitted from now on.
    pub fn start_timeout(&self, timeout: Option<Duration>) -> Result<&Self, ExecutorError> {
        self.inner.update_settings(|s| s.start_timeout = timeout)?;
        Ok(self)
    }

    pub fn max_policy(&self, policy: MaxPolicy) -> Result<&Self, ExecutorError> {
        self.inner.update_settings(|s| s.max_policy = policy)?;
        Ok(self)
    }

    /// Replaces every limit at once. Validation sees the final combination,
    /// so core and max may move in either order.
    pub fn apply_settings(&self, settings: &PolicySettings) -> Result<&Self, ExecutorError> {
        self.inner.update_settings(|s| *s = settings.clone())?;
        Ok(self)
    }

    /// Arms a one-shot callback for when fewer than `min_remaining` queue
    /// slots are free. Returns the callback it replaces, if that had not
    /// fired yet.
    pub fn register_queue_size_callback(
        &self,
        min_remaining: usize,
        callback: QueueSizeCallback,
    ) -> Option<QueueSizeCallback> {
        self.inner
            .queue_size_callback
            .lock()
            .replace((min_remaining, callback))
            .map(|(_, previous)| previous)
    }

    /// Arms a one-shot callback for the first task that starts more than
    /// `max_delay` after it was accepted.
    pub fn register_late_start_callback(
        &self,
        max_delay: Duration,
        callback: LateStartCallback,
    ) -> Option<LateStartCallback> {
        self.inner
            .late_start_callback
            .lock()
            .replace((max_delay, callback))
            .map(|(_, previous)| previous)
    }

    // -------------------------------------------------------------------------
    // Submission
    // -------------------------------------------------------------------------

    fn submit_work<T: Clone + Send + 'static>(
        &self,
        work: Work<T>,
        callback: Option<Arc<dyn PolicyTaskCallback>>,
    ) -> Result<Arc<TaskFuture<T>>, ExecutorError> {
        let task = self.inner.new_task(work, callback, None);
        self.inner.enqueue(Arc::clone(&task) as Arc<dyn QueuedTask>, 0)?;
        Ok(task)
    }

    /// Submits a closure whose return value becomes the task result.
    pub fn submit<T, F>(&self, f: F) -> Result<Arc<TaskFuture<T>>, ExecutorError>
    where
        T: Clone + Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.submit_work(Box::new(move || Ok(f())), None)
    }

    /// Submits a closure whose error becomes [`TaskError::Failed`].
    pub fn submit_fallible<T, E, F>(&self, f: F) -> Result<Arc<TaskFuture<T>>, ExecutorError>
    where
        T: Clone + Send + 'static,
        E: Into<Box<dyn StdError + Send + Sync>>,
        F: FnOnce() -> Result<T, E> + Send + 'static,
    {
        self.submit_work(fallible_work(f), None)
    }

    /// Like [`submit_fallible`](Self::submit_fallible) with life-cycle hooks.
    pub fn submit_with<T, E, F>(
        &self,
        f: F,
        callback: Arc<dyn PolicyTaskCallback>,
    ) -> Result<Arc<TaskFuture<T>>, ExecutorError>
    where
        T: Clone + Send + 'static,
        E: Into<Box<dyn StdError + Send + Sync>>,
        F: FnOnce() -> Result<T, E> + Send + 'static,
    {
        self.submit_work(fallible_work(f), Some(callback))
    }

    /// Submits fire-and-forget work.
    pub fn execute<F>(&self, f: F) -> Result<(), ExecutorError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(f).map(|_| ())
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    pub fn is_shutdown(&self) -> bool {
        self.state().is_shutdown()
    }

    pub fn is_terminated(&self) -> bool {
        self.state() == ExecutorState::Terminated
    }

    /// Stops accepting tasks. Queued tasks still run.
    pub fn shutdown(&self) {
        let inner = &self.inner;
        if inner.transition(ExecutorState::Active, ExecutorState::EnqueueStopping) {
            inner.transition(ExecutorState::EnqueueStopping, ExecutorState::EnqueueStopped);
            info!(
                executor = %inner.id,
                queued = inner.queue.len(),
                running = inner.running.len(),
                "Policy executor shutting down"
            );
        }
        inner.signal_termination();
    }

    /// Stops accepting tasks, cancels queued and running ones, and returns
    /// the tasks that never ran.
    pub fn shutdown_now(&self) -> Vec<Arc<dyn PolicyTask>> {
        self.shutdown();
        let inner = &self.inner;
        loop {
            match inner.state.load() {
                ExecutorState::EnqueueStopping => std::thread::yield_now(),
                ExecutorState::EnqueueStopped => {
                    if inner.transition(ExecutorState::EnqueueStopped, ExecutorState::TasksCanceling) {
                        break;
                    }
                }
                _ => return Vec::new(),
            }
        }

        let mut drained = Vec::new();
        inner.queue.drain_to(&mut drained, usize::MAX);
        for task in &drained {
            inner.queue_permits.release(1);
            inner.claim_withheld();
            task.cancel(false);
        }

        let running: Vec<Arc<dyn QueuedTask>> = inner
            .running
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for task in &running {
            task.cancel(true);
        }

        inner.transition(ExecutorState::TasksCanceling, ExecutorState::TasksCanceled);
        info!(
            executor = %inner.id,
            never_ran = drained.len(),
            interrupted = running.len(),
            "Policy executor shut down now"
        );
        inner.signal_termination();
        drained.into_iter().map(|t| t.into_policy_task()).collect()
    }

    /// Waits until the executor has shut down and every queued, dispatched
    /// and running task is gone, then marks it terminated.
    pub fn await_termination(&self, timeout: Duration) -> Result<bool, ExecutorError> {
        self.inner.await_termination(timeout)
    }
}

pub(super) fn fallible_work<T, E, F>(f: F) -> Work<T>
where
    T: Clone + Send + 'static,
    E: Into<Box<dyn StdError + Send + Sync>>,
    F: FnOnce() -> Result<T, E> + Send + 'static,
{
    Box::new(move || f().map_err(TaskError::failed))
}

impl Executor for PolicyExecutor {
    fn execute(&self, job: Job) -> Result<(), ExecutorError> {
        PolicyExecutor::execute(self, job)
    }

    fn submit_job(
        &self,
        job: Job,
        callback: Arc<dyn PolicyTaskCallback>,
    ) -> Result<Option<Arc<dyn PolicyTask>>, ExecutorError> {
        let task = self.submit_work(
            Box::new(move || -> Result<(), TaskError> {
                job();
                Ok(())
            }),
            Some(callback),
        )?;
        Ok(Some(task as Arc<dyn PolicyTask>))
    }

    fn name(&self) -> &str {
        self.id()
    }
}
