//! The per-submission task future.
//!
//! A [`TaskFuture`] owns the work closure until it runs, the outcome once it
//! finishes, and the state machine in between. Transitions happen only by CAS
//! on the state cell. Every transition that publishes an outcome writes the
//! outcome slot first, under the slot's lock, so a waiter that observes a
//! done state always finds the matching outcome.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;
use tracing::trace;

use super::callback::{PolicyTaskCallback, TaskInfo};
use super::latch::InvokeAnyLatch;
use super::state::{AtomicTaskState, TaskState};
use super::{AbortReason, TaskError};
use crate::panic::{contain, panic_message, PanicError};
use crate::queue::Expedite;
use crate::sync::interrupt::{self, InterruptFlag};
use crate::telemetry::TelemetryEvent;

pub(crate) type Work<T> = Box<dyn FnOnce() -> Result<T, TaskError> + Send>;

// =============================================================================
// Owner hooks
// =============================================================================

/// Services a future needs from the executor it was submitted to.
pub(crate) trait TaskOwner: Send + Sync {
    /// Takes a still-queued task back out of the queue, freeing its slot.
    ///
    /// Returns false if a polling task already dequeued it.
    fn withdraw(&self, task_id: u64) -> bool;

    fn task_started(&self, info: &TaskInfo);

    fn emit(&self, event: TelemetryEvent);
}

/// Owner of futures created outside any policy executor.
pub(crate) struct Detached;

impl TaskOwner for Detached {
    fn withdraw(&self, _task_id: u64) -> bool {
        false
    }

    fn task_started(&self, _info: &TaskInfo) {}

    fn emit(&self, _event: TelemetryEvent) {}
}

// =============================================================================
// Type-erased views
// =============================================================================

/// Result-independent view of a submitted task.
pub trait PolicyTask: Send + Sync {
    fn id(&self) -> u64;

    fn name(&self) -> &str;

    fn state(&self) -> TaskState;

    fn info(&self) -> TaskInfo;

    /// Cancels the task. See [`TaskFuture::cancel`].
    fn cancel(&self, interrupt: bool) -> bool;
}

/// What an executor needs to drive a queued task.
pub(crate) trait QueuedTask: PolicyTask + Expedite {
    fn accept(&self, invoke_any_count: usize) -> bool;

    fn run(&self);

    fn abort(&self, reason: AbortReason) -> bool;

    fn into_policy_task(self: Arc<Self>) -> Arc<dyn PolicyTask>;
}

// =============================================================================
// Task Future
// =============================================================================

/// Handle to one submitted unit of work.
///
/// Results are cloned out to every caller of [`get`](Self::get), so `T`
/// must be `Clone`; wrap large or unique results in an `Arc`.
pub struct TaskFuture<T> {
    id: u64,
    name: String,
    executor: Arc<str>,
    state: AtomicTaskState,
    outcome: Mutex<Option<Result<T, TaskError>>>,
    done: Condvar,
    notify: Notify,
    work: Mutex<Option<Work<T>>>,
    callback: Option<Arc<dyn PolicyTaskCallback>>,
    owner: Weak<dyn TaskOwner>,
    latch: Option<Arc<InvokeAnyLatch<T>>>,
    runner: Mutex<Option<Arc<InterruptFlag>>>,
    created_at: Instant,
    accepted_at: OnceLock<Instant>,
    started_at: OnceLock<Instant>,
    ended_at: OnceLock<Instant>,
    start_timeout: Option<Duration>,
}

impl<T> std::fmt::Debug for TaskFuture<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskFuture")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state.load())
            .finish()
    }
}

pub(crate) struct NewTask<T> {
    pub id: u64,
    pub executor: Arc<str>,
    pub owner: Weak<dyn TaskOwner>,
    pub work: Work<T>,
    pub callback: Option<Arc<dyn PolicyTaskCallback>>,
    pub latch: Option<Arc<InvokeAnyLatch<T>>>,
    pub start_timeout: Option<Duration>,
}

impl<T: Clone + Send + 'static> TaskFuture<T> {
    pub(crate) fn new(task: NewTask<T>) -> Arc<Self> {
        let name = task
            .callback
            .as_ref()
            .and_then(|cb| cb.name())
            .unwrap_or_else(|| format!("{}-task-{}", task.executor, task.id));
        let start_timeout = task
            .callback
            .as_ref()
            .and_then(|cb| cb.start_timeout())
            .or(task.start_timeout);
        Arc::new(Self {
            id: task.id,
            name,
            executor: task.executor,
            state: AtomicTaskState::new(TaskState::Presubmit),
            outcome: Mutex::new(None),
            done: Condvar::new(),
            notify: Notify::new(),
            work: Mutex::new(Some(task.work)),
            callback: task.callback,
            owner: task.owner,
            latch: task.latch,
            runner: Mutex::new(None),
            created_at: Instant::now(),
            accepted_at: OnceLock::new(),
            started_at: OnceLock::new(),
            ended_at: OnceLock::new(),
            start_timeout,
        })
    }

    /// Creates a future that belongs to no policy executor.
    pub(crate) fn detached(id: u64, executor: Arc<str>, work: Work<T>) -> Arc<Self> {
        let owner: Weak<dyn TaskOwner> = Weak::<Detached>::new();
        Self::new(NewTask {
            id,
            executor,
            owner,
            work,
            callback: None,
            latch: None,
            start_timeout: None,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> TaskState {
        self.state.load()
    }

    pub fn is_done(&self) -> bool {
        self.state().is_done()
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.state(), TaskState::Cancelling | TaskState::Cancelled)
    }

    /// When the future was created.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    fn owner(&self) -> Option<Arc<dyn TaskOwner>> {
        self.owner.upgrade()
    }

    fn emit(&self, event: TelemetryEvent) {
        if let Some(owner) = self.owner() {
            contain("telemetry", || owner.emit(event));
        }
    }

    fn with_callback(&self, hook: &'static str, f: impl FnOnce(&dyn PolicyTaskCallback)) {
        if let Some(callback) = self.callback.as_deref() {
            contain(hook, || f(callback));
        }
    }

    // -------------------------------------------------------------------------
    // Transitions driven by the executor
    // -------------------------------------------------------------------------

    /// Presubmit → Submitted. Records the acceptance time and notifies the
    /// callback.
    pub(crate) fn accept(&self, invoke_any_count: usize) -> bool {
        if !self.state.transition(TaskState::Presubmit, TaskState::Submitted) {
            return false;
        }
        let _ = self.accepted_at.set(Instant::now());
        let info = self.info();
        self.with_callback("on_submit", |cb| cb.on_submit(&info, invoke_any_count));
        self.emit(TelemetryEvent::TaskSubmitted {
            executor: Arc::clone(&self.executor),
            task_id: self.id,
            task_name: self.name.clone(),
        });
        true
    }

    fn start_deadline_passed(&self) -> bool {
        if self.state() != TaskState::Submitted {
            return false;
        }
        match (self.start_timeout, self.accepted_at.get()) {
            (Some(limit), Some(accepted)) => accepted.elapsed() > limit,
            _ => false,
        }
    }

    /// Runs the task on the calling thread if it is still submitted.
    pub(crate) fn run_now(&self) {
        if self.start_deadline_passed() {
            self.abort(AbortReason::StartTimeout);
            return;
        }

        *self.runner.lock() = Some(interrupt::current());
        if !self.state.transition(TaskState::Submitted, TaskState::Running) {
            self.runner.lock().take();
            trace!(task_id = self.id, state = %self.state(), "Skipping task that is no longer queued");
            return;
        }

        let _ = self.started_at.set(Instant::now());
        let info = self.info();
        if let Some(owner) = self.owner() {
            contain("task_started", || owner.task_started(&info));
        }
        self.with_callback("on_start", |cb| cb.on_start(&info));
        self.emit(TelemetryEvent::TaskStarted {
            executor: Arc::clone(&self.executor),
            task_id: self.id,
            queued_for: info.queued_for,
        });

        let work = self.work.lock().take();
        let result = match work {
            Some(work) => panic::catch_unwind(AssertUnwindSafe(work)).unwrap_or_else(|payload| {
                Err(TaskError::Failed(Arc::new(PanicError {
                    message: panic_message(payload.as_ref()),
                })))
            }),
            None => Err(TaskError::Cancelled),
        };

        self.runner.lock().take();
        self.complete(result);
    }

    fn complete(&self, result: Result<T, TaskError>) {
        let mut slot = self.outcome.lock();
        let finished = match self.state() {
            TaskState::Running => {
                let to = if result.is_ok() {
                    TaskState::Success
                } else {
                    TaskState::Failed
                };
                *slot = Some(result);
                self.state.transition(TaskState::Running, to);
                to
            }
            TaskState::Cancelling => {
                self.state
                    .transition(TaskState::Cancelling, TaskState::Cancelled);
                TaskState::Cancelled
            }
            other => other,
        };
        let _ = self.ended_at.set(Instant::now());
        let published = slot.clone();
        drop(slot);
        self.wake_waiters();

        if finished == TaskState::Cancelled {
            return;
        }
        if let (Some(latch), Some(outcome)) = (&self.latch, &published) {
            latch.record(outcome);
        }
        let info = self.info();
        let failure = published.as_ref().and_then(|o| o.as_ref().err());
        self.with_callback("on_end", |cb| cb.on_end(&info, false, failure));
        self.emit(TelemetryEvent::TaskCompleted {
            executor: Arc::clone(&self.executor),
            task_id: self.id,
            success: finished == TaskState::Success,
            duration: info.ran_for.unwrap_or_default(),
        });
    }

    fn wake_waiters(&self) {
        self.done.notify_all();
        self.notify.notify_waiters();
    }

    /// Publishes `outcome` and moves a pending task to `to`.
    ///
    /// Returns the state the task was pending in.
    fn finish_pending(&self, outcome: TaskError, to: TaskState) -> Option<TaskState> {
        let mut slot = self.outcome.lock();
        loop {
            let from = self.state();
            if !from.is_pending() {
                return None;
            }
            *slot = Some(Err(outcome.clone()));
            if self.state.transition(from, to) {
                let _ = self.ended_at.set(Instant::now());
                drop(slot);
                self.wake_waiters();
                return Some(from);
            }
            *slot = None;
        }
    }

    /// Aborts a task that has not started yet.
    pub(crate) fn abort(&self, reason: AbortReason) -> bool {
        let error = TaskError::Aborted(reason);
        if self.finish_pending(error.clone(), TaskState::Aborted).is_none() {
            return false;
        }
        if let Some(latch) = &self.latch {
            latch.record(&Err(error.clone()));
        }
        let info = self.info();
        self.with_callback("on_end", |cb| cb.on_end(&info, true, Some(&error)));
        self.emit(TelemetryEvent::TaskAborted {
            executor: Arc::clone(&self.executor),
            task_id: self.id,
            reason,
        });
        true
    }

    fn abort_queued(&self, reason: AbortReason) {
        if self.abort(reason) {
            if let Some(owner) = self.owner() {
                owner.withdraw(self.id);
            }
        }
    }

    fn cancelled(&self, while_running: bool) {
        if let Some(latch) = &self.latch {
            latch.record(&Err(TaskError::Cancelled));
        }
        let info = self.info();
        self.with_callback("on_cancel", |cb| cb.on_cancel(&info, while_running));
        self.emit(TelemetryEvent::TaskCancelled {
            executor: Arc::clone(&self.executor),
            task_id: self.id,
            while_running,
        });
    }

    // -------------------------------------------------------------------------
    // Public API
    // -------------------------------------------------------------------------

    /// Cancels the task.
    ///
    /// A queued task is taken out of its executor's queue and never runs. A
    /// running task moves to `Cancelling`; with `interrupt` the thread running
    /// it has its interrupt flag raised, otherwise the task body has to
    /// notice on its own. Returns false if the task had already finished or
    /// been cancelled.
    pub fn cancel(&self, interrupt: bool) -> bool {
        if let Some(from) = self.finish_pending(TaskError::Cancelled, TaskState::Cancelled) {
            if from == TaskState::Submitted {
                if let Some(owner) = self.owner() {
                    owner.withdraw(self.id);
                }
            }
            self.cancelled(false);
            return true;
        }

        {
            let mut slot = self.outcome.lock();
            if self.state() != TaskState::Running {
                return false;
            }
            *slot = Some(Err(TaskError::Cancelled));
            if !self.state.transition(TaskState::Running, TaskState::Cancelling) {
                *slot = None;
                return false;
            }
        }
        self.wake_waiters();
        if interrupt {
            if let Some(runner) = self.runner.lock().as_ref() {
                runner.interrupt();
            }
        }
        self.cancelled(true);
        true
    }

    fn published(&self) -> Result<T, TaskError> {
        self.outcome
            .lock()
            .clone()
            .unwrap_or(Err(TaskError::Cancelled))
    }

    fn wait_done(&self, deadline: Option<Instant>) -> Result<(), TaskError> {
        let mut slot = self.outcome.lock();
        loop {
            if self.state().is_done() {
                return Ok(());
            }
            if self.start_deadline_passed() {
                drop(slot);
                self.abort_queued(AbortReason::StartTimeout);
                slot = self.outcome.lock();
                continue;
            }
            interrupt::check()?;
            let Some(slice) = interrupt::next_slice(deadline) else {
                return Err(TaskError::Timeout);
            };
            self.done.wait_for(&mut slot, slice);
        }
    }

    /// Blocks until the task is done and returns its outcome.
    pub fn get(&self) -> Result<T, TaskError> {
        self.wait_done(None)?;
        self.published()
    }

    /// Like [`get`](Self::get) but gives up with [`TaskError::Timeout`].
    pub fn get_timeout(&self, timeout: Duration) -> Result<T, TaskError> {
        self.wait_done(Instant::now().checked_add(timeout))?;
        self.published()
    }

    /// Waits for the outcome from async code.
    pub async fn wait_async(&self) -> Result<T, TaskError> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.state().is_done() {
                return self.published();
            }
            if self.start_deadline_passed() {
                self.abort_queued(AbortReason::StartTimeout);
                continue;
            }
            let start_wait = match (self.start_timeout, self.accepted_at.get()) {
                (Some(limit), Some(accepted)) if self.state() == TaskState::Submitted => {
                    Some((*accepted + limit).saturating_duration_since(Instant::now()))
                }
                _ => None,
            };
            match start_wait {
                Some(remaining) => {
                    let _ = tokio::time::timeout(remaining, notified).await;
                }
                None => notified.await,
            }
        }
    }

    pub fn info(&self) -> TaskInfo {
        let now = Instant::now();
        let accepted = self.accepted_at.get().copied().unwrap_or(self.created_at);
        let started = self.started_at.get().copied();
        let queued_for = started.unwrap_or(now).saturating_duration_since(accepted);
        let ran_for = started.map(|s| {
            self.ended_at
                .get()
                .copied()
                .unwrap_or(now)
                .saturating_duration_since(s)
        });
        TaskInfo {
            id: self.id,
            name: self.name.clone(),
            state: self.state(),
            executor: self.executor.to_string(),
            queued_for,
            ran_for,
        }
    }
}

impl<T> Expedite for TaskFuture<T> {}

impl<T: Clone + Send + 'static> PolicyTask for TaskFuture<T> {
    fn id(&self) -> u64 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> TaskState {
        self.state.load()
    }

    fn info(&self) -> TaskInfo {
        TaskFuture::info(self)
    }

    fn cancel(&self, interrupt: bool) -> bool {
        TaskFuture::cancel(self, interrupt)
    }
}

impl<T: Clone + Send + 'static> QueuedTask for TaskFuture<T> {
    fn accept(&self, invoke_any_count: usize) -> bool {
        TaskFuture::accept(self, invoke_any_count)
    }

    fn run(&self) {
        self.run_now();
    }

    fn abort(&self, reason: AbortReason) -> bool {
        TaskFuture::abort(self, reason)
    }

    fn into_policy_task(self: Arc<Self>) -> Arc<dyn PolicyTask> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::InvokeAnyLatch;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn future<T: Clone + Send + 'static>(
        work: impl FnOnce() -> Result<T, TaskError> + Send + 'static,
    ) -> Arc<TaskFuture<T>> {
        TaskFuture::detached(1, Arc::from("test"), Box::new(work))
    }

    #[test]
    fn test_success_path() {
        let task = future(|| Ok(41 + 1));
        assert!(task.accept(0));
        task.run_now();
        assert_eq!(task.state(), TaskState::Success);
        assert_eq!(task.get().unwrap(), 42);
        assert!(task.info().ran_for.is_some());
    }

    #[test]
    fn test_panic_becomes_failure() {
        let task: Arc<TaskFuture<u8>> = future(|| panic!("exploded"));
        task.accept(0);
        task.run_now();
        assert_eq!(task.state(), TaskState::Failed);
        let error = task.get().unwrap_err();
        assert!(error.to_string().contains("exploded"));
    }

    #[test]
    fn test_cancel_queued_never_runs() {
        let ran = Arc::new(AtomicUsize::new(0));
        let task = {
            let ran = Arc::clone(&ran);
            future(move || {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        };
        task.accept(0);
        assert!(task.cancel(false));
        assert!(!task.cancel(false));
        task.run_now();
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert!(matches!(task.get(), Err(TaskError::Cancelled)));
    }

    #[test]
    fn test_cancel_running_with_interrupt() {
        let task = future(|| {
            interrupt::sleep(Duration::from_secs(10)).map_err(TaskError::from)?;
            Ok(())
        });
        task.accept(0);
        let runner = {
            let task = Arc::clone(&task);
            std::thread::spawn(move || task.run_now())
        };
        while task.state() != TaskState::Running {
            std::thread::yield_now();
        }
        assert!(task.cancel(true));
        assert_eq!(task.state(), TaskState::Cancelling);
        assert!(matches!(task.get(), Err(TaskError::Cancelled)));
        runner.join().unwrap();
        assert_eq!(task.state(), TaskState::Cancelled);
    }

    #[test]
    fn test_get_timeout_leaves_task_alone() {
        let task: Arc<TaskFuture<()>> = future(|| Ok(()));
        task.accept(0);
        assert!(matches!(
            task.get_timeout(Duration::from_millis(10)),
            Err(TaskError::Timeout)
        ));
        assert_eq!(task.state(), TaskState::Submitted);
    }

    #[test]
    fn test_start_timeout_aborts_waiting_task() {
        let owner: Weak<dyn TaskOwner> = Weak::<Detached>::new();
        let task = TaskFuture::new(NewTask {
            id: 9,
            executor: Arc::from("test"),
            owner,
            work: Box::new(|| Ok(1u8)),
            callback: None,
            latch: None,
            start_timeout: Some(Duration::from_millis(5)),
        });
        task.accept(0);
        let outcome = task.get_timeout(Duration::from_secs(2));
        assert!(matches!(
            outcome,
            Err(TaskError::Aborted(AbortReason::StartTimeout))
        ));
    }

    #[test]
    fn test_latch_records_success() {
        let latch = Arc::new(InvokeAnyLatch::new(1));
        let owner: Weak<dyn TaskOwner> = Weak::<Detached>::new();
        let task = TaskFuture::new(NewTask {
            id: 3,
            executor: Arc::from("test"),
            owner,
            work: Box::new(|| Ok("done".to_string())),
            callback: None,
            latch: Some(Arc::clone(&latch)),
            start_timeout: None,
        });
        task.accept(1);
        task.run_now();
        assert_eq!(latch.wait(Some(Duration::ZERO)).unwrap(), "done");
    }

    #[tokio::test]
    async fn test_wait_async_resolves() {
        let task = future(|| Ok(5u32));
        task.accept(0);
        let runner = {
            let task = Arc::clone(&task);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(10));
                task.run_now();
            })
        };
        assert_eq!(task.wait_async().await.unwrap(), 5);
        runner.join().unwrap();
    }
}
