//! Result handle of a scheduled task.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::timer::TimerEntry;
use crate::sync::{CountDownLatch, InterruptFlag};
use crate::task::{PolicyTask, TaskError};

pub(super) struct ScheduledShared<T> {
    pub(super) id: u64,
    pub(super) periodic: bool,
    outcome: Mutex<Option<Result<T, TaskError>>>,
    done: CountDownLatch,
    cancelled: AtomicBool,
    entry: Mutex<Option<TimerEntry>>,
    next_fire: Mutex<Option<Instant>>,
    running: Mutex<Option<Arc<InterruptFlag>>>,
    /// Policy task carrying the latest run, if the target tracks one.
    dispatched: Mutex<Option<Arc<dyn PolicyTask>>>,
    runs: AtomicU64,
}

impl<T> ScheduledShared<T> {
    pub(super) fn new(id: u64, periodic: bool) -> Self {
        Self {
            id,
            periodic,
            outcome: Mutex::new(None),
            done: CountDownLatch::new(1),
            cancelled: AtomicBool::new(false),
            entry: Mutex::new(None),
            next_fire: Mutex::new(None),
            running: Mutex::new(None),
            dispatched: Mutex::new(None),
            runs: AtomicU64::new(0),
        }
    }

    pub(super) fn is_done(&self) -> bool {
        self.done.count() == 0
    }

    /// Records the first outcome; later ones are ignored.
    pub(super) fn complete(&self, outcome: Result<T, TaskError>) -> bool {
        match self.settle(outcome) {
            Some(dispatched) => {
                drop(dispatched);
                true
            }
            None => false,
        }
    }

    /// Completes as cancelled and cancels the dispatched policy task.
    pub(super) fn cancel(&self, interrupt: bool) -> bool {
        match self.settle(Err(TaskError::Cancelled)) {
            Some(dispatched) => {
                if let Some(task) = dispatched {
                    task.cancel(interrupt);
                }
                true
            }
            None => false,
        }
    }

    /// Stores the outcome if none is set yet and hands back the policy task
    /// of the latest run.
    fn settle(&self, outcome: Result<T, TaskError>) -> Option<Option<Arc<dyn PolicyTask>>> {
        let mut slot = self.outcome.lock();
        if slot.is_some() {
            return None;
        }
        *slot = Some(outcome);
        let dispatched = self.dispatched.lock().take();
        drop(slot);
        *self.next_fire.lock() = None;
        self.done.count_down();
        Some(dispatched)
    }

    /// Remembers the policy task a fire was handed to.
    pub(super) fn handed_off(&self, task: Arc<dyn PolicyTask>) {
        let slot = self.outcome.lock();
        if slot.is_some() {
            drop(slot);
            task.cancel(false);
            return;
        }
        let previous = self.dispatched.lock().replace(task);
        drop(slot);
        drop(previous);
    }

    pub(super) fn armed(&self, at: Instant, entry: TimerEntry) {
        *self.next_fire.lock() = Some(at);
        let previous = self.entry.lock().replace(entry);
        drop(previous);
        // Lost the race with cancel().
        if self.is_done() {
            if let Some(entry) = self.entry.lock().take() {
                entry.cancel();
            }
        }
    }

    pub(super) fn set_running(&self, flag: Option<Arc<InterruptFlag>>) {
        *self.running.lock() = flag;
    }

    pub(super) fn record_run(&self) {
        self.runs.fetch_add(1, Ordering::SeqCst);
    }
}

/// Handle to a delayed or periodic task.
///
/// One-shot tasks complete with the value of their body. Periodic tasks
/// only complete when cancelled or when a run fails.
pub struct ScheduledFuture<T> {
    pub(super) shared: Arc<ScheduledShared<T>>,
}

impl<T> Clone for ScheduledFuture<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for ScheduledFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledFuture")
            .field("id", &self.shared.id)
            .field("periodic", &self.shared.periodic)
            .field("done", &self.is_done())
            .field("runs", &self.runs())
            .finish()
    }
}

impl<T> ScheduledFuture<T> {
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn is_periodic(&self) -> bool {
        self.shared.periodic
    }

    pub fn is_done(&self) -> bool {
        self.shared.is_done()
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::SeqCst)
    }

    /// Completed runs of the body.
    pub fn runs(&self) -> u64 {
        self.shared.runs.load(Ordering::SeqCst)
    }

    /// Time until the next fire, zero if overdue, `None` once done.
    pub fn delay(&self) -> Option<Duration> {
        self.shared
            .next_fire
            .lock()
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Cancels future runs. A run already handed to a policy executor is
    /// cancelled there too. With `interrupt`, also raises the interrupt flag
    /// of a run in progress.
    ///
    /// Returns false if the task had already completed.
    pub fn cancel(&self, interrupt: bool) -> bool {
        if !self.shared.cancel(interrupt) {
            return false;
        }
        self.shared.cancelled.store(true, Ordering::SeqCst);
        if let Some(entry) = self.shared.entry.lock().take() {
            entry.cancel();
        }
        if interrupt {
            if let Some(flag) = self.shared.running.lock().as_ref() {
                flag.interrupt();
            }
        }
        true
    }
}

impl<T: Clone> ScheduledFuture<T> {
    pub fn get(&self) -> Result<T, TaskError> {
        self.wait(None)
    }

    pub fn get_timeout(&self, timeout: Duration) -> Result<T, TaskError> {
        self.wait(Some(timeout))
    }

    fn wait(&self, timeout: Option<Duration>) -> Result<T, TaskError> {
        if !self.shared.done.wait(timeout)? {
            return Err(TaskError::Timeout);
        }
        match self.shared.outcome.lock().as_ref() {
            Some(outcome) => outcome.clone(),
            None => Err(TaskError::Cancelled),
        }
    }
}
