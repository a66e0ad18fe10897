//! Per-task life-cycle callbacks.

use std::time::Duration;

use super::{TaskError, TaskState};

/// Snapshot of a task handed to callbacks and reports.
#[derive(Debug, Clone)]
pub struct TaskInfo {
    pub id: u64,
    pub name: String,
    pub state: TaskState,
    /// Executor the task was submitted to.
    pub executor: String,
    /// Time spent between acceptance and start (or now, if still queued).
    pub queued_for: Duration,
    /// Time spent running, if it started.
    pub ran_for: Option<Duration>,
}

/// Hooks invoked around a task's life cycle.
///
/// Every hook runs on whichever thread triggered the transition. Panics are
/// caught and logged.
pub trait PolicyTaskCallback: Send + Sync {
    /// Overrides the generated task name.
    fn name(&self) -> Option<String> {
        None
    }

    /// Overrides the executor's start timeout for this task.
    fn start_timeout(&self) -> Option<Duration> {
        None
    }

    /// Called once the task is accepted. `invoke_any_count` is the number of
    /// sibling tasks for `invoke_any`, zero otherwise.
    fn on_submit(&self, _task: &TaskInfo, _invoke_any_count: usize) {}

    fn on_start(&self, _task: &TaskInfo) {}

    /// Called when the task ends without being cancelled. `aborted` is true
    /// if it never ran.
    fn on_end(&self, _task: &TaskInfo, _aborted: bool, _failure: Option<&TaskError>) {}

    fn on_cancel(&self, _task: &TaskInfo, _while_running: bool) {}
}
