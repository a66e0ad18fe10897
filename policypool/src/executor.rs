//! The dispatch seam shared by every executor.

use std::sync::Arc;

use crate::error::ExecutorError;
use crate::task::{PolicyTask, PolicyTaskCallback};

/// A unit of fire-and-forget work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Something that runs jobs.
///
/// Implemented by [`GlobalExecutor`](crate::pool::GlobalExecutor) and
/// [`PolicyExecutor`](crate::policy::PolicyExecutor); the scheduled executor
/// dispatches into any of them.
pub trait Executor: Send + Sync {
    fn execute(&self, job: Job) -> Result<(), ExecutorError>;

    /// Dispatches `job` as a tracked task.
    ///
    /// Executors that queue jobs as tasks report the task's life cycle to
    /// `callback` and return its handle. The default runs
    /// [`execute`](Self::execute) and tracks nothing.
    fn submit_job(
        &self,
        job: Job,
        _callback: Arc<dyn PolicyTaskCallback>,
    ) -> Result<Option<Arc<dyn PolicyTask>>, ExecutorError> {
        self.execute(job).map(|_| None)
    }

    /// Name used in logs and reports.
    fn name(&self) -> &str;
}
