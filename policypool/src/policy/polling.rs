//! The job a policy executor posts to the global pool.

use std::sync::Arc;

use tracing::trace;

use super::executor::PolicyInner;
use crate::executor::Job;
use crate::queue::ExpeditedQueue;

/// Borrows one pool thread to run at most one queued task.
///
/// Owns one max-concurrency permit (and one core permit when expedited)
/// plus one withheld claim. Dropping it, run or not, gives them back.
pub(super) struct PollingTask {
    inner: Arc<PolicyInner>,
    expedited: bool,
    ran: bool,
}

impl PollingTask {
    pub(super) fn new(inner: Arc<PolicyInner>, expedited: bool) -> Self {
        Self {
            inner,
            expedited,
            ran: false,
        }
    }

    pub(super) fn into_job(self) -> Job {
        Box::new(move || self.run())
    }

    fn run(mut self) {
        self.ran = true;
        match self.inner.queue.poll() {
            Some(task) => {
                self.inner.queue_permits.release(1);
                self.inner.run_tracked(task);
            }
            None => {
                trace!(executor = %self.inner.id, "Polling task found the queue empty");
            }
        }
    }
}

impl Drop for PollingTask {
    fn drop(&mut self) {
        self.inner.finish_polling(self.expedited, self.ran);
    }
}
