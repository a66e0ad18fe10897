//! Submitted tasks: state machine, outcome, callbacks.
//!
//! # Lifecycle
//!
//! A [`TaskFuture`] is created in `Presubmit`, moves to `Submitted` when the
//! executor accepts it, and to `Running` when a polling task picks it up.
//! Queued tasks can be aborted (shutdown, queue full, start timeout) or
//! cancelled; running tasks can only be cancelled, which leaves them in
//! `Cancelling` until the body returns.

mod callback;
mod error;
mod future;
mod latch;
mod state;

pub use callback::{PolicyTaskCallback, TaskInfo};
pub use error::{AbortReason, TaskError};
pub use future::{PolicyTask, TaskFuture};
pub use state::TaskState;

pub(crate) use future::{QueuedTask, TaskOwner, NewTask, Work};
pub(crate) use latch::InvokeAnyLatch;

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Allocates a process-wide unique task id.
pub(crate) fn next_task_id() -> u64 {
    NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed)
}
