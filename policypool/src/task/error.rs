//! Task outcome errors.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::error::{ExecutorError, RejectReason};
use crate::sync::Interrupted;

/// Why a task was aborted before it could run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AbortReason {
    /// The executor was shut down while the task was queued.
    Shutdown,
    /// The queue stayed full past the enqueue wait.
    QueueFull,
    /// The task was still queued when its start-by deadline passed.
    StartTimeout,
    /// The underlying pool refused the dispatch.
    Rejected,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shutdown => write!(f, "executor shut down"),
            Self::QueueFull => write!(f, "queue full"),
            Self::StartTimeout => write!(f, "start timeout elapsed"),
            Self::Rejected => write!(f, "dispatch rejected"),
        }
    }
}

/// Why a task produced no value.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    /// The task body returned an error or panicked.
    #[error("task failed: {0}")]
    Failed(Arc<dyn StdError + Send + Sync>),

    #[error("task aborted: {0}")]
    Aborted(AbortReason),

    #[error("task cancelled")]
    Cancelled,

    /// The caller's wait timed out. The task itself is unaffected.
    #[error("timed out waiting for task")]
    Timeout,

    /// The caller's wait was interrupted. The task itself is unaffected.
    #[error("interrupted while waiting for task")]
    Interrupted,
}

impl TaskError {
    /// Wraps any error as a task failure.
    pub fn failed(error: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self::Failed(Arc::from(error.into()))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Ranking used when several tasks fail together: a real failure beats
    /// an abort, which beats a cancellation.
    pub(crate) fn severity(&self) -> u8 {
        match self {
            Self::Failed(_) => 3,
            Self::Aborted(_) => 2,
            Self::Cancelled => 1,
            Self::Timeout | Self::Interrupted => 0,
        }
    }
}

impl From<Interrupted> for TaskError {
    fn from(_: Interrupted) -> Self {
        Self::Interrupted
    }
}

impl From<ExecutorError> for TaskError {
    fn from(error: ExecutorError) -> Self {
        match error {
            ExecutorError::Rejected(RejectReason::Shutdown) => Self::Aborted(AbortReason::Shutdown),
            ExecutorError::Rejected(RejectReason::QueueFull) => {
                Self::Aborted(AbortReason::QueueFull)
            }
            ExecutorError::Rejected(RejectReason::PoolSaturated)
            | ExecutorError::InvalidConfiguration(_)
            | ExecutorError::IllegalState(_) => Self::Aborted(AbortReason::Rejected),
            ExecutorError::Interrupted => Self::Interrupted,
            ExecutorError::Timeout => Self::Timeout,
        }
    }
}
