//! Error types shared by the executors.

use std::fmt;

use thiserror::Error;

use crate::sync::Interrupted;

/// Why a submission was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    /// The executor no longer accepts work.
    Shutdown,
    /// No queue slot became free within the enqueue wait.
    QueueFull,
    /// The pool is at its thread limit and its queue refused the job.
    PoolSaturated,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shutdown => write!(f, "executor is shut down"),
            Self::QueueFull => write!(f, "queue is full"),
            Self::PoolSaturated => write!(f, "pool is saturated"),
        }
    }
}

/// Errors from submitting to or configuring an executor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutorError {
    #[error("task rejected: {0}")]
    Rejected(RejectReason),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("interrupted while waiting")]
    Interrupted,

    #[error("timed out")]
    Timeout,
}

impl ExecutorError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration(message.into())
    }

    pub(crate) fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState(message.into())
    }

    /// Returns true for any rejection.
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

impl From<Interrupted> for ExecutorError {
    fn from(_: Interrupted) -> Self {
        Self::Interrupted
    }
}
