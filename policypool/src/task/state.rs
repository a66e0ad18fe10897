//! Task states.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Life-cycle state of a submitted task.
///
/// ```text
/// Presubmit ─► Submitted ─► Running ─► Success | Failed
///     │            │           └─► Cancelling ─► Cancelled
///     └────────────┴─► Aborted | Cancelled
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TaskState {
    Presubmit = 0,
    Submitted = 1,
    Running = 2,
    Success = 3,
    Failed = 4,
    Aborted = 5,
    Cancelling = 6,
    Cancelled = 7,
}

impl TaskState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Presubmit,
            1 => Self::Submitted,
            2 => Self::Running,
            3 => Self::Success,
            4 => Self::Failed,
            5 => Self::Aborted,
            6 => Self::Cancelling,
            _ => Self::Cancelled,
        }
    }

    /// Not yet started.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Presubmit | Self::Submitted)
    }

    /// A result is available to waiters. `Cancelling` counts as done even
    /// though the task body may still be executing.
    pub fn is_done(&self) -> bool {
        !matches!(self, Self::Presubmit | Self::Submitted | Self::Running)
    }

    /// No further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Success | Self::Failed | Self::Aborted | Self::Cancelled
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Presubmit => write!(f, "Presubmit"),
            Self::Submitted => write!(f, "Submitted"),
            Self::Running => write!(f, "Running"),
            Self::Success => write!(f, "Success"),
            Self::Failed => write!(f, "Failed"),
            Self::Aborted => write!(f, "Aborted"),
            Self::Cancelling => write!(f, "Cancelling"),
            Self::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Atomic cell holding a [`TaskState`]. Changes only through CAS.
#[derive(Debug)]
pub(crate) struct AtomicTaskState(AtomicU8);

impl AtomicTaskState {
    pub(crate) fn new(state: TaskState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn load(&self) -> TaskState {
        TaskState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn transition(&self, from: TaskState, to: TaskState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
