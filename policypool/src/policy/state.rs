//! Policy executor life-cycle states.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Life-cycle of a policy executor. States only ever move forward.
///
/// ```text
/// Active ─► EnqueueStopping ─► EnqueueStopped ─► TasksCanceling ─► TasksCanceled
///                                    │                                   │
///                                    └──────────► Terminated ◄───────────┘
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ExecutorState {
    Active = 0,
    EnqueueStopping = 1,
    EnqueueStopped = 2,
    TasksCanceling = 3,
    TasksCanceled = 4,
    Terminated = 5,
}

impl ExecutorState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Active,
            1 => Self::EnqueueStopping,
            2 => Self::EnqueueStopped,
            3 => Self::TasksCanceling,
            4 => Self::TasksCanceled,
            _ => Self::Terminated,
        }
    }

    /// True once `shutdown` or `shutdown_now` has started.
    pub fn is_shutdown(&self) -> bool {
        *self != Self::Active
    }
}

impl fmt::Display for ExecutorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "Active"),
            Self::EnqueueStopping => write!(f, "EnqueueStopping"),
            Self::EnqueueStopped => write!(f, "EnqueueStopped"),
            Self::TasksCanceling => write!(f, "TasksCanceling"),
            Self::TasksCanceled => write!(f, "TasksCanceled"),
            Self::Terminated => write!(f, "Terminated"),
        }
    }
}

#[derive(Debug)]
pub(crate) struct AtomicExecutorState(AtomicU8);

impl AtomicExecutorState {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(ExecutorState::Active as u8))
    }

    pub(crate) fn load(&self) -> ExecutorState {
        ExecutorState::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub(crate) fn transition(&self, from: ExecutorState, to: ExecutorState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_states_are_ordered() {
        assert!(ExecutorState::Active < ExecutorState::EnqueueStopped);
        assert!(ExecutorState::TasksCanceled < ExecutorState::Terminated);
        assert!(!ExecutorState::Active.is_shutdown());
        assert!(ExecutorState::EnqueueStopping.is_shutdown());
    }

    #[test]
    fn test_transition_is_cas() {
        let state = AtomicExecutorState::new();
        assert!(!state.transition(ExecutorState::EnqueueStopping, ExecutorState::EnqueueStopped));
        assert!(state.transition(ExecutorState::Active, ExecutorState::EnqueueStopping));
        assert_eq!(state.load(), ExecutorState::EnqueueStopping);
    }
}
