//! Policy executor limits and overflow behaviour.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ExecutorError;

// =============================================================================
// Policy Configuration Constants
// =============================================================================

/// Value meaning "no limit" for concurrency and queue size.
///
/// Permit counters are signed, so the practical ceiling is kept well below
/// `isize::MAX` to leave room for adjustments.
pub const UNBOUNDED: usize = i32::MAX as usize;

/// Default number of tasks that may be dispatched expedited.
pub const DEFAULT_CORE_CONCURRENCY: usize = 0;

/// Default maximum number of tasks running at once.
pub const DEFAULT_MAX_CONCURRENCY: usize = UNBOUNDED;

/// Default maximum number of queued tasks.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = UNBOUNDED;

/// Default time an enqueue waits for a free queue slot.
pub const DEFAULT_MAX_WAIT_FOR_ENQUEUE: Duration = Duration::ZERO;

/// Number of queued and running tasks listed in a report.
pub const REPORT_TASK_LIMIT: usize = 10;

// =============================================================================
// Queue Full Action
// =============================================================================

/// What happens when no queue slot frees up within the enqueue wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueFullAction {
    /// Reject the submission.
    #[default]
    Abort,
    /// Run the task on the submitting thread.
    CallerRuns,
}

impl fmt::Display for QueueFullAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Abort => write!(f, "abort"),
            Self::CallerRuns => write!(f, "caller_runs"),
        }
    }
}

impl FromStr for QueueFullAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "abort" => Ok(Self::Abort),
            "caller_runs" | "callerruns" => Ok(Self::CallerRuns),
            _ => Err("must be 'abort' or 'caller_runs'".to_string()),
        }
    }
}

// =============================================================================
// Max Policy
// =============================================================================

/// Whether `invoke_all`/`invoke_any` may borrow the calling thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MaxPolicy {
    /// The caller may run one of the tasks when a concurrency slot is free.
    #[default]
    Loose,
    /// Every task runs on the pool.
    Strict,
}

impl fmt::Display for MaxPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loose => write!(f, "loose"),
            Self::Strict => write!(f, "strict"),
        }
    }
}

impl FromStr for MaxPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "loose" => Ok(Self::Loose),
            "strict" => Ok(Self::Strict),
            _ => Err("must be 'loose' or 'strict'".to_string()),
        }
    }
}

// =============================================================================
// Policy Settings
// =============================================================================

/// Limits of one policy executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicySettings {
    /// Tasks dispatched while fewer than this many are running go to the
    /// front of the global queue.
    pub core_concurrency: usize,
    pub max_concurrency: usize,
    pub max_queue_size: usize,
    pub max_wait_for_enqueue: Duration,
    pub queue_full_action: QueueFullAction,
    /// Queued tasks not started within this time are aborted.
    pub start_timeout: Option<Duration>,
    pub max_policy: MaxPolicy,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            core_concurrency: DEFAULT_CORE_CONCURRENCY,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            max_wait_for_enqueue: DEFAULT_MAX_WAIT_FOR_ENQUEUE,
            queue_full_action: QueueFullAction::Abort,
            start_timeout: None,
            max_policy: MaxPolicy::Loose,
        }
    }
}

impl PolicySettings {
    pub fn validate(&self) -> Result<(), ExecutorError> {
        if self.max_concurrency == 0 {
            return Err(ExecutorError::invalid("max concurrency must be at least 1"));
        }
        if self.core_concurrency > self.max_concurrency {
            return Err(ExecutorError::invalid(format!(
                "core concurrency ({}) exceeds max concurrency ({})",
                self.core_concurrency, self.max_concurrency
            )));
        }
        if self.max_queue_size == 0 {
            return Err(ExecutorError::invalid("max queue size must be at least 1"));
        }
        Ok(())
    }
}

/// Clamps a configured limit to what a permit counter holds.
pub(crate) fn permit_count(limit: usize) -> usize {
    limit.min(UNBOUNDED)
}

/// Renders a limit, spelling out the unbounded value.
pub fn display_limit(limit: usize) -> String {
    if limit >= UNBOUNDED {
        "unbounded".to_string()
    } else {
        limit.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(PolicySettings::default().validate().is_ok());
    }

    #[test]
    fn test_core_above_max_rejected() {
        let settings = PolicySettings {
            core_concurrency: 3,
            max_concurrency: 2,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_parse_enums() {
        assert_eq!("CALLER_RUNS".parse::<QueueFullAction>(), Ok(QueueFullAction::CallerRuns));
        assert_eq!("strict".parse::<MaxPolicy>(), Ok(MaxPolicy::Strict));
        assert!("drop".parse::<QueueFullAction>().is_err());
    }

    #[test]
    fn test_display_limit() {
        assert_eq!(display_limit(UNBOUNDED), "unbounded");
        assert_eq!(display_limit(usize::MAX), "unbounded");
        assert_eq!(display_limit(8), "8");
        assert_eq!(permit_count(usize::MAX), UNBOUNDED);
    }
}
