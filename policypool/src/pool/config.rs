//! Global pool configuration.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ExecutorError;

// =============================================================================
// Pool Configuration Constants
// =============================================================================

/// Default pool name, used as the worker thread name prefix.
pub const DEFAULT_POOL_NAME: &str = "global";

/// Default number of threads kept alive while idle.
pub const DEFAULT_CORE_THREADS: usize = 4;

/// Default upper bound on worker threads.
pub const DEFAULT_MAX_THREADS: usize = 64;

/// Default time an idle non-core worker waits for work before exiting.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);

/// How long an idle worker parks on the queue per iteration.
pub(crate) const WORKER_POLL_SLICE: Duration = Duration::from_millis(50);

// =============================================================================
// Queue Kind
// =============================================================================

/// Which queue backs the global pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueKind {
    /// Lock-free linked-list queue.
    #[default]
    Unbounded,
    /// Ring buffer holding at most this many normal (and as many expedited)
    /// jobs.
    Bounded(usize),
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unbounded => write!(f, "unbounded"),
            Self::Bounded(capacity) => write!(f, "bounded:{}", capacity),
        }
    }
}

impl FromStr for QueueKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        if s == "unbounded" {
            return Ok(Self::Unbounded);
        }
        match s.strip_prefix("bounded:") {
            Some(capacity) => match capacity.trim().parse::<usize>() {
                Ok(capacity) if capacity > 0 => Ok(Self::Bounded(capacity)),
                _ => Err(format!("invalid bounded capacity '{}'", capacity)),
            },
            None => Err("must be 'unbounded' or 'bounded:<capacity>'".to_string()),
        }
    }
}

// =============================================================================
// Pool Configuration
// =============================================================================

/// Configuration for [`GlobalExecutor`](super::GlobalExecutor).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub name: String,
    pub core_threads: usize,
    pub max_threads: usize,
    pub keep_alive: Duration,
    pub queue: QueueKind,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_POOL_NAME.to_string(),
            core_threads: DEFAULT_CORE_THREADS,
            max_threads: DEFAULT_MAX_THREADS,
            keep_alive: DEFAULT_KEEP_ALIVE,
            queue: QueueKind::Unbounded,
        }
    }
}

impl PoolConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_threads(mut self, core: usize, max: usize) -> Self {
        self.core_threads = core;
        self.max_threads = max;
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn with_queue(mut self, queue: QueueKind) -> Self {
        self.queue = queue;
        self
    }

    pub fn validate(&self) -> Result<(), ExecutorError> {
        validate_bounds(self.core_threads, self.max_threads)
    }
}

pub(crate) fn validate_bounds(core: usize, max: usize) -> Result<(), ExecutorError> {
    if max == 0 {
        return Err(ExecutorError::invalid("max threads must be at least 1"));
    }
    if core > max {
        return Err(ExecutorError::invalid(format!(
            "core threads ({}) exceed max threads ({})",
            core, max
        )));
    }
    Ok(())
}
