//! Pool controller tuning.

use std::time::Duration;

use crate::error::ExecutorError;

// =============================================================================
// Controller Configuration Constants
// =============================================================================

/// Time between ticks while the pool is healthy.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(1500);

/// Time between ticks while resolving a hang.
pub const DEFAULT_HANG_INTERVAL: Duration = Duration::from_millis(500);

/// Threads added or removed per resize.
pub const DEFAULT_POOL_INCREMENT: usize = 1;

/// Neighbouring sizes compared on each side of the current size.
pub const DEFAULT_COMPARE_RANGE: usize = 2;

/// Threads hang resolution may add above `max_threads`.
pub const DEFAULT_HANG_BUFFER: usize = 32;

/// Minimum score for a move.
pub const DEFAULT_THRESHOLD: f64 = 0.5;

/// How much one direction must beat the other.
pub const DEFAULT_MARGIN: f64 = 0.1;

/// Consecutive holds before a forced move.
pub const DEFAULT_STAGNATION_LIMIT: u32 = 5;

/// Consecutive idle ticks before shrinking.
pub const DEFAULT_IDLE_TICKS_BEFORE_SHRINK: u32 = 3;

/// Ticks after which an unrefreshed size's statistics are dropped.
pub const DEFAULT_STALE_TICKS: u64 = 100;

/// CPU usage (0.0 - 1.0) at or above which growth is vetoed.
pub const DEFAULT_HIGH_CPU: f64 = 0.9;

/// Settings of a [`PoolController`](super::PoolController).
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    pub enabled: bool,
    pub min_threads: usize,
    pub max_threads: usize,
    pub interval: Duration,
    pub hang_interval: Duration,
    pub pool_increment: usize,
    pub compare_range: usize,
    pub hang_buffer: usize,
    pub threshold: f64,
    pub margin: f64,
    pub stagnation_limit: u32,
    pub idle_ticks_before_shrink: u32,
    pub stale_ticks: u64,
    pub high_cpu: f64,
    /// Seed for the anti-stagnation coin. `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_threads: 1,
            max_threads: crate::pool::DEFAULT_MAX_THREADS,
            interval: DEFAULT_INTERVAL,
            hang_interval: DEFAULT_HANG_INTERVAL,
            pool_increment: DEFAULT_POOL_INCREMENT,
            compare_range: DEFAULT_COMPARE_RANGE,
            hang_buffer: DEFAULT_HANG_BUFFER,
            threshold: DEFAULT_THRESHOLD,
            margin: DEFAULT_MARGIN,
            stagnation_limit: DEFAULT_STAGNATION_LIMIT,
            idle_ticks_before_shrink: DEFAULT_IDLE_TICKS_BEFORE_SHRINK,
            stale_ticks: DEFAULT_STALE_TICKS,
            high_cpu: DEFAULT_HIGH_CPU,
            seed: None,
        }
    }
}

impl ControllerConfig {
    pub fn with_bounds(mut self, min_threads: usize, max_threads: usize) -> Self {
        self.min_threads = min_threads;
        self.max_threads = max_threads;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Largest size the controller may ever set.
    pub fn hard_cap(&self) -> usize {
        self.max_threads.saturating_add(self.hang_buffer)
    }

    pub fn validate(&self) -> Result<(), ExecutorError> {
        if self.min_threads == 0 {
            return Err(ExecutorError::invalid("controller min_threads must be at least 1"));
        }
        if self.min_threads > self.max_threads {
            return Err(ExecutorError::invalid(format!(
                "controller min_threads ({}) exceeds max_threads ({})",
                self.min_threads, self.max_threads
            )));
        }
        if self.pool_increment == 0 || self.compare_range == 0 {
            return Err(ExecutorError::invalid(
                "controller pool_increment and compare_range must be at least 1",
            ));
        }
        if self.interval.is_zero() || self.hang_interval.is_zero() {
            return Err(ExecutorError::invalid("controller intervals must be non-zero"));
        }
        if !(0.0..=1.0).contains(&self.threshold) || !(0.0..=1.0).contains(&self.high_cpu) {
            return Err(ExecutorError::invalid(
                "controller threshold and high_cpu must be within 0.0..=1.0",
            ));
        }
        Ok(())
    }
}
