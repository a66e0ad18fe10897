//! Adaptive sizing of the global pool.
//!
//! The [`PoolController`] samples a [`ControlledPool`] once per tick, keeps
//! a throughput distribution per pool size, and moves the size one step
//! towards whichever neighbour is more likely to do better. It also breaks
//! hangs by growing past `max_threads`, shrinks idle pools, and forces an
//! occasional move when it has held still for too long.

mod config;
mod cpu;
mod distribution;
mod hang;
mod pool_controller;

pub use config::{
    ControllerConfig, DEFAULT_COMPARE_RANGE, DEFAULT_HANG_BUFFER, DEFAULT_HANG_INTERVAL,
    DEFAULT_HIGH_CPU, DEFAULT_IDLE_TICKS_BEFORE_SHRINK, DEFAULT_INTERVAL, DEFAULT_MARGIN,
    DEFAULT_POOL_INCREMENT, DEFAULT_STAGNATION_LIMIT, DEFAULT_STALE_TICKS, DEFAULT_THRESHOLD,
};
pub use cpu::{CpuSampler, NoCpuSampler, ProcStatSampler};
pub use distribution::{ThroughputDistribution, EWMA_ALPHA};
pub use pool_controller::{ControllerStats, PoolController, SizeStats};

use std::fmt;

use crate::error::ExecutorError;

/// The pool surface the controller drives.
pub trait ControlledPool: Send + Sync {
    fn pool_size(&self) -> usize;

    /// Sets both the minimum and maximum number of threads.
    fn set_pool_size(&self, size: usize) -> Result<(), ExecutorError>;

    /// Total tasks completed since the pool started.
    fn completed_task_count(&self) -> u64;

    fn queue_depth(&self) -> usize;

    /// Threads running a task right now.
    fn active_count(&self) -> usize;

    fn name(&self) -> &str;
}

/// Why the controller changed the pool size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResizeReason {
    /// A neighbouring size is expected to do better.
    Throughput,
    /// Forced move after holding still too long.
    Stagnation,
    /// Growing to break a hang, or returning under max_threads after one.
    Hang,
    /// Shrinking an idle pool.
    Idle,
    /// Bounds changed by configuration.
    Configuration,
}

impl fmt::Display for ResizeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Throughput => write!(f, "throughput"),
            Self::Stagnation => write!(f, "stagnation"),
            Self::Hang => write!(f, "hang"),
            Self::Idle => write!(f, "idle"),
            Self::Configuration => write!(f, "configuration"),
        }
    }
}
