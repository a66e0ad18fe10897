//! Delayed and periodic task execution.
//!
//! A single [`Timer`] thread keeps time for the whole runtime. The
//! [`ScheduledExecutor`] registers timer entries that, when due, hand the
//! task body to an [`Executor`](crate::executor::Executor) rather than
//! running it on the timer thread. The [`PoolController`](crate::controller::PoolController)
//! ticks on the same timer.

mod executor;
mod future;
mod timer;

pub use executor::ScheduledExecutor;
pub use future::ScheduledFuture;
pub use timer::{Timer, TimerCallback, TimerEntry};
