//! Policy executors: bounded views of the global pool.
//!
//! Each [`PolicyExecutor`] enforces its own concurrency ceiling, queue depth
//! and overflow behaviour while sharing the threads of one
//! [`GlobalExecutor`](crate::pool::GlobalExecutor) with every other policy
//! executor.
//!
//! # Example
//!
//! ```no_run
//! use policypool::policy::PolicyExecutor;
//! use policypool::pool::{GlobalExecutor, PoolConfig};
//!
//! let global = GlobalExecutor::new(PoolConfig::default())?;
//! let io = PolicyExecutor::new("io", global);
//! io.max_concurrency(4)?.max_queue_size(100)?;
//!
//! let task = io.submit(|| 2 + 2)?;
//! assert_eq!(task.get().ok(), Some(4));
//! # Ok::<(), policypool::ExecutorError>(())
//! ```

mod config;
mod executor;
mod introspect;
mod invoke;
mod polling;
mod provider;
mod state;

pub use config::{
    display_limit, MaxPolicy, PolicySettings, QueueFullAction, DEFAULT_CORE_CONCURRENCY,
    DEFAULT_MAX_CONCURRENCY, DEFAULT_MAX_QUEUE_SIZE, DEFAULT_MAX_WAIT_FOR_ENQUEUE,
    REPORT_TASK_LIMIT, UNBOUNDED,
};
pub use executor::{LateStartCallback, PolicyExecutor, QueueSizeCallback};
pub use introspect::PolicyExecutorReport;
pub use provider::PolicyExecutorProvider;
pub use state::ExecutorState;

