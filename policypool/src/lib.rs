//! policypool - policy-governed task execution on a shared thread pool
//!
//! Many independent [`PolicyExecutor`](policy::PolicyExecutor)s, each with
//! its own concurrency ceiling, queue bound and overflow behaviour, dispatch
//! into one [`GlobalExecutor`](pool::GlobalExecutor). A
//! [`PoolController`](controller::PoolController) resizes that pool towards
//! the size with the best measured throughput, and a
//! [`ScheduledExecutor`](scheduled::ScheduledExecutor) runs delayed and
//! periodic work through the same pool.
//!
//! # High-Level API
//!
//! For most use cases, the [`runtime`] module assembles everything from a
//! configuration file:
//!
//! ```no_run
//! use std::time::Duration;
//! use policypool::config::ConfigFile;
//! use policypool::runtime::Runtime;
//!
//! let config = ConfigFile::from_ini_str("[policy.io]\nmax_concurrency = 4\n")?;
//! let runtime = Runtime::new(&config)?;
//!
//! let io = runtime.policy("io").expect("declared in config");
//! let answer = io.submit(|| 6 * 7)?;
//! assert_eq!(answer.get().ok(), Some(42));
//!
//! runtime.shutdown(Duration::from_secs(5))?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod controller;
pub mod error;
pub mod executor;
pub mod logging;
pub mod panic;
pub mod policy;
pub mod pool;
pub mod queue;
pub mod runtime;
pub mod scheduled;
pub mod sync;
pub mod task;
pub mod telemetry;

pub use error::{ExecutorError, RejectReason};
pub use executor::{Executor, Job};
pub use task::{TaskError, TaskFuture};

/// Version of the policypool library and CLI.
///
/// This is synchronized across all components in the workspace.
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
