//! The global worker pool.

mod config;
mod global;
mod thread_factory;
mod worker;

pub use config::{
    PoolConfig, QueueKind, DEFAULT_CORE_THREADS, DEFAULT_KEEP_ALIVE, DEFAULT_MAX_THREADS,
    DEFAULT_POOL_NAME,
};
pub use global::{GlobalExecutor, PoolStats};
pub use thread_factory::{NamedThreadFactory, ThreadFactory};
