//! Settings structs for all configuration sections.
//!
//! Each struct represents one `[section]` of the INI config file.
//! These are pure data types with no parsing or serialization logic.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::controller::ControllerConfig;
use crate::policy::PolicySettings;
use crate::pool::{PoolConfig, QueueKind};

/// Complete runtime configuration loaded from config.ini.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigFile {
    /// Global pool settings
    pub executor: ExecutorSettings,
    /// Adaptive sizing settings
    pub controller: ControllerSettings,
    /// Logging settings
    pub logging: LoggingSettings,
    /// Policy executors keyed by id, one per `[policy.<id>]` section
    pub policies: BTreeMap<String, PolicySettings>,
}

/// Global pool configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorSettings {
    /// Pool name, also the worker thread name prefix
    pub name: String,
    pub core_threads: usize,
    pub max_threads: usize,
    /// Idle time before a non-core worker exits
    pub keep_alive: Duration,
    pub queue: QueueKind,
}

/// Pool controller configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerSettings {
    pub enabled: bool,
    /// Smallest pool size the controller may choose. The largest is the
    /// executor's `max_threads`.
    pub min_threads: usize,
    pub interval: Duration,
    pub hang_interval: Duration,
    pub pool_increment: usize,
    pub compare_range: usize,
    pub hang_buffer: usize,
    pub threshold: f64,
    pub margin: f64,
    pub stagnation_limit: u32,
    pub high_cpu: f64,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingSettings {
    /// Log file path
    pub file: PathBuf,
}

impl ConfigFile {
    /// Global pool configuration described by `[executor]`.
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::default()
            .with_name(self.executor.name.clone())
            .with_threads(self.executor.core_threads, self.executor.max_threads)
            .with_keep_alive(self.executor.keep_alive)
            .with_queue(self.executor.queue)
    }

    /// Controller configuration described by `[controller]`, bounded by
    /// the executor's thread limits.
    pub fn controller_config(&self) -> ControllerConfig {
        let c = &self.controller;
        ControllerConfig {
            enabled: c.enabled,
            min_threads: c.min_threads,
            max_threads: self.executor.max_threads,
            interval: c.interval,
            hang_interval: c.hang_interval,
            pool_increment: c.pool_increment,
            compare_range: c.compare_range,
            hang_buffer: c.hang_buffer,
            threshold: c.threshold,
            margin: c.margin,
            stagnation_limit: c.stagnation_limit,
            high_cpu: c.high_cpu,
            ..ControllerConfig::default()
        }
    }
}
