//! Default values for all configuration settings and the
//! `ConfigFile::default()` implementation.

use std::collections::BTreeMap;
use std::path::PathBuf;

use super::settings::*;
use crate::controller::{
    DEFAULT_COMPARE_RANGE, DEFAULT_HANG_BUFFER, DEFAULT_HANG_INTERVAL, DEFAULT_HIGH_CPU,
    DEFAULT_INTERVAL, DEFAULT_MARGIN, DEFAULT_POOL_INCREMENT, DEFAULT_STAGNATION_LIMIT,
    DEFAULT_THRESHOLD,
};
use crate::pool::{
    QueueKind, DEFAULT_CORE_THREADS, DEFAULT_KEEP_ALIVE, DEFAULT_MAX_THREADS, DEFAULT_POOL_NAME,
};

/// Name of the configuration directory under the home directory.
pub const CONFIG_DIR_NAME: &str = ".policypool";

/// Name of the configuration file.
pub const CONFIG_FILE_NAME: &str = "config.ini";

/// Name of the log file in the configuration directory.
pub const DEFAULT_LOG_FILE_NAME: &str = "policypool.log";

/// Smallest pool size the controller chooses by default.
pub const DEFAULT_CONTROLLER_MIN_THREADS: usize = 1;

/// Get the path to the config directory (~/.policypool).
pub fn config_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
}

/// Get the path to the config file (~/.policypool/config.ini).
pub fn config_file_path() -> PathBuf {
    config_directory().join(CONFIG_FILE_NAME)
}

/// Get the default log file path (~/.policypool/policypool.log).
pub fn default_log_file() -> PathBuf {
    config_directory().join(DEFAULT_LOG_FILE_NAME)
}

impl Default for ExecutorSettings {
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

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            min_threads: DEFAULT_CONTROLLER_MIN_THREADS,
            interval: DEFAULT_INTERVAL,
            hang_interval: DEFAULT_HANG_INTERVAL,
            pool_increment: DEFAULT_POOL_INCREMENT,
            compare_range: DEFAULT_COMPARE_RANGE,
            hang_buffer: DEFAULT_HANG_BUFFER,
            threshold: DEFAULT_THRESHOLD,
            margin: DEFAULT_MARGIN,
            stagnation_limit: DEFAULT_STAGNATION_LIMIT,
            high_cpu: DEFAULT_HIGH_CPU,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            file: default_log_file(),
        }
    }
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            executor: ExecutorSettings::default(),
            controller: ControllerSettings::default(),
            logging: LoggingSettings::default(),
            policies: BTreeMap::new(),
        }
    }
}
