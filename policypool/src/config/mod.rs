//! Runtime configuration loaded from `~/.policypool/config.ini`.
//!
//! # Example
//!
//! ```
//! use policypool::config::ConfigFile;
//!
//! let config = ConfigFile::from_ini_str("[executor]\nmax_threads = 16\n").unwrap();
//! assert_eq!(config.executor.max_threads, 16);
//! assert_eq!(config.controller_config().max_threads, 16);
//! ```

mod defaults;
mod duration;
mod file;
mod parser;
mod settings;
mod writer;

pub use defaults::{
    config_directory, config_file_path, default_log_file, CONFIG_DIR_NAME, CONFIG_FILE_NAME,
    DEFAULT_CONTROLLER_MIN_THREADS, DEFAULT_LOG_FILE_NAME,
};
pub use duration::{format_duration, parse_duration, DurationParseError};
pub use file::ConfigFileError;
pub use settings::{ConfigFile, ControllerSettings, ExecutorSettings, LoggingSettings};
