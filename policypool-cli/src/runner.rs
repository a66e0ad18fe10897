//! CLI runner for common setup and operations.
//!
//! Encapsulates config loading, logging initialization and runtime creation
//! to reduce duplication across command handlers.

use std::path::{Path, PathBuf};

use policypool::config::{config_file_path, ConfigFile};
use policypool::logging::{init_logging_at, LoggingGuard};
use policypool::runtime::Runtime;
use tracing::info;

use crate::error::CliError;

/// Resolves the config file a command should use.
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(config_file_path)
}

/// Runner that manages CLI lifecycle and common operations.
pub struct CliRunner {
    /// Logging guard - keeps logging active while runner exists
    logging_guard: LoggingGuard,
    /// Loaded configuration file
    config: ConfigFile,
    config_path: PathBuf,
}

impl CliRunner {
    /// Create a new CLI runner, loading config and initializing logging.
    ///
    /// A missing config file is not an error; defaults are used.
    pub fn new(config_path: Option<&Path>) -> Result<Self, CliError> {
        let config_path = resolve_config_path(config_path);
        let config = ConfigFile::load_from(&config_path)?;

        let logging_guard = init_logging_at(&config.logging.file)
            .map_err(|e| CliError::LoggingInit(e.to_string()))?;

        Ok(Self {
            logging_guard,
            config,
            config_path,
        })
    }

    /// Get the loaded configuration.
    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    /// Log startup information for a command.
    pub fn log_startup(&self, command: &str) {
        info!("policypool v{}", policypool::VERSION);
        info!(
            config = %self.config_path.display(),
            log = %self.logging_guard.path().display(),
            "policypool CLI: {} command",
            command
        );
    }

    /// Build a runtime from the loaded configuration.
    pub fn create_runtime(&self) -> Result<Runtime, CliError> {
        let runtime = Runtime::new(&self.config)?;
        info!("Runtime created successfully");
        Ok(runtime)
    }

    /// Path of the log file for this session.
    pub fn log_path(&self) -> &Path {
        self.logging_guard.path()
    }
}
