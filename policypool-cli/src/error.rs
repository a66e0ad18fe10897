//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and appropriate exit codes.

use std::fmt;
use std::process;

use policypool::config::ConfigFileError;
use policypool::runtime::RuntimeError;
use policypool::{ExecutorError, TaskError};

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Configuration error
    Config(String),
    /// Failed to read or write the config file
    ConfigFile(ConfigFileError),
    /// Failed to build the runtime
    RuntimeCreation(RuntimeError),
    /// An executor refused work or a setting
    Executor(ExecutorError),
    /// A workload task did not produce a value
    Task(TaskError),
    /// Invalid command-line argument
    InvalidArgument(String),
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        match self {
            CliError::ConfigFile(ConfigFileError::InvalidValue { section, .. }) => {
                eprintln!();
                eprintln!("Check the [{}] section of your config file.", section);
                eprintln!("Run 'policypool config path' to see which file is used.");
            }
            CliError::ConfigFile(ConfigFileError::ReadError(_)) => {
                eprintln!();
                eprintln!("Run 'policypool config init --force' to write a fresh default file.");
            }
            _ => {}
        }

        process::exit(exit_code(self))
    }
}

/// Process exit code for an error. Usage errors exit with 2 like clap does.
pub fn exit_code(error: &CliError) -> i32 {
    match error {
        CliError::InvalidArgument(_) => 2,
        _ => 1,
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::ConfigFile(e) => write!(f, "Configuration error: {}", e),
            CliError::RuntimeCreation(e) => write!(f, "Failed to start runtime: {}", e),
            CliError::Executor(e) => write!(f, "Executor error: {}", e),
            CliError::Task(e) => write!(f, "Task error: {}", e),
            CliError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::ConfigFile(e) => Some(e),
            CliError::RuntimeCreation(e) => Some(e),
            CliError::Executor(e) => Some(e),
            CliError::Task(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::ConfigFile(e)
    }
}

impl From<RuntimeError> for CliError {
    fn from(e: RuntimeError) -> Self {
        match e {
            RuntimeError::Config(e) => CliError::ConfigFile(e),
            other => CliError::RuntimeCreation(other),
        }
    }
}

impl From<ExecutorError> for CliError {
    fn from(e: ExecutorError) -> Self {
        CliError::Executor(e)
    }
}

impl From<TaskError> for CliError {
    fn from(e: TaskError) -> Self {
        CliError::Task(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_config_error_unwraps() {
        let inner = ConfigFileError::InvalidValue {
            section: "executor".to_string(),
            key: "max_threads".to_string(),
            value: "0".to_string(),
            reason: "must be at least 1".to_string(),
        };
        let error = CliError::from(RuntimeError::Config(inner));
        assert!(matches!(error, CliError::ConfigFile(_)));
        assert!(error.to_string().contains("max_threads"));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code(&CliError::InvalidArgument("x".into())), 2);
        assert_eq!(exit_code(&CliError::Config("x".into())), 1);
    }
}
