//! CLI command implementations.
//!
//! Each subcommand has its own module with argument definitions and handlers.
//!
//! # Command Modules
//!
//! - [`config`] - Configuration management (path, show, init)
//! - [`demo`] - Synthetic workload through a configured runtime
//! - [`diagnostics`] - System and runtime report for bug reports

pub mod config;
pub mod demo;
pub mod diagnostics;
