//! Configuration management CLI commands.
//!
//! Provides `config path`, `config show` and `config init` for locating,
//! inspecting and creating the configuration file.

use std::path::Path;

use clap::Subcommand;
use policypool::config::{format_duration, ConfigFile};
use policypool::policy::display_limit;

use crate::error::CliError;
use crate::runner::resolve_config_path;

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Show the configuration file path
    Path,

    /// Show the effective configuration (file values over defaults)
    Show,

    /// Write a configuration file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Run a config subcommand.
pub fn run(command: ConfigCommands, config_path: Option<&Path>) -> Result<(), CliError> {
    let path = resolve_config_path(config_path);
    match command {
        ConfigCommands::Path => run_path(&path),
        ConfigCommands::Show => run_show(&path),
        ConfigCommands::Init { force } => run_init(&path, force),
    }
}

/// Show the configuration file path.
fn run_path(path: &Path) -> Result<(), CliError> {
    println!("{}", path.display());
    Ok(())
}

/// Show the effective configuration.
fn run_show(path: &Path) -> Result<(), CliError> {
    let config = ConfigFile::load_from(path)?;
    if !path.exists() {
        println!("# {} does not exist; showing defaults", path.display());
        println!();
    }
    print!("{}", render_settings(&config));
    Ok(())
}

/// Write a default configuration file.
fn run_init(path: &Path, force: bool) -> Result<(), CliError> {
    if path.exists() && !force {
        return Err(CliError::Config(format!(
            "{} already exists. Use --force to overwrite it.",
            path.display()
        )));
    }
    ConfigFile::default().save_to(path)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

/// Renders every setting as `key = value` lines grouped by section.
fn render_settings(config: &ConfigFile) -> String {
    let mut out = String::new();
    let mut section = |name: &str, entries: Vec<(&str, String)>| {
        out.push_str(&format!("[{}]\n", name));
        for (key, value) in entries {
            out.push_str(&format!("  {} = {}\n", key, value));
        }
        out.push('\n');
    };

    let e = &config.executor;
    section(
        "executor",
        vec![
            ("name", e.name.clone()),
            ("core_threads", e.core_threads.to_string()),
            ("max_threads", e.max_threads.to_string()),
            ("keep_alive", format_duration(e.keep_alive)),
            ("queue", e.queue.to_string()),
        ],
    );

    let c = &config.controller;
    section(
        "controller",
        vec![
            ("enabled", c.enabled.to_string()),
            ("min_threads", c.min_threads.to_string()),
            ("interval", format_duration(c.interval)),
            ("hang_interval", format_duration(c.hang_interval)),
            ("pool_increment", c.pool_increment.to_string()),
            ("compare_range", c.compare_range.to_string()),
            ("hang_buffer", c.hang_buffer.to_string()),
            ("threshold", c.threshold.to_string()),
            ("margin", c.margin.to_string()),
            ("stagnation_limit", c.stagnation_limit.to_string()),
            ("high_cpu", c.high_cpu.to_string()),
        ],
    );

    section(
        "logging",
        vec![("file", config.logging.file.display().to_string())],
    );

    for (id, p) in &config.policies {
        section(
            &format!("policy.{}", id),
            vec![
                ("core_concurrency", display_limit(p.core_concurrency)),
                ("max_concurrency", display_limit(p.max_concurrency)),
                ("max_queue_size", display_limit(p.max_queue_size)),
                ("max_wait_for_enqueue", format_duration(p.max_wait_for_enqueue)),
                ("queue_full_action", p.queue_full_action.to_string()),
                (
                    "start_timeout",
                    p.start_timeout
                        .map(format_duration)
                        .unwrap_or_else(|| "none".to_string()),
                ),
                ("max_policy", p.max_policy.to_string()),
            ],
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_refuses_to_overwrite() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.ini");
        run_init(&path, false).unwrap();
        assert!(path.exists());

        let error = run_init(&path, false).unwrap_err();
        assert!(error.to_string().contains("--force"));
        run_init(&path, true).unwrap();
    }

    #[test]
    fn test_render_lists_policies() {
        let config = ConfigFile::from_ini_str(
            "[policy.io]\nmax_concurrency = 4\nstart_timeout = 2s\n",
        )
        .unwrap();
        let rendered = render_settings(&config);
        assert!(rendered.contains("[executor]"));
        assert!(rendered.contains("[policy.io]"));
        assert!(rendered.contains("  max_concurrency = 4"));
        assert!(rendered.contains("  start_timeout = 2s"));
    }
}
