//! policypool CLI - Command-line interface
//!
//! This binary provides a command-line interface to the policypool library:
//! managing the configuration file, running a demo workload and printing
//! diagnostics.

mod commands;
mod error;
mod runner;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use commands::config::ConfigCommands;
use commands::demo::DemoArgs;
use error::CliError;

#[derive(Parser)]
#[command(name = "policypool")]
#[command(version = policypool::VERSION)]
#[command(about = "Policy-governed task execution on a shared, self-sizing thread pool", long_about = None)]
struct Cli {
    /// Config file to use instead of ~/.policypool/config.ini
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Run a synthetic workload and print the runtime report
    Demo(DemoArgs),

    /// Print system information and the runtime report for bug reports
    Diagnostics,
}

fn main() {
    let cli = Cli::parse();
    let config = cli.config.as_deref();

    let result: Result<(), CliError> = match cli.command {
        Commands::Config { command } => commands::config::run(command, config),
        Commands::Demo(args) => commands::demo::run(args, config),
        Commands::Diagnostics => commands::diagnostics::run(config),
    };

    if let Err(e) = result {
        e.exit();
    }
}
