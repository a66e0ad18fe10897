//! Diagnostics command - outputs system and runtime information for bug
//! reports.
//!
//! Builds a runtime from the config file, prints its introspection report
//! and shuts it down again. Logging is left uninitialized so the output
//! stays pasteable.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use policypool::config::ConfigFile;
use policypool::controller::{CpuSampler, ProcStatSampler};
use policypool::runtime::{Runtime, RuntimeReport};
use policypool::telemetry::NullTelemetrySink;

use crate::error::CliError;
use crate::runner::resolve_config_path;

/// Gap between the two CPU samples.
const CPU_SAMPLE_WINDOW: Duration = Duration::from_millis(250);

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything the diagnostics command prints.
struct DiagnosticsReport {
    config_path: PathBuf,
    config_exists: bool,
    available_parallelism: Option<usize>,
    cpu_usage: Option<f64>,
    runtime: RuntimeReport,
}

impl DiagnosticsReport {
    fn collect(config_path: &Path) -> Result<Self, CliError> {
        let config = ConfigFile::load_from(config_path)?;

        let sampler = ProcStatSampler::new();
        let _ = sampler.sample();
        thread::sleep(CPU_SAMPLE_WINDOW);
        let cpu_usage = sampler.sample();

        let runtime = Runtime::with_telemetry(&config, Arc::new(NullTelemetrySink))?;
        let report = runtime.introspect();
        runtime.shutdown(SHUTDOWN_TIMEOUT)?;

        Ok(Self {
            config_path: config_path.to_path_buf(),
            config_exists: config_path.exists(),
            available_parallelism: thread::available_parallelism().ok().map(|n| n.get()),
            cpu_usage,
            runtime: report,
        })
    }
}

impl fmt::Display for DiagnosticsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "policypool diagnostics")?;
        writeln!(f, "======================")?;
        writeln!(f)?;
        writeln!(f, "[system]")?;
        writeln!(f, "  version: {}", policypool::VERSION)?;
        writeln!(
            f,
            "  platform: {}-{}",
            std::env::consts::OS,
            std::env::consts::ARCH
        )?;
        match self.available_parallelism {
            Some(n) => writeln!(f, "  cpus: {}", n)?,
            None => writeln!(f, "  cpus: unknown")?,
        }
        match self.cpu_usage {
            Some(usage) => writeln!(f, "  cpu usage: {:.1}%", usage * 100.0)?,
            None => writeln!(f, "  cpu usage: unavailable")?,
        }
        writeln!(f)?;
        writeln!(f, "[config]")?;
        writeln!(
            f,
            "  file: {}{}",
            self.config_path.display(),
            if self.config_exists {
                ""
            } else {
                " (missing, using defaults)"
            }
        )?;
        writeln!(f)?;
        writeln!(f, "[runtime]")?;
        write!(f, "{}", self.runtime)
    }
}

/// Run the diagnostics command.
pub fn run(config_path: Option<&Path>) -> Result<(), CliError> {
    let report = DiagnosticsReport::collect(&resolve_config_path(config_path))?;
    println!("{}", report);
    Ok(())
}
