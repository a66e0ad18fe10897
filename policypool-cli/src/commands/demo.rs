//! Demo command - drives a synthetic workload through a configured runtime.
//!
//! Submits a burst of sleeping tasks round-robin across the configured
//! policy executors, races a small `invoke_any` batch, reports pool state
//! periodically while the burst drains, and prints the final introspection
//! report.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Args;
use policypool::policy::{PolicyExecutor, PolicySettings, QueueFullAction};
use policypool::runtime::Runtime;
use policypool::sync::interrupt;
use policypool::task::TaskError;
use tracing::{info, warn};

use crate::error::CliError;
use crate::runner::CliRunner;

/// Policy executor created when the config declares none.
const DEMO_POLICY_ID: &str = "demo";

const DEMO_MAX_CONCURRENCY: usize = 4;
const DEMO_MAX_QUEUE_SIZE: usize = 64;
const REPORT_INTERVAL: Duration = Duration::from_millis(500);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);
const RACE_WIDTH: usize = 4;

/// Arguments for the demo command.
#[derive(Debug, Args)]
pub struct DemoArgs {
    /// Number of tasks to submit
    #[arg(long, default_value = "200")]
    pub tasks: usize,

    /// How long each task works, in milliseconds
    #[arg(long, default_value = "10")]
    pub task_ms: u64,

    /// Fraction of tasks that fail on purpose (0.0 - 1.0)
    #[arg(long, default_value = "0.0")]
    pub failure_rate: f64,
}

impl DemoArgs {
    fn validate(&self) -> Result<(), CliError> {
        if self.tasks == 0 {
            return Err(CliError::InvalidArgument(
                "--tasks must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.failure_rate) {
            return Err(CliError::InvalidArgument(format!(
                "--failure-rate must be between 0.0 and 1.0, got {}",
                self.failure_rate
            )));
        }
        Ok(())
    }

    /// Whether task `index` should fail, spreading failures evenly.
    fn fails(&self, index: usize) -> bool {
        let every = (1.0 / self.failure_rate).round();
        self.failure_rate > 0.0 && every.is_finite() && index % (every as usize).max(1) == 0
    }
}

/// Tally of task outcomes.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct Outcomes {
    succeeded: usize,
    failed: usize,
    aborted: usize,
    cancelled: usize,
}

impl Outcomes {
    fn record<T>(&mut self, outcome: &Result<T, TaskError>) {
        match outcome {
            Ok(_) => self.succeeded += 1,
            Err(TaskError::Failed(_)) => self.failed += 1,
            Err(TaskError::Aborted(_)) => self.aborted += 1,
            Err(_) => self.cancelled += 1,
        }
    }
}

/// Run the demo command.
pub fn run(args: DemoArgs, config_path: Option<&Path>) -> Result<(), CliError> {
    args.validate()?;

    let runner = CliRunner::new(config_path)?;
    runner.log_startup("demo");
    let runtime = runner.create_runtime()?;
    let executors = demo_executors(&runtime)?;

    println!(
        "Running {} tasks of {}ms across {} policy executor(s): {}",
        args.tasks,
        args.task_ms,
        executors.len(),
        executors
            .iter()
            .map(|e| e.id().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!("Log file: {}", runner.log_path().display());
    println!();

    let completed = Arc::new(AtomicU64::new(0));
    let reporter = {
        let global = runtime.global().clone();
        let completed = Arc::clone(&completed);
        runtime
            .scheduler()
            .schedule_at_fixed_rate(REPORT_INTERVAL, REPORT_INTERVAL, move || {
                let stats = global.stats();
                info!(
                    live = stats.live_threads,
                    active = stats.active_threads,
                    queued = stats.queue_depth,
                    max = stats.max_threads,
                    done = completed.load(Ordering::Relaxed),
                    "Demo progress"
                );
            })?
    };

    let started = Instant::now();
    let outcomes = run_burst(&args, &executors, &completed)?;
    let elapsed = started.elapsed();

    let race = executors[0].invoke_any(race_tasks(args.task_ms));
    match &race {
        Ok(winner) => info!(winner, "invoke_any finished"),
        Err(e) => warn!(error = %e, "invoke_any produced no value"),
    }

    reporter.cancel(false);

    println!("Results");
    println!("=======");
    println!("  succeeded: {}", outcomes.succeeded);
    println!("  failed:    {}", outcomes.failed);
    println!("  aborted:   {}", outcomes.aborted);
    println!("  cancelled: {}", outcomes.cancelled);
    println!(
        "  elapsed:   {:.2}s ({:.0} tasks/s)",
        elapsed.as_secs_f64(),
        args.tasks as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
    );
    match race {
        Ok(winner) => println!("  invoke_any winner: task {}", winner),
        Err(e) => println!("  invoke_any: {}", e),
    }
    println!();
    println!("{}", runtime.introspect());

    if !runtime.shutdown(SHUTDOWN_TIMEOUT)? {
        warn!("Runtime did not terminate cleanly");
        println!("Warning: some work was still running at shutdown");
    }
    Ok(())
}

/// The configured policy executors, or a single demo executor.
fn demo_executors(runtime: &Runtime) -> Result<Vec<PolicyExecutor>, CliError> {
    let configured = runtime.provider().executors();
    if !configured.is_empty() {
        return Ok(configured);
    }
    let settings = PolicySettings {
        max_concurrency: DEMO_MAX_CONCURRENCY,
        max_queue_size: DEMO_MAX_QUEUE_SIZE,
        queue_full_action: QueueFullAction::CallerRuns,
        ..PolicySettings::default()
    };
    Ok(vec![runtime.create_policy(DEMO_POLICY_ID, settings)?])
}

/// Submits every task, then waits for all of them.
fn run_burst(
    args: &DemoArgs,
    executors: &[PolicyExecutor],
    completed: &Arc<AtomicU64>,
) -> Result<Outcomes, CliError> {
    let work = Duration::from_millis(args.task_ms);
    let mut futures = Vec::with_capacity(args.tasks);
    let mut outcomes = Outcomes::default();

    for index in 0..args.tasks {
        let executor = &executors[index % executors.len()];
        let fail = args.fails(index);
        let completed = Arc::clone(completed);
        let submitted = executor.submit_fallible(move || {
            let result = interrupt::sleep(work).map_err(|e| e.to_string());
            completed.fetch_add(1, Ordering::Relaxed);
            if fail {
                return Err(format!("task {} failed on purpose", index));
            }
            result.map(|_| index)
        });
        match submitted {
            Ok(future) => futures.push(future),
            Err(e) if e.is_rejected() => outcomes.record::<usize>(&Err(e.into())),
            Err(e) => return Err(e.into()),
        }
    }

    for future in futures {
        outcomes.record(&future.get());
    }
    Ok(outcomes)
}

/// Tasks racing for `invoke_any`; later tasks work longer.
fn race_tasks(task_ms: u64) -> Vec<impl FnOnce() -> Result<usize, String> + Send + 'static> {
    (0..RACE_WIDTH)
        .map(|i| {
            let work = Duration::from_millis(task_ms * (i as u64 + 1));
            move || {
                interrupt::sleep(work)
                    .map(|_| i)
                    .map_err(|e| e.to_string())
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(tasks: usize, failure_rate: f64) -> DemoArgs {
        DemoArgs {
            tasks,
            task_ms: 1,
            failure_rate,
        }
    }

    #[test]
    fn test_validate_rejects_bad_arguments() {
        assert!(args(0, 0.0).validate().is_err());
        assert!(args(10, 1.5).validate().is_err());
        assert!(args(10, 0.25).validate().is_ok());
    }

    #[test]
    fn test_failures_spread_evenly() {
        let a = args(100, 0.25);
        let failing = (0..100).filter(|&i| a.fails(i)).count();
        assert_eq!(failing, 25);
        assert_eq!((0..100).filter(|&i| args(100, 0.0).fails(i)).count(), 0);
        assert_eq!((0..10).filter(|&i| args(10, 1.0).fails(i)).count(), 10);
    }

    #[test]
    fn test_outcomes_tally() {
        let mut outcomes = Outcomes::default();
        outcomes.record(&Ok::<_, TaskError>(1));
        outcomes.record::<u8>(&Err(TaskError::Cancelled));
        outcomes.record::<u8>(&Err(TaskError::failed("boom")));
        assert_eq!(
            outcomes,
            Outcomes {
                succeeded: 1,
                failed: 1,
                aborted: 0,
                cancelled: 1,
            }
        );
    }

    #[test]
    fn test_burst_through_runtime() {
        let config = policypool::config::ConfigFile::from_ini_str(
            "[executor]\ncore_threads = 2\nmax_threads = 4\n[controller]\nenabled = false\n",
        )
        .unwrap();
        let runtime = Runtime::with_telemetry(
            &config,
            Arc::new(policypool::telemetry::NullTelemetrySink),
        )
        .unwrap();
        let executors = demo_executors(&runtime).unwrap();
        assert_eq!(executors[0].id(), DEMO_POLICY_ID);

        let completed = Arc::new(AtomicU64::new(0));
        let outcomes = run_burst(&args(20, 0.5), &executors, &completed).unwrap();
        assert_eq!(outcomes.succeeded, 10);
        assert_eq!(outcomes.failed, 10);
        assert_eq!(completed.load(Ordering::Relaxed), 20);

        let winner = executors[0].invoke_any(race_tasks(1)).unwrap();
        assert!(winner < RACE_WIDTH);
        assert!(runtime.shutdown(Duration::from_secs(5)).unwrap());
    }
}
