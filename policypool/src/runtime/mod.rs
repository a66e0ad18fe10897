//! The assembled runtime: one global pool, its controller, a timer, and the
//! policy executors declared in configuration.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           Runtime                            │
//! │                                                              │
//! │  ┌────────────┐ ┌────────────┐ ┌────────────┐                │
//! │  │ policy.io  │ │ policy.cpu │ │    ...     │  admission,    │
//! │  └─────┬──────┘ └─────┬──────┘ └─────┬──────┘  permits       │
//! │        └──────────────┼──────────────┘                       │
//! │                       ▼                                      │
//! │              ┌─────────────────┐      ┌────────────────┐     │
//! │              │ GlobalExecutor  │◄─────│ PoolController │     │
//! │              │ (worker threads)│ size └───────▲────────┘     │
//! │              └────────▲────────┘              │ tick         │
//! │                       │ dispatch      ┌───────┴────────┐     │
//! │                       └───────────────│     Timer      │     │
//! │                     ScheduledExecutor └────────────────┘     │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Shutdown Order
//!
//! Policy executors stop accepting work first and drain into the pool, then
//! the controller and timer stop, and the pool itself shuts down last.

mod report;

pub use report::RuntimeReport;

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{ConfigFile, ConfigFileError};
use crate::controller::{ControlledPool, CpuSampler, PoolController, ProcStatSampler};
use crate::error::ExecutorError;
use crate::policy::{PolicyExecutor, PolicyExecutorProvider, PolicySettings};
use crate::pool::GlobalExecutor;
use crate::scheduled::{ScheduledExecutor, Timer};
use crate::task::PolicyTask;
use crate::telemetry::{TelemetrySink, TracingTelemetrySink};

/// Errors building or running a [`Runtime`].
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigFileError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),
}

/// Everything a process needs to run policy-governed work.
pub struct Runtime {
    config: Mutex<ConfigFile>,
    global: GlobalExecutor,
    provider: PolicyExecutorProvider,
    controller: Mutex<Option<Arc<PoolController>>>,
    timer: Arc<Timer>,
    scheduler: ScheduledExecutor,
    telemetry: Arc<dyn TelemetrySink>,
    cpu_sampler: Arc<dyn CpuSampler>,
    /// Keeps configured executors alive; the provider only holds weak
    /// references.
    policies: Mutex<Vec<PolicyExecutor>>,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("pool", &self.global.name())
            .field("policies", &self.provider.ids())
            .field("controller", &self.controller.lock().is_some())
            .finish()
    }
}

impl Runtime {
    /// Builds a runtime that reports telemetry through `tracing`.
    pub fn new(config: &ConfigFile) -> Result<Self, RuntimeError> {
        Self::with_telemetry(config, Arc::new(TracingTelemetrySink))
    }

    /// Builds a runtime from the config file at `path`.
    pub fn from_config_file(path: &Path) -> Result<Self, RuntimeError> {
        let config = ConfigFile::load_from(path)?;
        Self::new(&config)
    }

    pub fn with_telemetry(
        config: &ConfigFile,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Result<Self, RuntimeError> {
        let global = GlobalExecutor::new(config.pool_config())?;
        let timer = Arc::new(Timer::new(&format!("{}-timer", config.executor.name))?);
        let scheduler = ScheduledExecutor::new(Arc::clone(&timer), Arc::new(global.clone()));
        let provider = PolicyExecutorProvider::new(global.clone(), Arc::clone(&telemetry));

        let runtime = Self {
            config: Mutex::new(config.clone()),
            global,
            provider,
            controller: Mutex::new(None),
            timer,
            scheduler,
            telemetry,
            cpu_sampler: Arc::new(ProcStatSampler::new()),
            policies: Mutex::new(Vec::new()),
        };

        if config.controller.enabled {
            runtime.start_controller(config)?;
        }
        for (id, settings) in &config.policies {
            runtime.create_policy(id, settings.clone())?;
        }

        info!(
            pool = %config.executor.name,
            policies = config.policies.len(),
            controller = config.controller.enabled,
            "Runtime started"
        );
        Ok(runtime)
    }

    pub fn global(&self) -> &GlobalExecutor {
        &self.global
    }

    pub fn provider(&self) -> &PolicyExecutorProvider {
        &self.provider
    }

    /// Scheduler dispatching into the global pool.
    pub fn scheduler(&self) -> &ScheduledExecutor {
        &self.scheduler
    }

    pub fn timer(&self) -> &Arc<Timer> {
        &self.timer
    }

    pub fn telemetry(&self) -> &Arc<dyn TelemetrySink> {
        &self.telemetry
    }

    pub fn controller(&self) -> Option<Arc<PoolController>> {
        self.controller.lock().clone()
    }

    /// The configuration most recently applied.
    pub fn config(&self) -> ConfigFile {
        self.config.lock().clone()
    }

    pub fn policy(&self, id: &str) -> Option<PolicyExecutor> {
        self.provider.get(id)
    }

    /// Creates a policy executor owned by the runtime.
    pub fn create_policy(
        &self,
        id: &str,
        settings: PolicySettings,
    ) -> Result<PolicyExecutor, ExecutorError> {
        let executor = self.provider.create_with(id, settings)?;
        self.policies.lock().push(executor.clone());
        Ok(executor)
    }

    fn start_controller(&self, config: &ConfigFile) -> Result<(), ExecutorError> {
        let controller_config = config.controller_config();
        let start = config
            .executor
            .core_threads
            .clamp(controller_config.min_threads, controller_config.max_threads);
        self.global.set_pool_size(start)?;
        let controller = Arc::new(
            PoolController::new(
                Arc::new(self.global.clone()),
                controller_config,
                Arc::clone(&self.telemetry),
            )?
            .with_cpu_sampler(Arc::clone(&self.cpu_sampler)),
        );
        controller.start(&self.timer)?;
        *self.controller.lock() = Some(controller);
        Ok(())
    }

    /// Applies a new configuration to the running runtime.
    ///
    /// Updates pool bounds and keep-alive, starts, stops or reconfigures the
    /// controller, updates the limits of existing policy executors and
    /// creates newly declared ones. Executors missing from the new
    /// configuration keep running.
    pub fn apply_config(&self, config: &ConfigFile) -> Result<(), ExecutorError> {
        let pool = config.pool_config();
        pool.validate()?;
        config.controller_config().validate()?;
        for settings in config.policies.values() {
            settings.validate()?;
        }

        self.global.set_keep_alive(pool.keep_alive);

        let existing = self.controller.lock().clone();
        match (existing, config.controller.enabled) {
            (Some(controller), true) => controller.reconfigure(config.controller_config())?,
            (Some(controller), false) => {
                controller.deactivate();
                *self.controller.lock() = None;
                self.global.set_bounds(pool.core_threads, pool.max_threads)?;
            }
            (None, true) => self.start_controller(config)?,
            (None, false) => self.global.set_bounds(pool.core_threads, pool.max_threads)?,
        }

        for (id, settings) in &config.policies {
            match self.provider.get(id) {
                Some(executor) if !executor.is_shutdown() => {
                    executor.apply_settings(settings)?;
                }
                _ => {
                    self.create_policy(id, settings.clone())?;
                }
            }
        }

        *self.config.lock() = config.clone();
        info!(pool = %self.global.name(), "Configuration applied");
        Ok(())
    }

    /// Snapshot of the pool, controller and every policy executor.
    pub fn introspect(&self) -> RuntimeReport {
        RuntimeReport {
            pool: self.global.stats(),
            controller: self.controller().map(|c| c.stats()),
            policies: self
                .provider
                .executors()
                .iter()
                .map(PolicyExecutor::introspect)
                .collect(),
            scheduled_pending: self.timer.pending(),
        }
    }

    /// Orderly shutdown. Queued work still runs.
    ///
    /// Returns false if something was still running when `timeout` elapsed.
    pub fn shutdown(&self, timeout: Duration) -> Result<bool, ExecutorError> {
        let deadline = Instant::now().checked_add(timeout);
        let remaining = || {
            deadline
                .map(|d| d.saturating_duration_since(Instant::now()))
                .unwrap_or(Duration::MAX)
        };

        self.provider.shutdown_all();
        let policies_done = self.provider.await_termination_all(remaining())?;
        if !policies_done {
            warn!("Policy executors still busy at shutdown deadline");
        }
        self.stop_background();
        self.global.shutdown();
        let pool_done = self.global.await_termination(remaining())?;
        info!(clean = policies_done && pool_done, "Runtime shut down");
        Ok(policies_done && pool_done)
    }

    /// Immediate shutdown. Returns the tasks that never ran.
    pub fn shutdown_now(&self) -> Vec<Arc<dyn PolicyTask>> {
        let never_ran = self.provider.shutdown_all_now();
        self.stop_background();
        let discarded = self.global.shutdown_now();
        info!(
            never_ran = never_ran.len(),
            discarded_jobs = discarded,
            "Runtime shut down immediately"
        );
        never_ran
    }

    fn stop_background(&self) {
        if let Some(controller) = self.controller.lock().take() {
            controller.deactivate();
        }
        self.timer.shutdown();
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        if !self.global.is_shutdown() {
            self.provider.shutdown_all();
            self.stop_background();
            self.global.shutdown();
        }
    }
}
