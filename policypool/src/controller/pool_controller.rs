//! The adaptive pool-size controller.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::ControllerConfig;
use super::cpu::{CpuSampler, NoCpuSampler};
use super::distribution::ThroughputDistribution;
use super::hang::{HangCheck, HangTracker};
use super::{ControlledPool, ResizeReason};
use crate::error::ExecutorError;
use crate::panic::contain;
use crate::scheduled::{Timer, TimerEntry};
use crate::telemetry::{TelemetryEvent, TelemetrySink};

/// Score assumed for a direction whose candidate sizes have no data yet.
const COIN_FLIP_PRIOR: f64 = 0.5;

/// Consecutive outliers that mean the workload itself has changed.
const WORKLOAD_SHIFT_OUTLIERS: u32 = 3;

/// Bounds on the probability of growing on a forced move.
const FORCED_MOVE_BIAS: (f64, f64) = (0.2, 0.8);

/// Growth probability on a forced move while the CPU is busy.
const BUSY_CPU_GROW_BIAS: f64 = 0.2;

// =============================================================================
// Tick State Machine
// =============================================================================

/// What the controller saw at one tick.
#[derive(Debug, Clone, Copy)]
struct Observation {
    now: Instant,
    size: usize,
    completed_total: u64,
    queue_depth: usize,
    active: usize,
    cpu: Option<f64>,
}

#[derive(Debug, Default)]
struct TickOutcome {
    resize: Option<(usize, ResizeReason)>,
    hang: Option<HangCheck>,
    throughput: Option<f64>,
    hang_mode: bool,
}

struct ControllerState {
    tick: u64,
    last: Option<(Instant, u64)>,
    stats: BTreeMap<usize, ThroughputDistribution>,
    hang: HangTracker,
    floor: usize,
    idle_ticks: u32,
    holds: u32,
    outliers: u32,
    rng: StdRng,
    last_throughput: f64,
    increments: u64,
    decrements: u64,
    forced_moves: u64,
    workload_shifts: u64,
}

impl ControllerState {
    fn new(config: &ControllerConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            tick: 0,
            last: None,
            stats: BTreeMap::new(),
            hang: HangTracker::default(),
            floor: config.min_threads,
            idle_ticks: 0,
            holds: 0,
            outliers: 0,
            rng,
            last_throughput: 0.0,
            increments: 0,
            decrements: 0,
            forced_moves: 0,
            workload_shifts: 0,
        }
    }

    fn tick(&mut self, obs: Observation, config: &ControllerConfig) -> TickOutcome {
        self.tick += 1;
        let mut outcome = TickOutcome::default();

        let Some((prev_at, prev_completed)) = self.last.replace((obs.now, obs.completed_total))
        else {
            return outcome;
        };
        let elapsed = obs.now.saturating_duration_since(prev_at).as_secs_f64();
        if elapsed <= 0.0 {
            return outcome;
        }
        let completed = obs.completed_total.saturating_sub(prev_completed);
        let throughput = completed as f64 / elapsed;
        self.last_throughput = throughput;
        outcome.throughput = Some(throughput);

        let inc = config.pool_increment;
        let size = obs.size;

        // Hang resolution.
        let hang = self.hang.check(obs.queue_depth, completed, obs.now);
        outcome.hang = Some(hang);
        if matches!(hang, HangCheck::Detected | HangCheck::Continuing) {
            let target = size.saturating_add(inc).min(config.hard_cap());
            self.floor = self.floor.max(target);
            self.holds = 0;
            self.idle_ticks = 0;
            outcome.hang_mode = true;
            if target > size {
                outcome.resize = Some((target, ResizeReason::Hang));
            }
            return outcome;
        }
        if let HangCheck::Resolved(_) = hang {
            // Hang growth may exceed max_threads; it ends with the hang.
            self.floor = self.floor.min(config.max_threads);
            if size > config.max_threads {
                self.holds = 0;
                self.idle_ticks = 0;
                outcome.resize = Some((config.max_threads, ResizeReason::Hang));
                return outcome;
            }
        }
        if self.floor > config.min_threads {
            self.floor = self.floor.saturating_sub(inc).max(config.min_threads);
        }

        // Idle pool.
        if obs.queue_depth == 0 && obs.active < size {
            self.holds = 0;
            self.idle_ticks += 1;
            if self.idle_ticks >= config.idle_ticks_before_shrink {
                self.idle_ticks = 0;
                let target = size.saturating_sub(inc).max(self.floor);
                if target < size {
                    outcome.resize = Some((target, ResizeReason::Idle));
                }
            }
            return outcome;
        }
        self.idle_ticks = 0;

        self.record(size, throughput);
        self.prune(config);

        // Scores.
        let upper = config.max_threads.max(self.floor);
        let forecast = self
            .stats
            .get(&size)
            .map_or(throughput, ThroughputDistribution::mean);
        let grow_score = self.score(
            (1..=config.compare_range)
                .map(|k| size.saturating_add(k * inc))
                .filter(|&m| m <= upper),
            forecast,
        );
        let floor = self.floor;
        let shrink_score = self.score(
            (1..=config.compare_range)
                .filter_map(|k| size.checked_sub(k * inc))
                .filter(|&m| m >= floor && m > 0),
            forecast,
        );

        let can_grow = size.saturating_add(inc) <= upper;
        let can_shrink = size >= floor.saturating_add(inc) && size > inc;
        let cpu_busy = obs.cpu.is_some_and(|usage| usage >= config.high_cpu);

        if can_grow
            && !cpu_busy
            && grow_score >= config.threshold
            && grow_score > shrink_score + config.margin
        {
            self.holds = 0;
            outcome.resize = Some((size + inc, ResizeReason::Throughput));
        } else if can_shrink
            && shrink_score >= config.threshold
            && shrink_score > grow_score + config.margin
        {
            self.holds = 0;
            outcome.resize = Some((size - inc, ResizeReason::Throughput));
        } else {
            self.holds += 1;
            if self.holds >= config.stagnation_limit && (can_grow || can_shrink) {
                self.holds = 0;
                self.forced_moves += 1;
                let grow = if !can_shrink {
                    true
                } else if !can_grow {
                    false
                } else {
                    let (low, high) = FORCED_MOVE_BIAS;
                    let mut bias = (0.5 + (grow_score - shrink_score)).clamp(low, high);
                    if cpu_busy {
                        bias = bias.min(BUSY_CPU_GROW_BIAS);
                    }
                    self.rng.random_bool(bias)
                };
                let target = if grow { size + inc } else { size - inc };
                outcome.resize = Some((target, ResizeReason::Stagnation));
            }
        }
        outcome
    }

    fn record(&mut self, size: usize, sample: f64) {
        let tick = self.tick;
        let outlier = match self.stats.get_mut(&size) {
            Some(dist) if dist.is_outlier(sample) => true,
            Some(dist) => {
                dist.record(sample, tick);
                self.outliers = 0;
                return;
            }
            None => false,
        };
        if outlier {
            self.outliers += 1;
            if self.outliers >= WORKLOAD_SHIFT_OUTLIERS {
                debug!(size, sample, "Workload shift, discarding all throughput statistics");
                self.stats.clear();
                self.outliers = 0;
                self.workload_shifts += 1;
            }
        }
        self.stats
            .insert(size, ThroughputDistribution::new(sample, tick));
    }

    fn prune(&mut self, config: &ControllerConfig) {
        let tick = self.tick;
        let min = config.min_threads;
        let cap = config.hard_cap();
        self.stats.retain(|&size, dist| {
            size >= min && size <= cap && tick - dist.updated_tick() <= config.stale_ticks
        });
    }

    /// Average chance that a candidate size beats `forecast`. Unknown sizes
    /// are skipped; if every candidate is unknown the prior is returned.
    fn score(&self, candidates: impl Iterator<Item = usize>, forecast: f64) -> f64 {
        let mut any = false;
        let mut known = 0usize;
        let mut sum = 0.0;
        for size in candidates {
            any = true;
            if let Some(dist) = self.stats.get(&size) {
                sum += dist.prob_exceeds(forecast);
                known += 1;
            }
        }
        match (any, known) {
            (false, _) => 0.0,
            (true, 0) => COIN_FLIP_PRIOR,
            (true, n) => sum / n as f64,
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Throughput statistics of one pool size.
#[derive(Debug, Clone, PartialEq)]
pub struct SizeStats {
    pub size: usize,
    pub mean: f64,
    pub stddev: f64,
    pub samples: u64,
}

/// Point-in-time view of the controller.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerStats {
    pub pool: String,
    pub active: bool,
    pub pool_size: usize,
    pub floor: usize,
    pub min_threads: usize,
    pub max_threads: usize,
    pub ticks: u64,
    pub increments: u64,
    pub decrements: u64,
    pub forced_moves: u64,
    pub hangs: u64,
    pub in_hang: bool,
    pub workload_shifts: u64,
    pub last_throughput: f64,
    pub sizes: Vec<SizeStats>,
}

impl fmt::Display for ControllerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Pool controller for '{}' ({})",
            self.pool,
            if self.active { "active" } else { "inactive" }
        )?;
        writeln!(
            f,
            "  size={} floor={} bounds={}..={} ticks={}",
            self.pool_size, self.floor, self.min_threads, self.max_threads, self.ticks
        )?;
        writeln!(
            f,
            "  increments={} decrements={} forced={} hangs={}{} shifts={}",
            self.increments,
            self.decrements,
            self.forced_moves,
            self.hangs,
            if self.in_hang { " (hanging)" } else { "" },
            self.workload_shifts
        )?;
        write!(f, "  throughput: {:.1}/s", self.last_throughput)?;
        for size in &self.sizes {
            write!(
                f,
                "\n    {:>4} threads: mean={:.1}/s stddev={:.1} samples={}",
                size.size, size.mean, size.stddev, size.samples
            )?;
        }
        Ok(())
    }
}

// =============================================================================
// Pool Controller
// =============================================================================

/// Resizes a pool towards the size with the best measured throughput.
pub struct PoolController {
    pool: Arc<dyn ControlledPool>,
    pool_name: Arc<str>,
    config: Mutex<ControllerConfig>,
    state: Mutex<ControllerState>,
    sampler: Arc<dyn CpuSampler>,
    telemetry: Arc<dyn TelemetrySink>,
    cancel: CancellationToken,
    entry: Mutex<Option<TimerEntry>>,
}

impl fmt::Debug for PoolController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolController")
            .field("pool", &self.pool_name)
            .field("active", &self.is_active())
            .finish()
    }
}

impl PoolController {
    pub fn new(
        pool: Arc<dyn ControlledPool>,
        config: ControllerConfig,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Result<Self, ExecutorError> {
        config.validate()?;
        Ok(Self {
            pool_name: Arc::from(pool.name()),
            pool,
            state: Mutex::new(ControllerState::new(&config)),
            config: Mutex::new(config),
            sampler: Arc::new(NoCpuSampler),
            telemetry,
            cancel: CancellationToken::new(),
            entry: Mutex::new(None),
        })
    }

    /// Uses `sampler` for the high-CPU growth veto.
    pub fn with_cpu_sampler(mut self, sampler: Arc<dyn CpuSampler>) -> Self {
        self.sampler = sampler;
        self
    }

    pub fn config(&self) -> ControllerConfig {
        self.config.lock().clone()
    }

    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Runs one controller step as of `now`.
    ///
    /// Returns the delay until the next tick, or `None` once deactivated.
    pub fn tick_at(&self, now: Instant) -> Option<Duration> {
        if self.cancel.is_cancelled() {
            return None;
        }
        let config = self.config();
        let obs = Observation {
            now,
            size: self.pool.pool_size(),
            completed_total: self.pool.completed_task_count(),
            queue_depth: self.pool.queue_depth(),
            active: self.pool.active_count(),
            cpu: self.sampler.sample(),
        };
        let outcome = self.state.lock().tick(obs, &config);

        match outcome.hang {
            Some(HangCheck::Detected) => {
                warn!(
                    pool = %self.pool_name,
                    pool_size = obs.size,
                    queue_depth = obs.queue_depth,
                    "Pool hang detected, growing until work completes"
                );
                self.emit(TelemetryEvent::HangDetected {
                    pool: Arc::clone(&self.pool_name),
                    pool_size: obs.size,
                    queue_depth: obs.queue_depth,
                });
            }
            Some(HangCheck::Resolved(duration)) => {
                info!(
                    pool = %self.pool_name,
                    pool_size = obs.size,
                    duration_ms = duration.as_millis(),
                    "Pool hang resolved"
                );
                self.emit(TelemetryEvent::HangResolved {
                    pool: Arc::clone(&self.pool_name),
                    pool_size: obs.size,
                    duration,
                });
            }
            _ => {}
        }

        if let Some((to, reason)) = outcome.resize {
            self.resize(obs.size, to, reason);
        }
        if outcome.hang_mode {
            Some(config.hang_interval)
        } else {
            Some(config.interval)
        }
    }

    /// Runs one controller step now.
    pub fn tick(&self) -> Option<Duration> {
        self.tick_at(Instant::now())
    }

    fn emit(&self, event: TelemetryEvent) {
        contain("telemetry", || self.telemetry.emit(event));
    }

    fn resize(&self, from: usize, to: usize, reason: ResizeReason) {
        if let Err(e) = self.pool.set_pool_size(to) {
            warn!(pool = %self.pool_name, from, to, error = %e, "Pool resize failed");
            return;
        }
        {
            let mut state = self.state.lock();
            if to > from {
                state.increments += 1;
            } else {
                state.decrements += 1;
            }
        }
        debug!(pool = %self.pool_name, from, to, reason = %reason, "Pool resized");
        self.emit(TelemetryEvent::PoolResized {
            pool: Arc::clone(&self.pool_name),
            from,
            to,
            reason,
        });
    }

    /// Starts ticking on `timer`.
    pub fn start(self: &Arc<Self>, timer: &Timer) -> Result<(), ExecutorError> {
        if self.cancel.is_cancelled() {
            return Err(ExecutorError::illegal_state("pool controller was deactivated"));
        }
        let controller: Weak<Self> = Arc::downgrade(self);
        let first = Instant::now() + self.config().interval;
        let entry = timer.schedule(
            first,
            Box::new(move || {
                let controller = controller.upgrade()?;
                let delay = controller.tick()?;
                Some(Instant::now() + delay)
            }),
        )?;
        if let Some(previous) = self.entry.lock().replace(entry) {
            previous.cancel();
        }
        info!(pool = %self.pool_name, "Pool controller started");
        Ok(())
    }

    /// Stops resizing and removes the timer entry.
    pub fn deactivate(&self) {
        self.cancel.cancel();
        if let Some(entry) = self.entry.lock().take() {
            entry.cancel();
        }
        info!(pool = %self.pool_name, "Pool controller deactivated");
    }

    /// Replaces the configuration, pulling the pool back inside the new
    /// bounds if needed.
    pub fn reconfigure(&self, config: ControllerConfig) -> Result<(), ExecutorError> {
        config.validate()?;
        {
            let mut state = self.state.lock();
            state.floor = state.floor.clamp(config.min_threads, config.hard_cap());
        }
        let size = self.pool.pool_size();
        let target = size.clamp(config.min_threads, config.max_threads);
        *self.config.lock() = config;
        if target != size {
            self.resize(size, target, ResizeReason::Configuration);
        }
        Ok(())
    }

    pub fn stats(&self) -> ControllerStats {
        let config = self.config();
        let state = self.state.lock();
        ControllerStats {
            pool: self.pool_name.to_string(),
            active: self.is_active(),
            pool_size: self.pool.pool_size(),
            floor: state.floor,
            min_threads: config.min_threads,
            max_threads: config.max_threads,
            ticks: state.tick,
            increments: state.increments,
            decrements: state.decrements,
            forced_moves: state.forced_moves,
            hangs: state.hang.hangs(),
            in_hang: state.hang.is_hanging(),
            workload_shifts: state.workload_shifts,
            last_throughput: state.last_throughput,
            sizes: state
                .stats
                .iter()
                .map(|(&size, dist)| SizeStats {
                    size,
                    mean: dist.mean(),
                    stddev: dist.stddev(),
                    samples: dist.samples(),
                })
                .collect(),
        }
    }
}

impl Drop for PoolController {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.get_mut().take() {
            entry.cancel();
        }
    }
}
