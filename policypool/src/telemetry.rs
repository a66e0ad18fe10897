//! Telemetry for executor observability.
//!
//! Executors, tasks and the pool controller emit structured events through a
//! [`TelemetrySink`]. They never decide how events are presented; a sink may
//! log them, count them, or drop them.
//!
//! # Example
//!
//! ```
//! use policypool::telemetry::{TelemetryEvent, TelemetrySink};
//!
//! struct Counter(std::sync::atomic::AtomicUsize);
//!
//! impl TelemetrySink for Counter {
//!     fn emit(&self, _event: TelemetryEvent) {
//!         self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
//!     }
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::controller::ResizeReason;
use crate::policy::ExecutorState;
use crate::task::AbortReason;

// =============================================================================
// Telemetry Events
// =============================================================================

/// Events emitted by executors and the pool controller.
#[derive(Clone, Debug)]
pub enum TelemetryEvent {
    // -------------------------------------------------------------------------
    // Task Lifecycle Events
    // -------------------------------------------------------------------------
    /// A task was accepted by a policy executor.
    TaskSubmitted {
        executor: Arc<str>,
        task_id: u64,
        task_name: String,
    },

    /// A task started running.
    TaskStarted {
        executor: Arc<str>,
        task_id: u64,
        queued_for: Duration,
    },

    /// A task body returned or panicked.
    TaskCompleted {
        executor: Arc<str>,
        task_id: u64,
        success: bool,
        duration: Duration,
    },

    TaskCancelled {
        executor: Arc<str>,
        task_id: u64,
        while_running: bool,
    },

    /// A task was dropped before it ran.
    TaskAborted {
        executor: Arc<str>,
        task_id: u64,
        reason: AbortReason,
    },

    // -------------------------------------------------------------------------
    // Executor Events
    // -------------------------------------------------------------------------
    /// An enqueue found no free queue slot within its wait.
    QueueFull {
        executor: Arc<str>,
        max_queue_size: usize,
    },

    ExecutorStateChanged {
        executor: Arc<str>,
        from: ExecutorState,
        to: ExecutorState,
    },

    // -------------------------------------------------------------------------
    // Pool Events
    // -------------------------------------------------------------------------
    PoolResized {
        pool: Arc<str>,
        from: usize,
        to: usize,
        reason: ResizeReason,
    },

    /// Work is queued but nothing has completed for a whole tick.
    HangDetected {
        pool: Arc<str>,
        pool_size: usize,
        queue_depth: usize,
    },

    HangResolved {
        pool: Arc<str>,
        pool_size: usize,
        duration: Duration,
    },
}

impl TelemetryEvent {
    /// Returns a short name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TaskSubmitted { .. } => "task_submitted",
            Self::TaskStarted { .. } => "task_started",
            Self::TaskCompleted { .. } => "task_completed",
            Self::TaskCancelled { .. } => "task_cancelled",
            Self::TaskAborted { .. } => "task_aborted",
            Self::QueueFull { .. } => "queue_full",
            Self::ExecutorStateChanged { .. } => "executor_state_changed",
            Self::PoolResized { .. } => "pool_resized",
            Self::HangDetected { .. } => "hang_detected",
            Self::HangResolved { .. } => "hang_resolved",
        }
    }

    /// Returns the policy executor this event concerns, if any.
    pub fn executor(&self) -> Option<&str> {
        match self {
            Self::TaskSubmitted { executor, .. }
            | Self::TaskStarted { executor, .. }
            | Self::TaskCompleted { executor, .. }
            | Self::TaskCancelled { executor, .. }
            | Self::TaskAborted { executor, .. }
            | Self::QueueFull { executor, .. }
            | Self::ExecutorStateChanged { executor, .. } => Some(&**executor),
            Self::PoolResized { .. } | Self::HangDetected { .. } | Self::HangResolved { .. } => {
                None
            }
        }
    }
}

// =============================================================================
// Telemetry Sink Trait
// =============================================================================

/// Sink for telemetry events.
///
/// Events may be emitted from any pool thread, so implementations must be
/// thread-safe and should return quickly. A panicking sink is contained and
/// logged.
pub trait TelemetrySink: Send + Sync {
    fn emit(&self, event: TelemetryEvent);
}

// =============================================================================
// Built-in Sink Implementations
// =============================================================================

/// No-op sink for when telemetry is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTelemetrySink;

impl TelemetrySink for NullTelemetrySink {
    fn emit(&self, _event: TelemetryEvent) {}
}

/// Sink that logs events using the `tracing` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetrySink;

impl TelemetrySink for TracingTelemetrySink {
    fn emit(&self, event: TelemetryEvent) {
        match &event {
            TelemetryEvent::TaskSubmitted {
                executor,
                task_id,
                task_name,
            } => {
                tracing::trace!(executor = %executor, task_id, task = %task_name, "Task submitted");
            }
            TelemetryEvent::TaskStarted {
                executor,
                task_id,
                queued_for,
            } => {
                tracing::trace!(
                    executor = %executor,
                    task_id,
                    queued_ms = queued_for.as_millis(),
                    "Task started"
                );
            }
            TelemetryEvent::TaskCompleted {
                executor,
                task_id,
                success,
                duration,
            } => {
                tracing::debug!(
                    executor = %executor,
                    task_id,
                    success,
                    duration_ms = duration.as_millis(),
                    "Task completed"
                );
            }
            TelemetryEvent::TaskCancelled {
                executor,
                task_id,
                while_running,
            } => {
                tracing::debug!(executor = %executor, task_id, while_running, "Task cancelled");
            }
            TelemetryEvent::TaskAborted {
                executor,
                task_id,
                reason,
            } => {
                tracing::debug!(executor = %executor, task_id, reason = %reason, "Task aborted");
            }
            TelemetryEvent::QueueFull {
                executor,
                max_queue_size,
            } => {
                tracing::warn!(executor = %executor, max_queue_size, "Policy executor queue full");
            }
            TelemetryEvent::ExecutorStateChanged { executor, from, to } => {
                tracing::info!(executor = %executor, from = %from, to = %to, "Executor state changed");
            }
            TelemetryEvent::PoolResized {
                pool,
                from,
                to,
                reason,
            } => {
                tracing::info!(pool = %pool, from, to, reason = %reason, "Pool resized");
            }
            TelemetryEvent::HangDetected {
                pool,
                pool_size,
                queue_depth,
            } => {
                tracing::warn!(pool = %pool, pool_size, queue_depth, "Pool hang detected");
            }
            TelemetryEvent::HangResolved {
                pool,
                pool_size,
                duration,
            } => {
                tracing::info!(
                    pool = %pool,
                    pool_size,
                    duration_ms = duration.as_millis(),
                    "Pool hang resolved"
                );
            }
        }
    }
}

/// Sink that forwards events to several sinks.
#[derive(Default)]
pub struct MultiplexTelemetrySink {
    sinks: Vec<Arc<dyn TelemetrySink>>,
}

impl MultiplexTelemetrySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a sink.
    pub fn with_sink(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl TelemetrySink for MultiplexTelemetrySink {
    fn emit(&self, event: TelemetryEvent) {
        for sink in &self.sinks {
            sink.emit(event.clone());
        }
    }
}

impl std::fmt::Debug for MultiplexTelemetrySink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiplexTelemetrySink")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;

    /// Records every event for assertions.
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        events: Mutex<Vec<TelemetryEvent>>,
    }

    impl RecordingSink {
        pub(crate) fn event_types(&self) -> Vec<&'static str> {
            self.events.lock().iter().map(|e| e.event_type()).collect()
        }

        pub(crate) fn count(&self, event_type: &str) -> usize {
            self.events
                .lock()
                .iter()
                .filter(|e| e.event_type() == event_type)
                .count()
        }
    }

    impl TelemetrySink for RecordingSink {
        fn emit(&self, event: TelemetryEvent) {
            self.events.lock().push(event);
        }
    }
}
