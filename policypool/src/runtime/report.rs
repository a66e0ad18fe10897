//! Runtime-wide diagnostics.

use std::fmt;

use crate::controller::ControllerStats;
use crate::policy::PolicyExecutorReport;
use crate::pool::PoolStats;

/// Snapshot returned by [`Runtime::introspect`](super::Runtime::introspect).
#[derive(Debug, Clone)]
pub struct RuntimeReport {
    pub pool: PoolStats,
    /// `None` when adaptive sizing is disabled.
    pub controller: Option<ControllerStats>,
    pub policies: Vec<PolicyExecutorReport>,
    /// Live timer entries, including the controller's tick.
    pub scheduled_pending: usize,
}

impl fmt::Display for RuntimeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.pool)?;
        match &self.controller {
            Some(stats) => writeln!(f, "{}", stats)?,
            None => writeln!(f, "Pool controller disabled")?,
        }
        writeln!(f, "Timer: {} pending entries", self.scheduled_pending)?;
        if self.policies.is_empty() {
            write!(f, "No policy executors")?;
        }
        for (i, policy) in self.policies.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", policy.to_string().trim_end())?;
        }
        Ok(())
    }
}
