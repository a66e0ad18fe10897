//! CPU usage sampling for the growth veto.

use parking_lot::Mutex;

/// Reports system-wide CPU usage.
pub trait CpuSampler: Send + Sync {
    /// Busy fraction (0.0 - 1.0) since the previous call, or `None` when
    /// unknown.
    fn sample(&self) -> Option<f64>;
}

/// Sampler for platforms without a usage source. Never vetoes growth.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCpuSampler;

impl CpuSampler for NoCpuSampler {
    fn sample(&self) -> Option<f64> {
        None
    }
}

/// Reads aggregate CPU time from `/proc/stat`.
///
/// # Platform Support
///
/// - **Linux**: Parses the `cpu` line of `/proc/stat`
/// - **Other platforms**: Always returns `None`
#[derive(Debug, Default)]
pub struct ProcStatSampler {
    previous: Mutex<Option<CpuTimes>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CpuTimes {
    busy: u64,
    total: u64,
}

impl ProcStatSampler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CpuSampler for ProcStatSampler {
    fn sample(&self) -> Option<f64> {
        let current = read_cpu_times()?;
        let previous = self.previous.lock().replace(current)?;
        let total = current.total.checked_sub(previous.total)?;
        if total == 0 {
            return None;
        }
        let busy = current.busy.saturating_sub(previous.busy);
        Some((busy as f64 / total as f64).clamp(0.0, 1.0))
    }
}

#[cfg(target_os = "linux")]
fn read_cpu_times() -> Option<CpuTimes> {
    let content = std::fs::read_to_string("/proc/stat").ok()?;
    parse_cpu_line(content.lines().next()?)
}

#[cfg(not(target_os = "linux"))]
fn read_cpu_times() -> Option<CpuTimes> {
    None
}

/// Parses `cpu  user nice system idle iowait irq softirq steal ...`.
fn parse_cpu_line(line: &str) -> Option<CpuTimes> {
    let mut fields = line.split_whitespace();
    if fields.next()? != "cpu" {
        return None;
    }
    let values: Vec<u64> = fields.map_while(|v| v.parse().ok()).collect();
    if values.len() < 4 {
        return None;
    }
    let total: u64 = values.iter().take(8).sum();
    let idle = values[3] + values.get(4).copied().unwrap_or(0);
    Some(CpuTimes {
        busy: total.saturating_sub(idle),
        total,
    })
}
