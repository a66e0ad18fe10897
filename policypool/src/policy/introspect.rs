//! Point-in-time diagnostics for a policy executor.

use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use super::config::{display_limit, PolicySettings, REPORT_TASK_LIMIT};
use super::executor::PolicyExecutor;
use super::state::ExecutorState;
use crate::pool::PoolStats;
use crate::queue::ExpeditedQueue;
use crate::task::{PolicyTask, QueuedTask, TaskInfo};

/// Snapshot returned by [`PolicyExecutor::introspect`].
#[derive(Debug, Clone)]
pub struct PolicyExecutorReport {
    pub id: String,
    pub state: ExecutorState,
    pub settings: PolicySettings,
    pub free_queue_slots: isize,
    pub free_max_permits: isize,
    pub free_core_permits: isize,
    pub queued: usize,
    pub running: usize,
    pub withheld: isize,
    pub dispatched: usize,
    pub peak_dispatched: usize,
    pub submitted: u64,
    pub completed: u64,
    pub rejected: u64,
    pub caller_runs: u64,
    /// The first few queued tasks, in dequeue order.
    pub queued_tasks: Vec<TaskInfo>,
    pub running_tasks: Vec<TaskInfo>,
    pub pool: PoolStats,
}

impl PolicyExecutor {
    pub fn introspect(&self) -> PolicyExecutorReport {
        let inner = &self.inner;
        let mut queued_tasks = Vec::new();
        inner.queue.for_each(&mut |task: &Arc<dyn QueuedTask>| {
            if queued_tasks.len() < REPORT_TASK_LIMIT {
                queued_tasks.push(task.info());
            }
        });
        let running_tasks = inner
            .running
            .iter()
            .take(REPORT_TASK_LIMIT)
            .map(|entry| entry.value().info())
            .collect();

        PolicyExecutorReport {
            id: inner.id.to_string(),
            state: inner.state.load(),
            settings: inner.settings(),
            free_queue_slots: inner.queue_permits.available(),
            free_max_permits: inner.max_permits.available(),
            free_core_permits: inner.core_permits.available(),
            queued: inner.queue.len(),
            running: inner.running.len(),
            withheld: inner.withheld.load(Ordering::SeqCst),
            dispatched: inner.dispatched.load(Ordering::SeqCst),
            peak_dispatched: inner.peak_dispatched.load(Ordering::Relaxed),
            submitted: inner.counters.submitted.load(Ordering::Relaxed),
            completed: inner.counters.completed.load(Ordering::Relaxed),
            rejected: inner.counters.rejected.load(Ordering::Relaxed),
            caller_runs: inner.counters.caller_runs.load(Ordering::Relaxed),
            queued_tasks,
            running_tasks,
            pool: inner.global.stats(),
        }
    }
}

fn write_tasks(f: &mut fmt::Formatter<'_>, label: &str, tasks: &[TaskInfo], total: usize) -> fmt::Result {
    writeln!(f, "  {} ({}):", label, total)?;
    for task in tasks {
        write!(
            f,
            "    #{} {} [{}] queued {:?}",
            task.id, task.name, task.state, task.queued_for
        )?;
        if let Some(ran_for) = task.ran_for {
            write!(f, ", running {:?}", ran_for)?;
        }
        writeln!(f)?;
    }
    if total > tasks.len() {
        writeln!(f, "    ... {} more", total - tasks.len())?;
    }
    Ok(())
}

impl fmt::Display for PolicyExecutorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = &self.settings;
        writeln!(f, "Policy executor '{}' [{}]", self.id, self.state)?;
        writeln!(
            f,
            "  limits: core={} max={} queue={} wait={:?} on_full={} policy={}",
            s.core_concurrency,
            display_limit(s.max_concurrency),
            display_limit(s.max_queue_size),
            s.max_wait_for_enqueue,
            s.queue_full_action,
            s.max_policy
        )?;
        if let Some(timeout) = s.start_timeout {
            writeln!(f, "  start timeout: {:?}", timeout)?;
        }
        writeln!(
            f,
            "  free permits: queue={} max={} core={}",
            self.free_queue_slots, self.free_max_permits, self.free_core_permits
        )?;
        writeln!(
            f,
            "  dispatch: withheld={} dispatched={} peak={}",
            self.withheld, self.dispatched, self.peak_dispatched
        )?;
        writeln!(
            f,
            "  tasks: submitted={} completed={} rejected={} caller_runs={}",
            self.submitted, self.completed, self.rejected, self.caller_runs
        )?;
        write_tasks(f, "queued", &self.queued_tasks, self.queued)?;
        write_tasks(f, "running", &self.running_tasks, self.running)?;
        write!(f, "{}", self.pool)
    }
}

#[cfg(test)]
mod tests {
    use crate::policy::PolicyExecutor;
    use crate::pool::{GlobalExecutor, PoolConfig};
    use crate::sync::CountDownLatch;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_report_lists_queued_and_running() {
        let global =
            GlobalExecutor::new(PoolConfig::default().with_name("report").with_threads(2, 2))
                .unwrap();
        let executor = PolicyExecutor::new("reporting", global);
        executor.max_concurrency(1).unwrap().max_queue_size(50).unwrap();

        let started = Arc::new(CountDownLatch::new(1));
        let release = Arc::new(CountDownLatch::new(1));
        {
            let started = Arc::clone(&started);
            let release = Arc::clone(&release);
            executor
                .submit(move || {
                    started.count_down();
                    let _ = release.wait(Some(Duration::from_secs(10)));
                })
                .unwrap();
        }
        assert_eq!(started.wait(Some(Duration::from_secs(5))), Ok(true));
        for _ in 0..15 {
            executor.submit(|| ()).unwrap();
        }

        let report = executor.introspect();
        assert_eq!(report.queued, 15);
        assert_eq!(report.queued_tasks.len(), 10);
        assert_eq!(report.running_tasks.len(), 1);
        assert_eq!(report.free_queue_slots, 35);

        let text = report.to_string();
        assert!(text.contains("Policy executor 'reporting' [Active]"));
        assert!(text.contains("... 5 more"));
        assert!(text.contains("Pool 'report'"));
        release.count_down();
    }
}
