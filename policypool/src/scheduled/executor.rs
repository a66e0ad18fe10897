//! Delayed and periodic execution.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::future::{ScheduledFuture, ScheduledShared};
use super::timer::{Timer, TimerHandle};
use crate::error::ExecutorError;
use crate::executor::Executor;
use crate::panic::{panic_message, PanicError};
use crate::sync::interrupt;
use crate::task::{next_task_id, AbortReason, PolicyTaskCallback, TaskError, TaskInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Period {
    Once,
    /// Next fire is the previous scheduled fire plus the period.
    FixedRate(Duration),
    /// Next fire is the end of the previous run plus the delay.
    FixedDelay(Duration),
}

type Body<T> = Box<dyn FnMut() -> Option<T> + Send>;

/// One scheduled task travelling timer -> executor -> timer.
struct Schedule<T> {
    future: Arc<ScheduledShared<T>>,
    body: Mutex<Body<T>>,
    period: Period,
    target: Arc<dyn Executor>,
    timer: TimerHandle,
}

impl<T: Send + 'static> Schedule<T> {
    fn arm(self: &Arc<Self>, at: Instant) -> Result<(), ExecutorError> {
        let schedule = Arc::clone(self);
        let entry = self.timer.schedule(
            at,
            Box::new(move || {
                schedule.fire(at);
                None
            }),
        )?;
        self.future.armed(at, entry);
        Ok(())
    }

    /// Runs on the timer thread. Hands the body to the target executor.
    fn fire(self: &Arc<Self>, scheduled_at: Instant) {
        if self.future.is_done() {
            return;
        }
        let schedule = Arc::clone(self);
        let handoff = Arc::new(Handoff {
            future: Arc::downgrade(&self.future),
        });
        match self
            .target
            .submit_job(Box::new(move || schedule.run(scheduled_at)), handoff)
        {
            Ok(Some(task)) => self.future.handed_off(task),
            Ok(None) => {}
            Err(e) => {
                warn!(
                    task = self.future.id,
                    target = self.target.name(),
                    error = %e,
                    "Scheduled task could not be dispatched"
                );
                self.future.complete(Err(TaskError::from(e)));
            }
        }
    }

    fn run(self: &Arc<Self>, scheduled_at: Instant) {
        if self.future.is_done() {
            return;
        }
        self.future.set_running(Some(interrupt::current()));
        let result = {
            let mut body = self.body.lock();
            panic::catch_unwind(AssertUnwindSafe(|| (*body)()))
        };
        self.future.set_running(None);

        let value = match result {
            Ok(Some(value)) => value,
            Ok(None) => return,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(task = self.future.id, panic = %message, "Scheduled task panicked");
                self.future
                    .complete(Err(TaskError::failed(PanicError { message })));
                return;
            }
        };
        self.future.record_run();

        let next = match self.period {
            Period::Once => {
                self.future.complete(Ok(value));
                return;
            }
            Period::FixedRate(period) => scheduled_at + period,
            Period::FixedDelay(delay) => Instant::now() + delay,
        };
        if self.future.is_done() {
            return;
        }
        if let Err(e) = self.arm(next) {
            debug!(task = self.future.id, error = %e, "Periodic task not rescheduled");
            self.future.complete(Err(TaskError::from(e)));
        }
    }
}

/// Follows the policy task a fire was handed to. A task that ends without
/// running the body settles the scheduled future.
struct Handoff<T> {
    future: Weak<ScheduledShared<T>>,
}

impl<T: Send + 'static> PolicyTaskCallback for Handoff<T> {
    fn name(&self) -> Option<String> {
        self.future
            .upgrade()
            .map(|future| format!("scheduled-{}", future.id))
    }

    fn on_end(&self, task: &TaskInfo, aborted: bool, failure: Option<&TaskError>) {
        if !aborted {
            return;
        }
        if let Some(future) = self.future.upgrade() {
            debug!(
                task = future.id,
                policy_task = task.id,
                "Scheduled run aborted by its executor"
            );
            let error = failure
                .cloned()
                .unwrap_or(TaskError::Aborted(AbortReason::Rejected));
            future.complete(Err(error));
        }
    }

    fn on_cancel(&self, task: &TaskInfo, while_running: bool) {
        if let Some(future) = self.future.upgrade() {
            if future.complete(Err(TaskError::Cancelled)) {
                debug!(
                    task = future.id,
                    policy_task = task.id,
                    while_running,
                    "Scheduled run cancelled by its executor"
                );
            }
        }
    }
}

/// Runs tasks after a delay or periodically.
///
/// The timer thread only keeps time; when a task is due its body is handed
/// to the target executor, the global pool unless another target was chosen
/// with [`with_target`](Self::with_target).
#[derive(Clone)]
pub struct ScheduledExecutor {
    timer: Arc<Timer>,
    target: Arc<dyn Executor>,
}

impl fmt::Debug for ScheduledExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledExecutor")
            .field("timer", &self.timer.name())
            .field("target", &self.target.name())
            .finish()
    }
}

impl ScheduledExecutor {
    pub fn new(timer: Arc<Timer>, target: Arc<dyn Executor>) -> Self {
        Self { timer, target }
    }

    /// Same timer, different dispatch target.
    pub fn with_target(&self, target: Arc<dyn Executor>) -> Self {
        Self {
            timer: Arc::clone(&self.timer),
            target,
        }
    }

    pub fn timer(&self) -> &Arc<Timer> {
        &self.timer
    }

    pub fn target_name(&self) -> &str {
        self.target.name()
    }

    /// Runs `f` once after `delay`.
    pub fn schedule<F>(&self, delay: Duration, f: F) -> Result<ScheduledFuture<()>, ExecutorError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule_callable(delay, f)
    }

    /// Runs `f` once after `delay`; its value completes the future.
    pub fn schedule_callable<T, F>(
        &self,
        delay: Duration,
        f: F,
    ) -> Result<ScheduledFuture<T>, ExecutorError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let mut f = Some(f);
        self.start(delay, Period::Once, Box::new(move || f.take().map(|f| f())))
    }

    /// Runs `f` after `initial`, then every `period` measured from the
    /// previous scheduled start. Runs never overlap; a late run is followed
    /// immediately by the next one.
    pub fn schedule_at_fixed_rate<F>(
        &self,
        initial: Duration,
        period: Duration,
        mut f: F,
    ) -> Result<ScheduledFuture<()>, ExecutorError>
    where
        F: FnMut() + Send + 'static,
    {
        if period.is_zero() {
            return Err(ExecutorError::invalid("period must be non-zero"));
        }
        self.start(
            initial,
            Period::FixedRate(period),
            Box::new(move || {
                f();
                Some(())
            }),
        )
    }

    /// Runs `f` after `initial`, then `delay` after each run finishes.
    pub fn schedule_with_fixed_delay<F>(
        &self,
        initial: Duration,
        delay: Duration,
        mut f: F,
    ) -> Result<ScheduledFuture<()>, ExecutorError>
    where
        F: FnMut() + Send + 'static,
    {
        if delay.is_zero() {
            return Err(ExecutorError::invalid("delay must be non-zero"));
        }
        self.start(
            initial,
            Period::FixedDelay(delay),
            Box::new(move || {
                f();
                Some(())
            }),
        )
    }

    fn start<T: Send + 'static>(
        &self,
        delay: Duration,
        period: Period,
        body: Body<T>,
    ) -> Result<ScheduledFuture<T>, ExecutorError> {
        let id = next_task_id();
        let future = Arc::new(ScheduledShared::new(id, period != Period::Once));
        let schedule = Arc::new(Schedule {
            future: Arc::clone(&future),
            body: Mutex::new(body),
            period,
            target: Arc::clone(&self.target),
            timer: self.timer.handle(),
        });
        schedule.arm(Instant::now() + delay)?;
        debug!(
            task = id,
            delay_ms = delay.as_millis(),
            ?period,
            target = self.target.name(),
            "Task scheduled"
        );
        Ok(ScheduledFuture { shared: future })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{GlobalExecutor, PoolConfig};
    use crate::sync::CountDownLatch;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn scheduler() -> (ScheduledExecutor, GlobalExecutor) {
        let pool = GlobalExecutor::new(PoolConfig::default().with_name("sched-test")).unwrap();
        let timer = Arc::new(Timer::new("sched-test-timer").unwrap());
        (ScheduledExecutor::new(timer, Arc::new(pool.clone())), pool)
    }

    #[test]
    fn test_schedule_callable_runs_on_pool() {
        let (scheduler, pool) = scheduler();
        let start = Instant::now();
        let future = scheduler
            .schedule_callable(Duration::from_millis(30), || {
                std::thread::current().name().map(str::to_string)
            })
            .unwrap();
        let thread = future.get_timeout(Duration::from_secs(5)).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert!(thread.unwrap().starts_with("sched-test"));
        assert_eq!(future.runs(), 1);
        assert!(future.delay().is_none());
        pool.shutdown();
    }

    #[test]
    fn test_cancel_before_fire() {
        let (scheduler, pool) = scheduler();
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        let future = scheduler
            .schedule(Duration::from_millis(50), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        assert!(future.cancel(false));
        assert!(!future.cancel(false));
        assert!(matches!(future.get(), Err(TaskError::Cancelled)));
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        pool.shutdown();
    }

    #[test]
    fn test_fixed_rate_repeats_until_cancelled() {
        let (scheduler, pool) = scheduler();
        let three = Arc::new(CountDownLatch::new(3));
        let signal = Arc::clone(&three);
        let future = scheduler
            .schedule_at_fixed_rate(Duration::ZERO, Duration::from_millis(10), move || {
                signal.count_down();
            })
            .unwrap();
        assert!(three.wait(Some(Duration::from_secs(5))).unwrap());
        assert!(future.cancel(false));
        assert!(future.runs() >= 3);
        assert!(future.is_periodic());
        assert!(future.is_cancelled());
        pool.shutdown();
    }

    #[test]
    fn test_fixed_delay_failure_stops_rescheduling() {
        let (scheduler, pool) = scheduler();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let future = scheduler
            .schedule_with_fixed_delay(Duration::ZERO, Duration::from_millis(5), move || {
                if counter.fetch_add(1, Ordering::SeqCst) == 2 {
                    panic!("third run fails");
                }
            })
            .unwrap();
        let err = future.get_timeout(Duration::from_secs(5)).unwrap_err();
        assert!(err.is_failed());
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert_eq!(future.runs(), 2);
        pool.shutdown();
    }

    #[test]
    fn test_zero_period_rejected() {
        let (scheduler, pool) = scheduler();
        assert!(matches!(
            scheduler.schedule_at_fixed_rate(Duration::ZERO, Duration::ZERO, || {}),
            Err(ExecutorError::InvalidConfiguration(_))
        ));
        pool.shutdown();
    }

    #[test]
    fn test_rejected_dispatch_fails_future() {
        let (scheduler, pool) = scheduler();
        pool.shutdown();
        let future = scheduler.schedule(Duration::ZERO, || {}).unwrap();
        let err = future.get_timeout(Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, TaskError::Aborted(AbortReason::Shutdown)));
    }

    #[test]
    fn test_handle_of_non_clone_value_debugs_and_cancels() {
        struct Report;
        let (scheduler, pool) = scheduler();
        let future = scheduler
            .schedule_callable(Duration::from_secs(3600), || Report)
            .unwrap();
        let debug = format!("{future:?}");
        assert!(debug.contains("ScheduledFuture"));
        assert!(debug.contains("done: false"));
        assert!(future.cancel(false));
        assert!(future.is_done());
        assert_eq!(future.runs(), 0);
        pool.shutdown();
    }
}
