//! Bulk submission: `invoke_all` and `invoke_any`.

use std::error::Error as StdError;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use super::config::MaxPolicy;
use super::executor::{fallible_work, PolicyExecutor, PolicyInner};
use crate::error::ExecutorError;
use crate::task::{InvokeAnyLatch, PolicyTaskCallback, QueuedTask, TaskError, TaskFuture};

impl PolicyInner {
    /// Takes a concurrency slot for running a task on the caller, if the
    /// policy allows it.
    fn borrow_caller(&self, timed: bool) -> bool {
        !timed && self.settings().max_policy == MaxPolicy::Loose && self.max_permits.try_acquire()
    }

    fn run_on_caller(self: &Arc<Self>, task: Arc<dyn QueuedTask>, invoke_any_count: usize) {
        if task.accept(invoke_any_count) {
            self.run_tracked(task);
        }
        self.max_permits.release(1);
        self.dispatch_if_possible();
    }
}

fn cancel_unfinished<T: Clone + Send + 'static>(futures: &[Arc<TaskFuture<T>>]) {
    for future in futures {
        if !future.is_done() {
            future.cancel(true);
        }
    }
}

impl PolicyExecutor {
    /// Runs every task and waits for all of them.
    ///
    /// Under [`MaxPolicy::Loose`] the last task runs on the calling thread
    /// when a concurrency slot is free.
    pub fn invoke_all<T, E, F>(&self, tasks: Vec<F>) -> Result<Vec<Arc<TaskFuture<T>>>, ExecutorError>
    where
        T: Clone + Send + 'static,
        E: Into<Box<dyn StdError + Send + Sync>>,
        F: FnOnce() -> Result<T, E> + Send + 'static,
    {
        self.invoke_all_with(tasks, None, None)
    }

    /// Like [`invoke_all`](Self::invoke_all) but cancels whatever has not
    /// finished when `timeout` elapses. Never runs on the caller.
    pub fn invoke_all_timeout<T, E, F>(
        &self,
        tasks: Vec<F>,
        timeout: Duration,
    ) -> Result<Vec<Arc<TaskFuture<T>>>, ExecutorError>
    where
        T: Clone + Send + 'static,
        E: Into<Box<dyn StdError + Send + Sync>>,
        F: FnOnce() -> Result<T, E> + Send + 'static,
    {
        self.invoke_all_with(tasks, Some(timeout), None)
    }

    /// The general form of `invoke_all`. Every task shares `callback`.
    pub fn invoke_all_with<T, E, F>(
        &self,
        tasks: Vec<F>,
        timeout: Option<Duration>,
        callback: Option<Arc<dyn PolicyTaskCallback>>,
    ) -> Result<Vec<Arc<TaskFuture<T>>>, ExecutorError>
    where
        T: Clone + Send + 'static,
        E: Into<Box<dyn StdError + Send + Sync>>,
        F: FnOnce() -> Result<T, E> + Send + 'static,
    {
        let inner = &self.inner;
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let futures: Vec<Arc<TaskFuture<T>>> = tasks
            .into_iter()
            .map(|f| inner.new_task(fallible_work(f), callback.clone(), None))
            .collect();
        if futures.is_empty() {
            return Ok(futures);
        }

        let on_caller = inner.borrow_caller(timeout.is_some());
        let queued = if on_caller {
            &futures[..futures.len() - 1]
        } else {
            &futures[..]
        };
        debug!(executor = %inner.id, tasks = futures.len(), on_caller, "invoke_all");

        for future in queued {
            if let Err(error) = inner.enqueue(Arc::clone(future) as Arc<dyn QueuedTask>, 0) {
                cancel_unfinished(&futures);
                if on_caller {
                    inner.max_permits.release(1);
                }
                return Err(error);
            }
        }
        if on_caller {
            if let Some(last) = futures.last() {
                inner.run_on_caller(Arc::clone(last) as Arc<dyn QueuedTask>, 0);
            }
        }

        for future in &futures {
            let waited = match deadline {
                Some(deadline) => {
                    future.get_timeout(deadline.saturating_duration_since(Instant::now()))
                }
                None => future.get(),
            };
            match waited {
                Err(TaskError::Timeout) => {
                    debug!(executor = %inner.id, "invoke_all timed out, cancelling unfinished tasks");
                    cancel_unfinished(&futures);
                    return Ok(futures);
                }
                Err(TaskError::Interrupted) => {
                    cancel_unfinished(&futures);
                    return Err(ExecutorError::Interrupted);
                }
                _ => {}
            }
        }
        Ok(futures)
    }

    /// Runs the tasks and returns the first successful result, cancelling
    /// the rest.
    ///
    /// If none succeeds the error is the most severe seen: a task failure
    /// over an abort over a cancellation.
    pub fn invoke_any<T, E, F>(&self, tasks: Vec<F>) -> Result<T, TaskError>
    where
        T: Clone + Send + 'static,
        E: Into<Box<dyn StdError + Send + Sync>>,
        F: FnOnce() -> Result<T, E> + Send + 'static,
    {
        self.invoke_any_with(tasks, None, None)
    }

    pub fn invoke_any_timeout<T, E, F>(&self, tasks: Vec<F>, timeout: Duration) -> Result<T, TaskError>
    where
        T: Clone + Send + 'static,
        E: Into<Box<dyn StdError + Send + Sync>>,
        F: FnOnce() -> Result<T, E> + Send + 'static,
    {
        self.invoke_any_with(tasks, Some(timeout), None)
    }

    /// The general form of `invoke_any`. Every task shares `callback`.
    pub fn invoke_any_with<T, E, F>(
        &self,
        tasks: Vec<F>,
        timeout: Option<Duration>,
        callback: Option<Arc<dyn PolicyTaskCallback>>,
    ) -> Result<T, TaskError>
    where
        T: Clone + Send + 'static,
        E: Into<Box<dyn StdError + Send + Sync>>,
        F: FnOnce() -> Result<T, E> + Send + 'static,
    {
        let inner = &self.inner;
        let count = tasks.len();
        if count == 0 {
            return Err(TaskError::failed(ExecutorError::invalid(
                "invoke_any needs at least one task",
            )));
        }
        let latch = Arc::new(InvokeAnyLatch::new(count));
        let futures: Vec<Arc<TaskFuture<T>>> = tasks
            .into_iter()
            .map(|f| inner.new_task(fallible_work(f), callback.clone(), Some(Arc::clone(&latch))))
            .collect();

        if count == 1 && inner.borrow_caller(timeout.is_some()) {
            let only = Arc::clone(&futures[0]);
            inner.run_on_caller(only.clone() as Arc<dyn QueuedTask>, 1);
            return only.get();
        }

        for future in &futures {
            if let Err(error) = inner.enqueue(Arc::clone(future) as Arc<dyn QueuedTask>, count) {
                cancel_unfinished(&futures);
                return Err(error.into());
            }
        }
        let outcome = latch.wait(timeout);
        cancel_unfinished(&futures);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{GlobalExecutor, PoolConfig};
    use crate::sync::interrupt;
    use crate::sync::CountDownLatch;
    use crate::task::TaskInfo;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type BoxedTask<T> = Box<dyn FnOnce() -> Result<T, TaskError> + Send>;

    fn executor(max: usize) -> PolicyExecutor {
        let global =
            GlobalExecutor::new(PoolConfig::default().with_name("invoke").with_threads(4, 4))
                .unwrap();
        let executor = PolicyExecutor::new("invoke", global);
        executor.max_concurrency(max).unwrap();
        executor
    }

    #[test]
    fn test_invoke_all_returns_every_result() {
        let executor = executor(2);
        let tasks: Vec<_> = (0..8)
            .map(|i| move || Ok::<_, TaskError>(i * 10))
            .collect();
        let futures = executor.invoke_all(tasks).unwrap();
        let results: Vec<_> = futures.iter().map(|f| f.get().unwrap()).collect();
        assert_eq!(results, (0..8).map(|i| i * 10).collect::<Vec<_>>());
    }

    #[test]
    fn test_invoke_all_runs_last_task_on_caller() {
        let executor = executor(4);
        let caller = std::thread::current().id();
        let tasks: Vec<_> = (0..3)
            .map(|_| move || Ok::<_, TaskError>(std::thread::current().id()))
            .collect();
        let futures = executor.invoke_all(tasks).unwrap();
        assert_eq!(futures[2].get().unwrap(), caller);
    }

    #[test]
    fn test_strict_policy_never_runs_on_caller() {
        let executor = executor(4);
        executor.max_policy(MaxPolicy::Strict).unwrap();
        let caller = std::thread::current().id();
        let tasks: Vec<_> = (0..3)
            .map(|_| move || Ok::<_, TaskError>(std::thread::current().id()))
            .collect();
        for future in executor.invoke_all(tasks).unwrap() {
            assert_ne!(future.get().unwrap(), caller);
        }
    }

    #[test]
    fn test_invoke_all_timeout_cancels_stragglers() {
        let executor = executor(2);
        let tasks: Vec<BoxedTask<u8>> = vec![
            Box::new(|| Ok(1)),
            Box::new(|| {
                interrupt::sleep(Duration::from_secs(10))?;
                Ok(2)
            }),
        ];
        let futures = executor
            .invoke_all_timeout(tasks, Duration::from_millis(100))
            .unwrap();
        assert_eq!(futures[0].get().unwrap(), 1);
        assert!(futures[1].is_cancelled());
    }

    #[test]
    fn test_invoke_any_returns_first_success_early() {
        let executor = executor(4);
        let slow_started = Arc::new(CountDownLatch::new(1));
        let cancelled = Arc::new(AtomicUsize::new(0));
        let slow = {
            let slow_started = Arc::clone(&slow_started);
            let cancelled = Arc::clone(&cancelled);
            move || -> Result<&'static str, TaskError> {
                slow_started.count_down();
                if interrupt::sleep(Duration::from_secs(10)).is_err() {
                    cancelled.fetch_add(1, Ordering::SeqCst);
                }
                Ok("slow")
            }
        };
        let fast = {
            let slow_started = Arc::clone(&slow_started);
            move || -> Result<&'static str, TaskError> {
                slow_started.wait(Some(Duration::from_secs(5)))?;
                Ok("fast")
            }
        };
        let tasks: Vec<BoxedTask<&'static str>> = vec![Box::new(slow), Box::new(fast)];
        let started = Instant::now();
        assert_eq!(executor.invoke_any(tasks).unwrap(), "fast");
        assert!(started.elapsed() < Duration::from_secs(5));

        let deadline = Instant::now() + Duration::from_secs(5);
        while cancelled.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(cancelled.load(Ordering::SeqCst), 1);
    }

    /// Counts cancellations of running tasks and reported failures.
    #[derive(Default)]
    struct LoserTally {
        cancelled_running: AtomicUsize,
        failed: AtomicUsize,
    }

    impl PolicyTaskCallback for LoserTally {
        fn on_end(&self, _task: &TaskInfo, _aborted: bool, failure: Option<&TaskError>) {
            if failure.is_some() {
                self.failed.fetch_add(1, Ordering::SeqCst);
            }
        }

        fn on_cancel(&self, _task: &TaskInfo, while_running: bool) {
            if while_running {
                self.cancelled_running.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn test_invoke_any_late_failures_do_not_override_winner() {
        let executor = executor(4);
        let tally = Arc::new(LoserTally::default());
        let losers_started = Arc::new(CountDownLatch::new(2));
        let loser = |started: Arc<CountDownLatch>| -> BoxedTask<u8> {
            Box::new(move || {
                started.count_down();
                let _ = interrupt::sleep(Duration::from_secs(10));
                Err(TaskError::failed("late failure"))
            })
        };
        let winner: BoxedTask<u8> = {
            let losers_started = Arc::clone(&losers_started);
            Box::new(move || {
                losers_started.wait(Some(Duration::from_secs(5)))?;
                Ok(2)
            })
        };
        let tasks = vec![
            loser(Arc::clone(&losers_started)),
            winner,
            loser(Arc::clone(&losers_started)),
        ];

        let result = executor.invoke_any_with(
            tasks,
            None,
            Some(Arc::clone(&tally) as Arc<dyn PolicyTaskCallback>),
        );
        assert_eq!(result.unwrap(), 2);

        let deadline = Instant::now() + Duration::from_secs(5);
        while executor.running_count() > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(executor.running_count(), 0);
        assert_eq!(executor.queue_len(), 0);
        assert_eq!(tally.cancelled_running.load(Ordering::SeqCst), 2);
        assert_eq!(tally.failed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_invoke_any_all_failing_reports_failure() {
        let executor = executor(2);
        let tasks: Vec<BoxedTask<u8>> = vec![
            Box::new(|| Err(TaskError::failed("first"))),
            Box::new(|| Err(TaskError::failed("second"))),
        ];
        let error = executor.invoke_any(tasks).unwrap_err();
        assert!(error.is_failed());
    }

    #[test]
    fn test_invoke_any_single_task_runs_on_caller() {
        let executor = executor(1);
        let caller = std::thread::current().id();
        let tasks = vec![move || Ok::<_, TaskError>(std::thread::current().id())];
        assert_eq!(executor.invoke_any(tasks).unwrap(), caller);
        assert_eq!(executor.inner.max_permits.available(), 1);
    }

    #[test]
    fn test_invoke_any_empty_is_error() {
        let executor = executor(1);
        let tasks: Vec<BoxedTask<u8>> = Vec::new();
        assert!(executor.invoke_any(tasks).unwrap_err().is_failed());
    }

    #[test]
    fn test_invoke_all_after_shutdown_fails() {
        let executor = executor(1);
        executor.shutdown();
        let tasks: Vec<BoxedTask<u8>> = vec![Box::new(|| Ok(1)), Box::new(|| Ok(2))];
        assert!(matches!(
            executor.invoke_all(tasks),
            Err(ExecutorError::Rejected(_))
        ));
    }
}
