//! The timer thread.
//!
//! One thread sleeps until the earliest deadline and runs the callback that
//! was registered for it. Callbacks are expected to be short: scheduled work
//! is redispatched to an executor, never run here. A callback may ask to run
//! again by returning its next deadline.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use crate::error::{ExecutorError, RejectReason};
use crate::panic::panic_message;
use crate::pool::{NamedThreadFactory, ThreadFactory};

/// A timer callback. Returns the next deadline to run again.
pub type TimerCallback = Box<dyn FnMut() -> Option<Instant> + Send>;

struct Pending {
    at: Instant,
    seq: u64,
    cancelled: Arc<AtomicBool>,
    callback: TimerCallback,
}

// Reversed so the max-heap yields the earliest deadline.
impl Ord for Pending {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for Pending {}

#[derive(Default)]
struct TimerQueue {
    heap: BinaryHeap<Pending>,
    next_seq: u64,
    shutdown: bool,
}

impl TimerQueue {
    fn push(&mut self, at: Instant, cancelled: Arc<AtomicBool>, callback: TimerCallback) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Pending {
            at,
            seq,
            cancelled,
            callback,
        });
    }
}

struct TimerShared {
    name: Arc<str>,
    queue: Mutex<TimerQueue>,
    wakeup: Condvar,
}

impl TimerShared {
    fn schedule(&self, at: Instant, callback: TimerCallback) -> Result<Arc<AtomicBool>, ExecutorError> {
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut queue = self.queue.lock();
        if queue.shutdown {
            return Err(ExecutorError::Rejected(RejectReason::Shutdown));
        }
        queue.push(at, Arc::clone(&cancelled), callback);
        drop(queue);
        self.wakeup.notify_one();
        Ok(cancelled)
    }

    fn run(self: Arc<Self>) {
        debug!(timer = %self.name, "Timer thread started");
        loop {
            let Some(mut pending) = self.next_due() else {
                break;
            };
            let next = panic::catch_unwind(AssertUnwindSafe(|| (pending.callback)()));
            match next {
                Ok(Some(at)) if !pending.cancelled.load(Ordering::SeqCst) => {
                    let mut queue = self.queue.lock();
                    if !queue.shutdown {
                        queue.push(at, pending.cancelled, pending.callback);
                    }
                }
                Ok(_) => {}
                Err(payload) => {
                    warn!(
                        timer = %self.name,
                        panic = %panic_message(payload.as_ref()),
                        "Timer callback panicked; entry dropped"
                    );
                }
            }
        }
        debug!(timer = %self.name, "Timer thread exiting");
    }

    /// Blocks until an entry is due. `None` once shut down.
    fn next_due(&self) -> Option<Pending> {
        let mut queue = self.queue.lock();
        loop {
            if queue.shutdown {
                return None;
            }
            let now = Instant::now();
            match queue.heap.peek() {
                None => {
                    self.wakeup.wait(&mut queue);
                }
                Some(head) if head.cancelled.load(Ordering::SeqCst) => {
                    queue.heap.pop();
                }
                Some(head) if head.at <= now => return queue.heap.pop(),
                Some(head) => {
                    let at = head.at;
                    self.wakeup.wait_until(&mut queue, at);
                }
            }
        }
    }
}

/// Handle to one scheduled timer entry.
#[derive(Clone)]
pub struct TimerEntry {
    cancelled: Arc<AtomicBool>,
    timer: Weak<TimerShared>,
}

impl fmt::Debug for TimerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerEntry")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl TimerEntry {
    /// Stops the entry from firing again. A callback already running is
    /// unaffected.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            if let Some(timer) = self.timer.upgrade() {
                timer.wakeup.notify_one();
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Schedules onto a timer without keeping it alive.
#[derive(Clone)]
pub(crate) struct TimerHandle {
    timer: Weak<TimerShared>,
}

impl TimerHandle {
    pub(crate) fn schedule(
        &self,
        at: Instant,
        callback: TimerCallback,
    ) -> Result<TimerEntry, ExecutorError> {
        let timer = self
            .timer
            .upgrade()
            .ok_or(ExecutorError::Rejected(RejectReason::Shutdown))?;
        let cancelled = timer.schedule(at, callback)?;
        Ok(TimerEntry {
            cancelled,
            timer: self.timer.clone(),
        })
    }
}

/// A single timer thread shared by the scheduled executor and the pool
/// controller. Dropping the timer shuts it down.
pub struct Timer {
    shared: Arc<TimerShared>,
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("name", &self.shared.name)
            .field("pending", &self.pending())
            .finish()
    }
}

impl Timer {
    pub fn new(name: &str) -> Result<Self, ExecutorError> {
        Self::with_thread_factory(name, &NamedThreadFactory::new())
    }

    pub fn with_thread_factory(
        name: &str,
        thread_factory: &dyn ThreadFactory,
    ) -> Result<Self, ExecutorError> {
        let shared = Arc::new(TimerShared {
            name: Arc::from(name),
            queue: Mutex::new(TimerQueue::default()),
            wakeup: Condvar::new(),
        });
        let thread_shared = Arc::clone(&shared);
        thread_factory
            .spawn(name.to_string(), Box::new(move || thread_shared.run()))
            .map_err(|e| {
                error!(timer = name, error = %e, "Failed to start timer thread");
                ExecutorError::illegal_state(format!("failed to start timer thread: {e}"))
            })?;
        Ok(Self { shared })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Runs `callback` on the timer thread at `at`, and again at whatever
    /// deadline it returns.
    pub fn schedule(&self, at: Instant, callback: TimerCallback) -> Result<TimerEntry, ExecutorError> {
        self.handle().schedule(at, callback)
    }

    pub(crate) fn handle(&self) -> TimerHandle {
        TimerHandle {
            timer: Arc::downgrade(&self.shared),
        }
    }

    /// Entries waiting to fire, excluding cancelled ones.
    pub fn pending(&self) -> usize {
        self.shared
            .queue
            .lock()
            .heap
            .iter()
            .filter(|p| !p.cancelled.load(Ordering::SeqCst))
            .count()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.queue.lock().shutdown
    }

    /// Stops the thread and discards every pending entry.
    ///
    /// Returns the number of live entries discarded.
    pub fn shutdown(&self) -> usize {
        let discarded = {
            let mut queue = self.shared.queue.lock();
            if queue.shutdown {
                return 0;
            }
            queue.shutdown = true;
            let heap = std::mem::take(&mut queue.heap);
            heap.into_iter()
                .filter(|p| !p.cancelled.load(Ordering::SeqCst))
                .count()
        };
        self.shared.wakeup.notify_all();
        info!(timer = %self.shared.name, discarded, "Timer shut down");
        discarded
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::CountDownLatch;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn test_fires_in_deadline_order() {
        let timer = Timer::new("test-timer").unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));
        let done = Arc::new(CountDownLatch::new(3));
        let now = Instant::now();
        for (label, delay_ms) in [("c", 60u64), ("a", 20), ("b", 40)] {
            let order = Arc::clone(&order);
            let done = Arc::clone(&done);
            timer
                .schedule(
                    now + Duration::from_millis(delay_ms),
                    Box::new(move || {
                        order.lock().push(label);
                        done.count_down();
                        None
                    }),
                )
                .unwrap();
        }
        assert!(done.wait(Some(Duration::from_secs(5))).unwrap());
        assert_eq!(*order.lock(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_callback_reschedules_until_cancelled() {
        let timer = Timer::new("test-timer").unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let third = Arc::new(CountDownLatch::new(3));
        let entry = {
            let runs = Arc::clone(&runs);
            let third = Arc::clone(&third);
            timer
                .schedule(
                    Instant::now(),
                    Box::new(move || {
                        runs.fetch_add(1, Ordering::SeqCst);
                        third.count_down();
                        Some(Instant::now() + Duration::from_millis(5))
                    }),
                )
                .unwrap()
        };
        assert!(third.wait(Some(Duration::from_secs(5))).unwrap());
        entry.cancel();
        std::thread::sleep(Duration::from_millis(30));
        let settled = runs.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(runs.load(Ordering::SeqCst), settled);
        assert_eq!(timer.pending(), 0);
    }

    #[test]
    fn test_shutdown_discards_and_rejects() {
        let timer = Timer::new("test-timer").unwrap();
        timer
            .schedule(Instant::now() + Duration::from_secs(60), Box::new(|| None))
            .unwrap();
        assert_eq!(timer.pending(), 1);
        assert_eq!(timer.shutdown(), 1);
        assert!(timer.is_shutdown());
        let err = timer
            .schedule(Instant::now(), Box::new(|| None))
            .unwrap_err();
        assert!(err.is_rejected());
    }

    #[test]
    fn test_panicking_callback_does_not_kill_timer() {
        let timer = Timer::new("test-timer").unwrap();
        timer
            .schedule(Instant::now(), Box::new(|| panic!("callback exploded")))
            .unwrap();
        let done = Arc::new(CountDownLatch::new(1));
        let signal = Arc::clone(&done);
        timer
            .schedule(
                Instant::now() + Duration::from_millis(10),
                Box::new(move || {
                    signal.count_down();
                    None
                }),
            )
            .unwrap();
        assert!(done.wait(Some(Duration::from_secs(5))).unwrap());
    }
}
