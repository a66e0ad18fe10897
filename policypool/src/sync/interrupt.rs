//! Cooperative thread interruption.
//!
//! Every thread lazily owns an [`InterruptFlag`]. Cancelling a running task
//! with `interrupt = true` raises the flag of the thread executing it; the
//! blocking operations of this crate poll the flag while they wait and bail
//! out with [`Interrupted`]. Task code can observe it with [`is_interrupted`].
//!
//! Raising a flag never preempts anything. Code that never checks the flag
//! simply runs to completion.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::Thread;
use std::time::{Duration, Instant};

use thiserror::Error;

/// Longest single park while a blocking operation waits for its condition.
///
/// Waiters wake at least this often to look at their interrupt flag.
pub const INTERRUPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A blocking operation observed an interrupt request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("interrupted while waiting")]
pub struct Interrupted;

/// Interrupt request flag owned by one thread.
#[derive(Debug)]
pub struct InterruptFlag {
    raised: AtomicBool,
    thread: Thread,
}

impl InterruptFlag {
    fn for_current_thread() -> Self {
        Self {
            raised: AtomicBool::new(false),
            thread: std::thread::current(),
        }
    }

    /// Raises the flag and unparks the owning thread.
    pub fn interrupt(&self) {
        self.raised.store(true, Ordering::SeqCst);
        self.thread.unpark();
    }

    /// Returns true if an interrupt is pending.
    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    /// Clears the flag, returning whether it was raised.
    pub fn clear(&self) -> bool {
        self.raised.swap(false, Ordering::SeqCst)
    }

    /// Name of the owning thread, if it has one.
    pub fn thread_name(&self) -> Option<&str> {
        self.thread.name()
    }
}

thread_local! {
    static CURRENT: Arc<InterruptFlag> = Arc::new(InterruptFlag::for_current_thread());
}

/// Returns the interrupt flag of the calling thread.
pub fn current() -> Arc<InterruptFlag> {
    CURRENT.with(Arc::clone)
}

/// Returns true if the calling thread has a pending interrupt.
///
/// The flag is left raised.
pub fn is_interrupted() -> bool {
    CURRENT.with(|flag| flag.is_raised())
}

/// Consumes a pending interrupt on the calling thread.
pub fn take_interrupt() -> bool {
    CURRENT.with(|flag| flag.clear())
}

/// Fails with [`Interrupted`] if the calling thread has a pending interrupt,
/// consuming it.
pub fn check() -> Result<(), Interrupted> {
    if take_interrupt() {
        Err(Interrupted)
    } else {
        Ok(())
    }
}

/// Length of the next wait slice toward `deadline`.
///
/// Returns `None` once the deadline has passed.
pub(crate) fn next_slice(deadline: Option<Instant>) -> Option<Duration> {
    match deadline {
        None => Some(INTERRUPT_POLL_INTERVAL),
        Some(deadline) => {
            let remaining = deadline.checked_duration_since(Instant::now())?;
            if remaining.is_zero() {
                None
            } else {
                Some(remaining.min(INTERRUPT_POLL_INTERVAL))
            }
        }
    }
}

/// Interruptible sleep. Returns early with [`Interrupted`].
pub fn sleep(duration: Duration) -> Result<(), Interrupted> {
    let deadline = Instant::now() + duration;
    loop {
        check()?;
        match next_slice(Some(deadline)) {
            Some(slice) => std::thread::park_timeout(slice),
            None => return Ok(()),
        }
    }
}
