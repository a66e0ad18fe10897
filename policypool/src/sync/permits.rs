//! Counting permits.
//!
//! A small blocking semaphore used for every capacity counter in the crate
//! (queue slots, max and core concurrency, queued items of the lock-free
//! queue). Unlike `tokio::sync::Semaphore` the count may be driven negative:
//! lowering a limit below the number of outstanding permits simply means the
//! next releases are absorbed before anyone can acquire again.

use std::sync::atomic::{AtomicIsize, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::interrupt::{self, Interrupted};

/// A counting semaphore whose count can go negative.
#[derive(Debug)]
pub struct Permits {
    available: AtomicIsize,
    waiters: AtomicUsize,
    lock: Mutex<()>,
    released: Condvar,
}

impl Permits {
    /// Creates a counter holding `count` permits.
    pub fn new(count: usize) -> Self {
        Self {
            available: AtomicIsize::new(clamp_count(count)),
            waiters: AtomicUsize::new(0),
            lock: Mutex::new(()),
            released: Condvar::new(),
        }
    }

    /// Number of permits available right now. Negative while a reduction is
    /// being absorbed.
    pub fn available(&self) -> isize {
        self.available.load(Ordering::SeqCst)
    }

    /// Takes one permit if any is available.
    pub fn try_acquire(&self) -> bool {
        let mut current = self.available.load(Ordering::SeqCst);
        while current > 0 {
            match self.available.compare_exchange_weak(
                current,
                current - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
        false
    }

    /// Takes one permit, waiting up to `timeout` for one to be released.
    ///
    /// Returns `Ok(false)` on timeout. A zero timeout never waits.
    pub fn acquire_timeout(&self, timeout: Duration) -> Result<bool, Interrupted> {
        if self.try_acquire() {
            return Ok(true);
        }
        if timeout.is_zero() {
            return Ok(false);
        }
        self.wait_for_permit(Instant::now().checked_add(timeout))
    }

    /// Takes one permit, waiting as long as necessary.
    pub fn acquire(&self) -> Result<(), Interrupted> {
        if self.try_acquire() {
            return Ok(());
        }
        self.wait_for_permit(None).map(|_| ())
    }

    fn wait_for_permit(&self, deadline: Option<Instant>) -> Result<bool, Interrupted> {
        let _waiting = WaiterGuard::enter(&self.waiters);
        let mut guard = self.lock.lock();
        loop {
            if self.try_acquire() {
                return Ok(true);
            }
            interrupt::check()?;
            let Some(slice) = interrupt::next_slice(deadline) else {
                return Ok(false);
            };
            self.released.wait_for(&mut guard, slice);
        }
    }

    /// Returns `count` permits.
    pub fn release(&self, count: usize) {
        if count == 0 {
            return;
        }
        self.available.fetch_add(clamp_count(count), Ordering::SeqCst);
        if self.waiters.load(Ordering::SeqCst) > 0 {
            let _guard = self.lock.lock();
            if count == 1 {
                self.released.notify_one();
            } else {
                self.released.notify_all();
            }
        }
    }

    /// Removes `count` permits without waiting, possibly driving the count
    /// negative.
    pub fn reduce(&self, count: usize) {
        self.available.fetch_sub(clamp_count(count), Ordering::SeqCst);
    }

    /// Applies a signed change to the count.
    pub fn adjust(&self, delta: isize) {
        if delta > 0 {
            self.release(delta.unsigned_abs());
        } else if delta < 0 {
            self.reduce(delta.unsigned_abs());
        }
    }
}

fn clamp_count(count: usize) -> isize {
    isize::try_from(count).unwrap_or(isize::MAX)
}

struct WaiterGuard<'a>(&'a AtomicUsize);

impl<'a> WaiterGuard<'a> {
    fn enter(waiters: &'a AtomicUsize) -> Self {
        waiters.fetch_add(1, Ordering::SeqCst);
        Self(waiters)
    }
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_try_acquire_until_exhausted() {
        let permits = Permits::new(2);
        assert!(permits.try_acquire());
        assert!(permits.try_acquire());
        assert!(!permits.try_acquire());
        assert_eq!(permits.available(), 0);
    }

    #[test]
    fn test_reduce_goes_negative_and_absorbs_releases() {
        let permits = Permits::new(1);
        permits.reduce(3);
        assert_eq!(permits.available(), -2);
        permits.release(2);
        assert!(!permits.try_acquire());
        permits.release(1);
        assert!(permits.try_acquire());
    }

    #[test]
    fn test_acquire_timeout_expires() {
        let permits = Permits::new(0);
        let started = Instant::now();
        assert_eq!(permits.acquire_timeout(Duration::from_millis(30)), Ok(false));
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_release_wakes_waiter() {
        let permits = Arc::new(Permits::new(0));
        let waiter = {
            let permits = Arc::clone(&permits);
            std::thread::spawn(move || permits.acquire_timeout(Duration::from_secs(5)))
        };
        std::thread::sleep(Duration::from_millis(20));
        permits.release(1);
        assert_eq!(waiter.join().unwrap(), Ok(true));
        assert_eq!(permits.available(), 0);
    }

    #[test]
    fn test_acquire_observes_interrupt() {
        let permits = Arc::new(Permits::new(0));
        let (tx, rx) = std::sync::mpsc::channel();
        let waiter = {
            let permits = Arc::clone(&permits);
            std::thread::spawn(move || {
                tx.send(interrupt::current()).unwrap();
                permits.acquire()
            })
        };
        rx.recv().unwrap().interrupt();
        assert_eq!(waiter.join().unwrap(), Err(Interrupted));
    }

    #[test]
    fn test_adjust_both_directions() {
        let permits = Permits::new(4);
        permits.adjust(-6);
        assert_eq!(permits.available(), -2);
        permits.adjust(5);
        assert_eq!(permits.available(), 3);
        permits.adjust(0);
        assert_eq!(permits.available(), 3);
    }
}
