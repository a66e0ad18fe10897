//! Count-down latch with interruptible, timed waits.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::interrupt::{self, Interrupted};

/// Releases waiters once its count reaches zero.
#[derive(Debug)]
pub struct CountDownLatch {
    count: Mutex<usize>,
    zero: Condvar,
}

impl CountDownLatch {
    pub fn new(count: usize) -> Self {
        Self {
            count: Mutex::new(count),
            zero: Condvar::new(),
        }
    }

    /// Decrements the count. Returns true if this call reached zero.
    pub fn count_down(&self) -> bool {
        let mut count = self.count.lock();
        if *count == 0 {
            return false;
        }
        *count -= 1;
        if *count == 0 {
            self.zero.notify_all();
            true
        } else {
            false
        }
    }

    pub fn count(&self) -> usize {
        *self.count.lock()
    }

    /// Waits for zero. `None` waits forever.
    ///
    /// Returns `Ok(false)` if the timeout elapsed first.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<bool, Interrupted> {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut count = self.count.lock();
        loop {
            if *count == 0 {
                return Ok(true);
            }
            interrupt::check()?;
            let Some(slice) = interrupt::next_slice(deadline) else {
                return Ok(false);
            };
            self.zero.wait_for(&mut count, slice);
        }
    }
}
