//! Multi-count-down latch backing `invoke_any`.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::TaskError;
use crate::sync::interrupt;

#[derive(Debug)]
struct Tally<T> {
    remaining: usize,
    success: Option<T>,
    worst: Option<TaskError>,
}

/// Collects the first success among a group of tasks.
///
/// A success drops the count straight to zero. Any other outcome counts
/// down by one and is remembered if it ranks above the failures seen so far.
#[derive(Debug)]
pub(crate) struct InvokeAnyLatch<T> {
    tally: Mutex<Tally<T>>,
    settled: Condvar,
}

impl<T: Clone> InvokeAnyLatch<T> {
    pub(crate) fn new(count: usize) -> Self {
        Self {
            tally: Mutex::new(Tally {
                remaining: count,
                success: None,
                worst: None,
            }),
            settled: Condvar::new(),
        }
    }

    pub(crate) fn record(&self, outcome: &Result<T, TaskError>) {
        let mut tally = self.tally.lock();
        if tally.remaining == 0 {
            return;
        }
        match outcome {
            Ok(value) => {
                tally.success = Some(value.clone());
                tally.remaining = 0;
            }
            Err(error) => {
                let replace = tally
                    .worst
                    .as_ref()
                    .map_or(true, |worst| error.severity() > worst.severity());
                if replace {
                    tally.worst = Some(error.clone());
                }
                tally.remaining -= 1;
            }
        }
        if tally.remaining == 0 {
            self.settled.notify_all();
        }
    }

    /// Waits for the group to settle.
    pub(crate) fn wait(&self, timeout: Option<Duration>) -> Result<T, TaskError> {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut tally = self.tally.lock();
        loop {
            if tally.remaining == 0 {
                if let Some(value) = tally.success.clone() {
                    return Ok(value);
                }
                return Err(tally.worst.clone().unwrap_or(TaskError::Cancelled));
            }
            interrupt::check()?;
            let Some(slice) = interrupt::next_slice(deadline) else {
                return Err(TaskError::Timeout);
            };
            self.settled.wait_for(&mut tally, slice);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::AbortReason;

    #[test]
    fn test_first_success_settles() {
        let latch = InvokeAnyLatch::new(3);
        latch.record(&Err(TaskError::Cancelled));
        latch.record(&Ok(7));
        latch.record(&Ok(8));
        assert_eq!(latch.wait(Some(Duration::ZERO)).unwrap(), 7);
    }

    #[test]
    fn test_failure_preferred_over_abort_and_cancel() {
        let latch: InvokeAnyLatch<u8> = InvokeAnyLatch::new(3);
        latch.record(&Err(TaskError::Cancelled));
        latch.record(&Err(TaskError::failed("bad input")));
        latch.record(&Err(TaskError::Aborted(AbortReason::Shutdown)));
        assert!(latch.wait(None).unwrap_err().is_failed());
    }

    #[test]
    fn test_wait_times_out_while_pending() {
        let latch: InvokeAnyLatch<u8> = InvokeAnyLatch::new(1);
        assert!(matches!(
            latch.wait(Some(Duration::from_millis(10))),
            Err(TaskError::Timeout)
        ));
    }
}
