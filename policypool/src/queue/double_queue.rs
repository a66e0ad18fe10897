//! Two `VecDeque`s behind one lock.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::{Expedite, ExpeditedQueue};
use crate::sync::interrupt::{self, Interrupted};

#[derive(Debug)]
struct Lanes<T> {
    expedited: VecDeque<T>,
    normal: VecDeque<T>,
}

impl<T> Lanes<T> {
    fn pop_front(&mut self) -> Option<T> {
        self.expedited
            .pop_front()
            .or_else(|| self.normal.pop_front())
    }

    fn len(&self) -> usize {
        self.expedited.len() + self.normal.len()
    }
}

/// Unbounded expedited queue guarded by a single mutex.
#[derive(Debug)]
pub struct DoubleQueue<T> {
    lanes: Mutex<Lanes<T>>,
    not_empty: Condvar,
}

impl<T> Default for DoubleQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> DoubleQueue<T> {
    pub fn new() -> Self {
        Self {
            lanes: Mutex::new(Lanes {
                expedited: VecDeque::new(),
                normal: VecDeque::new(),
            }),
            not_empty: Condvar::new(),
        }
    }

    fn poll_until(&self, deadline: Option<Instant>) -> Result<Option<T>, Interrupted> {
        let mut lanes = self.lanes.lock();
        loop {
            if let Some(item) = lanes.pop_front() {
                return Ok(Some(item));
            }
            interrupt::check()?;
            let Some(slice) = interrupt::next_slice(deadline) else {
                return Ok(None);
            };
            self.not_empty.wait_for(&mut lanes, slice);
        }
    }

    /// Snapshot of the queued items in dequeue order.
    pub fn iter(&self) -> std::vec::IntoIter<T>
    where
        T: Clone,
    {
        let lanes = self.lanes.lock();
        lanes
            .expedited
            .iter()
            .chain(lanes.normal.iter())
            .cloned()
            .collect::<Vec<_>>()
            .into_iter()
    }
}

impl<T: Expedite + Send> ExpeditedQueue<T> for DoubleQueue<T> {
    fn offer(&self, item: T) -> Result<(), T> {
        let mut lanes = self.lanes.lock();
        if item.is_expedited() {
            lanes.expedited.push_back(item);
        } else {
            lanes.normal.push_back(item);
        }
        self.not_empty.notify_one();
        Ok(())
    }

    fn poll(&self) -> Option<T> {
        self.lanes.lock().pop_front()
    }

    fn poll_timeout(&self, timeout: Duration) -> Result<Option<T>, Interrupted> {
        self.poll_until(Instant::now().checked_add(timeout))
    }

    fn take(&self) -> Result<T, Interrupted> {
        loop {
            if let Some(item) = self.poll_until(None)? {
                return Ok(item);
            }
        }
    }

    fn remove_first(&self, pred: &mut dyn FnMut(&T) -> bool) -> Option<T> {
        let mut lanes = self.lanes.lock();
        if let Some(index) = lanes.expedited.iter().position(|item| pred(item)) {
            return lanes.expedited.remove(index);
        }
        let index = lanes.normal.iter().position(|item| pred(item))?;
        lanes.normal.remove(index)
    }

    fn drain_to(&self, out: &mut Vec<T>, max: usize) -> usize {
        let mut lanes = self.lanes.lock();
        let mut moved = 0;
        while moved < max {
            match lanes.pop_front() {
                Some(item) => {
                    out.push(item);
                    moved += 1;
                }
                None => break,
            }
        }
        moved
    }

    fn len(&self) -> usize {
        self.lanes.lock().len()
    }

    fn for_each(&self, visitor: &mut dyn FnMut(&T)) {
        let lanes = self.lanes.lock();
        lanes.expedited.iter().chain(lanes.normal.iter()).for_each(visitor);
    }
}
