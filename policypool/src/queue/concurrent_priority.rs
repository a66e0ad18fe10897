//! Unbounded lock-free priority queue.
//!
//! One `crossbeam` [`SegQueue`] per class carries shared slots in arrival
//! order. Each slot keeps its item in a tiny mutex so a poller and a remover
//! racing for the same slot cannot both claim it. A remover leaves the
//! emptied slot behind; pollers skip it.
//!
//! A [`Permits`] counter tracks how many items are claimable. Pollers reserve
//! a permit before searching, so `len()` and blocking polls need no global
//! lock. Removal by identity claims the item in place and takes a permit
//! back afterwards, which can drive the count briefly negative while a poller
//! still holds a reservation for the removed item. That poller finds nothing,
//! returns its permit and retries.
//!
//! Live slots are also indexed by arrival sequence so removal and snapshots
//! can walk them in dequeue order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::queue::SegQueue;
use dashmap::DashMap;
use parking_lot::Mutex;

use super::{Expedite, ExpeditedQueue};
use crate::sync::interrupt::{self, Interrupted};
use crate::sync::Permits;

struct Slot<T> {
    seq: u64,
    expedited: bool,
    item: Mutex<Option<T>>,
}

impl<T> Slot<T> {
    fn claim(&self) -> Option<T> {
        self.item.lock().take()
    }
}

/// Unbounded expedited queue built on lock-free segment queues.
pub struct ConcurrentPriorityQueue<T> {
    expedited: SegQueue<Arc<Slot<T>>>,
    normal: SegQueue<Arc<Slot<T>>>,
    index: DashMap<u64, Arc<Slot<T>>>,
    next_seq: AtomicU64,
    claimable: Permits,
}

impl<T> std::fmt::Debug for ConcurrentPriorityQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrentPriorityQueue")
            .field("claimable", &self.claimable.available())
            .finish()
    }
}

impl<T> Default for ConcurrentPriorityQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ConcurrentPriorityQueue<T> {
    pub fn new() -> Self {
        Self {
            expedited: SegQueue::new(),
            normal: SegQueue::new(),
            index: DashMap::new(),
            next_seq: AtomicU64::new(0),
            claimable: Permits::new(0),
        }
    }

    /// Pops slots off `lane` until one still holds its item.
    fn pop_lane(&self, lane: &SegQueue<Arc<Slot<T>>>) -> Option<T> {
        while let Some(slot) = lane.pop() {
            self.index.remove(&slot.seq);
            if let Some(item) = slot.claim() {
                return Some(item);
            }
        }
        None
    }

    /// Takes an item for a permit the caller already reserved.
    fn claim_reserved(&self) -> Option<T> {
        self.pop_lane(&self.expedited)
            .or_else(|| self.pop_lane(&self.normal))
    }

    /// Live slots in dequeue order: expedited first, then by arrival.
    fn ordered_slots(&self) -> Vec<Arc<Slot<T>>> {
        let mut slots: Vec<Arc<Slot<T>>> = self
            .index
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        slots.sort_unstable_by_key(|slot| (!slot.expedited, slot.seq));
        slots
    }

    fn poll_until(&self, deadline: Option<Instant>) -> Result<Option<T>, Interrupted> {
        loop {
            let reserved = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    self.claimable.acquire_timeout(remaining)?
                }
                None => self.claimable.acquire().map(|()| true)?,
            };
            if !reserved {
                return Ok(None);
            }
            if let Some(item) = self.claim_reserved() {
                return Ok(Some(item));
            }
            // A remover took the item this permit stood for.
            self.claimable.release(1);
            std::thread::yield_now();
        }
    }

    /// Snapshot of the queued items in dequeue order.
    pub fn iter(&self) -> std::vec::IntoIter<T>
    where
        T: Clone,
    {
        let mut items = Vec::new();
        self.for_each_item(&mut |item: &T| items.push(item.clone()));
        items.into_iter()
    }

    fn for_each_item(&self, visitor: &mut dyn FnMut(&T)) {
        for slot in self.ordered_slots() {
            if let Some(item) = slot.item.lock().as_ref() {
                visitor(item);
            }
        }
    }
}

impl<T: Expedite + Send> ExpeditedQueue<T> for ConcurrentPriorityQueue<T> {
    fn offer(&self, item: T) -> Result<(), T> {
        let expedited = item.is_expedited();
        let slot = Arc::new(Slot {
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            expedited,
            item: Mutex::new(Some(item)),
        });
        self.index.insert(slot.seq, Arc::clone(&slot));
        if expedited {
            self.expedited.push(slot);
        } else {
            self.normal.push(slot);
        }
        self.claimable.release(1);
        Ok(())
    }

    fn poll(&self) -> Option<T> {
        while self.claimable.try_acquire() {
            if let Some(item) = self.claim_reserved() {
                return Some(item);
            }
            self.claimable.release(1);
            std::thread::yield_now();
        }
        None
    }

    fn poll_timeout(&self, timeout: Duration) -> Result<Option<T>, Interrupted> {
        if let Some(item) = self.poll() {
            return Ok(Some(item));
        }
        interrupt::check()?;
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
        for slot in self.ordered_slots() {
            let mut held = slot.item.lock();
            if held.as_ref().is_some_and(|item| pred(item)) {
                let item = held.take();
                drop(held);
                self.index.remove(&slot.seq);
                self.claimable.reduce(1);
                return item;
            }
        }
        None
    }

    fn drain_to(&self, out: &mut Vec<T>, max: usize) -> usize {
        let mut moved = 0;
        while moved < max {
            match self.poll() {
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
        usize::try_from(self.claimable.available()).unwrap_or(0)
    }

    fn for_each(&self, visitor: &mut dyn FnMut(&T)) {
        self.for_each_item(visitor);
    }
}
