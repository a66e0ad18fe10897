//! Fixed-capacity ring buffer with an expedited sub-buffer.
//!
//! Producers and consumers synchronize on different monitors: the insertion
//! lock guards `put`/`offer` and is where blocked producers park, the removal
//! lock guards `poll`/`take`/`remove_first` and is where blocked consumers
//! park. A notify on one monitor can therefore never be swallowed by a thread
//! of the other kind.
//!
//! Lock order: insertion lock, then removal lock, then the ring storage.
//! Only [`BoundedBuffer::expand`] holds both outer locks at once.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::{Expedite, ExpeditedQueue};
use crate::sync::interrupt::{self, Interrupted, INTERRUPT_POLL_INTERVAL};

/// Spins on the used-slot counter before a full-buffer `put` parks.
const PUT_SPIN_LIMIT: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Class {
    Normal,
    Expedited,
}

// =============================================================================
// Ring storage
// =============================================================================

#[derive(Debug)]
struct Ring<T> {
    slots: Vec<Option<T>>,
    head: usize,
    tail: usize,
    len: usize,
}

impl<T> Ring<T> {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            head: 0,
            tail: 0,
            len: 0,
        }
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn push_back(&mut self, item: T) -> Result<(), T> {
        if self.len == self.capacity() {
            return Err(item);
        }
        self.slots[self.tail] = Some(item);
        self.tail = (self.tail + 1) % self.capacity();
        self.len += 1;
        Ok(())
    }

    fn pop_front(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let item = self.slots[self.head].take();
        self.head = (self.head + 1) % self.capacity();
        self.len -= 1;
        item
    }

    fn slot(&self, offset: usize) -> usize {
        (self.head + offset) % self.capacity()
    }

    /// Removes the first matching item, shifting everything behind it one
    /// slot toward the head.
    fn remove_first(&mut self, pred: &mut dyn FnMut(&T) -> bool) -> Option<T> {
        let offset = (0..self.len)
            .find(|&offset| self.slots[self.slot(offset)].as_ref().is_some_and(|item| pred(item)))?;
        let at = self.slot(offset);
        let removed = self.slots[at].take();
        for k in offset..self.len - 1 {
            let from = self.slot(k + 1);
            let next = self.slots[from].take();
            let at = self.slot(k);
            self.slots[at] = next;
        }
        self.tail = (self.tail + self.capacity() - 1) % self.capacity();
        self.len -= 1;
        removed
    }

    /// Reallocates with a larger capacity, copying the live window to the
    /// front of the new storage.
    fn grow(&mut self, capacity: usize) {
        let mut slots: Vec<Option<T>> = Vec::with_capacity(capacity);
        while let Some(item) = self.pop_front() {
            slots.push(Some(item));
        }
        let len = slots.len();
        slots.resize_with(capacity, || None);
        self.slots = slots;
        self.head = 0;
        self.len = len;
        self.tail = len % capacity;
    }

    fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        (0..self.len).filter_map(move |offset| self.slots[self.slot(offset)].as_ref())
    }
}

#[derive(Debug)]
struct Rings<T> {
    expedited: Ring<T>,
    normal: Ring<T>,
}

impl<T> Rings<T> {
    fn ring_mut(&mut self, class: Class) -> &mut Ring<T> {
        match class {
            Class::Normal => &mut self.normal,
            Class::Expedited => &mut self.expedited,
        }
    }

    fn pop_front(&mut self) -> Option<(T, Class)> {
        if let Some(item) = self.expedited.pop_front() {
            return Some((item, Class::Expedited));
        }
        self.normal.pop_front().map(|item| (item, Class::Normal))
    }
}

#[derive(Debug, Default)]
struct ProducerWaiters {
    normal: usize,
    expedited: usize,
}

impl ProducerWaiters {
    fn count_mut(&mut self, class: Class) -> &mut usize {
        match class {
            Class::Normal => &mut self.normal,
            Class::Expedited => &mut self.expedited,
        }
    }
}

// =============================================================================
// Bounded Buffer
// =============================================================================

/// A bounded FIFO buffer with a separately sized expedited ring.
///
/// With an expedited capacity of zero every item is stored in the normal
/// ring regardless of its class.
#[derive(Debug)]
pub struct BoundedBuffer<T> {
    rings: Mutex<Rings<T>>,
    used: AtomicUsize,
    capacity: AtomicUsize,
    expedited_capacity: usize,
    insertion: Mutex<ProducerWaiters>,
    not_full: Condvar,
    not_full_expedited: Condvar,
    removal: Mutex<usize>,
    not_empty: Condvar,
}

impl<T: Expedite> BoundedBuffer<T> {
    /// Creates a buffer holding up to `capacity` normal items and
    /// `expedited_capacity` expedited ones. A zero normal capacity is raised
    /// to one.
    pub fn new(capacity: usize, expedited_capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            rings: Mutex::new(Rings {
                expedited: Ring::with_capacity(expedited_capacity),
                normal: Ring::with_capacity(capacity),
            }),
            used: AtomicUsize::new(0),
            capacity: AtomicUsize::new(capacity + expedited_capacity),
            expedited_capacity,
            insertion: Mutex::new(ProducerWaiters::default()),
            not_full: Condvar::new(),
            not_full_expedited: Condvar::new(),
            removal: Mutex::new(0),
            not_empty: Condvar::new(),
        }
    }

    /// Total slots across both rings.
    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::SeqCst)
    }

    pub fn remaining_capacity(&self) -> usize {
        self.capacity().saturating_sub(self.used.load(Ordering::SeqCst))
    }

    fn class_of(&self, item: &T) -> Class {
        if self.expedited_capacity > 0 && item.is_expedited() {
            Class::Expedited
        } else {
            Class::Normal
        }
    }

    fn not_full_for(&self, class: Class) -> &Condvar {
        match class {
            Class::Normal => &self.not_full,
            Class::Expedited => &self.not_full_expedited,
        }
    }

    fn try_insert(&self, item: T, class: Class) -> Result<(), T> {
        let mut rings = self.rings.lock();
        rings.ring_mut(class).push_back(item)?;
        self.used.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn try_remove(&self) -> Option<(T, Class)> {
        let removed = self.rings.lock().pop_front();
        if removed.is_some() {
            self.used.fetch_sub(1, Ordering::SeqCst);
        }
        removed
    }

    fn signal_not_empty(&self) {
        let waiting = self.removal.lock();
        if *waiting > 0 {
            self.not_empty.notify_one();
        }
    }

    fn signal_not_full(&self, class: Class) {
        let mut waiting = self.insertion.lock();
        if *waiting.count_mut(class) > 0 {
            self.not_full_for(class).notify_one();
        }
    }

    /// Appends an item, waiting while its ring is full.
    ///
    /// On interrupt the item is dropped.
    pub fn put(&self, item: T) -> Result<(), Interrupted> {
        let class = self.class_of(&item);
        for _ in 0..PUT_SPIN_LIMIT {
            if self.used.load(Ordering::SeqCst) < self.capacity() {
                break;
            }
            std::hint::spin_loop();
        }

        let mut item = item;
        let mut waiting = self.insertion.lock();
        loop {
            match self.try_insert(item, class) {
                Ok(()) => break,
                Err(back) => item = back,
            }
            interrupt::check()?;
            *waiting.count_mut(class) += 1;
            self.not_full_for(class)
                .wait_for(&mut waiting, INTERRUPT_POLL_INTERVAL);
            *waiting.count_mut(class) -= 1;
        }
        drop(waiting);
        self.signal_not_empty();
        Ok(())
    }

    fn take_until(&self, deadline: Option<Instant>) -> Result<Option<T>, Interrupted> {
        let mut waiting = self.removal.lock();
        loop {
            if let Some((item, class)) = self.try_remove() {
                drop(waiting);
                self.signal_not_full(class);
                return Ok(Some(item));
            }
            interrupt::check()?;
            let Some(slice) = interrupt::next_slice(deadline) else {
                return Ok(None);
            };
            *waiting += 1;
            self.not_empty.wait_for(&mut waiting, slice);
            *waiting -= 1;
        }
    }

    /// Grows the normal ring by `additional` slots.
    pub fn expand(&self, additional: usize) {
        if additional == 0 {
            return;
        }
        let waiting = self.insertion.lock();
        let _removal = self.removal.lock();
        {
            let mut rings = self.rings.lock();
            let grown = rings.normal.capacity() + additional;
            rings.normal.grow(grown);
        }
        self.capacity.fetch_add(additional, Ordering::SeqCst);
        if waiting.normal > 0 {
            self.not_full.notify_all();
        }
    }

    /// Snapshot of the queued items in dequeue order.
    pub fn iter(&self) -> std::vec::IntoIter<T>
    where
        T: Clone,
    {
        let rings = self.rings.lock();
        rings
            .expedited
            .iter()
            .chain(rings.normal.iter())
            .cloned()
            .collect::<Vec<_>>()
            .into_iter()
    }
}

impl<T: Expedite + Send> ExpeditedQueue<T> for BoundedBuffer<T> {
    fn offer(&self, item: T) -> Result<(), T> {
        let class = self.class_of(&item);
        {
            let _insertion = self.insertion.lock();
            self.try_insert(item, class)?;
        }
        self.signal_not_empty();
        Ok(())
    }

    fn poll(&self) -> Option<T> {
        let removed = {
            let _removal = self.removal.lock();
            self.try_remove()
        };
        let (item, class) = removed?;
        self.signal_not_full(class);
        Some(item)
    }

    fn poll_timeout(&self, timeout: Duration) -> Result<Option<T>, Interrupted> {
        self.take_until(Instant::now().checked_add(timeout))
    }

    fn take(&self) -> Result<T, Interrupted> {
        loop {
            if let Some(item) = self.take_until(None)? {
                return Ok(item);
            }
        }
    }

    fn remove_first(&self, pred: &mut dyn FnMut(&T) -> bool) -> Option<T> {
        let removed = {
            let _removal = self.removal.lock();
            let mut rings = self.rings.lock();
            let found = match rings.expedited.remove_first(pred) {
                Some(item) => Some((item, Class::Expedited)),
                None => rings.normal.remove_first(pred).map(|item| (item, Class::Normal)),
            };
            if found.is_some() {
                self.used.fetch_sub(1, Ordering::SeqCst);
            }
            found
        };
        let (item, class) = removed?;
        self.signal_not_full(class);
        Some(item)
    }

    fn drain_to(&self, out: &mut Vec<T>, max: usize) -> usize {
        let mut moved = 0;
        {
            let _removal = self.removal.lock();
            while moved < max {
                match self.try_remove() {
                    Some((item, _)) => {
                        out.push(item);
                        moved += 1;
                    }
                    None => break,
                }
            }
        }
        if moved > 0 {
            let waiting = self.insertion.lock();
            if waiting.normal > 0 {
                self.not_full.notify_all();
            }
            if waiting.expedited > 0 {
                self.not_full_expedited.notify_all();
            }
        }
        moved
    }

    fn len(&self) -> usize {
        self.used.load(Ordering::SeqCst)
    }

    fn for_each(&self, visitor: &mut dyn FnMut(&T)) {
        let rings = self.rings.lock();
        rings
            .expedited
            .iter()
            .chain(rings.normal.iter())
            .for_each(visitor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::Tagged;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn values(buffer: &BoundedBuffer<Tagged<u32>>) -> Vec<u32> {
        buffer.iter().map(|t| t.value).collect()
    }

    #[test]
    fn test_expedited_items_dequeue_first() {
        let buffer = BoundedBuffer::new(4, 2);
        buffer.offer(Tagged::normal(1)).unwrap();
        buffer.offer(Tagged::normal(2)).unwrap();
        buffer.offer(Tagged::expedited(10)).unwrap();
        buffer.offer(Tagged::expedited(11)).unwrap();

        let order: Vec<u32> = std::iter::from_fn(|| buffer.poll()).map(|t| t.value).collect();
        assert_eq!(order, vec![10, 11, 1, 2]);
    }

    #[test]
    fn test_offer_returns_item_when_full() {
        let buffer = BoundedBuffer::new(1, 0);
        buffer.offer(Tagged::normal(1)).unwrap();
        let rejected = buffer.offer(Tagged::normal(2)).unwrap_err();
        assert_eq!(rejected.value, 2);
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.remaining_capacity(), 0);
    }

    #[test]
    fn test_zero_expedited_capacity_stores_as_normal() {
        let buffer = BoundedBuffer::new(2, 0);
        buffer.offer(Tagged::normal(1)).unwrap();
        buffer.offer(Tagged::expedited(2)).unwrap();
        assert_eq!(values(&buffer), vec![1, 2]);
    }

    #[test]
    fn test_remove_first_across_wrap_around() {
        let buffer = BoundedBuffer::new(4, 0);
        for v in 1..=4 {
            buffer.offer(Tagged::normal(v)).unwrap();
        }
        assert_eq!(buffer.poll().unwrap().value, 1);
        assert_eq!(buffer.poll().unwrap().value, 2);
        buffer.offer(Tagged::normal(5)).unwrap();
        buffer.offer(Tagged::normal(6)).unwrap();

        let removed = buffer.remove_first(&mut |t| t.value == 4).unwrap();
        assert_eq!(removed.value, 4);
        assert_eq!(values(&buffer), vec![3, 5, 6]);

        buffer.offer(Tagged::normal(7)).unwrap();
        assert_eq!(values(&buffer), vec![3, 5, 6, 7]);
        assert!(buffer.remove_first(&mut |t| t.value == 99).is_none());
    }

    #[test]
    fn test_expand_preserves_wrapped_window() {
        let buffer = BoundedBuffer::new(3, 0);
        for v in 1..=3 {
            buffer.offer(Tagged::normal(v)).unwrap();
        }
        buffer.poll();
        buffer.offer(Tagged::normal(4)).unwrap();

        buffer.expand(2);
        assert_eq!(buffer.capacity(), 5);
        buffer.offer(Tagged::normal(5)).unwrap();
        buffer.offer(Tagged::normal(6)).unwrap();
        assert!(buffer.offer(Tagged::normal(7)).is_err());
        assert_eq!(values(&buffer), vec![2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_drain_to_respects_max() {
        let buffer = BoundedBuffer::new(5, 1);
        for v in 1..=4 {
            buffer.offer(Tagged::normal(v)).unwrap();
        }
        buffer.offer(Tagged::expedited(9)).unwrap();
        let mut out = Vec::new();
        assert_eq!(buffer.drain_to(&mut out, 3), 3);
        assert_eq!(out.iter().map(|t| t.value).collect::<Vec<_>>(), vec![9, 1, 2]);
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_take_unblocks_exactly_one_waiting_producer() {
        let buffer = Arc::new(BoundedBuffer::new(2, 0));
        buffer.offer(Tagged::normal(1)).unwrap();
        buffer.offer(Tagged::normal(2)).unwrap();

        let finished = Arc::new(AtomicUsize::new(0));
        let producers: Vec<_> = [3, 4]
            .into_iter()
            .map(|v| {
                let buffer = Arc::clone(&buffer);
                let finished = Arc::clone(&finished);
                std::thread::spawn(move || {
                    buffer.put(Tagged::normal(v)).unwrap();
                    finished.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(finished.load(Ordering::SeqCst), 0);

        assert_eq!(buffer.take().unwrap().value, 1);
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert_eq!(buffer.len(), 2);

        buffer.take().unwrap();
        for producer in producers {
            producer.join().unwrap();
        }
        assert_eq!(finished.load(Ordering::SeqCst), 2);
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_poll_timeout_on_empty_buffer() {
        let buffer: BoundedBuffer<Tagged<u32>> = BoundedBuffer::new(2, 0);
        let started = Instant::now();
        assert_eq!(buffer.poll_timeout(Duration::from_millis(25)), Ok(None));
        assert!(started.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn test_blocked_take_receives_offer() {
        let buffer = Arc::new(BoundedBuffer::new(2, 0));
        let consumer = {
            let buffer = Arc::clone(&buffer);
            std::thread::spawn(move || buffer.take().map(|t: Tagged<u32>| t.value))
        };
        std::thread::sleep(Duration::from_millis(20));
        buffer.offer(Tagged::normal(42)).unwrap();
        assert_eq!(consumer.join().unwrap(), Ok(42));
    }

    #[test]
    fn test_take_observes_interrupt() {
        let buffer: Arc<BoundedBuffer<Tagged<u32>>> = Arc::new(BoundedBuffer::new(2, 0));
        let (tx, rx) = std::sync::mpsc::channel();
        let consumer = {
            let buffer = Arc::clone(&buffer);
            std::thread::spawn(move || {
                tx.send(interrupt::current()).unwrap();
                buffer.take().map(|t| t.value)
            })
        };
        rx.recv().unwrap().interrupt();
        assert_eq!(consumer.join().unwrap(), Err(Interrupted));
    }
}
