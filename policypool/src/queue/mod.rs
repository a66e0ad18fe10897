//! Concurrent queues with expedited insertion.
//!
//! All queues here hold two classes of items. Items whose
//! [`Expedite::is_expedited`] answers `true` are dequeued before every
//! normal item; order within a class is FIFO. Each enqueued item leaves the
//! queue exactly once, either through a poll or through a removal.
//!
//! # Implementations
//!
//! - [`BoundedBuffer`]: fixed-capacity ring buffers with separate insertion
//!   and removal locks. `put` blocks while full.
//! - [`ConcurrentPriorityQueue`]: unbounded lock-free linked lists with a
//!   permit counter for size and blocking polls.
//! - [`DoubleQueue`]: two `VecDeque`s behind a single mutex.

mod bounded_buffer;
mod concurrent_priority;
mod double_queue;

pub use bounded_buffer::BoundedBuffer;
pub use concurrent_priority::ConcurrentPriorityQueue;
pub use double_queue::DoubleQueue;

use std::sync::Arc;
use std::time::Duration;

use crate::sync::Interrupted;

// =============================================================================
// Expedite capability
// =============================================================================

/// Optional capability of a queued item.
///
/// The default answer is `false`, so items that have no opinion are treated
/// exactly like items that decline.
pub trait Expedite {
    fn is_expedited(&self) -> bool {
        false
    }
}

impl<T: Expedite + ?Sized> Expedite for Arc<T> {
    fn is_expedited(&self) -> bool {
        (**self).is_expedited()
    }
}

impl<T: Expedite + ?Sized> Expedite for Box<T> {
    fn is_expedited(&self) -> bool {
        (**self).is_expedited()
    }
}

/// A value tagged with its queue class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tagged<T> {
    pub value: T,
    pub expedited: bool,
}

impl<T> Tagged<T> {
    pub fn normal(value: T) -> Self {
        Self {
            value,
            expedited: false,
        }
    }

    pub fn expedited(value: T) -> Self {
        Self {
            value,
            expedited: true,
        }
    }
}

impl<T> Expedite for Tagged<T> {
    fn is_expedited(&self) -> bool {
        self.expedited
    }
}

// =============================================================================
// Queue contract
// =============================================================================

/// A concurrent FIFO queue with an expedited class.
pub trait ExpeditedQueue<T>: Send + Sync {
    /// Appends an item without blocking. A full bounded queue hands the item
    /// back; unbounded queues always accept.
    fn offer(&self, item: T) -> Result<(), T>;

    /// Removes the head item if one is present.
    fn poll(&self) -> Option<T>;

    /// Removes the head item, waiting up to `timeout` for one to arrive.
    fn poll_timeout(&self, timeout: Duration) -> Result<Option<T>, Interrupted>;

    /// Removes the head item, waiting as long as necessary.
    fn take(&self) -> Result<T, Interrupted>;

    /// Removes the first item matching `pred`, searching expedited items
    /// first.
    fn remove_first(&self, pred: &mut dyn FnMut(&T) -> bool) -> Option<T>;

    /// Moves up to `max` items into `out`, returning how many were moved.
    fn drain_to(&self, out: &mut Vec<T>, max: usize) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Visits every queued item in dequeue order.
    fn for_each(&self, visitor: &mut dyn FnMut(&T));
}
