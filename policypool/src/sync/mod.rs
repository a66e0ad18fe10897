//! Blocking synchronization primitives shared by the queues and executors.
//!
//! Everything here waits in short slices so a pending
//! [`interrupt`](interrupt::InterruptFlag) is noticed promptly.

pub mod interrupt;
mod latch;
mod permits;

pub use interrupt::{InterruptFlag, Interrupted};
pub use latch::CountDownLatch;
pub use permits::Permits;
