//! Worker thread loop.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, trace};

use super::config::WORKER_POLL_SLICE;
use super::global::{PoolInner, PoolTask};
use crate::sync::interrupt;

/// Body of one pool worker thread.
///
/// The caller has already counted this worker as live; the loop removes it
/// again when it decides to exit.
pub(crate) fn run(pool: Arc<PoolInner>, id: usize, first: Option<PoolTask>) {
    pool.workers.insert(id, interrupt::current());
    interrupt::take_interrupt();

    if let Some(task) = first {
        pool.run_task(task);
    }

    pool.idle.fetch_add(1, Ordering::SeqCst);
    let mut idle_since = Instant::now();
    loop {
        if pool.should_retire(idle_since) {
            break;
        }
        match pool.queue.poll_timeout(WORKER_POLL_SLICE) {
            Ok(Some(task)) => {
                pool.idle.fetch_sub(1, Ordering::SeqCst);
                pool.run_task(task);
                pool.idle.fetch_add(1, Ordering::SeqCst);
                idle_since = Instant::now();
            }
            Ok(None) => {}
            Err(_) => {
                trace!(pool = %pool.name, worker = id, "Discarding interrupt delivered to idle worker");
            }
        }
    }
    pool.idle.fetch_sub(1, Ordering::SeqCst);

    debug!(pool = %pool.name, worker = id, "Worker exiting");
    pool.worker_exited(id);
}
