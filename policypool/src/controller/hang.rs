//! Hang detection.
//!
//! A pool hangs when work is queued but nothing completes for a whole tick,
//! typically because every thread is blocked on something the queued work
//! would provide.

use std::time::{Duration, Instant};

/// Outcome of one hang check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HangCheck {
    Healthy,
    Detected,
    Continuing,
    Resolved(Duration),
}

#[derive(Debug, Default)]
pub(crate) struct HangTracker {
    since: Option<Instant>,
    hangs: u64,
}

impl HangTracker {
    pub(crate) fn check(&mut self, queue_depth: usize, completed: u64, now: Instant) -> HangCheck {
        let stalled = queue_depth > 0 && completed == 0;
        match (stalled, self.since) {
            (true, None) => {
                self.since = Some(now);
                self.hangs += 1;
                HangCheck::Detected
            }
            (true, Some(_)) => HangCheck::Continuing,
            (false, Some(since)) => {
                self.since = None;
                HangCheck::Resolved(now.saturating_duration_since(since))
            }
            (false, None) => HangCheck::Healthy,
        }
    }

    pub(crate) fn is_hanging(&self) -> bool {
        self.since.is_some()
    }

    /// Number of hangs detected so far.
    pub(crate) fn hangs(&self) -> u64 {
        self.hangs
    }
}
