//! Time-bounded log of request instants.

use std::collections::VecDeque;
use tokio::time::{Duration, Instant};

/// Instants of recent requests, oldest first.
///
/// The log never holds entries older than the window it was pruned against,
/// so its length is the number of requests made in the trailing window.
#[derive(Debug, Clone, Default)]
pub struct RequestLog {
    data: VecDeque<Instant>,
}

impl RequestLog {
    /// Create an empty log with room for `capacity` entries.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a request made at `at`.
    pub fn push(&mut self, at: Instant) {
        self.data.push_back(at);
    }

    /// Drop every entry older than `now - window`.
    pub fn evict_older_than(&mut self, now: Instant, window: Duration) {
        let Some(cutoff) = now.checked_sub(window) else {
            return;
        };
        while let Some(&t) = self.data.front() {
            if t < cutoff {
                self.data.pop_front();
            } else {
                break;
            }
        }
    }

    /// Number of requests currently in the log.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }
}
