//! Short-lived cache for connectivity probes.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

/// Remembers the last probe result for `ttl`
#[derive(Debug)]
pub struct ReachabilityCache {
    ttl: Duration,
    last: Mutex<Option<(Instant, bool)>>,
}

impl ReachabilityCache {
    #[must_use]
    pub const fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            last: Mutex::new(None),
        }
    }

    /// The cached answer, if still fresh
    pub fn get(&self) -> Option<bool> {
        let last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        (*last).and_then(|(at, reachable)| (at.elapsed() < self.ttl).then_some(reachable))
    }

    pub fn set(&self, reachable: bool) {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) =
            Some((Instant::now(), reachable));
    }
}
