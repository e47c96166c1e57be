//! Per-host pacing and 403 tracking state.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::Instant;

/// State for a single host.
#[derive(Debug)]
pub(crate) struct HostState {
    /// Caps concurrent fetches against this host.
    pub permits: Arc<Semaphore>,
    /// Earliest instant the next request may start.
    pub next_slot: Option<Instant>,
    /// Recent 403 responses: (timestamp, url) for pattern detection.
    pub recent_403s: Vec<(Instant, String)>,
    pub total_requests: u64,
    pub blocks_detected: u64,
}

impl HostState {
    pub fn new(max_per_host: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_per_host)),
            next_slot: None,
            recent_403s: Vec::new(),
            total_requests: 0,
            blocks_detected: 0,
        }
    }

    /// Reserve the next start slot and return when it begins.
    ///
    /// Slots are handed out in order, so concurrent callers on the same host
    /// are spaced by at least `spacing` from each other.
    pub fn reserve_slot(&mut self, now: Instant, spacing: Duration) -> Instant {
        let start = match self.next_slot {
            Some(slot) if slot > now => slot,
            _ => now,
        };
        self.next_slot = Some(start + spacing);
        self.total_requests += 1;
        start
    }

    /// Add a 403 response, returns true if this completes a block pattern.
    pub fn add_403(&mut self, url: &str, now: Instant, window: Duration, threshold: usize) -> bool {
        // Entries are appended in time order
        let cutoff_idx = self
            .recent_403s
            .iter()
            .position(|(time, _)| now.saturating_duration_since(*time) <= window)
            .unwrap_or(self.recent_403s.len());
        if cutoff_idx > 0 {
            self.recent_403s.drain(0..cutoff_idx);
        }

        self.recent_403s.push((now, url.to_string()));
        self.unique_403_count() >= threshold
    }

    /// Count unique URLs that received 403 in the current window.
    pub fn unique_403_count(&self) -> usize {
        let mut unique_urls: Vec<&str> = self.recent_403s.iter().map(|(_, u)| u.as_str()).collect();
        unique_urls.sort();
        unique_urls.dedup();
        unique_urls.len()
    }

    pub fn clear_403_tracking(&mut self) {
        self.recent_403s.clear();
    }
}
