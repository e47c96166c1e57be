//! Rate governor configuration.

use std::time::Duration;

/// Time window for 403 pattern detection.
pub const FORBIDDEN_WINDOW: Duration = Duration::from_secs(60);

/// Number of unique URLs that must 403 within the window to count as a block.
pub const FORBIDDEN_THRESHOLD: usize = 3;

/// Concurrency caps and per-host pacing.
#[derive(Debug, Clone)]
pub struct GovernorConfig {
    /// Maximum fetches in flight across all hosts.
    pub max_global: usize,
    /// Maximum fetches in flight against a single host.
    pub max_per_host: usize,
    /// Minimum spacing between request starts on one host.
    pub min_delay: Duration,
    /// Upper bound of the random extra delay added to `min_delay`.
    pub jitter: Duration,
    pub forbidden_threshold: usize,
    pub forbidden_window: Duration,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            max_global: 8,
            max_per_host: 2,
            min_delay: Duration::from_millis(1000),
            jitter: Duration::from_millis(500),
            forbidden_threshold: FORBIDDEN_THRESHOLD,
            forbidden_window: FORBIDDEN_WINDOW,
        }
    }
}

impl GovernorConfig {
    /// Caps below 1 are raised to 1.
    pub fn new(max_global: usize, max_per_host: usize) -> Self {
        Self {
            max_global: max_global.max(1),
            max_per_host: max_per_host.max(1),
            ..Default::default()
        }
    }

    pub fn with_pacing(mut self, min_delay: Duration, jitter: Duration) -> Self {
        self.min_delay = min_delay;
        self.jitter = jitter;
        self
    }
}

/// Snapshot of governor activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GovernorStats {
    pub in_flight: usize,
    pub max_global: usize,
    pub max_per_host: usize,
    pub hosts_tracked: usize,
    pub total_requests: u64,
    pub blocks_detected: u64,
}
