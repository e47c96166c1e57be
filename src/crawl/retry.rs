//! Retry scheduler for transiently failed URLs.
//!
//! Each URL moves through `Unscheduled -> Scheduled -> (Resolved | Scheduled | Exhausted)`.
//! Entries are keyed by normalized URL and live for the duration of the process.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::failure::{Failure, FailureKind};
use crate::models::FetchTarget;

/// Backoff parameters for the retry scheduler.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay after the first failure; doubled for each further failure.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Entries are dropped once their retry count exceeds this.
    pub max_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(600),
            max_retries: 3,
        }
    }
}

impl RetryConfig {
    /// Delay before the attempt following failure number `retries`:
    /// `base * 2^retries`, capped at `max_delay`.
    pub fn backoff_delay(&self, retries: u32) -> Duration {
        let base_ms = self.base_delay.as_millis().min(u64::MAX as u128) as u64;
        let cap_ms = self.max_delay.as_millis().min(u64::MAX as u128) as u64;
        let factor = 2u64.checked_pow(retries).unwrap_or(u64::MAX);
        Duration::from_millis(base_ms.saturating_mul(factor).min(cap_ms))
    }
}

/// A URL waiting to be replayed.
#[derive(Debug, Clone)]
pub struct RetryEntry {
    pub target: FetchTarget,
    pub status_or_error: String,
    pub retries: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub reason: FailureKind,
    in_flight: bool,
}

impl RetryEntry {
    pub fn url(&self) -> &str {
        &self.target.normalized_url
    }
}

/// What the scheduler did with a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    Scheduled {
        retries: u32,
        next_attempt_at: DateTime<Utc>,
    },
    /// Retry budget spent; the entry was dropped.
    Exhausted { retries: u32 },
    /// Failure class is never retried.
    NotRetryable,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryStats {
    pub scheduled: u64,
    pub resolved: u64,
    pub exhausted: u64,
    pub not_retryable: u64,
}

#[derive(Debug, Default)]
struct RetryState {
    entries: HashMap<String, RetryEntry>,
    stats: RetryStats,
}

#[derive(Debug)]
pub struct RetryScheduler {
    config: RetryConfig,
    state: Mutex<RetryState>,
}

impl RetryScheduler {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            state: Mutex::new(RetryState::default()),
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Record a failed fetch of `target`.
    pub async fn record_failure(
        &self,
        target: &FetchTarget,
        failure: &Failure,
        now: DateTime<Utc>,
    ) -> RetryDecision {
        let mut state = self.state.lock().await;
        let key = target.normalized_url.clone();

        if !failure.kind.is_retryable() {
            state.entries.remove(&key);
            state.stats.not_retryable += 1;
            debug!(
                "Not retrying {} ({})",
                target.url, failure.status_or_error
            );
            return RetryDecision::NotRetryable;
        }

        let (retries, previous_next) = match state.entries.get(&key) {
            Some(entry) => (entry.retries + 1, Some(entry.next_attempt_at)),
            None => (1, None),
        };

        if retries > self.config.max_retries {
            state.entries.remove(&key);
            state.stats.exhausted += 1;
            warn!(
                "Giving up on {} after {} retries ({})",
                target.url,
                retries - 1,
                failure.status_or_error
            );
            return RetryDecision::Exhausted { retries };
        }

        let delay = chrono::Duration::milliseconds(
            self.config.backoff_delay(retries).as_millis().min(i64::MAX as u128) as i64,
        );
        let candidate = now.checked_add_signed(delay).unwrap_or(now);
        // Never move an entry's next attempt backwards, even if `now` does.
        let next_attempt_at = match previous_next {
            Some(prev) if prev > candidate => prev,
            _ => candidate,
        };

        let mut stored = target.clone();
        stored.attempt_count = stored.attempt_count.max(retries);
        state.entries.insert(
            key,
            RetryEntry {
                target: stored,
                status_or_error: failure.status_or_error.clone(),
                retries,
                next_attempt_at,
                reason: failure.kind,
                in_flight: false,
            },
        );
        state.stats.scheduled += 1;
        debug!(
            "Scheduled retry {} for {} at {} ({})",
            retries, target.url, next_attempt_at, failure.status_or_error
        );

        RetryDecision::Scheduled {
            retries,
            next_attempt_at,
        }
    }

    /// Record a successful fetch. Returns true if a pending entry was resolved.
    pub async fn record_success(&self, normalized_url: &str) -> bool {
        let mut state = self.state.lock().await;
        if state.entries.remove(normalized_url).is_some() {
            state.stats.resolved += 1;
            true
        } else {
            false
        }
    }

    /// Claim every entry due at `now` for replay.
    ///
    /// Claimed entries stay in the table (so their retry count survives) but
    /// are not handed out again until they fail, succeed, or are released.
    pub async fn claim_due(&self, now: DateTime<Utc>) -> Vec<RetryEntry> {
        let mut state = self.state.lock().await;
        let mut due: Vec<RetryEntry> = state
            .entries
            .values_mut()
            .filter(|e| !e.in_flight && e.next_attempt_at <= now)
            .map(|e| {
                e.in_flight = true;
                e.clone()
            })
            .collect();
        due.sort_by_key(|e| e.next_attempt_at);
        due
    }

    /// Return a claimed entry to the schedule without counting an attempt.
    pub async fn release(&self, normalized_url: &str) {
        let mut state = self.state.lock().await;
        if let Some(entry) = state.entries.get_mut(normalized_url) {
            entry.in_flight = false;
        }
    }

    /// Return a claimed entry without counting an attempt, pushing its next
    /// attempt out to at least `until` (e.g. the end of a host backoff).
    pub async fn postpone(&self, normalized_url: &str, until: DateTime<Utc>) {
        let mut state = self.state.lock().await;
        if let Some(entry) = state.entries.get_mut(normalized_url) {
            entry.in_flight = false;
            if until > entry.next_attempt_at {
                entry.next_attempt_at = until;
            }
        }
    }

    /// Earliest `next_attempt_at` among unclaimed entries.
    pub async fn next_due_at(&self) -> Option<DateTime<Utc>> {
        let state = self.state.lock().await;
        state
            .entries
            .values()
            .filter(|e| !e.in_flight)
            .map(|e| e.next_attempt_at)
            .min()
    }

    pub async fn get(&self, normalized_url: &str) -> Option<RetryEntry> {
        self.state.lock().await.entries.get(normalized_url).cloned()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> RetryStats {
        self.state.lock().await.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn scheduler(max_retries: u32) -> RetryScheduler {
        RetryScheduler::new(RetryConfig {
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(60),
            max_retries,
        })
    }

    fn target() -> FetchTarget {
        FetchTarget::new("https://example.com/jobs/1", Some("nurse berlin")).unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn transient() -> Failure {
        Failure::new(FailureKind::ServerError, "HTTP 500")
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let config = RetryConfig {
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(60),
            max_retries: 5,
        };
        assert_eq!(config.backoff_delay(1), Duration::from_secs(20));
        assert_eq!(config.backoff_delay(2), Duration::from_secs(40));
        assert_eq!(config.backoff_delay(3), Duration::from_secs(60));
        assert_eq!(config.backoff_delay(200), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn schedules_with_exponential_delay() {
        let retry = scheduler(5);
        let decision = retry.record_failure(&target(), &transient(), t0()).await;
        assert_eq!(
            decision,
            RetryDecision::Scheduled {
                retries: 1,
                next_attempt_at: t0() + chrono::Duration::seconds(20),
            }
        );

        let decision = retry.record_failure(&target(), &transient(), t0()).await;
        assert_eq!(
            decision,
            RetryDecision::Scheduled {
                retries: 2,
                next_attempt_at: t0() + chrono::Duration::seconds(40),
            }
        );
        assert_eq!(retry.len().await, 1);
    }

    #[tokio::test]
    async fn next_attempt_never_moves_backwards() {
        let retry = scheduler(10);
        let mut last = None;
        // Clock jumps backwards on every failure; delay eventually caps.
        for i in 0..8 {
            let now = t0() - chrono::Duration::seconds(i * 30);
            let decision = retry.record_failure(&target(), &transient(), now).await;
            let RetryDecision::Scheduled {
                next_attempt_at, ..
            } = decision
            else {
                panic!("expected scheduled, got {decision:?}");
            };
            if let Some(prev) = last {
                assert!(next_attempt_at >= prev);
            }
            last = Some(next_attempt_at);
        }
    }

    #[tokio::test]
    async fn exhausts_exactly_when_retries_exceed_max() {
        let retry = scheduler(3);
        for expected in 1..=3 {
            match retry.record_failure(&target(), &transient(), t0()).await {
                RetryDecision::Scheduled { retries, .. } => assert_eq!(retries, expected),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(
            retry.record_failure(&target(), &transient(), t0()).await,
            RetryDecision::Exhausted { retries: 4 }
        );
        assert!(retry.is_empty().await);
        assert_eq!(retry.stats().await.exhausted, 1);
    }

    #[tokio::test]
    async fn permanent_failures_are_never_scheduled() {
        let retry = scheduler(3);
        let failure = Failure::new(FailureKind::Permanent, "HTTP 404");
        assert_eq!(
            retry.record_failure(&target(), &failure, t0()).await,
            RetryDecision::NotRetryable
        );
        assert!(retry.is_empty().await);
        assert_eq!(retry.stats().await.not_retryable, 1);
    }

    #[tokio::test]
    async fn claim_due_respects_next_attempt_and_in_flight() {
        let retry = scheduler(3);
        retry.record_failure(&target(), &transient(), t0()).await;
        let url = target().normalized_url;

        assert!(retry.claim_due(t0()).await.is_empty());

        let due_at = t0() + chrono::Duration::seconds(20);
        let claimed = retry.claim_due(due_at).await;
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].url(), url);
        assert_eq!(claimed[0].target.originating_query.as_deref(), Some("nurse berlin"));

        // Already claimed
        assert!(retry.claim_due(due_at).await.is_empty());
        assert_eq!(retry.next_due_at().await, None);

        retry.release(&url).await;
        assert_eq!(retry.next_due_at().await, Some(due_at));
    }

    #[tokio::test]
    async fn success_resolves_entry() {
        let retry = scheduler(3);
        retry.record_failure(&target(), &transient(), t0()).await;
        assert!(retry.record_success(&target().normalized_url).await);
        assert!(!retry.record_success(&target().normalized_url).await);
        assert!(retry.is_empty().await);

        let stats = retry.stats().await;
        assert_eq!(stats.scheduled, 1);
        assert_eq!(stats.resolved, 1);
    }

    #[tokio::test]
    async fn postpone_releases_and_delays() {
        let retry = scheduler(3);
        retry.record_failure(&target(), &transient(), t0()).await;
        let url = target().normalized_url;
        let due_at = t0() + chrono::Duration::seconds(20);
        assert_eq!(retry.claim_due(due_at).await.len(), 1);

        let later = t0() + chrono::Duration::hours(2);
        retry.postpone(&url, later).await;
        assert_eq!(retry.next_due_at().await, Some(later));
        // Postponing never pulls an entry earlier and does not count a retry.
        retry.postpone(&url, t0()).await;
        assert_eq!(retry.next_due_at().await, Some(later));
        assert_eq!(retry.get(&url).await.unwrap().retries, 1);
    }
}
