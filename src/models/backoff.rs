//! Host-level backoff records.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Why a host was put into backoff. Each reason maps to a fixed cooldown tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffReason {
    /// Generic host failure (e.g. service unavailable).
    Failure,
    /// Explicit rate-limit signal (429, Retry-After).
    RateLimit,
    /// Explicit block signal (repeated 403s across distinct URLs).
    Blocked,
}

impl BackoffReason {
    /// Cooldown tier. Tiers do not escalate with repeated failures.
    pub fn duration(&self) -> Duration {
        match self {
            Self::Failure => Duration::minutes(30),
            Self::RateLimit => Duration::minutes(90),
            Self::Blocked => Duration::hours(24),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Failure => "failure",
            Self::RateLimit => "rate_limit",
            Self::Blocked => "blocked",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "failure" => Some(Self::Failure),
            "rate_limit" => Some(Self::RateLimit),
            "blocked" => Some(Self::Blocked),
            _ => None,
        }
    }
}

/// One row per host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostBackoffRecord {
    pub host: String,
    pub failure_count: u32,
    pub total_requests: u64,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub backoff_until: Option<DateTime<Utc>>,
    pub reason: Option<BackoffReason>,
}

impl HostBackoffRecord {
    /// True strictly before `backoff_until`.
    pub fn is_backed_off(&self, now: DateTime<Utc>) -> bool {
        self.backoff_until.is_some_and(|until| now < until)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers() {
        assert_eq!(BackoffReason::Failure.duration(), Duration::minutes(30));
        assert_eq!(BackoffReason::RateLimit.duration(), Duration::minutes(90));
        assert_eq!(BackoffReason::Blocked.duration(), Duration::hours(24));
    }

    #[test]
    fn reason_round_trips_through_str() {
        for reason in [
            BackoffReason::Failure,
            BackoffReason::RateLimit,
            BackoffReason::Blocked,
        ] {
            assert_eq!(BackoffReason::from_str(reason.as_str()), Some(reason));
        }
        assert_eq!(BackoffReason::from_str("nope"), None);
    }
}
