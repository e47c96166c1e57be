//! Classification of fetch failures into retry and backoff policy.

use serde::{Deserialize, Serialize};

use crate::fetch::{FetchError, FetchResponse};
use crate::models::BackoffReason;

/// Failure taxonomy driving retry and host-backoff decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// 429 or an explicit Retry-After on an error response.
    RateLimited,
    /// 503.
    ServiceUnavailable,
    /// Other 5xx.
    ServerError,
    /// Timeouts, connection failures and resets.
    Network,
    /// Host-level block signal.
    Blocked,
    /// Client errors and anything else not worth repeating.
    Permanent,
}

impl FailureKind {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::ServiceUnavailable | Self::ServerError | Self::Network
        )
    }

    /// Host-level backoff tier this failure registers, if any.
    pub fn host_backoff(&self) -> Option<BackoffReason> {
        match self {
            Self::RateLimited => Some(BackoffReason::RateLimit),
            Self::Blocked => Some(BackoffReason::Blocked),
            Self::ServiceUnavailable => Some(BackoffReason::Failure),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::ServiceUnavailable => "service_unavailable",
            Self::ServerError => "server_error",
            Self::Network => "network",
            Self::Blocked => "blocked",
            Self::Permanent => "permanent",
        }
    }
}

/// A classified failure with the status code or error text that caused it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailureKind,
    pub status_or_error: String,
}

impl Failure {
    pub fn new(kind: FailureKind, status_or_error: impl Into<String>) -> Self {
        Self {
            kind,
            status_or_error: status_or_error.into(),
        }
    }

    /// Classify a non-success response. Returns `None` for 2xx/3xx.
    pub fn from_response(response: &FetchResponse) -> Option<Self> {
        let status = response.status_code;
        let kind = classify_status(status, response.retry_after().is_some())?;
        Some(Self::new(kind, format!("HTTP {}", status)))
    }

    pub fn from_error(error: &FetchError) -> Self {
        let kind = match error {
            FetchError::Status(status) => {
                classify_status(*status, false).unwrap_or(FailureKind::Permanent)
            }
            e if e.is_transient() => FailureKind::Network,
            _ => FailureKind::Permanent,
        };
        Self::new(kind, error.to_string())
    }
}

fn classify_status(status: u16, has_retry_after: bool) -> Option<FailureKind> {
    Some(match status {
        200..=399 => return None,
        429 => FailureKind::RateLimited,
        503 => FailureKind::ServiceUnavailable,
        500..=599 => FailureKind::ServerError,
        408 => FailureKind::Network,
        _ if has_retry_after => FailureKind::RateLimited,
        _ => FailureKind::Permanent,
    })
}
