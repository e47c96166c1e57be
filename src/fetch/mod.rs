//! Fetch layer: the opaque I/O call the orchestrator gates and retries.

mod http;
mod user_agent;

pub use http::HttpFetcher;
pub use user_agent::{resolve_user_agent, USER_AGENT};

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

/// A completed HTTP exchange, regardless of status code.
#[derive(Debug, Clone, Default)]
pub struct FetchResponse {
    pub status_code: u16,
    pub body: String,
    /// Header names are lowercase.
    pub headers: HashMap<String, String>,
}

impl FetchResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status_code: 200,
            body: body.into(),
            headers: HashMap::new(),
        }
    }

    pub fn with_status(status_code: u16) -> Self {
        Self {
            status_code,
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|s| s.as_str())
    }

    /// Parsed `Retry-After` header (seconds form only).
    pub fn retry_after(&self) -> Option<Duration> {
        self.header("retry-after")?
            .trim()
            .parse::<u64>()
            .ok()
            .map(Duration::from_secs)
    }
}

/// Transport-level failures; HTTP error statuses are not errors here.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("Request timed out: {0}")]
    Timeout(String),
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Failed to read body: {0}")]
    Body(String),
    /// Non-success status from a caller that only accepts 2xx (e.g. search).
    #[error("HTTP {0}")]
    Status(u16),
    #[error("{0}")]
    Other(String),
}

impl FetchError {
    /// Timeouts, refused and reset connections are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Connection(_))
    }
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<FetchResponse, FetchError>;
}
