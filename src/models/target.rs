//! URLs scheduled for fetching.

use serde::{Deserialize, Serialize};

use crate::crawl::normalize::{extract_host, normalize_url, portal_for_host};

/// A URL the orchestrator intends to fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchTarget {
    pub url: String,
    pub normalized_url: String,
    pub host: String,
    /// Portal the URL belongs to (host without a leading `www.`).
    pub portal: String,
    /// Dork that surfaced this URL, if any.
    pub originating_query: Option<String>,
    pub attempt_count: u32,
}

impl FetchTarget {
    /// Build a target from a raw URL. Returns `None` when the URL has no host.
    pub fn new(url: &str, originating_query: Option<&str>) -> Option<Self> {
        let host = extract_host(url)?;
        Some(Self {
            url: url.trim().to_string(),
            normalized_url: normalize_url(url),
            portal: portal_for_host(&host),
            host,
            originating_query: originating_query.map(|q| q.to_string()),
            attempt_count: 0,
        })
    }
}
