//! Search layer: turns a query into candidate URLs.

mod duckduckgo;

pub use duckduckgo::{DuckDuckGoSearch, DDG_SEARCH_URL};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::fetch::FetchError;

/// A single search result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub url: String,
    pub title: Option<String>,
    pub snippet: Option<String>,
}

impl SearchHit {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: None,
            snippet: None,
        }
    }

    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = Some(snippet.into());
        self
    }
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Host requests are sent to; the orchestrator gates searches on it.
    fn host(&self) -> &str;

    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, FetchError>;
}
