//! DuckDuckGo HTML search.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use super::{SearchHit, SearchProvider};
use crate::fetch::{FetchError, Fetcher};

/// DuckDuckGo search URL.
pub const DDG_SEARCH_URL: &str = "https://html.duckduckgo.com/html/";

const DDG_HOST: &str = "html.duckduckgo.com";

pub struct DuckDuckGoSearch {
    fetcher: Arc<dyn Fetcher>,
    region: String,
    timeout: Duration,
}

impl DuckDuckGoSearch {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            fetcher,
            region: "de-de".to_string(),
            timeout: Duration::from_secs(20),
        }
    }

    pub fn with_region(mut self, region: &str) -> Self {
        self.region = region.to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn search_url(&self, query: &str) -> String {
        format!(
            "{}?q={}&kl={}",
            DDG_SEARCH_URL,
            urlencoding::encode(query),
            urlencoding::encode(&self.region)
        )
    }
}

/// Parse search results from HTML.
pub(crate) fn parse_results(html: &str) -> Vec<SearchHit> {
    let document = Html::parse_document(html);

    // Static selectors; parsing cannot fail
    let (Ok(result_sel), Ok(link_sel), Ok(snippet_sel)) = (
        Selector::parse(".result"),
        Selector::parse("a.result__a"),
        Selector::parse(".result__snippet"),
    ) else {
        return Vec::new();
    };

    let mut hits: Vec<SearchHit> = Vec::new();
    for result in document.select(&result_sel) {
        let Some(link) = result.select(&link_sel).next() else {
            continue;
        };
        let Some(url) = link.value().attr("href").and_then(extract_url) else {
            continue;
        };
        if hits.iter().any(|h| h.url == url) {
            continue;
        }
        hits.push(SearchHit {
            url,
            title: element_text(link),
            snippet: result.select(&snippet_sel).next().and_then(element_text),
        });
    }

    debug!("Parsed {} results from DuckDuckGo", hits.len());
    hits
}

fn element_text(element: ElementRef) -> Option<String> {
    let text = element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Extract the actual URL from DuckDuckGo's redirect URL.
pub(crate) fn extract_url(href: &str) -> Option<String> {
    if href.contains("duckduckgo.com/l/") {
        // //duckduckgo.com/l/?uddg=<encoded_url>&...
        let uddg_start = href.find("uddg=")?;
        let encoded = &href[uddg_start + 5..];
        let end = encoded.find('&').unwrap_or(encoded.len());
        urlencoding::decode(&encoded[..end])
            .ok()
            .map(|s| s.into_owned())
    } else if href.starts_with("http://") || href.starts_with("https://") {
        Some(href.to_string())
    } else if href.starts_with("//") {
        Some(format!("https:{}", href))
    } else {
        None
    }
}

#[async_trait]
impl SearchProvider for DuckDuckGoSearch {
    fn name(&self) -> &str {
        "duckduckgo"
    }

    fn host(&self) -> &str {
        DDG_HOST
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, FetchError> {
        debug!("DuckDuckGo search: {}", query);
        let response = self
            .fetcher
            .fetch(&self.search_url(query), self.timeout)
            .await?;
        if !response.is_success() {
            return Err(FetchError::Status(response.status_code));
        }
        Ok(parse_results(&response.body))
    }
}
