//! reqwest-backed fetcher.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use super::user_agent::resolve_user_agent;
use super::{FetchError, FetchResponse, Fetcher};

/// HTTP fetcher with a shared connection pool.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Create a fetcher.
    /// - None: default leadharvest user agent
    /// - Some("impersonate"): random real browser user agent
    /// - Some(custom): custom user agent string
    pub fn new(user_agent_config: Option<&str>) -> Result<Self, FetchError> {
        let user_agent = resolve_user_agent(user_agent_config);
        let client = Client::builder()
            .user_agent(&user_agent)
            .gzip(true)
            .brotli(true)
            .cookie_store(true)
            .build()
            .map_err(|e| FetchError::Other(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

fn map_reqwest_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout(e.to_string())
    } else if e.is_connect() || e.is_request() {
        FetchError::Connection(e.to_string())
    } else if e.is_builder() {
        FetchError::InvalidUrl(e.to_string())
    } else if e.is_body() || e.is_decode() {
        FetchError::Body(e.to_string())
    } else {
        FetchError::Other(e.to_string())
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<FetchResponse, FetchError> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status_code = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|v| (k.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();

        let body = response.text().await.map_err(map_reqwest_error)?;
        debug!("GET {} -> {} ({} bytes)", url, status_code, body.len());

        Ok(FetchResponse {
            status_code,
            body,
            headers,
        })
    }
}
