//! Per-portal run metrics and configuration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Append-only metrics for one portal in one crawl run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortalMetric {
    pub portal: String,
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    pub urls_crawled: u64,
    pub leads_found: u64,
    pub leads_with_phone: u64,
    pub success_rate: f64,
    pub errors: u64,
}

impl PortalMetric {
    /// Build a metric row, deriving `success_rate` as phone leads per URL.
    pub fn new(
        portal: &str,
        run_id: &str,
        timestamp: DateTime<Utc>,
        urls_crawled: u64,
        leads_found: u64,
        leads_with_phone: u64,
        errors: u64,
    ) -> Self {
        let success_rate = if urls_crawled > 0 {
            leads_with_phone as f64 / urls_crawled as f64
        } else {
            0.0
        };
        Self {
            portal: portal.to_string(),
            run_id: run_id.to_string(),
            timestamp,
            urls_crawled,
            leads_found,
            leads_with_phone,
            success_rate,
            errors,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortalConfig {
    pub portal: String,
    pub enabled: bool,
    pub priority: i32,
    pub delay_seconds: f64,
    pub disabled_reason: Option<String>,
}

impl PortalConfig {
    pub fn new(portal: &str) -> Self {
        Self {
            portal: portal.to_string(),
            enabled: true,
            priority: 0,
            delay_seconds: 1.0,
            disabled_reason: None,
        }
    }
}
