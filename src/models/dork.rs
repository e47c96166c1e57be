//! Search query ("dork") records and pools.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pool a dork belongs to. `Explore` -> `Core` is a one-way transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DorkPool {
    Explore,
    Core,
}

impl DorkPool {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Explore => "explore",
            Self::Core => "core",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "explore" => Some(Self::Explore),
            "core" => Some(Self::Core),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DorkRecord {
    pub text: String,
    pub times_used: u32,
    pub total_results: u64,
    pub leads_found: u64,
    pub leads_with_phone: u64,
    /// `leads_with_phone / total_results` over cumulative totals.
    pub score: f64,
    pub pool: DorkPool,
    pub last_used: Option<DateTime<Utc>>,
}

/// Outcome of running a single dork once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DorkRun {
    pub results: u64,
    pub leads_found: u64,
    pub leads_with_phone: u64,
    /// The query was actually searched. Leads credited later (from retried
    /// URLs) are recorded with `false` and do not count as a use.
    pub searched: bool,
}
