//! Learned contact-format patterns.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternRecord {
    /// Digits replaced by `X`, separators kept, e.g. `+XX (XXX) XXXX-XX`.
    pub pattern_key: String,
    pub generalized_regex: String,
    pub times_matched: u32,
    pub source_portal: Option<String>,
    pub example_raw: String,
    pub example_normalized: Option<String>,
}
