//! Contact-format pattern learning.
//!
//! Every phone number extracted successfully is reduced to a shape key
//! (digits become `X`, separators are kept) and a regex for that shape.
//! A shape seen twice joins the active pattern set used by extraction.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::{debug, info, warn};

use crate::dedup::keys::normalize_phone;
use crate::models::PatternRecord;
use crate::repository::{PatternRepository, Result};

/// Matches needed before a pattern is used for extraction.
pub const PROMOTION_THRESHOLD: u32 = 2;

const SEPARATORS: &[char] = &[' ', '-', '.', '/', '(', ')', '+'];

/// Shape key: digits to `X`, separators kept, everything else dropped.
/// `None` if the value has no digits.
pub fn pattern_key(raw: &str) -> Option<String> {
    let key: String = raw
        .chars()
        .filter_map(|c| {
            if c.is_ascii_digit() {
                Some('X')
            } else if SEPARATORS.contains(&c) {
                Some(c)
            } else {
                None
            }
        })
        .collect();
    let key = key.trim().to_string();
    key.contains('X').then_some(key)
}

/// Regex for a shape key: runs of `X` become `\d{n}`, separators are escaped.
pub fn generalized_regex(key: &str) -> String {
    let mut out = String::new();
    let mut run = 0usize;
    for c in key.chars() {
        if c == 'X' {
            run += 1;
            continue;
        }
        if run > 0 {
            out.push_str(&format!(r"\d{{{}}}", run));
            run = 0;
        }
        out.push_str(&regex::escape(&c.to_string()));
    }
    if run > 0 {
        out.push_str(&format!(r"\d{{{}}}", run));
    }
    out
}

/// True if no digit sits directly before `start` or after `end`.
fn digit_bounded(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].chars().next_back();
    let after = text[end..].chars().next();
    !before.is_some_and(|c| c.is_ascii_digit()) && !after.is_some_and(|c| c.is_ascii_digit())
}

/// The active runtime pattern set, shared between the learner and extractors.
#[derive(Debug, Clone, Default)]
pub struct LearnedPatterns {
    inner: Arc<RwLock<Vec<(String, Regex)>>>,
}

impl LearnedPatterns {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a compiled pattern. Returns false if the key is already active
    /// or the regex does not compile.
    pub fn insert(&self, key: &str, pattern: &str) -> bool {
        let regex = match Regex::new(pattern) {
            Ok(r) => r,
            Err(e) => {
                warn!("Skipping learned pattern {:?}: {}", pattern, e);
                return false;
            }
        };
        let mut patterns = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if patterns.iter().any(|(k, _)| k == key) {
            return false;
        }
        patterns.push((key.to_string(), regex));
        true
    }

    pub fn contains(&self, key: &str) -> bool {
        let patterns = self.inner.read().unwrap_or_else(|e| e.into_inner());
        patterns.iter().any(|(k, _)| k == key)
    }

    /// Every substring of `text` matched by an active pattern. A match that
    /// touches another digit is a slice of a longer number and is skipped.
    pub fn find_all(&self, text: &str) -> Vec<String> {
        let patterns = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let mut found = Vec::new();
        for (_, regex) in patterns.iter() {
            for m in regex.find_iter(text) {
                if !digit_bounded(text, m.start(), m.end()) {
                    continue;
                }
                let value = m.as_str().trim().to_string();
                if !found.contains(&value) {
                    found.push(value);
                }
            }
        }
        found
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
pub struct PatternLearner {
    repo: PatternRepository,
    active: LearnedPatterns,
}

impl PatternLearner {
    pub fn new(repo: PatternRepository, active: LearnedPatterns) -> Self {
        Self { repo, active }
    }

    /// Load every already-promoted pattern into the active set.
    pub fn load_active_patterns(&self) -> Result<usize> {
        let mut loaded = 0;
        for record in self.repo.list_active(PROMOTION_THRESHOLD)? {
            if self.active.insert(&record.pattern_key, &record.generalized_regex) {
                loaded += 1;
            }
        }
        debug!("Loaded {} learned patterns", loaded);
        Ok(loaded)
    }

    /// Count the shape of a successfully extracted phone number.
    /// Returns true if this match promoted the shape into the active set.
    pub fn learn(&self, raw_phone: &str, portal: Option<&str>, now: DateTime<Utc>) -> Result<bool> {
        let Some(key) = pattern_key(raw_phone) else {
            return Ok(false);
        };
        let record = PatternRecord {
            generalized_regex: generalized_regex(&key),
            pattern_key: key,
            times_matched: 0,
            source_portal: portal.map(|p| p.to_string()),
            example_raw: raw_phone.trim().to_string(),
            example_normalized: normalize_phone(raw_phone),
        };
        let updated = self.repo.record_match(&record, now)?;

        if updated.times_matched >= PROMOTION_THRESHOLD
            && self
                .active
                .insert(&updated.pattern_key, &updated.generalized_regex)
        {
            info!(
                "Learned phone pattern {:?} after {} matches",
                updated.pattern_key, updated.times_matched
            );
            return Ok(true);
        }
        Ok(false)
    }

    pub fn active(&self) -> &LearnedPatterns {
        &self.active
    }
}
