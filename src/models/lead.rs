//! Lead candidates produced by the extraction layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dedup::keys;
use crate::error::HarvestError;

/// A contact candidate extracted from a fetched page or search snippet.
///
/// All contact fields are optional; [`Lead::validate`] is the boundary check
/// applied before a lead enters deduplication.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub city: Option<String>,
    pub title: Option<String>,
    pub source_url: String,
    pub score: f64,
}

impl Lead {
    pub fn new(source_url: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_city(mut self, city: impl Into<String>) -> Self {
        self.city = Some(city.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = score;
        self
    }

    /// Normalize blank fields to `None` and reject leads with nothing to
    /// identify them by.
    pub fn validate(mut self) -> Result<Self, HarvestError> {
        for field in [
            &mut self.name,
            &mut self.phone,
            &mut self.email,
            &mut self.city,
            &mut self.title,
        ] {
            if let Some(value) = field.take() {
                let trimmed = value.trim();
                if !trimmed.is_empty() {
                    *field = Some(trimmed.to_string());
                }
            }
        }

        if self.phone.is_none() && self.email.is_none() && self.name.is_none() {
            return Err(HarvestError::InvalidLead(format!(
                "no name, phone or email (source: {})",
                self.source_url
            )));
        }
        if !self.score.is_finite() {
            self.score = 0.0;
        }
        Ok(self)
    }

    /// Whether the lead carries a phone number usable as a dedup key.
    pub fn has_phone(&self) -> bool {
        self.phone
            .as_deref()
            .and_then(keys::normalize_phone)
            .is_some()
    }
}

/// A lead that won its dedup claim and was persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredLead {
    pub id: String,
    pub lead: Lead,
    pub portal: String,
    pub query: Option<String>,
    pub created_at: DateTime<Utc>,
}
