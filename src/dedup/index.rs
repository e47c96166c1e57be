//! Lead-level dedup over the phone, email and name+city indices.

use chrono::Utc;

use super::keys::LeadKeys;
use crate::models::Lead;
use crate::repository::{DedupMatch, DedupRepository, Result};

/// Result of claiming a lead's dedup keys.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// The lead is new and now owns its keys.
    Claimed,
    Duplicate(DedupMatch),
}

impl ClaimOutcome {
    pub fn is_claimed(&self) -> bool {
        matches!(self, Self::Claimed)
    }
}

#[derive(Debug, Clone)]
pub struct LeadIndex {
    repo: DedupRepository,
}

impl LeadIndex {
    pub fn new(repo: DedupRepository) -> Self {
        Self { repo }
    }

    /// Whether any of the lead's keys already belong to another lead, and why.
    pub fn is_duplicate(&self, lead: &Lead) -> Result<(bool, String)> {
        let keys = LeadKeys::from_lead(lead);
        Ok(match self.repo.find_duplicate(&keys, None)? {
            Some(found) => (true, found.reason()),
            None => (false, String::new()),
        })
    }

    /// Index the lead under `lead_id`. Idempotent for the same id.
    pub fn register_lead(&self, lead: &Lead, lead_id: &str) -> Result<()> {
        let keys = LeadKeys::from_lead(lead);
        self.repo.register(&keys, lead_id, Utc::now())?;
        Ok(())
    }

    /// Check and register in one transaction. Concurrent claims of the same
    /// key have exactly one winner.
    pub fn claim(&self, lead: &Lead, lead_id: &str) -> Result<ClaimOutcome> {
        let keys = LeadKeys::from_lead(lead);
        if keys.is_empty() {
            return Ok(ClaimOutcome::Claimed);
        }
        Ok(match self.repo.claim(&keys, lead_id, Utc::now())? {
            Some(found) => ClaimOutcome::Duplicate(found),
            None => ClaimOutcome::Claimed,
        })
    }
}
