//! Extraction layer: fetched pages (or search snippets) to lead candidates.

mod contact;

pub use contact::ContactExtractor;

use crate::models::{FetchTarget, Lead};

/// What an extractor made of one document.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionOutcome {
    Found(Vec<Lead>),
    NotFound,
    /// The extractor could not process the document. Not retried.
    Error(String),
}

impl ExtractionOutcome {
    pub fn leads(&self) -> &[Lead] {
        match self {
            Self::Found(leads) => leads,
            _ => &[],
        }
    }
}

pub trait Extractor: Send + Sync {
    fn extract(&self, body: &str, target: &FetchTarget) -> ExtractionOutcome;
}
