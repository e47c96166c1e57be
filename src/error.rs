//! Crate-level error type.

use thiserror::Error;

use crate::config::ConfigError;
use crate::fetch::FetchError;
use crate::repository::RepositoryError;

pub type HarvestResult<T> = Result<T, HarvestError>;

#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),
    #[error("Invalid lead: {0}")]
    InvalidLead(String),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}
