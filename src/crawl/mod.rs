//! Crawl primitives: URL normalization, failure classification and retries.

pub mod failure;
pub mod normalize;
pub mod retry;

pub use failure::{Failure, FailureKind};
pub use normalize::{extract_host, normalize_url, portal_for_host};
pub use retry::{RetryConfig, RetryDecision, RetryEntry, RetryScheduler, RetryStats};
