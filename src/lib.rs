//! leadharvest - adaptive crawl orchestration for contact lead harvesting.
//!
//! Core library: rate governing, retry scheduling, deduplication and the
//! learning feedback loop that tunes which queries, portals and hosts the
//! crawler favors.

// Model types use `from_str` methods that return Option<Self>,
// not Result<Self, Error> as std::str::FromStr requires.
#![allow(clippy::should_implement_trait)]

pub mod config;
pub mod crawl;
pub mod dedup;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod learning;
pub mod models;
pub mod orchestrator;
pub mod rate_limit;
pub mod repository;
pub mod search;

pub use error::{HarvestError, HarvestResult};
