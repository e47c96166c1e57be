//! Data models for leadharvest.

mod backoff;
mod dork;
mod lead;
mod pattern;
mod portal;
mod target;

pub use backoff::{BackoffReason, HostBackoffRecord};
pub use dork::{DorkPool, DorkRecord, DorkRun};
pub use lead::{Lead, StoredLead};
pub use pattern::PatternRecord;
pub use portal::{PortalConfig, PortalMetric};
pub use target::FetchTarget;
