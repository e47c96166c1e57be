//! Deduplication of URLs and leads.

mod index;
pub mod keys;
mod seen;

pub use index::{ClaimOutcome, LeadIndex};
pub use keys::LeadKeys;
pub use seen::SeenUrls;
