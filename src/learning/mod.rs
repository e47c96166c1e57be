//! Learning feedback: the crawler tunes itself from observed outcomes.
//!
//! - [`PortalLearner`] disables portals that stop producing leads.
//! - [`DorkLearner`] keeps the explore/core query pools and picks batches.
//! - [`PatternLearner`] grows the set of phone formats extraction looks for.
//!
//! Host cooldowns are stored by [`crate::repository::HostBackoffRepository`].

mod dork;
mod pattern;
mod portal;

pub use dork::{select_batch, DorkLearner, EXPLORE_SLOTS, STALE_AFTER_DAYS, UNDERSAMPLED_USES};
pub use pattern::{
    generalized_regex, pattern_key, LearnedPatterns, PatternLearner, PROMOTION_THRESHOLD,
};
pub use portal::{PortalLearner, PortalPolicy};
