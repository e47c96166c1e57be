//! Rate governing for outbound fetches.
//!
//! A global and per-host concurrency cap, per-host pacing with jitter, and
//! 403-pattern block detection. Longer-horizon host cooldowns live in the
//! host backoff store (see [`crate::repository::HostBackoffRepository`]).

mod config;
mod governor;
mod host_state;

pub use config::{GovernorConfig, GovernorStats, FORBIDDEN_THRESHOLD, FORBIDDEN_WINDOW};
pub use governor::{GovernorClosed, GovernorPermit, RateGovernor};
