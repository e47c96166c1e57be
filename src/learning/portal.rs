//! Portal auto-evaluation.
//!
//! Portals whose recent runs produce almost no phone leads, or mostly
//! errors, are disabled. Nothing re-enables a portal except an explicit
//! [`PortalLearner::enable_portal`].

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::models::{PortalConfig, PortalMetric};
use crate::repository::{PortalRepository, Result};

/// Thresholds for disabling a portal.
#[derive(Debug, Clone)]
pub struct PortalPolicy {
    pub window: Duration,
    /// Runs required in the window before a portal is judged.
    pub min_runs: u64,
    pub min_success_rate: f64,
    pub max_error_ratio: f64,
}

impl Default for PortalPolicy {
    fn default() -> Self {
        Self {
            window: Duration::days(7),
            min_runs: 3,
            min_success_rate: 0.01,
            max_error_ratio: 0.5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PortalLearner {
    repo: PortalRepository,
    policy: PortalPolicy,
}

impl PortalLearner {
    pub fn new(repo: PortalRepository) -> Self {
        Self::with_policy(repo, PortalPolicy::default())
    }

    pub fn with_policy(repo: PortalRepository, policy: PortalPolicy) -> Self {
        Self { repo, policy }
    }

    /// Append a run's metrics, then re-evaluate the portal as of the run's
    /// timestamp. Returns the disable reason if this run disabled it.
    pub fn record_portal_run(&self, metric: &PortalMetric) -> Result<Option<String>> {
        self.repo.ensure_config(&metric.portal)?;
        self.repo.insert_metric(metric)?;
        self.evaluate_portal(&metric.portal, metric.timestamp)
    }

    /// Judge a portal on its runs inside the window ending at `now`.
    /// Returns the disable reason if the portal was disabled by this call.
    pub fn evaluate_portal(&self, portal: &str, now: DateTime<Utc>) -> Result<Option<String>> {
        let window = self.repo.window(portal, now - self.policy.window)?;
        if window.runs < self.policy.min_runs {
            debug!(
                "Portal {}: {} runs in window, not evaluating yet",
                portal, window.runs
            );
            return Ok(None);
        }

        let error_ratio = window.error_ratio();
        let reason = if window.avg_success_rate < self.policy.min_success_rate {
            Some(format!(
                "success rate {:.1}% over {} runs below {:.1}%",
                window.avg_success_rate * 100.0,
                window.runs,
                self.policy.min_success_rate * 100.0
            ))
        } else if error_ratio > self.policy.max_error_ratio {
            Some(format!(
                "error ratio {:.0}% over {} runs above {:.0}%",
                error_ratio * 100.0,
                window.runs,
                self.policy.max_error_ratio * 100.0
            ))
        } else {
            None
        };

        match reason {
            Some(reason) if self.repo.disable(portal, &reason)? => {
                warn!("Disabled portal {}: {}", portal, reason);
                Ok(Some(reason))
            }
            _ => Ok(None),
        }
    }

    /// `(true, reason)` for a disabled portal.
    pub fn should_skip_portal(&self, portal: &str) -> Result<(bool, String)> {
        let config = self.repo.get_config(portal)?;
        if config.enabled {
            Ok((false, String::new()))
        } else {
            Ok((true, config.disabled_reason.unwrap_or_else(|| "disabled".to_string())))
        }
    }

    pub fn get_config(&self, portal: &str) -> Result<PortalConfig> {
        self.repo.get_config(portal)
    }

    pub fn list_configs(&self) -> Result<Vec<PortalConfig>> {
        self.repo.list_configs()
    }

    pub fn enable_portal(&self, portal: &str) -> Result<()> {
        self.repo.enable(portal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
    }

    fn learner() -> (tempfile::TempDir, PortalLearner) {
        let dir = tempdir().unwrap();
        let repo = PortalRepository::new(&dir.path().join("test.db")).unwrap();
        (dir, PortalLearner::new(repo))
    }

    #[test]
    fn needs_three_runs_before_disabling() {
        let (_dir, learner) = learner();
        for i in 0..2 {
            let metric = PortalMetric::new("p", &format!("r{i}"), t0(), 10, 0, 0, 0);
            assert_eq!(learner.record_portal_run(&metric).unwrap(), None);
        }
        assert_eq!(learner.should_skip_portal("p").unwrap(), (false, String::new()));

        let metric = PortalMetric::new("p", "r2", t0(), 10, 0, 0, 0);
        let reason = learner.record_portal_run(&metric).unwrap();
        assert!(reason.unwrap().starts_with("success rate"));

        let (skip, reason) = learner.should_skip_portal("p").unwrap();
        assert!(skip);
        assert!(reason.contains("3 runs"));
    }

    #[test]
    fn high_error_ratio_disables() {
        let (_dir, learner) = learner();
        for i in 0..3 {
            // 50% phone leads, 6 errors per 10 URLs
            let metric = PortalMetric::new("p", &format!("r{i}"), t0(), 10, 5, 5, 6);
            learner.record_portal_run(&metric).unwrap();
        }
        let (skip, reason) = learner.should_skip_portal("p").unwrap();
        assert!(skip);
        assert!(reason.starts_with("error ratio"));
    }

    #[test]
    fn exactly_half_errors_is_tolerated() {
        let (_dir, learner) = learner();
        for i in 0..3 {
            let metric = PortalMetric::new("p", &format!("r{i}"), t0(), 10, 1, 1, 5);
            learner.record_portal_run(&metric).unwrap();
        }
        assert!(!learner.should_skip_portal("p").unwrap().0);
    }

    #[test]
    fn old_runs_fall_out_of_window() {
        let (_dir, learner) = learner();
        for i in 0..2 {
            let old = t0() - Duration::days(10);
            let metric = PortalMetric::new("p", &format!("old{i}"), old, 10, 0, 0, 0);
            learner.record_portal_run(&metric).unwrap();
        }
        let metric = PortalMetric::new("p", "new", t0(), 10, 0, 0, 0);
        assert_eq!(learner.record_portal_run(&metric).unwrap(), None);
    }

    #[test]
    fn stays_disabled_until_enabled_manually() {
        let (_dir, learner) = learner();
        for i in 0..3 {
            let metric = PortalMetric::new("p", &format!("r{i}"), t0(), 10, 0, 0, 0);
            learner.record_portal_run(&metric).unwrap();
        }
        // Great runs afterwards do not bring it back.
        for i in 3..10 {
            let metric = PortalMetric::new("p", &format!("r{i}"), t0(), 10, 9, 9, 0);
            learner.record_portal_run(&metric).unwrap();
        }
        assert!(learner.should_skip_portal("p").unwrap().0);

        learner.enable_portal("p").unwrap();
        assert_eq!(learner.should_skip_portal("p").unwrap(), (false, String::new()));
    }
}
