//! Portal run metrics and portal configuration.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{parse_datetime, Result};
use crate::models::{PortalConfig, PortalMetric};

/// Aggregate of a portal's runs inside an evaluation window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PortalWindow {
    pub runs: u64,
    pub avg_success_rate: f64,
    pub urls_crawled: u64,
    pub errors: u64,
}

impl PortalWindow {
    /// Errors per crawled URL; a window with errors but no URLs counts as all errors.
    pub fn error_ratio(&self) -> f64 {
        if self.urls_crawled > 0 {
            self.errors as f64 / self.urls_crawled as f64
        } else if self.errors > 0 {
            1.0
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone)]
pub struct PortalRepository {
    db_path: PathBuf,
}

impl PortalRepository {
    pub fn new(db_path: &Path) -> Result<Self> {
        let repo = Self {
            db_path: db_path.to_path_buf(),
        };
        repo.init_schema()?;
        Ok(repo)
    }

    fn connect(&self) -> Result<Connection> {
        super::connect(&self.db_path)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            r#"
            -- One row per portal per crawl run; never updated
            CREATE TABLE IF NOT EXISTS portal_metrics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                portal TEXT NOT NULL,
                run_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                urls_crawled INTEGER NOT NULL DEFAULT 0,
                leads_found INTEGER NOT NULL DEFAULT 0,
                leads_with_phone INTEGER NOT NULL DEFAULT 0,
                success_rate REAL NOT NULL DEFAULT 0,
                errors INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS portal_config (
                portal TEXT PRIMARY KEY,
                enabled INTEGER NOT NULL DEFAULT 1,
                priority INTEGER NOT NULL DEFAULT 0,
                delay_seconds REAL NOT NULL DEFAULT 1.0,
                disabled_reason TEXT,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_portal_metrics_portal_time
                ON portal_metrics(portal, timestamp);
        "#,
        )?;
        Ok(())
    }

    pub fn insert_metric(&self, metric: &PortalMetric) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            r#"
            INSERT INTO portal_metrics
                (portal, run_id, timestamp, urls_crawled, leads_found, leads_with_phone, success_rate, errors)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                metric.portal,
                metric.run_id,
                metric.timestamp.to_rfc3339(),
                metric.urls_crawled as i64,
                metric.leads_found as i64,
                metric.leads_with_phone as i64,
                metric.success_rate,
                metric.errors as i64,
            ],
        )?;
        Ok(())
    }

    /// Metrics for a portal at or after `since`, oldest first.
    pub fn metrics_since(&self, portal: &str, since: DateTime<Utc>) -> Result<Vec<PortalMetric>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM portal_metrics WHERE portal = ? ORDER BY timestamp ASC, id ASC",
        )?;
        let metrics = stmt
            .query_map(params![portal], row_to_metric)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        // RFC3339 strings with differing precision don't compare lexically
        Ok(metrics.into_iter().filter(|m| m.timestamp >= since).collect())
    }

    /// Summarize a portal's runs at or after `since`.
    pub fn window(&self, portal: &str, since: DateTime<Utc>) -> Result<PortalWindow> {
        let metrics = self.metrics_since(portal, since)?;
        if metrics.is_empty() {
            return Ok(PortalWindow::default());
        }
        let runs = metrics.len() as u64;
        Ok(PortalWindow {
            runs,
            avg_success_rate: metrics.iter().map(|m| m.success_rate).sum::<f64>() / runs as f64,
            urls_crawled: metrics.iter().map(|m| m.urls_crawled).sum(),
            errors: metrics.iter().map(|m| m.errors).sum(),
        })
    }

    /// Portal config, or the enabled default if the portal was never seen.
    pub fn get_config(&self, portal: &str) -> Result<PortalConfig> {
        let conn = self.connect()?;
        let config = conn
            .query_row(
                "SELECT * FROM portal_config WHERE portal = ?",
                params![portal],
                row_to_config,
            )
            .optional()?;
        Ok(config.unwrap_or_else(|| PortalConfig::new(portal)))
    }

    pub fn list_configs(&self) -> Result<Vec<PortalConfig>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT * FROM portal_config ORDER BY portal")?;
        let configs = stmt
            .query_map([], row_to_config)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(configs)
    }

    /// Disable a portal. Returns false if it was already disabled.
    pub fn disable(&self, portal: &str, reason: &str) -> Result<bool> {
        let conn = self.connect()?;
        let rows = conn.execute(
            r#"
            INSERT INTO portal_config (portal, enabled, disabled_reason, updated_at)
            VALUES (?1, 0, ?2, ?3)
            ON CONFLICT(portal) DO UPDATE SET
                enabled = 0,
                disabled_reason = excluded.disabled_reason,
                updated_at = excluded.updated_at
            WHERE portal_config.enabled = 1
            "#,
            params![portal, reason, Utc::now().to_rfc3339()],
        )?;
        Ok(rows > 0)
    }

    /// Re-enable a portal and clear its disable reason.
    pub fn enable(&self, portal: &str) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            r#"
            INSERT INTO portal_config (portal, enabled, disabled_reason, updated_at)
            VALUES (?1, 1, NULL, ?2)
            ON CONFLICT(portal) DO UPDATE SET
                enabled = 1,
                disabled_reason = NULL,
                updated_at = excluded.updated_at
            "#,
            params![portal, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Ensure a config row exists so the portal shows up in listings.
    pub fn ensure_config(&self, portal: &str) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT OR IGNORE INTO portal_config (portal, updated_at) VALUES (?1, ?2)",
            params![portal, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

fn row_to_metric(row: &rusqlite::Row) -> rusqlite::Result<PortalMetric> {
    Ok(PortalMetric {
        portal: row.get("portal")?,
        run_id: row.get("run_id")?,
        timestamp: parse_datetime(&row.get::<_, String>("timestamp")?),
        urls_crawled: row.get::<_, i64>("urls_crawled")? as u64,
        leads_found: row.get::<_, i64>("leads_found")? as u64,
        leads_with_phone: row.get::<_, i64>("leads_with_phone")? as u64,
        success_rate: row.get("success_rate")?,
        errors: row.get::<_, i64>("errors")? as u64,
    })
}

fn row_to_config(row: &rusqlite::Row) -> rusqlite::Result<PortalConfig> {
    Ok(PortalConfig {
        portal: row.get("portal")?,
        enabled: row.get::<_, i32>("enabled")? != 0,
        priority: row.get("priority")?,
        delay_seconds: row.get("delay_seconds")?,
        disabled_reason: row.get("disabled_reason")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use tempfile::tempdir;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn window_only_counts_recent_runs() {
        let dir = tempdir().unwrap();
        let repo = PortalRepository::new(&dir.path().join("test.db")).unwrap();

        repo.insert_metric(&PortalMetric::new("p", "old", t0() - Duration::days(8), 10, 5, 5, 0))
            .unwrap();
        repo.insert_metric(&PortalMetric::new("p", "r1", t0(), 10, 1, 1, 2))
            .unwrap();
        repo.insert_metric(&PortalMetric::new("p", "r2", t0(), 10, 3, 3, 4))
            .unwrap();
        repo.insert_metric(&PortalMetric::new("other", "r1", t0(), 10, 3, 3, 0))
            .unwrap();

        let window = repo.window("p", t0() - Duration::days(7)).unwrap();
        assert_eq!(window.runs, 2);
        assert!((window.avg_success_rate - 0.2).abs() < 1e-9);
        assert_eq!(window.urls_crawled, 20);
        assert_eq!(window.errors, 6);
        assert!((window.error_ratio() - 0.3).abs() < 1e-9);
    }

    #[test]
    fn error_ratio_edge_cases() {
        assert_eq!(PortalWindow::default().error_ratio(), 0.0);
        let all_errors = PortalWindow {
            runs: 1,
            errors: 3,
            ..Default::default()
        };
        assert_eq!(all_errors.error_ratio(), 1.0);
    }

    #[test]
    fn config_defaults_to_enabled() {
        let dir = tempdir().unwrap();
        let repo = PortalRepository::new(&dir.path().join("test.db")).unwrap();
        let config = repo.get_config("new.example").unwrap();
        assert!(config.enabled);
        assert_eq!(config.disabled_reason, None);
        assert!(repo.list_configs().unwrap().is_empty());
    }

    #[test]
    fn disable_and_enable() {
        let dir = tempdir().unwrap();
        let repo = PortalRepository::new(&dir.path().join("test.db")).unwrap();
        repo.ensure_config("p").unwrap();

        assert!(repo.disable("p", "low success").unwrap());
        assert!(!repo.disable("p", "again").unwrap());

        let config = repo.get_config("p").unwrap();
        assert!(!config.enabled);
        assert_eq!(config.disabled_reason.as_deref(), Some("low success"));

        repo.enable("p").unwrap();
        let config = repo.get_config("p").unwrap();
        assert!(config.enabled);
        assert_eq!(config.disabled_reason, None);
        assert_eq!(repo.list_configs().unwrap().len(), 1);
    }
}
