//! Host backoff store.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{parse_datetime_opt, Result};
use crate::models::{BackoffReason, HostBackoffRecord};

/// SQLite-backed host cooldowns. One row per host.
#[derive(Debug, Clone)]
pub struct HostBackoffRepository {
    db_path: PathBuf,
}

impl HostBackoffRepository {
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
            CREATE TABLE IF NOT EXISTS host_backoff (
                host TEXT PRIMARY KEY,
                failure_count INTEGER NOT NULL DEFAULT 0,
                total_requests INTEGER NOT NULL DEFAULT 0,
                last_failure_at TEXT,
                backoff_until TEXT,
                reason TEXT
            );
        "#,
        )?;
        Ok(())
    }

    /// Register a failure and put the host into backoff for the reason's tier.
    ///
    /// Tiers do not escalate: a repeat failure resets `backoff_until` to
    /// `now + tier`, it never extends it further.
    pub fn record_failure(
        &self,
        host: &str,
        reason: BackoffReason,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        let until = now + reason.duration();
        let conn = self.connect()?;
        conn.execute(
            r#"
            INSERT INTO host_backoff (host, failure_count, total_requests, last_failure_at, backoff_until, reason)
            VALUES (?1, 1, 1, ?2, ?3, ?4)
            ON CONFLICT(host) DO UPDATE SET
                failure_count = failure_count + excluded.failure_count,
                total_requests = total_requests + excluded.total_requests,
                last_failure_at = excluded.last_failure_at,
                backoff_until = excluded.backoff_until,
                reason = excluded.reason
            "#,
            params![host, now.to_rfc3339(), until.to_rfc3339(), reason.as_str()],
        )?;
        Ok(until)
    }

    /// Count a request against a host that did not fail.
    pub fn record_request(&self, host: &str) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            r#"
            INSERT INTO host_backoff (host, total_requests) VALUES (?1, 1)
            ON CONFLICT(host) DO UPDATE SET
                total_requests = total_requests + excluded.total_requests
            "#,
            params![host],
        )?;
        Ok(())
    }

    /// True strictly before the host's `backoff_until`.
    pub fn is_host_backed_off(&self, host: &str, now: DateTime<Utc>) -> Result<bool> {
        Ok(self
            .get(host)?
            .is_some_and(|record| record.is_backed_off(now)))
    }

    pub fn get(&self, host: &str) -> Result<Option<HostBackoffRecord>> {
        let conn = self.connect()?;
        let record = conn
            .query_row(
                "SELECT * FROM host_backoff WHERE host = ?",
                params![host],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    /// Hosts still cooling down at `now`.
    pub fn list_active(&self, now: DateTime<Utc>) -> Result<Vec<HostBackoffRecord>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM host_backoff WHERE backoff_until IS NOT NULL ORDER BY backoff_until DESC",
        )?;
        let records = stmt
            .query_map([], row_to_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records
            .into_iter()
            .filter(|r| r.is_backed_off(now))
            .collect())
    }

    /// Lift a host's backoff. Returns true if the host had a record.
    pub fn clear(&self, host: &str) -> Result<bool> {
        let conn = self.connect()?;
        let rows = conn.execute(
            "UPDATE host_backoff SET backoff_until = NULL, reason = NULL WHERE host = ?",
            params![host],
        )?;
        Ok(rows > 0)
    }
}

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<HostBackoffRecord> {
    Ok(HostBackoffRecord {
        host: row.get("host")?,
        failure_count: row.get::<_, i64>("failure_count")? as u32,
        total_requests: row.get::<_, i64>("total_requests")? as u64,
        last_failure_at: parse_datetime_opt(row.get("last_failure_at")?),
        backoff_until: parse_datetime_opt(row.get("backoff_until")?),
        reason: row
            .get::<_, Option<String>>("reason")?
            .and_then(|s| BackoffReason::from_str(&s)),
    })
}
