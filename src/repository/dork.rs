//! Search query ("dork") statistics.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{parse_datetime_opt, Result};
use crate::models::{DorkPool, DorkRecord, DorkRun};

#[derive(Debug, Clone)]
pub struct DorkRepository {
    db_path: PathBuf,
}

impl DorkRepository {
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
            CREATE TABLE IF NOT EXISTS dorks (
                text TEXT PRIMARY KEY,
                times_used INTEGER NOT NULL DEFAULT 0,
                total_results INTEGER NOT NULL DEFAULT 0,
                leads_found INTEGER NOT NULL DEFAULT 0,
                leads_with_phone INTEGER NOT NULL DEFAULT 0,
                score REAL NOT NULL DEFAULT 0,
                pool TEXT NOT NULL DEFAULT 'explore',
                last_used TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_dorks_pool_score
                ON dorks(pool, score DESC, leads_with_phone DESC);
        "#,
        )?;
        Ok(())
    }

    /// Seed queries into the explore pool. Existing queries are left alone.
    /// Returns how many were new.
    pub fn register_dorks<S: AsRef<str>>(&self, texts: &[S]) -> Result<usize> {
        let conn = self.connect()?;
        let now = Utc::now().to_rfc3339();
        let mut stmt =
            conn.prepare("INSERT OR IGNORE INTO dorks (text, created_at) VALUES (?1, ?2)")?;
        let mut added = 0;
        for text in texts {
            let text = text.as_ref().trim();
            if text.is_empty() {
                continue;
            }
            added += stmt.execute(params![text, now])?;
        }
        Ok(added)
    }

    /// Fold one run of a query into its totals and return the updated record.
    ///
    /// Score is recomputed from the cumulative totals. The first run with a
    /// phone-bearing lead moves the query to the core pool for good. Only a
    /// searched run bumps `times_used` and `last_used`.
    pub fn record_dork_usage(
        &self,
        text: &str,
        run: DorkRun,
        now: DateTime<Utc>,
    ) -> Result<DorkRecord> {
        let conn = self.connect()?;
        let now = now.to_rfc3339();
        let used = i64::from(run.searched);
        let last_used = run.searched.then(|| now.clone());
        conn.execute(
            r#"
            INSERT INTO dorks
                (text, times_used, total_results, leads_found, leads_with_phone, score, pool, last_used, created_at)
            VALUES (
                ?1, ?6, ?2, ?3, ?4,
                CASE WHEN ?2 > 0 THEN CAST(?4 AS REAL) / ?2 ELSE 0.0 END,
                CASE WHEN ?4 > 0 THEN 'core' ELSE 'explore' END,
                ?7, ?5
            )
            ON CONFLICT(text) DO UPDATE SET
                times_used = times_used + excluded.times_used,
                total_results = total_results + excluded.total_results,
                leads_found = leads_found + excluded.leads_found,
                leads_with_phone = leads_with_phone + excluded.leads_with_phone,
                score = CASE
                    WHEN total_results + excluded.total_results > 0
                    THEN CAST(leads_with_phone + excluded.leads_with_phone AS REAL)
                        / (total_results + excluded.total_results)
                    ELSE 0.0
                END,
                pool = CASE
                    WHEN pool = 'core' OR excluded.leads_with_phone > 0 THEN 'core'
                    ELSE 'explore'
                END,
                last_used = COALESCE(excluded.last_used, last_used)
            "#,
            params![
                text,
                run.results as i64,
                run.leads_found as i64,
                run.leads_with_phone as i64,
                now,
                used,
                last_used,
            ],
        )?;

        let record = conn.query_row(
            "SELECT * FROM dorks WHERE text = ?",
            params![text],
            row_to_dork,
        )?;
        Ok(record)
    }

    pub fn get(&self, text: &str) -> Result<Option<DorkRecord>> {
        let conn = self.connect()?;
        let record = conn
            .query_row(
                "SELECT * FROM dorks WHERE text = ?",
                params![text],
                row_to_dork,
            )
            .optional()?;
        Ok(record)
    }

    /// All queries, core first, best score first.
    pub fn list(&self) -> Result<Vec<DorkRecord>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM dorks
            ORDER BY CASE pool WHEN 'core' THEN 0 ELSE 1 END,
                     score DESC, leads_with_phone DESC, text ASC
            "#,
        )?;
        let records = stmt
            .query_map([], row_to_dork)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Zero usage counters and last-used times. Pools and scores are kept.
    pub fn reset_usage(&self) -> Result<usize> {
        let conn = self.connect()?;
        let rows = conn.execute("UPDATE dorks SET times_used = 0, last_used = NULL", [])?;
        Ok(rows)
    }
}

fn row_to_dork(row: &rusqlite::Row) -> rusqlite::Result<DorkRecord> {
    Ok(DorkRecord {
        text: row.get("text")?,
        times_used: row.get::<_, i64>("times_used")? as u32,
        total_results: row.get::<_, i64>("total_results")? as u64,
        leads_found: row.get::<_, i64>("leads_found")? as u64,
        leads_with_phone: row.get::<_, i64>("leads_with_phone")? as u64,
        score: row.get("score")?,
        pool: DorkPool::from_str(&row.get::<_, String>("pool")?).unwrap_or(DorkPool::Explore),
        last_used: parse_datetime_opt(row.get("last_used")?),
    })
}
