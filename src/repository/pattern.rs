//! Learned contact-format patterns.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::Result;
use crate::models::PatternRecord;

#[derive(Debug, Clone)]
pub struct PatternRepository {
    db_path: PathBuf,
}

impl PatternRepository {
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
            CREATE TABLE IF NOT EXISTS learned_patterns (
                pattern_key TEXT PRIMARY KEY,
                generalized_regex TEXT NOT NULL,
                times_matched INTEGER NOT NULL DEFAULT 0,
                source_portal TEXT,
                example_raw TEXT NOT NULL,
                example_normalized TEXT,
                first_seen TEXT NOT NULL,
                last_seen TEXT NOT NULL
            );
        "#,
        )?;
        Ok(())
    }

    /// Count one more match of a pattern and return the updated record.
    /// The first sighting's portal and examples are kept.
    pub fn record_match(&self, pattern: &PatternRecord, now: DateTime<Utc>) -> Result<PatternRecord> {
        let conn = self.connect()?;
        let now = now.to_rfc3339();
        conn.execute(
            r#"
            INSERT INTO learned_patterns
                (pattern_key, generalized_regex, times_matched, source_portal,
                 example_raw, example_normalized, first_seen, last_seen)
            VALUES (?1, ?2, 1, ?3, ?4, ?5, ?6, ?6)
            ON CONFLICT(pattern_key) DO UPDATE SET
                times_matched = times_matched + excluded.times_matched,
                last_seen = excluded.last_seen
            "#,
            params![
                pattern.pattern_key,
                pattern.generalized_regex,
                pattern.source_portal,
                pattern.example_raw,
                pattern.example_normalized,
                now,
            ],
        )?;

        let record = conn.query_row(
            "SELECT * FROM learned_patterns WHERE pattern_key = ?",
            params![pattern.pattern_key],
            row_to_pattern,
        )?;
        Ok(record)
    }

    pub fn get(&self, pattern_key: &str) -> Result<Option<PatternRecord>> {
        let conn = self.connect()?;
        let record = conn
            .query_row(
                "SELECT * FROM learned_patterns WHERE pattern_key = ?",
                params![pattern_key],
                row_to_pattern,
            )
            .optional()?;
        Ok(record)
    }

    /// Patterns matched at least `min_matches` times, most frequent first.
    pub fn list_active(&self, min_matches: u32) -> Result<Vec<PatternRecord>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM learned_patterns
            WHERE times_matched >= ?
            ORDER BY times_matched DESC, pattern_key ASC
            "#,
        )?;
        let records = stmt
            .query_map(params![min_matches], row_to_pattern)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn count(&self) -> Result<u64> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM learned_patterns", [], |row| {
            row.get(0)
        })?;
        Ok(count as u64)
    }
}

fn row_to_pattern(row: &rusqlite::Row) -> rusqlite::Result<PatternRecord> {
    Ok(PatternRecord {
        pattern_key: row.get("pattern_key")?,
        generalized_regex: row.get("generalized_regex")?,
        times_matched: row.get::<_, i64>("times_matched")? as u32,
        source_portal: row.get("source_portal")?,
        example_raw: row.get("example_raw")?,
        example_normalized: row.get("example_normalized")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn pattern(raw: &str, portal: &str) -> PatternRecord {
        PatternRecord {
            pattern_key: "XXXX XXXXXX".to_string(),
            generalized_regex: r"\d{4}\ \d{6}".to_string(),
            times_matched: 0,
            source_portal: Some(portal.to_string()),
            example_raw: raw.to_string(),
            example_normalized: None,
        }
    }

    #[test]
    fn record_match_counts_and_keeps_first_example() {
        let dir = tempdir().unwrap();
        let repo = PatternRepository::new(&dir.path().join("test.db")).unwrap();

        let first = repo.record_match(&pattern("0301 234567", "a"), Utc::now()).unwrap();
        assert_eq!(first.times_matched, 1);

        let second = repo.record_match(&pattern("0409 876543", "b"), Utc::now()).unwrap();
        assert_eq!(second.times_matched, 2);
        assert_eq!(second.example_raw, "0301 234567");
        assert_eq!(second.source_portal.as_deref(), Some("a"));
    }

    #[test]
    fn list_active_filters_by_count() {
        let dir = tempdir().unwrap();
        let repo = PatternRepository::new(&dir.path().join("test.db")).unwrap();
        repo.record_match(&pattern("0301 234567", "a"), Utc::now()).unwrap();
        assert!(repo.list_active(2).unwrap().is_empty());

        repo.record_match(&pattern("0301 234567", "a"), Utc::now()).unwrap();
        assert_eq!(repo.list_active(2).unwrap().len(), 1);
        assert_eq!(repo.count().unwrap(), 1);
    }
}
