//! Repository layer for SQLite persistence.
//!
//! Each repository owns the tables for one record family, opens a fresh
//! connection per operation and creates its schema on construction.
//! Counters are only ever changed through single-statement upserts.

mod backoff;
mod dedup;
mod dork;
mod lead;
mod pattern;
mod portal;
mod seen;

pub use backoff::HostBackoffRepository;
pub use dedup::{DedupMatch, DedupRepository, NameCityCandidate};
pub use dork::DorkRepository;
pub use lead::LeadRepository;
pub use pattern::PatternRepository;
pub use portal::{PortalRepository, PortalWindow};
pub use seen::SeenUrlRepository;

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

pub type Result<T> = std::result::Result<T, RepositoryError>;

/// Open a connection with WAL journaling and a busy timeout so concurrent
/// writers queue instead of failing.
pub fn connect(db_path: &Path) -> Result<Connection> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
    Ok(conn)
}

/// Parse a datetime string from the database, defaulting to Unix epoch on error.
pub fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Parse an optional datetime string from the database.
pub fn parse_datetime_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}

/// Every repository, opened against one database file.
#[derive(Debug, Clone)]
pub struct Repositories {
    pub db_path: PathBuf,
    pub host_backoff: HostBackoffRepository,
    pub portals: PortalRepository,
    pub dorks: DorkRepository,
    pub patterns: PatternRepository,
    pub seen_urls: SeenUrlRepository,
    pub dedup: DedupRepository,
    pub leads: LeadRepository,
}

impl Repositories {
    pub fn open(db_path: &Path) -> Result<Self> {
        Ok(Self {
            db_path: db_path.to_path_buf(),
            host_backoff: HostBackoffRepository::new(db_path)?,
            portals: PortalRepository::new(db_path)?,
            dorks: DorkRepository::new(db_path)?,
            patterns: PatternRepository::new(db_path)?,
            seen_urls: SeenUrlRepository::new(db_path)?,
            dedup: DedupRepository::new(db_path)?,
            leads: LeadRepository::new(db_path)?,
        })
    }

    /// Clear crawl history: seen URLs and dork usage counters. Dedup claims
    /// are identities and survive, as do leads, portal state and patterns.
    pub fn reset_state(&self) -> Result<()> {
        self.seen_urls.clear()?;
        self.dorks.reset_usage()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parse_datetime_falls_back_to_epoch() {
        assert_eq!(parse_datetime("garbage"), DateTime::UNIX_EPOCH);
        let dt = parse_datetime("2024-03-01T12:00:00+00:00");
        assert_eq!(dt.to_rfc3339(), "2024-03-01T12:00:00+00:00");
        assert_eq!(parse_datetime_opt(None), None);
        assert_eq!(parse_datetime_opt(Some("nope".into())), None);
    }

    #[test]
    fn open_creates_parent_dirs_and_schema() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("nested").join("leadharvest.db");
        let repos = Repositories::open(&db_path).unwrap();
        assert!(db_path.exists());
        assert_eq!(repos.leads.count().unwrap(), 0);
        // Reopening an existing database is a no-op for the schema.
        Repositories::open(&db_path).unwrap();
    }

    #[test]
    fn reset_state_keeps_dedup_claims() {
        use crate::dedup::LeadKeys;
        use crate::models::Lead;

        let dir = tempdir().unwrap();
        let repos = Repositories::open(&dir.path().join("leadharvest.db")).unwrap();
        let lead = Lead::new("https://a.example/").with_phone("030 1234567");
        repos
            .dedup
            .register(&LeadKeys::from_lead(&lead), "lead-1", Utc::now())
            .unwrap();
        repos.seen_urls.insert("https://a.example/", Utc::now()).unwrap();

        repos.reset_state().unwrap();
        assert_eq!(repos.seen_urls.count().unwrap(), 0);
        assert_eq!(repos.dedup.counts().unwrap().0, 1);
    }
}
