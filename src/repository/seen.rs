//! Persisted set of successfully fetched URLs.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use super::Result;

#[derive(Debug, Clone)]
pub struct SeenUrlRepository {
    db_path: PathBuf,
}

impl SeenUrlRepository {
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
            CREATE TABLE IF NOT EXISTS seen_urls (
                normalized_url TEXT PRIMARY KEY,
                first_seen TEXT NOT NULL
            );
        "#,
        )?;
        Ok(())
    }

    /// Every normalized URL ever marked seen.
    pub fn load_all(&self) -> Result<Vec<String>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT normalized_url FROM seen_urls")?;
        let urls = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(urls)
    }

    /// Insert a URL. Returns false if it was already present.
    pub fn insert(&self, normalized_url: &str, now: DateTime<Utc>) -> Result<bool> {
        let conn = self.connect()?;
        let rows = conn.execute(
            "INSERT OR IGNORE INTO seen_urls (normalized_url, first_seen) VALUES (?1, ?2)",
            params![normalized_url, now.to_rfc3339()],
        )?;
        Ok(rows > 0)
    }

    pub fn contains(&self, normalized_url: &str) -> Result<bool> {
        let conn = self.connect()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM seen_urls WHERE normalized_url = ?)",
            params![normalized_url],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    pub fn count(&self) -> Result<u64> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM seen_urls", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn clear(&self) -> Result<usize> {
        let conn = self.connect()?;
        Ok(conn.execute("DELETE FROM seen_urls", [])?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn insert_contains_clear() {
        let dir = tempdir().unwrap();
        let repo = SeenUrlRepository::new(&dir.path().join("test.db")).unwrap();

        assert!(repo.insert("https://example.com/a", Utc::now()).unwrap());
        assert!(!repo.insert("https://example.com/a", Utc::now()).unwrap());
        assert!(repo.contains("https://example.com/a").unwrap());
        assert!(!repo.contains("https://example.com/b").unwrap());
        assert_eq!(repo.load_all().unwrap(), vec!["https://example.com/a"]);

        assert_eq!(repo.clear().unwrap(), 1);
        assert_eq!(repo.count().unwrap(), 0);
    }
}
