//! Persisted leads.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection};

use super::{parse_datetime, Result};
use crate::models::{Lead, StoredLead};

#[derive(Debug, Clone)]
pub struct LeadRepository {
    db_path: PathBuf,
}

impl LeadRepository {
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
            CREATE TABLE IF NOT EXISTS leads (
                id TEXT PRIMARY KEY,
                name TEXT,
                phone TEXT,
                email TEXT,
                city TEXT,
                title TEXT,
                source_url TEXT NOT NULL,
                score REAL NOT NULL DEFAULT 0,
                portal TEXT NOT NULL,
                query TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_leads_portal ON leads(portal);
            CREATE INDEX IF NOT EXISTS idx_leads_created ON leads(created_at);
        "#,
        )?;
        Ok(())
    }

    pub fn insert(&self, stored: &StoredLead) -> Result<()> {
        let conn = self.connect()?;
        let lead = &stored.lead;
        conn.execute(
            r#"
            INSERT INTO leads
                (id, name, phone, email, city, title, source_url, score, portal, query, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                stored.id,
                lead.name,
                lead.phone,
                lead.email,
                lead.city,
                lead.title,
                lead.source_url,
                lead.score,
                stored.portal,
                stored.query,
                stored.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Most recent leads first.
    pub fn recent(&self, limit: u32) -> Result<Vec<StoredLead>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT * FROM leads ORDER BY created_at DESC LIMIT ?")?;
        let leads = stmt
            .query_map(params![limit], row_to_stored_lead)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(leads)
    }

    pub fn count(&self) -> Result<u64> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM leads", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Lead counts per portal, largest first.
    pub fn count_by_portal(&self) -> Result<Vec<(String, u64)>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT portal, COUNT(*) AS n FROM leads GROUP BY portal ORDER BY n DESC, portal",
        )?;
        let counts = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get::<_, i64>(1)? as u64)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(counts)
    }
}

fn row_to_stored_lead(row: &rusqlite::Row) -> rusqlite::Result<StoredLead> {
    Ok(StoredLead {
        id: row.get("id")?,
        lead: Lead {
            name: row.get("name")?,
            phone: row.get("phone")?,
            email: row.get("email")?,
            city: row.get("city")?,
            title: row.get("title")?,
            source_url: row.get("source_url")?,
            score: row.get("score")?,
        },
        portal: row.get("portal")?,
        query: row.get("query")?,
        created_at: parse_datetime(&row.get::<_, String>("created_at")?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::tempdir;

    #[test]
    fn insert_and_read_back() {
        let dir = tempdir().unwrap();
        let repo = LeadRepository::new(&dir.path().join("test.db")).unwrap();

        let stored = StoredLead {
            id: "lead-1".to_string(),
            lead: Lead::new("https://example.com/a")
                .with_name("Jane Doe")
                .with_phone("030 1234567")
                .with_score(0.7),
            portal: "example.com".to_string(),
            query: Some("maler berlin".to_string()),
            created_at: Utc::now(),
        };
        repo.insert(&stored).unwrap();
        assert!(repo.insert(&stored).is_err());

        let recent = repo.recent(10).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].lead, stored.lead);
        assert_eq!(recent[0].query.as_deref(), Some("maler berlin"));
        assert_eq!(repo.count().unwrap(), 1);
        assert_eq!(
            repo.count_by_portal().unwrap(),
            vec![("example.com".to_string(), 1)]
        );
    }
}
