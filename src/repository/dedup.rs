//! Lead dedup indices: phone, email and name+city.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{RepositoryError, Result};
use crate::dedup::keys::{similarity, LeadKeys, NameCityKey, NAME_CITY_SIMILARITY};

/// Why a lead was judged a duplicate, and of which lead.
#[derive(Debug, Clone, PartialEq)]
pub enum DedupMatch {
    Phone { owner: String },
    Email { owner: String },
    NameCity { owner: String, similarity: f64 },
}

impl DedupMatch {
    pub fn owner(&self) -> &str {
        match self {
            Self::Phone { owner } | Self::Email { owner } | Self::NameCity { owner, .. } => owner,
        }
    }

    pub fn reason(&self) -> String {
        match self {
            Self::Phone { .. } => "phone".to_string(),
            Self::Email { .. } => "email".to_string(),
            Self::NameCity { similarity, .. } => format!("name+city ({:.2})", similarity),
        }
    }
}

/// A name+city index row sharing a city prefix with the lead being checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameCityCandidate {
    pub key: String,
    pub lead_id: String,
    pub name_norm: String,
    pub city_norm: String,
}

#[derive(Debug, Clone)]
pub struct DedupRepository {
    db_path: PathBuf,
}

impl DedupRepository {
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
            CREATE TABLE IF NOT EXISTS dedup_phone (
                key TEXT PRIMARY KEY,
                lead_id TEXT NOT NULL,
                first_seen TEXT NOT NULL,
                last_seen TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS dedup_email (
                key TEXT PRIMARY KEY,
                lead_id TEXT NOT NULL,
                first_seen TEXT NOT NULL,
                last_seen TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS dedup_name_city (
                key TEXT PRIMARY KEY,
                lead_id TEXT NOT NULL,
                name_norm TEXT NOT NULL,
                city_norm TEXT NOT NULL,
                city_prefix TEXT NOT NULL,
                first_seen TEXT NOT NULL,
                last_seen TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_dedup_name_city_prefix
                ON dedup_name_city(city_prefix);
        "#,
        )?;
        Ok(())
    }

    /// Check phone, then email, then fuzzy name+city.
    ///
    /// Keys owned by `lead_id` itself are not duplicates.
    pub fn find_duplicate(
        &self,
        keys: &LeadKeys,
        lead_id: Option<&str>,
    ) -> Result<Option<DedupMatch>> {
        let conn = self.connect()?;
        find_duplicate_on(&conn, keys, lead_id)
    }

    /// Index a lead's keys under `lead_id`.
    ///
    /// Re-registering the same lead only refreshes `last_seen`. A key owned
    /// by a different lead keeps its owner. Returns how many keys `lead_id`
    /// now owns.
    pub fn register(&self, keys: &LeadKeys, lead_id: &str, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.connect()?;
        register_on(&conn, keys, lead_id, now)
    }

    /// Check and register atomically. Returns the match if the lead is a
    /// duplicate, in which case nothing is registered.
    pub fn claim(
        &self,
        keys: &LeadKeys,
        lead_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<DedupMatch>> {
        let conn = self.connect()?;

        conn.execute("BEGIN IMMEDIATE", [])?;

        let result: Result<Option<DedupMatch>> = (|| {
            if let Some(found) = find_duplicate_on(&conn, keys, Some(lead_id))? {
                return Ok(Some(found));
            }
            register_on(&conn, keys, lead_id, now)?;
            Ok(None)
        })();

        if result.is_ok() {
            conn.execute("COMMIT", [])?;
        } else {
            let _ = conn.execute("ROLLBACK", []);
        }
        result
    }

    pub fn name_city_candidates(&self, city_prefix: &str) -> Result<Vec<NameCityCandidate>> {
        let conn = self.connect()?;
        name_city_candidates_on(&conn, city_prefix)
    }

    /// Number of keys in each index: (phone, email, name_city).
    pub fn counts(&self) -> Result<(u64, u64, u64)> {
        let conn = self.connect()?;
        let count = |table: &str| -> Result<u64> {
            let n: i64 =
                conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
            Ok(n as u64)
        };
        Ok((
            count("dedup_phone")?,
            count("dedup_email")?,
            count("dedup_name_city")?,
        ))
    }
}

fn owner_of(conn: &Connection, table: &str, key: &str) -> Result<Option<String>> {
    let owner = conn
        .query_row(
            &format!("SELECT lead_id FROM {} WHERE key = ?", table),
            params![key],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    Ok(owner)
}

fn name_city_candidates_on(conn: &Connection, city_prefix: &str) -> Result<Vec<NameCityCandidate>> {
    let mut stmt = conn.prepare(
        "SELECT key, lead_id, name_norm, city_norm FROM dedup_name_city WHERE city_prefix = ?",
    )?;
    let candidates = stmt
        .query_map(params![city_prefix], |row| {
            Ok(NameCityCandidate {
                key: row.get(0)?,
                lead_id: row.get(1)?,
                name_norm: row.get(2)?,
                city_norm: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(candidates)
}

fn find_duplicate_on(
    conn: &Connection,
    keys: &LeadKeys,
    lead_id: Option<&str>,
) -> Result<Option<DedupMatch>> {
    let foreign = |owner: &String| lead_id != Some(owner.as_str());

    if let Some(phone) = &keys.phone {
        if let Some(owner) = owner_of(conn, "dedup_phone", phone)?.filter(foreign) {
            return Ok(Some(DedupMatch::Phone { owner }));
        }
    }
    if let Some(email) = &keys.email {
        if let Some(owner) = owner_of(conn, "dedup_email", email)?.filter(foreign) {
            return Ok(Some(DedupMatch::Email { owner }));
        }
    }
    if let Some(name_city) = &keys.name_city {
        return best_name_city_match(conn, name_city, lead_id);
    }
    Ok(None)
}

fn best_name_city_match(
    conn: &Connection,
    key: &NameCityKey,
    lead_id: Option<&str>,
) -> Result<Option<DedupMatch>> {
    let combined = key.combined();
    let mut best: Option<DedupMatch> = None;
    let mut best_score = 0.0;

    for candidate in name_city_candidates_on(conn, &key.city_prefix)? {
        if lead_id == Some(candidate.lead_id.as_str()) {
            continue;
        }
        let score = if candidate.key == key.hash {
            1.0
        } else {
            similarity(
                &combined,
                &format!("{} {}", candidate.name_norm, candidate.city_norm),
            )
        };
        if score >= NAME_CITY_SIMILARITY && score > best_score {
            best_score = score;
            best = Some(DedupMatch::NameCity {
                owner: candidate.lead_id,
                similarity: score,
            });
        }
    }
    Ok(best)
}

fn register_on(
    conn: &Connection,
    keys: &LeadKeys,
    lead_id: &str,
    now: DateTime<Utc>,
) -> Result<usize> {
    if lead_id.is_empty() {
        return Err(RepositoryError::InvalidData(
            "lead id must not be empty".to_string(),
        ));
    }
    let now = now.to_rfc3339();
    let mut owned = 0;

    // The WHERE on the update keeps an existing owner; a foreign key is a no-op.
    for (table, key) in [("dedup_phone", &keys.phone), ("dedup_email", &keys.email)] {
        if let Some(key) = key {
            owned += conn.execute(
                &format!(
                    r#"
                    INSERT INTO {table} (key, lead_id, first_seen, last_seen)
                    VALUES (?1, ?2, ?3, ?3)
                    ON CONFLICT(key) DO UPDATE SET last_seen = excluded.last_seen
                    WHERE {table}.lead_id = excluded.lead_id
                    "#
                ),
                params![key, lead_id, now],
            )?;
        }
    }

    if let Some(name_city) = &keys.name_city {
        owned += conn.execute(
            r#"
            INSERT INTO dedup_name_city
                (key, lead_id, name_norm, city_norm, city_prefix, first_seen, last_seen)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
            ON CONFLICT(key) DO UPDATE SET last_seen = excluded.last_seen
            WHERE dedup_name_city.lead_id = excluded.lead_id
            "#,
            params![
                name_city.hash,
                lead_id,
                name_city.name_norm,
                name_city.city_norm,
                name_city.city_prefix,
                now,
            ],
        )?;
    }

    Ok(owned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Lead;
    use tempfile::tempdir;

    fn keys(lead: Lead) -> LeadKeys {
        LeadKeys::from_lead(&lead)
    }

    fn repo() -> (tempfile::TempDir, DedupRepository) {
        let dir = tempdir().unwrap();
        let repo = DedupRepository::new(&dir.path().join("test.db")).unwrap();
        (dir, repo)
    }

    #[test]
    fn phone_match() {
        let (_dir, repo) = repo();
        repo.register(&keys(Lead::new("u").with_phone("+49 30 1234567")), "lead-1", Utc::now())
            .unwrap();

        let found = repo
            .find_duplicate(&keys(Lead::new("v").with_phone("0049301234567")), None)
            .unwrap();
        assert_eq!(
            found,
            Some(DedupMatch::Phone {
                owner: "lead-1".to_string()
            })
        );
        assert_eq!(found.unwrap().reason(), "phone");
    }

    #[test]
    fn email_match_is_case_insensitive() {
        let (_dir, repo) = repo();
        repo.register(&keys(Lead::new("u").with_email("jane@example.com")), "lead-1", Utc::now())
            .unwrap();
        let found = repo
            .find_duplicate(&keys(Lead::new("v").with_email(" JANE@example.com")), None)
            .unwrap();
        assert!(matches!(found, Some(DedupMatch::Email { .. })));
    }

    #[test]
    fn fuzzy_name_city_match() {
        let (_dir, repo) = repo();
        repo.register(
            &keys(Lead::new("u").with_name("Jonathan Miller").with_city("Hamburg")),
            "lead-1",
            Utc::now(),
        )
        .unwrap();

        let close = repo
            .find_duplicate(
                &keys(Lead::new("v").with_name("Jonathon Miller").with_city("Hamburg")),
                None,
            )
            .unwrap();
        match close {
            Some(DedupMatch::NameCity { owner, similarity }) => {
                assert_eq!(owner, "lead-1");
                assert!(similarity >= NAME_CITY_SIMILARITY);
            }
            other => panic!("expected name+city match, got {other:?}"),
        }

        let far = repo
            .find_duplicate(
                &keys(Lead::new("v").with_name("Sarah Connor").with_city("Hamburg")),
                None,
            )
            .unwrap();
        assert_eq!(far, None);

        // Same name, city with a different prefix is never a candidate.
        let other_city = repo
            .find_duplicate(
                &keys(Lead::new("v").with_name("Jonathan Miller").with_city("Bremen")),
                None,
            )
            .unwrap();
        assert_eq!(other_city, None);
    }

    #[test]
    fn register_is_idempotent_and_never_steals_keys() {
        let (_dir, repo) = repo();
        let lead = keys(Lead::new("u").with_phone("030 1234567").with_email("a@b.de"));

        assert_eq!(repo.register(&lead, "lead-1", Utc::now()).unwrap(), 2);
        assert_eq!(repo.register(&lead, "lead-1", Utc::now()).unwrap(), 2);
        assert_eq!(repo.register(&lead, "lead-2", Utc::now()).unwrap(), 0);

        let found = repo.find_duplicate(&lead, Some("lead-2")).unwrap();
        assert_eq!(found.map(|m| m.owner().to_string()), Some("lead-1".to_string()));
        assert_eq!(repo.find_duplicate(&lead, Some("lead-1")).unwrap(), None);
        assert_eq!(repo.counts().unwrap(), (1, 1, 0));
    }

    #[test]
    fn claim_first_writer_wins() {
        let (_dir, repo) = repo();
        let lead = keys(Lead::new("u").with_phone("030 1234567"));

        assert_eq!(repo.claim(&lead, "lead-1", Utc::now()).unwrap(), None);
        assert!(repo.claim(&lead, "lead-2", Utc::now()).unwrap().is_some());
        // Same owner re-claiming is not a duplicate.
        assert_eq!(repo.claim(&lead, "lead-1", Utc::now()).unwrap(), None);
    }

    #[test]
    fn concurrent_claims_have_one_winner() {
        let (_dir, repo) = repo();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let repo = repo.clone();
                std::thread::spawn(move || {
                    let lead = keys(Lead::new("u").with_email("race@example.com"));
                    repo.claim(&lead, &format!("lead-{i}"), Utc::now()).unwrap()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|m| m.is_none())
            .count();
        assert_eq!(winners, 1);
    }
}
