//! URL-level dedup: a persisted set of fetched URLs plus an in-memory cache.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use crate::repository::{Result, SeenUrlRepository};

/// Process-scoped view of every URL fetched successfully.
///
/// Hydrated once at startup; membership checks never touch the database.
#[derive(Debug)]
pub struct SeenUrls {
    repo: SeenUrlRepository,
    cache: RwLock<HashSet<String>>,
}

impl SeenUrls {
    /// Load the persisted set into memory.
    pub fn hydrate(repo: SeenUrlRepository) -> Result<Self> {
        let urls: HashSet<String> = repo.load_all()?.into_iter().collect();
        debug!("Hydrated {} seen URLs", urls.len());
        Ok(Self {
            repo,
            cache: RwLock::new(urls),
        })
    }

    pub async fn contains(&self, normalized_url: &str) -> bool {
        self.cache.read().await.contains(normalized_url)
    }

    /// Record a successful fetch. Returns false if the URL was already known.
    pub async fn mark_seen(&self, normalized_url: &str, now: DateTime<Utc>) -> Result<bool> {
        let mut cache = self.cache.write().await;
        if cache.contains(normalized_url) {
            return Ok(false);
        }
        let inserted = self.repo.insert(normalized_url, now)?;
        cache.insert(normalized_url.to_string());
        Ok(inserted)
    }

    /// Forget every seen URL, in memory and on disk.
    pub async fn reset(&self) -> Result<()> {
        let mut cache = self.cache.write().await;
        self.repo.clear()?;
        cache.clear();
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.cache.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
