//! Per-cycle counters and the per-portal / per-query tallies fed to learning.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;
use tracing::info;

/// Aggregate counts for one crawl cycle or retry wave.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleReport {
    pub run_id: String,
    pub queries: usize,
    pub search_failures: usize,
    pub urls_found: usize,
    pub urls_fetched: usize,
    /// Search results extracted from their snippet instead of fetched.
    pub snippets_extracted: usize,
    pub urls_skipped_seen: usize,
    pub urls_skipped_backoff: usize,
    pub urls_skipped_disabled: usize,
    pub leads_new: usize,
    pub leads_duplicate: usize,
    pub leads_with_phone: usize,
    pub extraction_errors: usize,
    pub retried: usize,
    pub resolved: usize,
    pub exhausted: usize,
    pub permanent_failures: usize,
    pub patterns_learned: usize,
    pub portals_disabled: BTreeSet<String>,
    pub hosts_backed_off: BTreeSet<String>,
    /// The keep-running flag was cleared mid-cycle.
    pub cancelled: bool,
}

impl CycleReport {
    pub fn new(run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            ..Default::default()
        }
    }

    pub fn urls_skipped(&self) -> usize {
        self.urls_skipped_seen + self.urls_skipped_backoff + self.urls_skipped_disabled
    }

    /// Fold another report's counts into this one.
    pub fn absorb(&mut self, other: &CycleReport) {
        self.queries += other.queries;
        self.search_failures += other.search_failures;
        self.urls_found += other.urls_found;
        self.urls_fetched += other.urls_fetched;
        self.snippets_extracted += other.snippets_extracted;
        self.urls_skipped_seen += other.urls_skipped_seen;
        self.urls_skipped_backoff += other.urls_skipped_backoff;
        self.urls_skipped_disabled += other.urls_skipped_disabled;
        self.leads_new += other.leads_new;
        self.leads_duplicate += other.leads_duplicate;
        self.leads_with_phone += other.leads_with_phone;
        self.extraction_errors += other.extraction_errors;
        self.retried += other.retried;
        self.resolved += other.resolved;
        self.exhausted += other.exhausted;
        self.permanent_failures += other.permanent_failures;
        self.patterns_learned += other.patterns_learned;
        self.portals_disabled
            .extend(other.portals_disabled.iter().cloned());
        self.hosts_backed_off
            .extend(other.hosts_backed_off.iter().cloned());
        self.cancelled |= other.cancelled;
    }

    pub fn log(&self, label: &str) {
        info!(
            "{} {}: {} queries, {} URLs fetched ({} found, {} skipped), {} new leads ({} with phone, {} duplicates), {} retries scheduled, {} resolved, {} exhausted, {} permanent failures",
            label,
            self.run_id,
            self.queries,
            self.urls_fetched,
            self.urls_found,
            self.urls_skipped(),
            self.leads_new,
            self.leads_with_phone,
            self.leads_duplicate,
            self.retried,
            self.resolved,
            self.exhausted,
            self.permanent_failures,
        );
        if !self.portals_disabled.is_empty() {
            info!("Portals disabled: {:?}", self.portals_disabled);
        }
        if !self.hosts_backed_off.is_empty() {
            info!("Hosts backed off: {:?}", self.hosts_backed_off);
        }
    }
}

/// Outcome counts for one portal, recorded as a `PortalMetric`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortalTally {
    pub urls_crawled: u64,
    pub leads_found: u64,
    pub leads_with_phone: u64,
    pub errors: u64,
}

/// Outcome counts for one dork, recorded as a `DorkRun`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryTally {
    pub results: u64,
    pub leads_found: u64,
    pub leads_with_phone: u64,
    /// Set by the cycle that searched the query; retry waves leave it unset.
    pub searched: bool,
}

/// Learning inputs accumulated over a cycle and the retry waves before it.
#[derive(Debug, Clone, Default)]
pub struct RunTally {
    pub portals: HashMap<String, PortalTally>,
    pub queries: HashMap<String, QueryTally>,
}

impl RunTally {
    pub fn is_empty(&self) -> bool {
        self.portals.is_empty() && self.queries.is_empty()
    }

    pub fn portal(&mut self, portal: &str) -> &mut PortalTally {
        self.portals.entry(portal.to_string()).or_default()
    }

    pub fn query(&mut self, query: &str) -> &mut QueryTally {
        self.queries.entry(query.to_string()).or_default()
    }

    pub fn merge(&mut self, other: RunTally) {
        for (portal, t) in other.portals {
            let entry = self.portal(&portal);
            entry.urls_crawled += t.urls_crawled;
            entry.leads_found += t.leads_found;
            entry.leads_with_phone += t.leads_with_phone;
            entry.errors += t.errors;
        }
        for (query, t) in other.queries {
            let entry = self.query(&query);
            entry.results += t.results;
            entry.leads_found += t.leads_found;
            entry.leads_with_phone += t.leads_with_phone;
            entry.searched |= t.searched;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absorb_sums_counts_and_unions_sets() {
        let mut total = CycleReport::new("total");
        let mut a = CycleReport::new("a");
        a.leads_new = 2;
        a.urls_skipped_seen = 1;
        a.portals_disabled.insert("x.example".to_string());
        let mut b = CycleReport::new("b");
        b.leads_new = 3;
        b.urls_skipped_backoff = 2;
        b.portals_disabled.insert("x.example".to_string());
        b.cancelled = true;

        total.absorb(&a);
        total.absorb(&b);
        assert_eq!(total.run_id, "total");
        assert_eq!(total.leads_new, 5);
        assert_eq!(total.urls_skipped(), 3);
        assert_eq!(total.portals_disabled.len(), 1);
        assert!(total.cancelled);
    }

    #[test]
    fn tally_merge_adds_per_key() {
        let mut tally = RunTally::default();
        tally.portal("a.example").urls_crawled = 2;
        tally.query("maler berlin").results = 10;

        let mut other = RunTally::default();
        other.portal("a.example").urls_crawled = 1;
        other.portal("a.example").errors = 1;
        other.query("maler berlin").leads_with_phone = 3;
        tally.merge(other);

        assert_eq!(tally.portals["a.example"].urls_crawled, 3);
        assert_eq!(tally.portals["a.example"].errors, 1);
        assert_eq!(tally.queries["maler berlin"].results, 10);
        assert_eq!(tally.queries["maler berlin"].leads_with_phone, 3);
        assert!(!tally.queries["maler berlin"].searched);
        assert!(!tally.is_empty());
        assert!(RunTally::default().is_empty());
    }
}
