//! Explore/exploit selection over the dork pools.

use chrono::{DateTime, Duration, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::info;

use crate::models::{DorkPool, DorkRecord, DorkRun};
use crate::repository::{DorkRepository, Result};

/// Explore slots per batch.
pub const EXPLORE_SLOTS: usize = 2;
/// An explore query used fewer times than this is under-sampled.
pub const UNDERSAMPLED_USES: u32 = 3;
/// An explore query not used for this long is under-sampled.
pub const STALE_AFTER_DAYS: i64 = 3;

fn is_undersampled(record: &DorkRecord, now: DateTime<Utc>) -> bool {
    record.times_used < UNDERSAMPLED_USES
        || record
            .last_used
            .map_or(true, |last| now - last > Duration::days(STALE_AFTER_DAYS))
}

/// Pick up to `n` queries: the best `n - 2` core queries plus two random
/// under-sampled explore queries. Either side's shortfall is filled from the
/// other.
pub fn select_batch<R: Rng + ?Sized>(
    records: &[DorkRecord],
    n: usize,
    now: DateTime<Utc>,
    rng: &mut R,
) -> Vec<String> {
    if n == 0 {
        return Vec::new();
    }

    let mut core: Vec<&DorkRecord> = records.iter().filter(|d| d.pool == DorkPool::Core).collect();
    core.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then(b.leads_with_phone.cmp(&a.leads_with_phone))
            .then(a.text.cmp(&b.text))
    });

    let (mut fresh, mut rest): (Vec<&DorkRecord>, Vec<&DorkRecord>) = records
        .iter()
        .filter(|d| d.pool == DorkPool::Explore)
        .partition(|d| is_undersampled(d, now));
    fresh.shuffle(rng);
    rest.shuffle(rng);

    let explore_slots = EXPLORE_SLOTS.min(n);
    let core_slots = n - explore_slots;

    let mut explore: Vec<&DorkRecord> = fresh.iter().take(explore_slots).copied().collect();
    let mut batch: Vec<&DorkRecord> = core.iter().take(core_slots).copied().collect();

    // Too few explore candidates: hand their slots to core.
    let explore_short = explore_slots - explore.len();
    batch.extend(core.iter().skip(core_slots).take(explore_short).copied());

    // Too few core queries: fill with more explore, under-sampled first.
    let missing = n.saturating_sub(batch.len() + explore.len());
    explore.extend(
        fresh
            .iter()
            .skip(explore.len())
            .chain(rest.iter())
            .take(missing)
            .copied(),
    );

    batch.extend(explore);
    batch.into_iter().map(|d| d.text.clone()).collect()
}

#[derive(Debug, Clone)]
pub struct DorkLearner {
    repo: DorkRepository,
}

impl DorkLearner {
    pub fn new(repo: DorkRepository) -> Self {
        Self { repo }
    }

    pub fn register_dorks<S: AsRef<str>>(&self, texts: &[S]) -> Result<usize> {
        self.repo.register_dorks(texts)
    }

    pub fn select_dorks<R: Rng + ?Sized>(
        &self,
        n: usize,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Result<Vec<String>> {
        let records = self.repo.list()?;
        Ok(select_batch(&records, n, now, rng))
    }

    /// Fold a run into the query's stats; logs the explore -> core promotion.
    pub fn record_dork_usage(&self, text: &str, run: DorkRun, now: DateTime<Utc>) -> Result<DorkRecord> {
        let before = self.repo.get(text)?.map(|d| d.pool);
        let record = self.repo.record_dork_usage(text, run, now)?;
        if record.pool == DorkPool::Core && before != Some(DorkPool::Core) {
            info!(
                "Promoted query to core: {:?} ({} phone leads from {} results)",
                text, run.leads_with_phone, run.results
            );
        }
        Ok(record)
    }

    pub fn list(&self) -> Result<Vec<DorkRecord>> {
        self.repo.list()
    }

    pub fn reset_usage(&self) -> Result<usize> {
        self.repo.reset_usage()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    fn core(text: &str, score: f64, lwp: u64) -> DorkRecord {
        DorkRecord {
            text: text.to_string(),
            times_used: 5,
            total_results: 100,
            leads_found: lwp,
            leads_with_phone: lwp,
            score,
            pool: DorkPool::Core,
            last_used: Some(now()),
        }
    }

    fn explore(text: &str, times_used: u32, last_used: Option<DateTime<Utc>>) -> DorkRecord {
        DorkRecord {
            text: text.to_string(),
            times_used,
            total_results: 0,
            leads_found: 0,
            leads_with_phone: 0,
            score: 0.0,
            pool: DorkPool::Explore,
            last_used,
        }
    }

    #[test]
    fn top_core_plus_two_explore() {
        let records = vec![
            core("c-low", 0.1, 1),
            core("c-high", 0.5, 2),
            core("c-tie-more-phones", 0.3, 9),
            core("c-tie", 0.3, 3),
            explore("e1", 0, None),
            explore("e2", 1, Some(now())),
            explore("e-saturated", 10, Some(now())),
        ];
        let mut rng = StdRng::seed_from_u64(7);
        let batch = select_batch(&records, 5, now(), &mut rng);

        assert_eq!(batch.len(), 5);
        assert_eq!(&batch[..3], &["c-high", "c-tie-more-phones", "c-tie"]);
        let explore: HashSet<&str> = batch[3..].iter().map(|s| s.as_str()).collect();
        assert_eq!(explore, HashSet::from(["e1", "e2"]));
    }

    #[test]
    fn stale_explore_counts_as_undersampled() {
        let records = vec![
            explore("stale", 10, Some(now() - Duration::days(4))),
            explore("busy", 10, Some(now() - Duration::days(1))),
        ];
        let mut rng = StdRng::seed_from_u64(1);
        let batch = select_batch(&records, 1, now(), &mut rng);
        assert_eq!(batch, vec!["stale"]);
    }

    #[test]
    fn missing_explore_backfilled_with_core() {
        let records = vec![
            core("a", 0.9, 1),
            core("b", 0.8, 1),
            core("c", 0.7, 1),
            core("d", 0.6, 1),
        ];
        let mut rng = StdRng::seed_from_u64(3);
        let batch = select_batch(&records, 4, now(), &mut rng);
        assert_eq!(batch, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn missing_core_backfilled_with_explore() {
        let records = vec![
            core("a", 0.9, 1),
            explore("e1", 0, None),
            explore("e2", 0, None),
            explore("e3", 0, None),
            explore("saturated", 10, Some(now())),
        ];
        let mut rng = StdRng::seed_from_u64(11);
        let batch = select_batch(&records, 6, now(), &mut rng);

        assert_eq!(batch.len(), 5);
        assert_eq!(batch[0], "a");
        let unique: HashSet<&String> = batch.iter().collect();
        assert_eq!(unique.len(), 5);
        // Under-sampled entries come before saturated ones.
        assert_eq!(batch.last().map(|s| s.as_str()), Some("saturated"));
    }

    #[test]
    fn never_exceeds_n() {
        let mut records: Vec<DorkRecord> = (0..10).map(|i| core(&format!("c{i}"), 0.1, 1)).collect();
        records.extend((0..10).map(|i| explore(&format!("e{i}"), 0, None)));
        let mut rng = StdRng::seed_from_u64(5);
        for n in 0..8 {
            assert_eq!(select_batch(&records, n, now(), &mut rng).len(), n);
        }
    }
}
