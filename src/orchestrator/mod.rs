//! Crawl cycle orchestration.
//!
//! One cycle: pick a dork batch, search each dork through the governor,
//! filter the hits (seen URLs, hosts in backoff, disabled portals), fetch the
//! survivors concurrently, extract and claim leads, then fold the outcomes
//! into the learning tables. Failed fetches go to the retry scheduler, which
//! [`Orchestrator::run`] replays between cycles.

mod report;

pub use report::{CycleReport, PortalTally, QueryTally, RunTally};

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::crawl::{Failure, FailureKind, RetryConfig, RetryDecision, RetryEntry, RetryScheduler};
use crate::dedup::{ClaimOutcome, LeadIndex, SeenUrls};
use crate::error::HarvestResult;
use crate::extract::{ExtractionOutcome, Extractor};
use crate::fetch::{FetchError, FetchResponse, Fetcher};
use crate::learning::{DorkLearner, LearnedPatterns, PatternLearner, PortalLearner};
use crate::models::{DorkRun, FetchTarget, Lead, PortalMetric, StoredLead};
use crate::rate_limit::{GovernorConfig, RateGovernor};
use crate::repository::Repositories;
use crate::search::{SearchHit, SearchProvider};

/// Sleep granularity while waiting, so a cleared keep-running flag is noticed.
const PAUSE_STEP: Duration = Duration::from_millis(250);

/// Runtime knobs for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub governor: GovernorConfig,
    pub retry: RetryConfig,
    /// Dorks per cycle.
    pub batch_size: usize,
    pub fetch_timeout: Duration,
    /// Longest pause between cycles.
    pub cycle_interval: Duration,
    /// Fetch URLs even if they were fetched in an earlier run.
    pub ignore_history: bool,
    /// Extract from search-result snippets instead of fetching pages.
    pub snippet_only: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            governor: GovernorConfig::default(),
            retry: RetryConfig::default(),
            batch_size: 10,
            fetch_timeout: Duration::from_secs(30),
            cycle_interval: Duration::from_secs(300),
            ignore_history: false,
            snippet_only: false,
        }
    }
}

/// The pluggable I/O the orchestrator drives.
#[derive(Clone)]
pub struct Collaborators {
    pub fetcher: Arc<dyn Fetcher>,
    pub search: Arc<dyn SearchProvider>,
    pub extractor: Arc<dyn Extractor>,
}

/// Leads pulled out of one document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Harvest {
    found: usize,
    found_with_phone: usize,
    new: usize,
    new_with_phone: usize,
    duplicate: usize,
    patterns_learned: usize,
    extraction_error: bool,
    resolved: bool,
    from_snippet: bool,
}

#[derive(Debug)]
enum Outcome {
    Harvested(Harvest),
    Failed {
        failure: Failure,
        decision: RetryDecision,
        backed_off: bool,
    },
    /// Host went into backoff while the target was queued.
    HostBackedOff { until: DateTime<Utc> },
    Cancelled,
}

#[derive(Debug)]
struct TargetResult {
    target: FetchTarget,
    outcome: Outcome,
}

enum SearchOutcome {
    Hits(Vec<SearchHit>),
    Failed,
    /// Search host is backed off or the run was cancelled; stop searching.
    Unavailable,
}

pub struct Orchestrator {
    repos: Repositories,
    config: OrchestratorConfig,
    governor: RateGovernor,
    retries: RetryScheduler,
    seen: SeenUrls,
    lead_index: LeadIndex,
    portals: PortalLearner,
    dorks: DorkLearner,
    patterns: PatternLearner,
    io: Collaborators,
    keep_running: Arc<AtomicBool>,
    /// Retry-wave outcomes waiting to be recorded with the next cycle.
    pending: Mutex<RunTally>,
}

impl Orchestrator {
    /// Wire up an orchestrator. `patterns` must be the set the extractor in
    /// `io` reads, so learned formats take effect immediately.
    pub fn new(
        repos: Repositories,
        seen: SeenUrls,
        patterns: LearnedPatterns,
        io: Collaborators,
        config: OrchestratorConfig,
    ) -> HarvestResult<Self> {
        let patterns = PatternLearner::new(repos.patterns.clone(), patterns);
        patterns.load_active_patterns()?;

        Ok(Self {
            governor: RateGovernor::new(config.governor.clone()),
            retries: RetryScheduler::new(config.retry.clone()),
            lead_index: LeadIndex::new(repos.dedup.clone()),
            portals: PortalLearner::new(repos.portals.clone()),
            dorks: DorkLearner::new(repos.dorks.clone()),
            patterns,
            seen,
            io,
            config,
            repos,
            keep_running: Arc::new(AtomicBool::new(true)),
            pending: Mutex::new(RunTally::default()),
        })
    }

    /// Share an externally owned keep-running flag (e.g. one a signal handler clears).
    pub fn with_keep_running(mut self, flag: Arc<AtomicBool>) -> Self {
        self.keep_running = flag;
        self
    }

    pub fn keep_running(&self) -> Arc<AtomicBool> {
        self.keep_running.clone()
    }

    pub fn is_running(&self) -> bool {
        self.keep_running.load(Ordering::SeqCst)
    }

    /// Stop after in-flight fetches finish; waiters on the governor give up.
    pub async fn stop(&self) {
        self.keep_running.store(false, Ordering::SeqCst);
        self.governor.close().await;
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn governor(&self) -> &RateGovernor {
        &self.governor
    }

    pub fn retries(&self) -> &RetryScheduler {
        &self.retries
    }

    pub fn seen_urls(&self) -> &SeenUrls {
        &self.seen
    }

    pub fn repositories(&self) -> &Repositories {
        &self.repos
    }

    /// Forget crawl history: seen URLs (memory and disk) and dork usage.
    /// Lead dedup claims are kept, so known contacts stay duplicates.
    pub async fn reset_state(&self) -> HarvestResult<()> {
        self.seen.reset().await?;
        self.repos.dorks.reset_usage()?;
        info!("Crawl state reset");
        Ok(())
    }

    /// Run `cycles` crawl cycles (forever when `None`), replaying retries
    /// between them. Returns the combined report.
    pub async fn run(&self, cycles: Option<u32>) -> HarvestResult<CycleReport> {
        let mut total = CycleReport::new("total");
        let mut completed = 0u32;

        while self.is_running() {
            let report = self.run_cycle().await?;
            total.absorb(&report);
            completed += 1;
            if cycles.is_some_and(|n| completed >= n) {
                break;
            }
            let next_cycle = Utc::now() + to_chrono(self.config.cycle_interval);
            self.replay_until(next_cycle, &mut total).await?;
        }

        self.drain_retries(&mut total).await?;
        self.flush_pending()?;
        total.log("Run");
        Ok(total)
    }

    /// One full crawl cycle.
    pub async fn run_cycle(&self) -> HarvestResult<CycleReport> {
        let run_id = Uuid::new_v4().to_string();
        let started = Utc::now();
        let mut report = CycleReport::new(&run_id);
        let mut tally = self.take_pending();

        let queries = {
            let mut rng = rand::rng();
            self.dorks
                .select_dorks(self.config.batch_size, started, &mut rng)?
        };
        if queries.is_empty() {
            warn!("No queries registered; nothing to search");
        }
        debug!("Cycle {} with {} queries", run_id, queries.len());

        let mut targets: Vec<FetchTarget> = Vec::new();
        let mut batch: HashSet<String> = HashSet::new();
        let mut portal_skips: HashMap<String, bool> = HashMap::new();

        for query in &queries {
            if !self.is_running() {
                report.cancelled = true;
                break;
            }
            let hits = match self.search_query(query, &mut report).await? {
                SearchOutcome::Hits(hits) => hits,
                SearchOutcome::Failed => continue,
                SearchOutcome::Unavailable => break,
            };
            report.queries += 1;
            report.urls_found += hits.len();
            let query_tally = tally.query(query);
            query_tally.results += hits.len() as u64;
            query_tally.searched = true;

            for hit in hits {
                let Some(target) = FetchTarget::new(&hit.url, Some(query)) else {
                    continue;
                };
                if !self
                    .admit(&target, &mut batch, &mut portal_skips, &mut report)
                    .await?
                {
                    continue;
                }
                if self.config.snippet_only {
                    let result = self.harvest_snippet(target, &hit).await?;
                    self.apply(result, &mut report, &mut tally);
                } else {
                    targets.push(target);
                }
            }
        }

        let results: Vec<HarvestResult<TargetResult>> = stream::iter(targets)
            .map(|target| self.fetch_target(target))
            .buffer_unordered(self.fan_out())
            .collect()
            .await;
        for result in results {
            self.apply(result?, &mut report, &mut tally);
        }

        self.record_learning(&run_id, tally, &mut report)?;
        report.log("Cycle");
        Ok(report)
    }

    /// Replay every retry entry that is due now.
    pub async fn run_retry_wave(&self) -> HarvestResult<CycleReport> {
        let mut report = CycleReport::new(&Uuid::new_v4().to_string());
        let due = self.retries.claim_due(Utc::now()).await;
        if due.is_empty() {
            return Ok(report);
        }
        debug!("Retry wave with {} due entries", due.len());

        let results: Vec<HarvestResult<TargetResult>> = stream::iter(due)
            .map(|entry| self.replay(entry))
            .buffer_unordered(self.fan_out())
            .collect()
            .await;

        let mut tally = RunTally::default();
        for result in results {
            self.apply(result?, &mut report, &mut tally);
        }
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .merge(tally);

        report.log("Retry wave");
        Ok(report)
    }

    fn fan_out(&self) -> usize {
        self.config.governor.max_global.max(1) * 2
    }

    fn take_pending(&self) -> RunTally {
        std::mem::take(&mut *self.pending.lock().unwrap_or_else(|e| e.into_inner()))
    }

    /// Record retry outcomes that no later cycle picked up.
    fn flush_pending(&self) -> HarvestResult<()> {
        let tally = self.take_pending();
        if tally.is_empty() {
            return Ok(());
        }
        let run_id = Uuid::new_v4().to_string();
        let mut report = CycleReport::new(&run_id);
        self.record_learning(&run_id, tally, &mut report)
    }

    /// Run retry waves as entries come due until `deadline`.
    async fn replay_until(
        &self,
        deadline: DateTime<Utc>,
        total: &mut CycleReport,
    ) -> HarvestResult<()> {
        while self.is_running() {
            let now = Utc::now();
            if now >= deadline {
                break;
            }
            match self.retries.next_due_at().await {
                Some(due) if due <= now => {
                    let report = self.run_retry_wave().await?;
                    total.absorb(&report);
                }
                Some(due) => self.pause_until(due.min(deadline)).await,
                None => self.pause_until(deadline).await,
            }
        }
        Ok(())
    }

    /// After the last cycle, keep replaying entries due within one maximum
    /// retry delay. Anything further out is abandoned.
    async fn drain_retries(&self, total: &mut CycleReport) -> HarvestResult<()> {
        let horizon = Utc::now() + to_chrono(self.config.retry.max_delay);
        while self.is_running() {
            match self.retries.next_due_at().await {
                Some(due) if due <= horizon => {
                    self.pause_until(due).await;
                    if !self.is_running() {
                        break;
                    }
                    let report = self.run_retry_wave().await?;
                    total.absorb(&report);
                }
                _ => break,
            }
        }
        let left = self.retries.len().await;
        if left > 0 {
            info!("Abandoning {} pending retries", left);
        }
        Ok(())
    }

    async fn pause_until(&self, deadline: DateTime<Utc>) {
        while self.is_running() {
            let remaining = deadline - Utc::now();
            let Ok(remaining) = remaining.to_std() else {
                break;
            };
            if remaining.is_zero() {
                break;
            }
            tokio::time::sleep(remaining.min(PAUSE_STEP)).await;
        }
    }

    async fn search_query(
        &self,
        query: &str,
        report: &mut CycleReport,
    ) -> HarvestResult<SearchOutcome> {
        let host = self.io.search.host().to_string();
        if self.repos.host_backoff.is_host_backed_off(&host, Utc::now())? {
            warn!("Search host {} is backed off; skipping remaining queries", host);
            report.hosts_backed_off.insert(host);
            return Ok(SearchOutcome::Unavailable);
        }

        let Ok(permit) = self.governor.acquire(&host).await else {
            report.cancelled = true;
            return Ok(SearchOutcome::Unavailable);
        };
        debug!("Searching {} for {:?}", self.io.search.name(), query);
        let result = self.io.search.search(query).await;
        drop(permit);

        match result {
            Ok(hits) => {
                self.governor.report_success(&host).await;
                self.repos.host_backoff.record_request(&host)?;
                Ok(SearchOutcome::Hits(hits))
            }
            Err(e) => {
                report.search_failures += 1;
                let failure = Failure::from_error(&e);
                warn!("Search for {:?} failed: {}", query, e);
                if let Some(reason) = failure.kind.host_backoff() {
                    let until = self
                        .repos
                        .host_backoff
                        .record_failure(&host, reason, Utc::now())?;
                    warn!("Backing off search host {} until {}", host, until);
                    report.hosts_backed_off.insert(host);
                    return Ok(SearchOutcome::Unavailable);
                }
                Ok(SearchOutcome::Failed)
            }
        }
    }

    /// Decide whether a search hit is worth fetching this cycle.
    async fn admit(
        &self,
        target: &FetchTarget,
        batch: &mut HashSet<String>,
        portal_skips: &mut HashMap<String, bool>,
        report: &mut CycleReport,
    ) -> HarvestResult<bool> {
        if !batch.insert(target.normalized_url.clone()) {
            report.urls_skipped_seen += 1;
            return Ok(false);
        }
        if !self.config.ignore_history && self.seen.contains(&target.normalized_url).await {
            report.urls_skipped_seen += 1;
            return Ok(false);
        }
        // Already waiting for a retry; the wave owns it.
        if self.retries.get(&target.normalized_url).await.is_some() {
            report.urls_skipped_seen += 1;
            return Ok(false);
        }
        if self
            .repos
            .host_backoff
            .is_host_backed_off(&target.host, Utc::now())?
        {
            report.urls_skipped_backoff += 1;
            report.hosts_backed_off.insert(target.host.clone());
            return Ok(false);
        }

        let skip = match portal_skips.get(&target.portal) {
            Some(skip) => *skip,
            None => {
                let (skip, reason) = self.portals.should_skip_portal(&target.portal)?;
                if skip {
                    debug!("Skipping disabled portal {}: {}", target.portal, reason);
                }
                portal_skips.insert(target.portal.clone(), skip);
                skip
            }
        };
        if skip {
            report.urls_skipped_disabled += 1;
            return Ok(false);
        }
        Ok(true)
    }

    async fn replay(&self, entry: RetryEntry) -> HarvestResult<TargetResult> {
        let url = entry.url().to_string();
        debug!("Retry {} of {}", entry.retries, entry.target.url);
        let result = self.fetch_target(entry.target).await?;
        match &result.outcome {
            Outcome::Cancelled => self.retries.release(&url).await,
            Outcome::HostBackedOff { until } => self.retries.postpone(&url, *until).await,
            _ => {}
        }
        Ok(result)
    }

    async fn fetch_target(&self, target: FetchTarget) -> HarvestResult<TargetResult> {
        if !self.is_running() {
            return Ok(TargetResult {
                target,
                outcome: Outcome::Cancelled,
            });
        }
        let Ok(permit) = self.governor.acquire(&target.host).await else {
            return Ok(TargetResult {
                target,
                outcome: Outcome::Cancelled,
            });
        };
        if !self.is_running() {
            return Ok(TargetResult {
                target,
                outcome: Outcome::Cancelled,
            });
        }
        // Another fetch may have put the host into backoff while we waited.
        let now = Utc::now();
        if let Some(record) = self.repos.host_backoff.get(&target.host)? {
            if let Some(until) = record.backoff_until.filter(|_| record.is_backed_off(now)) {
                return Ok(TargetResult {
                    target,
                    outcome: Outcome::HostBackedOff { until },
                });
            }
        }

        debug!("Fetching {}", target.url);
        let result = self
            .io
            .fetcher
            .fetch(&target.url, self.config.fetch_timeout)
            .await;
        drop(permit);
        self.complete_fetch(target, result).await
    }

    async fn complete_fetch(
        &self,
        target: FetchTarget,
        result: Result<FetchResponse, FetchError>,
    ) -> HarvestResult<TargetResult> {
        let failure = match result {
            Ok(response) => match Failure::from_response(&response) {
                None => return self.harvest_page(target, &response.body).await,
                Some(failure) if response.status_code == 403 => {
                    if self
                        .governor
                        .report_forbidden(&target.host, &target.url)
                        .await
                    {
                        Failure::new(FailureKind::Blocked, failure.status_or_error)
                    } else {
                        failure
                    }
                }
                Some(failure) => failure,
            },
            Err(e) => Failure::from_error(&e),
        };
        self.handle_failure(target, failure).await
    }

    async fn harvest_page(&self, target: FetchTarget, body: &str) -> HarvestResult<TargetResult> {
        let now = Utc::now();
        self.governor.report_success(&target.host).await;
        self.repos.host_backoff.record_request(&target.host)?;
        let resolved = self.retries.record_success(&target.normalized_url).await;
        self.seen.mark_seen(&target.normalized_url, now).await?;

        let mut harvest = self.extract(&target, body, now)?;
        harvest.resolved = resolved;
        Ok(TargetResult {
            target,
            outcome: Outcome::Harvested(harvest),
        })
    }

    async fn harvest_snippet(&self, target: FetchTarget, hit: &SearchHit) -> HarvestResult<TargetResult> {
        let now = Utc::now();
        let text = [hit.title.as_deref(), hit.snippet.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        self.seen.mark_seen(&target.normalized_url, now).await?;

        let mut harvest = self.extract(&target, &text, now)?;
        harvest.from_snippet = true;
        Ok(TargetResult {
            target,
            outcome: Outcome::Harvested(harvest),
        })
    }

    fn extract(&self, target: &FetchTarget, body: &str, now: DateTime<Utc>) -> HarvestResult<Harvest> {
        let mut harvest = Harvest::default();
        match self.io.extractor.extract(body, target) {
            ExtractionOutcome::Found(leads) => {
                for lead in leads {
                    self.accept_lead(lead, target, now, &mut harvest)?;
                }
            }
            ExtractionOutcome::NotFound => debug!("No contacts on {}", target.url),
            ExtractionOutcome::Error(e) => {
                warn!("Extraction failed for {}: {}", target.url, e);
                harvest.extraction_error = true;
            }
        }
        Ok(harvest)
    }

    fn accept_lead(
        &self,
        lead: Lead,
        target: &FetchTarget,
        now: DateTime<Utc>,
        harvest: &mut Harvest,
    ) -> HarvestResult<()> {
        let lead = match lead.validate() {
            Ok(lead) => lead,
            Err(e) => {
                debug!("Dropping lead from {}: {}", target.url, e);
                return Ok(());
            }
        };
        let has_phone = lead.has_phone();
        harvest.found += 1;
        if has_phone {
            harvest.found_with_phone += 1;
        }

        // Every extracted phone teaches its format, known contact or not.
        if let Some(phone) = lead.phone.as_deref().filter(|_| has_phone) {
            if self.patterns.learn(phone, Some(&target.portal), now)? {
                harvest.patterns_learned += 1;
            }
        }

        let id = Uuid::new_v4().to_string();
        match self.lead_index.claim(&lead, &id)? {
            ClaimOutcome::Claimed => {
                self.repos.leads.insert(&StoredLead {
                    id,
                    lead,
                    portal: target.portal.clone(),
                    query: target.originating_query.clone(),
                    created_at: now,
                })?;
                harvest.new += 1;
                if has_phone {
                    harvest.new_with_phone += 1;
                }
            }
            ClaimOutcome::Duplicate(found) => {
                debug!(
                    "Duplicate lead on {} ({}, owner {})",
                    target.url,
                    found.reason(),
                    found.owner()
                );
                harvest.duplicate += 1;
            }
        }
        Ok(())
    }

    async fn handle_failure(
        &self,
        target: FetchTarget,
        failure: Failure,
    ) -> HarvestResult<TargetResult> {
        let now = Utc::now();
        let mut backed_off = false;
        if let Some(reason) = failure.kind.host_backoff() {
            let until = self
                .repos
                .host_backoff
                .record_failure(&target.host, reason, now)?;
            warn!(
                "Backing off {} until {} ({})",
                target.host, until, failure.status_or_error
            );
            backed_off = true;
        }
        let decision = self.retries.record_failure(&target, &failure, now).await;
        if decision == RetryDecision::NotRetryable {
            debug!(
                "Permanent failure for {}: {}",
                target.url, failure.status_or_error
            );
        }
        Ok(TargetResult {
            target,
            outcome: Outcome::Failed {
                failure,
                decision,
                backed_off,
            },
        })
    }

    /// Fold one target's outcome into the report and learning tally.
    fn apply(&self, result: TargetResult, report: &mut CycleReport, tally: &mut RunTally) {
        let TargetResult { target, outcome } = result;
        match outcome {
            Outcome::Harvested(harvest) => {
                if harvest.from_snippet {
                    report.snippets_extracted += 1;
                } else {
                    report.urls_fetched += 1;
                }
                report.leads_new += harvest.new;
                report.leads_with_phone += harvest.new_with_phone;
                report.leads_duplicate += harvest.duplicate;
                report.patterns_learned += harvest.patterns_learned;
                if harvest.extraction_error {
                    report.extraction_errors += 1;
                }
                if harvest.resolved {
                    report.resolved += 1;
                }

                let portal = tally.portal(&target.portal);
                portal.urls_crawled += 1;
                portal.leads_found += harvest.found as u64;
                portal.leads_with_phone += harvest.found_with_phone as u64;
                if let Some(query) = &target.originating_query {
                    let query = tally.query(query);
                    query.leads_found += harvest.found as u64;
                    query.leads_with_phone += harvest.found_with_phone as u64;
                }
            }
            Outcome::Failed {
                failure,
                decision,
                backed_off,
            } => {
                report.urls_fetched += 1;
                match decision {
                    RetryDecision::Scheduled { .. } => report.retried += 1,
                    RetryDecision::Exhausted { .. } => report.exhausted += 1,
                    RetryDecision::NotRetryable => report.permanent_failures += 1,
                }
                if backed_off {
                    report.hosts_backed_off.insert(target.host.clone());
                }
                debug!(
                    "{} failed ({}): {}",
                    target.url,
                    failure.kind.as_str(),
                    failure.status_or_error
                );
                let portal = tally.portal(&target.portal);
                portal.urls_crawled += 1;
                portal.errors += 1;
            }
            Outcome::HostBackedOff { .. } => {
                report.urls_skipped_backoff += 1;
                report.hosts_backed_off.insert(target.host);
            }
            Outcome::Cancelled => report.cancelled = true,
        }
    }

    /// Write dork and portal statistics for a run; portals may be disabled.
    fn record_learning(
        &self,
        run_id: &str,
        tally: RunTally,
        report: &mut CycleReport,
    ) -> HarvestResult<()> {
        let now = Utc::now();
        for (query, t) in tally.queries {
            let run = DorkRun {
                results: t.results,
                leads_found: t.leads_found,
                leads_with_phone: t.leads_with_phone,
                searched: t.searched,
            };
            self.dorks.record_dork_usage(&query, run, now)?;
        }
        for (portal, t) in tally.portals {
            let metric = PortalMetric::new(
                &portal,
                run_id,
                now,
                t.urls_crawled,
                t.leads_found,
                t.leads_with_phone,
                t.errors,
            );
            if self.portals.record_portal_run(&metric)?.is_some() {
                report.portals_disabled.insert(portal);
            }
        }
        Ok(())
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(365))
}
