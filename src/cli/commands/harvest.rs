//! Run command: crawl cycles until the cycle count is reached or Ctrl-C.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use console::style;

use leadharvest::config::{Config, CrawlProfile, Settings};
use leadharvest::dedup::SeenUrls;
use leadharvest::extract::ContactExtractor;
use leadharvest::fetch::HttpFetcher;
use leadharvest::learning::LearnedPatterns;
use leadharvest::orchestrator::{Collaborators, CycleReport, Orchestrator, OrchestratorConfig};
use leadharvest::repository::Repositories;
use leadharvest::search::DuckDuckGoSearch;

use super::RunArgs;
use crate::cli::helpers::spinner;

/// Run crawl cycles.
pub async fn cmd_run(settings: &Settings, config: &Config, args: RunArgs) -> anyhow::Result<()> {
    settings.ensure_directories()?;
    let repos = Repositories::open(&settings.database_path())?;
    repos.dorks.register_dorks(&config.dorks)?;

    if args.reset_state {
        repos.reset_state()?;
        println!("{} Crawl state reset", style("✓").green());
    }

    let profile = match args.profile.as_deref() {
        Some(name) => CrawlProfile::parse(name)?,
        None => settings.profile,
    };
    let orchestrator_config = apply_overrides(config.orchestrator_config(settings, profile), &args);

    let seen = SeenUrls::hydrate(repos.seen_urls.clone())?;
    let fetcher = Arc::new(HttpFetcher::new(settings.user_agent.as_deref())?);
    let search = DuckDuckGoSearch::new(fetcher.clone())
        .with_region(&settings.search_region)
        .with_timeout(Duration::from_secs(settings.request_timeout));
    let patterns = LearnedPatterns::new();
    let io = Collaborators {
        fetcher,
        search: Arc::new(search),
        extractor: Arc::new(ContactExtractor::new(patterns.clone())),
    };

    println!(
        "{} Profile {} ({} global / {} per host, {} queries per cycle)",
        style("→").cyan(),
        style(profile.as_str()).bold(),
        orchestrator_config.governor.max_global,
        orchestrator_config.governor.max_per_host,
        orchestrator_config.batch_size,
    );

    let keep_running = Arc::new(AtomicBool::new(true));
    let orchestrator = Orchestrator::new(repos, seen, patterns, io, orchestrator_config)?
        .with_keep_running(keep_running.clone());

    let flag = keep_running.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            flag.store(false, Ordering::SeqCst);
        }
    });

    let message = match args.cycles {
        Some(n) => format!("Running {} cycle(s)... (Ctrl-C to stop)", n),
        None => "Running until interrupted... (Ctrl-C to stop)".to_string(),
    };
    let pb = spinner(message)?;
    let result = orchestrator.run(args.cycles).await;
    pb.finish_and_clear();

    let report = result?;
    print_summary(&report);
    Ok(())
}

fn apply_overrides(mut config: OrchestratorConfig, args: &RunArgs) -> OrchestratorConfig {
    if let Some(max_global) = args.max_global {
        config.governor.max_global = max_global.max(1);
    }
    if let Some(max_per_host) = args.max_per_host {
        config.governor.max_per_host = max_per_host.max(1);
    }
    if let Some(ms) = args.retry_base_ms {
        config.retry.base_delay = Duration::from_millis(ms);
    }
    if let Some(ms) = args.retry_max_ms {
        config.retry.max_delay = Duration::from_millis(ms);
    }
    if let Some(max_retries) = args.max_retries {
        config.retry.max_retries = max_retries;
    }
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    config.ignore_history |= args.ignore_history;
    config
}

fn print_summary(report: &CycleReport) {
    if report.cancelled {
        println!("{} Stopped", style("!").yellow());
    } else {
        println!("{} Run complete", style("✓").green());
    }

    println!("  {:<22} {:>8}", "Queries:", report.queries);
    println!("  {:<22} {:>8}", "URLs found:", report.urls_found);
    println!("  {:<22} {:>8}", "URLs fetched:", report.urls_fetched);
    if report.snippets_extracted > 0 {
        println!("  {:<22} {:>8}", "Snippets extracted:", report.snippets_extracted);
    }
    println!("  {:<22} {:>8}", "URLs skipped:", report.urls_skipped());
    println!(
        "  {:<22} {:>8}",
        "New leads:",
        style(report.leads_new).green()
    );
    println!("  {:<22} {:>8}", "  with phone:", report.leads_with_phone);
    println!("  {:<22} {:>8}", "Duplicates:", report.leads_duplicate);
    println!("  {:<22} {:>8}", "Retries:", report.retried);
    println!("  {:<22} {:>8}", "Resolved on retry:", report.resolved);

    if report.exhausted + report.permanent_failures > 0 {
        println!(
            "  {:<22} {:>8}",
            "Failed:",
            style(report.exhausted + report.permanent_failures).red()
        );
    }
    if report.search_failures > 0 {
        println!("  {:<22} {:>8}", "Search failures:", report.search_failures);
    }
    if report.patterns_learned > 0 {
        println!("  {:<22} {:>8}", "Patterns learned:", report.patterns_learned);
    }

    for portal in &report.portals_disabled {
        println!(
            "  {} Disabled portal {} (re-enable with 'leadharvest portal enable {}')",
            style("✗").red(),
            portal,
            portal
        );
    }
    for host in &report.hosts_backed_off {
        println!("  {} Backing off {}", style("!").yellow(), host);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_replace_profile_values() {
        let args = RunArgs {
            max_global: Some(0),
            max_per_host: Some(3),
            max_retries: Some(5),
            batch_size: Some(2),
            ignore_history: true,
            ..Default::default()
        };
        let config = apply_overrides(OrchestratorConfig::default(), &args);

        assert_eq!(config.governor.max_global, 1);
        assert_eq!(config.governor.max_per_host, 3);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.batch_size, 2);
        assert!(config.ignore_history);
    }

    #[test]
    fn no_overrides_keeps_config() {
        let base = OrchestratorConfig::default();
        let config = apply_overrides(base.clone(), &RunArgs::default());
        assert_eq!(config.governor.max_global, base.governor.max_global);
        assert_eq!(config.retry.base_delay, base.retry.base_delay);
        assert!(!config.ignore_history);
    }
}
