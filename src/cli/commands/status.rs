//! Status command for showing crawl state.

use chrono::{Local, Utc};
use console::style;

use leadharvest::config::Settings;
use leadharvest::models::DorkPool;

use crate::cli::helpers::{format_time, open_existing};

/// Show leads, query pools, portals and host backoffs.
pub async fn cmd_status(settings: &Settings) -> anyhow::Result<()> {
    let Some(repos) = open_existing(settings)? else {
        return Ok(());
    };

    let separator = "─".repeat(70);
    println!();
    println!(
        "{:<50} Last updated: {}",
        style("leadharvest status").bold(),
        Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    println!("{}", separator);
    println!("Database: {}", settings.database_path().display());
    println!("Profile:  {}", settings.profile.as_str());
    println!();

    println!("{}", style("LEADS").cyan().bold());
    println!("  {:<24} {:>10}", "Total:", repos.leads.count()?);
    for (portal, count) in repos.leads.count_by_portal()?.iter().take(10) {
        println!("  {:<24} {:>10}", format!("{}:", portal), count);
    }
    let (phones, emails, names) = repos.dedup.counts()?;
    println!(
        "  {:<24} {:>10}",
        "Dedup keys:",
        format!("{}/{}/{}", phones, emails, names)
    );
    println!();

    println!("{}", style("QUERIES").cyan().bold());
    let dorks = repos.dorks.list()?;
    let core = dorks.iter().filter(|d| d.pool == DorkPool::Core).count();
    println!("  {:<24} {:>10}", "Core:", core);
    println!("  {:<24} {:>10}", "Explore:", dorks.len() - core);
    if let Some(best) = dorks.iter().find(|d| d.pool == DorkPool::Core) {
        println!("  {:<24} {:>10.3}  {}", "Best score:", best.score, best.text);
    }
    println!();

    println!("{}", style("CRAWL STATE").cyan().bold());
    println!("  {:<24} {:>10}", "Seen URLs:", repos.seen_urls.count()?);
    println!("  {:<24} {:>10}", "Learned patterns:", repos.patterns.count()?);
    println!();

    let disabled: Vec<_> = repos
        .portals
        .list_configs()?
        .into_iter()
        .filter(|c| !c.enabled)
        .collect();
    if !disabled.is_empty() {
        println!("{}", style("DISABLED PORTALS").yellow().bold());
        for config in &disabled {
            println!(
                "  {:<30} {}",
                config.portal,
                config.disabled_reason.as_deref().unwrap_or("-")
            );
        }
        println!();
    }

    let backoffs = repos.host_backoff.list_active(Utc::now())?;
    if !backoffs.is_empty() {
        println!("{}", style("HOST BACKOFFS").yellow().bold());
        for record in &backoffs {
            println!(
                "  {:<30} until {}  {} ({} failures)",
                record.host,
                format_time(record.backoff_until),
                record.reason.map(|r| r.as_str()).unwrap_or("-"),
                record.failure_count
            );
        }
        println!();
    }

    Ok(())
}
