//! Query ("dork") management commands.

use console::style;

use leadharvest::config::Settings;
use leadharvest::learning::DorkLearner;
use leadharvest::models::DorkPool;
use leadharvest::repository::Repositories;

use crate::cli::helpers::{format_time, open_existing, truncate};

/// Register queries. New queries start in the explore pool.
pub async fn cmd_dork_add(settings: &Settings, queries: &[String]) -> anyhow::Result<()> {
    settings.ensure_directories()?;
    let repos = Repositories::open(&settings.database_path())?;
    let learner = DorkLearner::new(repos.dorks.clone());

    let added = learner.register_dorks(queries)?;
    let existing = queries.len() - added;
    println!("{} Registered {} queries", style("✓").green(), added);
    if existing > 0 {
        println!("  {} {} already known", style("→").dim(), existing);
    }
    Ok(())
}

/// List queries with their usage statistics.
pub async fn cmd_dork_list(settings: &Settings, limit: usize) -> anyhow::Result<()> {
    let Some(repos) = open_existing(settings)? else {
        return Ok(());
    };
    let dorks = DorkLearner::new(repos.dorks.clone()).list()?;

    if dorks.is_empty() {
        println!("{} No queries registered", style("!").yellow());
        println!("  Add some with 'leadharvest dork add \"<query>\"'");
        return Ok(());
    }

    println!(
        "{:<8} {:>7} {:>5} {:>8} {:>6} {:>6} {:<16} Query",
        "Pool", "Score", "Uses", "Results", "Leads", "Phone", "Last used"
    );
    println!("{}", "-".repeat(100));

    let shown = if limit == 0 { dorks.len() } else { limit.min(dorks.len()) };
    for dork in dorks.iter().take(shown) {
        let pool = match dork.pool {
            DorkPool::Core => style(dork.pool.as_str()).green(),
            DorkPool::Explore => style(dork.pool.as_str()).dim(),
        };
        println!(
            "{:<8} {:>7.3} {:>5} {:>8} {:>6} {:>6} {:<16} {}",
            pool,
            dork.score,
            dork.times_used,
            dork.total_results,
            dork.leads_found,
            dork.leads_with_phone,
            format_time(dork.last_used),
            truncate(&dork.text, 40)
        );
    }

    if shown < dorks.len() {
        println!("  ... and {} more", dorks.len() - shown);
    }
    Ok(())
}
