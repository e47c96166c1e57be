//! Crawl state commands.

use console::style;

use leadharvest::config::Settings;

use crate::cli::helpers::open_existing;

/// Forget seen URLs and query usage counters.
///
/// Stored leads, dedup claims, query scores, portal metrics and host
/// backoffs are kept.
pub async fn cmd_state_reset(settings: &Settings, confirm: bool) -> anyhow::Result<()> {
    if !confirm {
        println!(
            "{} This forgets every fetched URL and all query usage counters.",
            style("!").yellow()
        );
        println!("  Re-run with --confirm to proceed");
        return Ok(());
    }

    let Some(repos) = open_existing(settings)? else {
        return Ok(());
    };
    let seen = repos.seen_urls.count()?;
    repos.reset_state()?;

    println!(
        "{} Reset crawl state ({} seen URLs cleared)",
        style("✓").green(),
        seen
    );
    Ok(())
}
