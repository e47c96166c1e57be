//! Portal management commands.

use console::style;

use leadharvest::config::Settings;
use leadharvest::learning::PortalLearner;

use crate::cli::helpers::open_existing;

/// List known portals and whether they are crawled.
pub async fn cmd_portal_list(settings: &Settings) -> anyhow::Result<()> {
    let Some(repos) = open_existing(settings)? else {
        return Ok(());
    };
    let configs = PortalLearner::new(repos.portals.clone()).list_configs()?;

    if configs.is_empty() {
        println!("{} No portals seen yet", style("!").yellow());
        return Ok(());
    }

    println!("{:<32} {:<9} Reason", "Portal", "Status");
    println!("{}", "-".repeat(70));
    for config in &configs {
        let status = if config.enabled {
            style("enabled").green()
        } else {
            style("disabled").red()
        };
        println!(
            "{:<32} {:<9} {}",
            config.portal,
            status,
            config.disabled_reason.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

/// Re-enable a portal that learning disabled.
pub async fn cmd_portal_enable(settings: &Settings, portal: &str) -> anyhow::Result<()> {
    let Some(repos) = open_existing(settings)? else {
        return Ok(());
    };
    let learner = PortalLearner::new(repos.portals.clone());

    let was_enabled = learner.get_config(portal)?.enabled;
    learner.enable_portal(portal)?;
    if was_enabled {
        println!("{} Portal {} is already enabled", style("→").dim(), portal);
    } else {
        println!("{} Enabled portal {}", style("✓").green(), portal);
    }
    Ok(())
}
