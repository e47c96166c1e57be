//! Initialize command.

use console::style;

use leadharvest::config::{Config, Settings};
use leadharvest::repository::Repositories;

/// Initialize the data directory and database, seeding configured queries.
pub async fn cmd_init(settings: &Settings, config: &Config) -> anyhow::Result<()> {
    settings.ensure_directories()?;
    let repos = Repositories::open(&settings.database_path())?;

    let added = repos.dorks.register_dorks(&config.dorks)?;
    if added > 0 {
        println!("  {} Registered {} queries from config", style("✓").green(), added);
    } else if config.dorks.is_empty() {
        println!("{} No queries configured", style("!").yellow());
        println!("  Add some with 'leadharvest dork add \"<query>\"'");
    }

    println!(
        "{} Initialized leadharvest in {}",
        style("✓").green(),
        settings.data_dir.display()
    );
    Ok(())
}
