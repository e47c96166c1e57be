//! Shared helper functions for CLI commands.

use std::time::Duration;

use chrono::{DateTime, Utc};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use leadharvest::config::Settings;
use leadharvest::repository::Repositories;

/// Open the database, refusing to create one outside of `init` / `run`.
pub fn open_existing(settings: &Settings) -> anyhow::Result<Option<Repositories>> {
    if !settings.database_exists() {
        println!(
            "{} No database at {}",
            style("!").yellow(),
            settings.database_path().display()
        );
        println!("  Run 'leadharvest init' first");
        return Ok(None);
    }
    Ok(Some(Repositories::open(&settings.database_path())?))
}

pub fn spinner(message: impl Into<String>) -> anyhow::Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}")?);
    pb.set_message(message.into());
    pb.enable_steady_tick(Duration::from_millis(100));
    Ok(pb)
}

pub fn format_time(dt: Option<DateTime<Utc>>) -> String {
    dt.map(|d| d.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Truncate to `max` characters, marking the cut with an ellipsis.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_counts_chars() {
        assert_eq!(truncate("kurz", 10), "kurz");
        assert_eq!(truncate("Elektriker Köln", 8), "Elektri…");
    }

    #[test]
    fn format_time_placeholder() {
        assert_eq!(format_time(None), "-");
    }
}
