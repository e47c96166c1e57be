//! Configuration management for leadharvest using the prefer crate.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crawl::RetryConfig;
use crate::orchestrator::OrchestratorConfig;
use crate::rate_limit::GovernorConfig;

/// Default database filename.
pub const DEFAULT_DATABASE_FILENAME: &str = "leadharvest.db";

/// Overrides the data directory from the config file.
pub const DATA_DIR_ENV: &str = "LEADHARVEST_DATA_DIR";

/// Overrides the crawl profile from the config file.
pub const PROFILE_ENV: &str = "LEADHARVEST_PROFILE";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse {format} config: {message}")]
    Parse {
        format: &'static str,
        message: String,
    },
    #[error("Unknown crawl profile '{0}' (expected standard, learning, aggressive or snippet-only)")]
    UnknownProfile(String),
}

/// Named bundles of concurrency, pacing and batch-size settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CrawlProfile {
    #[default]
    Standard,
    /// Slow and narrow; gives the learners clean signal.
    Learning,
    Aggressive,
    /// Extract from search snippets only; never fetches result pages.
    SnippetOnly,
}

/// Limits a profile sets before file and CLI overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileLimits {
    pub max_global: usize,
    pub max_per_host: usize,
    pub min_delay: Duration,
    pub jitter: Duration,
    pub batch_size: usize,
}

impl CrawlProfile {
    pub const ALL: [CrawlProfile; 4] = [
        Self::Standard,
        Self::Learning,
        Self::Aggressive,
        Self::SnippetOnly,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Learning => "learning",
            Self::Aggressive => "aggressive",
            Self::SnippetOnly => "snippet-only",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" => Some(Self::Standard),
            "learning" => Some(Self::Learning),
            "aggressive" => Some(Self::Aggressive),
            "snippet-only" | "snippet_only" | "snippet" => Some(Self::SnippetOnly),
            _ => None,
        }
    }

    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        Self::from_str(s).ok_or_else(|| ConfigError::UnknownProfile(s.to_string()))
    }

    pub fn limits(&self) -> ProfileLimits {
        let (max_global, max_per_host, min_delay_ms, jitter_ms, batch_size) = match self {
            Self::Standard => (8, 2, 1000, 500, 10),
            Self::Learning => (4, 1, 2000, 1000, 6),
            Self::Aggressive => (16, 4, 250, 250, 20),
            Self::SnippetOnly => (4, 1, 1000, 500, 15),
        };
        ProfileLimits {
            max_global,
            max_per_host,
            min_delay: Duration::from_millis(min_delay_ms),
            jitter: Duration::from_millis(jitter_ms),
            batch_size,
        }
    }
}

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    /// Database filename.
    pub database_filename: String,
    /// User agent for HTTP requests: `None` sends the leadharvest agent,
    /// `"impersonate"` picks a real browser agent, anything else is sent as is.
    pub user_agent: Option<String>,
    /// Request timeout in seconds.
    pub request_timeout: u64,
    /// DuckDuckGo region code.
    pub search_region: String,
    /// Longest pause between crawl cycles, in seconds.
    pub cycle_interval: u64,
    /// Crawl profile selected by config or environment.
    pub profile: CrawlProfile,
}

impl Default for Settings {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("leadharvest");

        Self {
            data_dir,
            database_filename: DEFAULT_DATABASE_FILENAME.to_string(),
            user_agent: None,
            request_timeout: 30,
            search_region: "de-de".to_string(),
            cycle_interval: 300,
            profile: CrawlProfile::default(),
        }
    }
}

impl Settings {
    /// Create settings with a custom data directory.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            ..Default::default()
        }
    }

    /// Get the full path to the database.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_filename)
    }

    /// Check if the database appears to be initialized.
    pub fn database_exists(&self) -> bool {
        self.database_path().exists()
    }

    /// Ensure the data directory exists.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.data_dir).map_err(|e| {
            std::io::Error::new(
                e.kind(),
                format!(
                    "Failed to create data directory '{}': {}",
                    self.data_dir.display(),
                    e
                ),
            )
        })
    }
}

/// Config file contents. Every field is optional; unset fields fall back to
/// the selected profile or the [`Settings`] defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, prefer::FromValue)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycle_interval: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_global: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_per_host: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jitter_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_base_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_max_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u64>,
    /// Seed queries registered by `init` and before every run.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[prefer(default)]
    pub dorks: Vec<String>,
    #[serde(skip)]
    #[prefer(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Discover a config file with prefer; defaults when none is found or it
    /// fails to parse.
    pub async fn load() -> Self {
        match prefer::load("leadharvest").await {
            Ok(pref_config) => match pref_config.source_path() {
                Some(path) => match Self::load_from_path(path).await {
                    Ok(config) => config,
                    Err(e) => {
                        tracing::warn!("Ignoring config file: {}", e);
                        Self::default()
                    }
                },
                None => Self::default(),
            },
            Err(_) => Self::default(),
        }
    }

    pub async fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

        let mut config: Config = match ext {
            "toml" => toml::from_str(&contents).map_err(|e| ConfigError::Parse {
                format: "TOML",
                message: e.to_string(),
            })?,
            "yaml" | "yml" => serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse {
                format: "YAML",
                message: e.to_string(),
            })?,
            _ => serde_json::from_str(&contents).map_err(|e| ConfigError::Parse {
                format: "JSON",
                message: e.to_string(),
            })?,
        };

        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    pub fn resolve_path(&self, path_str: &str, base_dir: &Path) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());

        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }
    }

    pub fn apply_to_settings(&self, settings: &mut Settings, base_dir: &Path) {
        if let Some(ref data_dir) = self.data_dir {
            settings.data_dir = self.resolve_path(data_dir, base_dir);
        }
        if let Some(ref database) = self.database {
            settings.database_filename = database.clone();
        }
        if let Some(ref user_agent) = self.user_agent {
            settings.user_agent = Some(user_agent.clone());
        }
        if let Some(timeout) = self.request_timeout {
            settings.request_timeout = timeout;
        }
        if let Some(ref region) = self.search_region {
            settings.search_region = region.clone();
        }
        if let Some(interval) = self.cycle_interval {
            settings.cycle_interval = interval;
        }
        if let Some(profile) = self.profile.as_deref().and_then(CrawlProfile::from_str) {
            settings.profile = profile;
        }
    }

    /// Orchestrator settings for `profile`, with this file's overrides applied.
    pub fn orchestrator_config(&self, settings: &Settings, profile: CrawlProfile) -> OrchestratorConfig {
        let limits = profile.limits();
        let max_global = self.max_global.map_or(limits.max_global, |v| v as usize);
        let max_per_host = self.max_per_host.map_or(limits.max_per_host, |v| v as usize);
        let min_delay = self.min_delay_ms.map_or(limits.min_delay, Duration::from_millis);
        let jitter = self.jitter_ms.map_or(limits.jitter, Duration::from_millis);

        let defaults = RetryConfig::default();
        let retry = RetryConfig {
            base_delay: self.retry_base_ms.map_or(defaults.base_delay, Duration::from_millis),
            max_delay: self.retry_max_ms.map_or(defaults.max_delay, Duration::from_millis),
            max_retries: self.max_retries.map_or(defaults.max_retries, |v| v as u32),
        };

        OrchestratorConfig {
            governor: GovernorConfig::new(max_global, max_per_host).with_pacing(min_delay, jitter),
            retry,
            batch_size: self.batch_size.map_or(limits.batch_size, |v| v as usize),
            fetch_timeout: Duration::from_secs(settings.request_timeout),
            cycle_interval: Duration::from_secs(settings.cycle_interval),
            ignore_history: false,
            snippet_only: profile == CrawlProfile::SnippetOnly,
        }
    }
}

/// Look for a config file inside the data directory.
fn find_config_in_data_dir(data_dir: &Path) -> Option<PathBuf> {
    let extensions = ["toml", "yaml", "yml", "json"];
    let basenames = ["leadharvest", "config"];

    for basename in basenames {
        for ext in extensions {
            let path = data_dir.join(format!("{}.{}", basename, ext));
            if path.exists() {
                return Some(path);
            }
        }
    }
    None
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.trim().is_empty())
}

/// Load settings for the CLI. Precedence, lowest to highest: defaults,
/// config file, environment, `data_dir_override` (the `--data-dir` flag).
pub async fn load_settings(data_dir_override: Option<PathBuf>) -> (Settings, Config) {
    let data_dir_override = data_dir_override.or_else(|| env_var(DATA_DIR_ENV).map(PathBuf::from));

    let config = match data_dir_override.as_deref().and_then(find_config_in_data_dir) {
        Some(path) => {
            tracing::debug!("Found config in data dir: {}", path.display());
            Config::load_from_path(&path).await.unwrap_or_else(|e| {
                tracing::warn!("Ignoring config file: {}", e);
                Config::default()
            })
        }
        None => Config::load().await,
    };

    let mut settings = Settings::default();
    let base_dir = config
        .base_dir()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    config.apply_to_settings(&mut settings, &base_dir);

    if let Some(profile) = env_var(PROFILE_ENV) {
        match CrawlProfile::from_str(&profile) {
            Some(profile) => settings.profile = profile,
            None => tracing::warn!("Ignoring unknown {}={}", PROFILE_ENV, profile),
        }
    }

    if let Some(data_dir) = data_dir_override {
        let expanded = shellexpand::tilde(&data_dir.to_string_lossy()).into_owned();
        settings.data_dir = PathBuf::from(expanded);
    }

    (settings, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn profile_table() {
        let standard = CrawlProfile::Standard.limits();
        assert_eq!((standard.max_global, standard.max_per_host), (8, 2));
        assert_eq!(standard.min_delay, Duration::from_millis(1000));
        assert_eq!(standard.jitter, Duration::from_millis(500));
        assert_eq!(standard.batch_size, 10);

        let learning = CrawlProfile::Learning.limits();
        assert_eq!((learning.max_global, learning.max_per_host), (4, 1));
        assert_eq!(learning.batch_size, 6);

        let aggressive = CrawlProfile::Aggressive.limits();
        assert_eq!((aggressive.max_global, aggressive.max_per_host), (16, 4));
        assert_eq!(aggressive.min_delay, Duration::from_millis(250));

        let snippet = CrawlProfile::SnippetOnly.limits();
        assert_eq!(snippet.batch_size, 15);
    }

    #[test]
    fn profile_names_round_trip() {
        for profile in CrawlProfile::ALL {
            assert_eq!(CrawlProfile::from_str(profile.as_str()), Some(profile));
        }
        assert_eq!(
            CrawlProfile::from_str(" Snippet_Only "),
            Some(CrawlProfile::SnippetOnly)
        );
        assert!(matches!(
            CrawlProfile::parse("turbo"),
            Err(ConfigError::UnknownProfile(_))
        ));
    }

    #[test]
    fn orchestrator_config_from_profile_and_overrides() {
        let settings = Settings::with_data_dir(PathBuf::from("/tmp/lh"));
        let config = Config {
            max_per_host: Some(3),
            retry_base_ms: Some(250),
            max_retries: Some(5),
            ..Default::default()
        };

        let orch = config.orchestrator_config(&settings, CrawlProfile::Aggressive);
        assert_eq!(orch.governor.max_global, 16);
        assert_eq!(orch.governor.max_per_host, 3);
        assert_eq!(orch.governor.min_delay, Duration::from_millis(250));
        assert_eq!(orch.batch_size, 20);
        assert_eq!(orch.retry.base_delay, Duration::from_millis(250));
        assert_eq!(orch.retry.max_delay, Duration::from_secs(600));
        assert_eq!(orch.retry.max_retries, 5);
        assert!(!orch.snippet_only);

        let snippet = Config::default().orchestrator_config(&settings, CrawlProfile::SnippetOnly);
        assert!(snippet.snippet_only);
        assert_eq!(snippet.fetch_timeout, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn loads_toml_yaml_and_json() {
        let dir = tempdir().unwrap();

        let toml_path = dir.path().join("leadharvest.toml");
        fs::write(
            &toml_path,
            "profile = \"learning\"\nbatch_size = 4\ndorks = [\"maler berlin\", \"elektriker köln\"]\n",
        )
        .unwrap();
        let config = Config::load_from_path(&toml_path).await.unwrap();
        assert_eq!(config.profile.as_deref(), Some("learning"));
        assert_eq!(config.batch_size, Some(4));
        assert_eq!(config.dorks.len(), 2);
        assert_eq!(config.base_dir().as_deref(), Some(dir.path()));

        let yaml_path = dir.path().join("config.yaml");
        fs::write(&yaml_path, "max_global: 2\nsearch_region: at-de\n").unwrap();
        let config = Config::load_from_path(&yaml_path).await.unwrap();
        assert_eq!(config.max_global, Some(2));
        assert_eq!(config.search_region.as_deref(), Some("at-de"));

        let json_path = dir.path().join("config.json");
        fs::write(&json_path, r#"{"request_timeout": 5}"#).unwrap();
        let config = Config::load_from_path(&json_path).await.unwrap();
        assert_eq!(config.request_timeout, Some(5));
    }

    #[tokio::test]
    async fn parse_errors_name_the_format() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("leadharvest.toml");
        fs::write(&path, "batch_size = \"lots\"").unwrap();
        let err = Config::load_from_path(&path).await.unwrap_err();
        assert!(matches!(err, ConfigError::Parse { format: "TOML", .. }));

        let missing = Config::load_from_path(&dir.path().join("nope.json")).await;
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn apply_to_settings_resolves_relative_paths() {
        let config = Config {
            data_dir: Some("data".to_string()),
            database: Some("crawl.db".to_string()),
            profile: Some("aggressive".to_string()),
            cycle_interval: Some(60),
            ..Default::default()
        };
        let mut settings = Settings::default();
        config.apply_to_settings(&mut settings, Path::new("/srv/leads"));

        assert_eq!(settings.data_dir, PathBuf::from("/srv/leads/data"));
        assert_eq!(settings.database_path(), PathBuf::from("/srv/leads/data/crawl.db"));
        assert_eq!(settings.profile, CrawlProfile::Aggressive);
        assert_eq!(settings.cycle_interval, 60);
    }

    #[test]
    fn default_user_agent_is_the_crawler_agent() {
        let settings = Settings::with_data_dir(PathBuf::from("/tmp/lh"));
        assert_eq!(settings.user_agent, None);
        assert_eq!(
            crate::fetch::resolve_user_agent(settings.user_agent.as_deref()),
            crate::fetch::USER_AGENT
        );
    }

    #[test]
    fn finds_config_in_data_dir() {
        let dir = tempdir().unwrap();
        assert_eq!(find_config_in_data_dir(dir.path()), None);
        fs::write(dir.path().join("config.json"), "{}").unwrap();
        assert_eq!(
            find_config_in_data_dir(dir.path()),
            Some(dir.path().join("config.json"))
        );
        fs::write(dir.path().join("leadharvest.toml"), "").unwrap();
        assert_eq!(
            find_config_in_data_dir(dir.path()),
            Some(dir.path().join("leadharvest.toml"))
        );
    }
}
