//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod dork;
mod harvest;
mod init;
mod portal;
mod state;
mod status;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use leadharvest::config::load_settings;

#[derive(Parser)]
#[command(name = "leadharvest")]
#[command(about = "Adaptive crawler for contact lead harvesting")]
#[command(version)]
pub struct Cli {
    /// Data directory holding the database (overrides config and LEADHARVEST_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory and database
    Init,

    /// Run crawl cycles
    Run(RunArgs),

    /// Show leads, queries, portals and host backoffs
    Status,

    /// Manage search queries
    Dork {
        #[command(subcommand)]
        command: DorkCommands,
    },

    /// Manage portals
    Portal {
        #[command(subcommand)]
        command: PortalCommands,
    },

    /// Manage crawl state
    State {
        #[command(subcommand)]
        command: StateCommands,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Fetch URLs even if an earlier run already fetched them
    #[arg(long)]
    pub ignore_history: bool,
    /// Clear seen URLs and query usage counters before running
    #[arg(long)]
    pub reset_state: bool,
    /// Crawl profile: standard, learning, aggressive or snippet-only
    #[arg(long)]
    pub profile: Option<String>,
    /// Maximum concurrent requests across all hosts
    #[arg(long)]
    pub max_global: Option<usize>,
    /// Maximum concurrent requests per host
    #[arg(long)]
    pub max_per_host: Option<usize>,
    /// Delay before the first retry, in milliseconds (doubles per retry)
    #[arg(long)]
    pub retry_base_ms: Option<u64>,
    /// Upper bound for a single retry delay, in milliseconds
    #[arg(long)]
    pub retry_max_ms: Option<u64>,
    /// Retries per URL before giving up
    #[arg(long)]
    pub max_retries: Option<u32>,
    /// Queries per cycle
    #[arg(long)]
    pub batch_size: Option<usize>,
    /// Number of cycles to run (default: until interrupted)
    #[arg(long)]
    pub cycles: Option<u32>,
}

#[derive(Subcommand)]
enum DorkCommands {
    /// Register one or more queries (new queries start in the explore pool)
    Add {
        /// Query texts
        #[arg(required = true)]
        queries: Vec<String>,
    },
    /// List queries with their statistics
    List {
        /// Limit number of queries shown (0 = all)
        #[arg(short, long, default_value = "0")]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum PortalCommands {
    /// List portals and whether they are enabled
    List,
    /// Re-enable a portal that was disabled automatically
    Enable {
        /// Portal name (host without www.)
        portal: String,
    },
}

#[derive(Subcommand)]
enum StateCommands {
    /// Forget seen URLs and query usage counters
    Reset {
        /// Confirm the reset
        #[arg(long)]
        confirm: bool,
    },
}

/// Parse arguments and run the selected command.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let (settings, config) = load_settings(cli.data_dir).await;

    match cli.command {
        Commands::Init => init::cmd_init(&settings, &config).await,
        Commands::Run(args) => harvest::cmd_run(&settings, &config, args).await,
        Commands::Status => status::cmd_status(&settings).await,
        Commands::Dork { command } => match command {
            DorkCommands::Add { queries } => dork::cmd_dork_add(&settings, &queries).await,
            DorkCommands::List { limit } => dork::cmd_dork_list(&settings, limit).await,
        },
        Commands::Portal { command } => match command {
            PortalCommands::List => portal::cmd_portal_list(&settings).await,
            PortalCommands::Enable { portal } => {
                portal::cmd_portal_enable(&settings, &portal).await
            }
        },
        Commands::State { command } => match command {
            StateCommands::Reset { confirm } => state::cmd_state_reset(&settings, confirm).await,
        },
    }
}
