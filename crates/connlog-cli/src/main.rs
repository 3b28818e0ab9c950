//! connlog - connection log viewer
//!
//! Reads the identifier window of a connection log and renders it as a table.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use connlog_core::ConnLogConfig;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod commands;

/// connlog - connection log viewer
#[derive(Parser, Debug)]
#[command(name = "connlog")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (ignored if missing)
    #[arg(short, long, default_value = "connlog.toml")]
    config: PathBuf,

    /// Path to the connection log database (overrides `store.path`)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); defaults to `log.level`
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the identifier range and row count
    Range,

    /// Print rows as tab-separated cells
    #[command(alias = "ls")]
    List {
        /// First row to print
        #[arg(long, default_value = "0")]
        offset: usize,

        /// Maximum number of rows to print
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        /// Show host names instead of addresses where known
        #[arg(long)]
        resolve: bool,
    },

    /// Follow the log and print every change of the window
    Watch {
        /// Stop after this many polls
        #[arg(long)]
        iterations: Option<u64>,
    },

    /// Append synthetic connections
    Seed {
        /// Number of connections to append
        #[arg(long)]
        count: u32,

        /// Use IPv6 addresses
        #[arg(long)]
        ipv6: bool,
    },

    /// Delete connections below an identifier
    Prune {
        /// Smallest identifier to keep
        #[arg(long)]
        before: i64,
    },
}

fn load_config(cli: &Cli) -> Result<ConnLogConfig> {
    let mut config = if cli.config.exists() {
        ConnLogConfig::from_file(&cli.config).with_context(|| {
            format!("failed to load configuration from {}", cli.config.display())
        })?
    } else {
        ConnLogConfig::default()
    };

    if let Some(db) = &cli.db {
        config.store.path.clone_from(db);
    }
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    // Initialize logging
    let level = cli.log_level.as_deref().unwrap_or(&config.log.level);
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    debug!(db = %config.store.path.display(), "using connection log");

    match cli.command {
        Commands::Range => commands::view::range(&config),
        Commands::List {
            offset,
            limit,
            resolve,
        } => commands::view::list(&config, offset, limit, resolve),
        Commands::Watch { iterations } => commands::view::watch(&config, iterations),
        Commands::Seed { count, ipv6 } => commands::log::seed(&config, count, ipv6),
        Commands::Prune { before } => commands::log::prune(&config, before),
    }
}
