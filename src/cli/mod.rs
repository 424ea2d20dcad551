//! Command-line interface for depot.
//!
//! The binary is a maintenance tool for the resolution caches; resolution itself is
//! driven through the library by the build that embeds it.
//!
//! # Available Commands
//!
//! - `cache info [--json]` - location, entry counts and size of the cache
//! - `cache inspect <group:module:version> --repo <id>` - one cached metadata entry
//! - `cache clean [--all] [--older-than-days N]` - remove expired or all entries
//! - `cache gc` - remove orphaned descriptor files and dangling entries
//! - `config show | init [--force] | path` - the user configuration
//!
//! # Global Options
//!
//! - `--verbose` - debug logging
//! - `--quiet` - no logging, errors only
//! - `--config <path>` - configuration file (also `DEPOT_CONFIG`)
//! - `--cache-dir <path>` - cache directory (also `DEPOT_CACHE_DIR`)
//!
//! ```bash
//! depot cache info --json
//! depot --verbose cache inspect com.x:y:1.0 --repo central
//! depot cache clean --older-than-days 30
//! ```

mod cache;
mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use crate::config::DepotConfig;

/// Settings shared by every command once global flags are applied.
#[derive(Debug, Clone, Default)]
pub struct CliContext {
    /// Explicit configuration file, if any
    pub config_path: Option<PathBuf>,
    /// Explicit cache directory, if any
    pub cache_dir: Option<PathBuf>,
    /// Whether informational output is suppressed
    pub quiet: bool,
}

impl CliContext {
    /// Loads the configuration these settings point at.
    pub async fn load_config(&self) -> Result<DepotConfig> {
        DepotConfig::load_with_optional(self.config_path.clone()).await
    }
}

/// depot - dependency resolution cache maintenance
#[derive(Parser)]
#[command(
    name = "depot",
    about = "Inspect and maintain the depot dependency resolution caches",
    version,
    long_about = "depot caches module metadata, artifact listings and artifact files across builds. \
                  This tool reports on and cleans those caches."
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging.
    ///
    /// Equivalent to `RUST_LOG=depot=debug`. Mutually exclusive with `--quiet`.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress everything except errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to the configuration file.
    ///
    /// Overrides `DEPOT_CONFIG` and the default `~/.depot/config.toml`.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Cache directory.
    ///
    /// Overrides `DEPOT_CACHE_DIR` and the `cache_dir` configuration key.
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect and maintain the resolution caches.
    Cache(cache::CacheCommand),

    /// Show or create the configuration file.
    Config(config::ConfigCommand),
}

impl Cli {
    /// Log filter the global flags ask for; `None` disables logging.
    #[must_use]
    pub fn log_level(&self) -> Option<&'static str> {
        if self.verbose {
            Some("debug")
        } else if self.quiet {
            None
        } else {
            Some("info")
        }
    }

    /// Installs the tracing subscriber. `RUST_LOG` wins over the flags unless
    /// `--quiet` is given.
    pub fn init_logging(&self) {
        let Some(level) = self.log_level() else {
            return;
        };
        let filter = if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            EnvFilter::new(format!("depot={level}"))
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init();
    }

    /// The context derived from the global flags.
    #[must_use]
    pub fn context(&self) -> CliContext {
        CliContext {
            config_path: self.config.clone(),
            cache_dir: self.cache_dir.clone(),
            quiet: self.quiet,
        }
    }

    /// Runs the selected command.
    pub async fn execute(self) -> Result<()> {
        let context = self.context();
        match self.command {
            Commands::Cache(cmd) => cmd.execute(&context).await,
            Commands::Config(cmd) => cmd.execute(&context).await,
        }
    }
}
