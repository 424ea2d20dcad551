//! `depot config`: show, create or locate the configuration file.

use anyhow::Result;
use clap::{Args, Subcommand};
use colored::Colorize;
use std::path::Path;

use super::CliContext;
use crate::config::DepotConfig;

/// Manage the depot configuration file.
#[derive(Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    command: Option<ConfigSubcommands>,
}

#[derive(Subcommand)]
enum ConfigSubcommands {
    /// Print the effective configuration.
    Show,

    /// Write an example configuration file.
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the configuration file path.
    Path,
}

impl ConfigCommand {
    /// Runs the subcommand; `show` when none is given.
    pub async fn execute(self, context: &CliContext) -> Result<()> {
        let path = DepotConfig::resolve_path(context.config_path.clone())?;
        match self.command {
            Some(ConfigSubcommands::Show) | None => Self::show(context, &path).await,
            Some(ConfigSubcommands::Init {
                force,
            }) => Self::init(&path, force).await,
            Some(ConfigSubcommands::Path) => {
                println!("{}", path.display());
                Ok(())
            }
        }
    }

    async fn show(context: &CliContext, path: &Path) -> Result<()> {
        let config = DepotConfig::load_from_or_default(path).await?;
        let cache_dir = config.cache_dir(context.cache_dir.clone())?;

        println!("{}", "depot configuration".bold());
        if path.exists() {
            println!("Location: {}", path.display());
        } else {
            println!("Location: {} {}", path.display(), "(not found, using defaults)".yellow());
        }
        println!("Cache directory: {}", cache_dir.display());
        println!("Max parallel: {}", config.max_parallel());
        println!();
        println!("{}", toml::to_string_pretty(&config)?);
        Ok(())
    }

    async fn init(path: &Path, force: bool) -> Result<()> {
        if path.exists() && !force {
            anyhow::bail!("Configuration already exists at {} (use --force to overwrite)", path.display());
        }

        let config = DepotConfig::init_example();
        config.save_to(path).await?;

        println!("{} {}", "Created configuration at".green(), path.display());
        println!("\n{}", toml::to_string_pretty(&config)?);
        Ok(())
    }
}
