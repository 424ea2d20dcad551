//! `depot cache`: report on and clean the resolution caches.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::CliContext;
use crate::cache::clock::format_timestamp;
use crate::cache::metadata::CachedMetadataEntry;
use crate::cache::policy::CachePolicy;
use crate::cache::{CacheLayout, ResolutionCaches, SystemClock};
use crate::models::{ComponentKey, ModuleComponentIdentifier, ModuleSource};
use crate::utils::format_size;

/// Inspect and maintain the resolution caches.
#[derive(Args)]
pub struct CacheCommand {
    #[command(subcommand)]
    command: CacheSubcommands,
}

#[derive(Subcommand)]
enum CacheSubcommands {
    /// Show the cache location, entry counts and size.
    Info {
        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the cached metadata entry of one component.
    Inspect {
        /// Component coordinates, `group:module:version`
        component: String,

        /// Repository identifier the entry was cached for
        #[arg(long)]
        repo: String,
    },

    /// Remove expired entries, or everything with `--all`.
    Clean {
        /// Remove every entry and descriptor file
        #[arg(long, conflicts_with = "older_than_days")]
        all: bool,

        /// Remove entries older than this many days
        #[arg(long)]
        older_than_days: Option<u64>,
    },

    /// Remove orphaned descriptor files, dangling entries and old cache layouts.
    Gc,
}

impl CacheCommand {
    /// Runs the subcommand against the configured cache directory.
    pub async fn execute(self, context: &CliContext) -> Result<()> {
        let config = context.load_config().await?;
        let layout = CacheLayout::new(config.cache_dir(context.cache_dir.clone())?);
        let policy = config.cache_policy();

        // The stores do blocking file I/O.
        tokio::task::spawn_blocking(move || {
            let caches = ResolutionCaches::open(layout, Arc::new(SystemClock), None)?;
            self.run(&caches, &policy)
        })
        .await
        .context("Cache command panicked")?
    }

    fn run(self, caches: &ResolutionCaches, policy: &CachePolicy) -> Result<()> {
        match self.command {
            CacheSubcommands::Info {
                json,
            } => Self::info(caches, json),
            CacheSubcommands::Inspect {
                component,
                repo,
            } => Self::inspect(caches, &component, &repo),
            CacheSubcommands::Clean {
                all,
                older_than_days,
            } => {
                let older_than = if all {
                    None
                } else {
                    Some(older_than_days.map_or_else(|| longest_ttl(policy), |days| Duration::from_secs(days * 86_400)))
                };
                Self::clean(caches, older_than)
            }
            CacheSubcommands::Gc => Self::gc(caches),
        }
    }

    fn info(caches: &ResolutionCaches, json: bool) -> Result<()> {
        let stats = caches.stats();
        if json {
            println!("{}", serde_json::to_string_pretty(&stats)?);
            return Ok(());
        }

        println!("{}", "Resolution cache".bold());
        println!("  Location:          {}", stats.location.display());
        println!("  Modules:           {}", stats.modules);
        println!("  Missing modules:   {}", stats.missing_modules);
        println!("  Artifact listings: {}", stats.artifact_listings);
        println!("  Artifact files:    {}", stats.artifact_files);
        println!("  Descriptor files:  {}", stats.descriptor_files);
        println!("  Size:              {}", format_size(stats.size_bytes));
        Ok(())
    }

    fn inspect(caches: &ResolutionCaches, component: &str, repo: &str) -> Result<()> {
        let id: ModuleComponentIdentifier = component.parse()?;
        let key = ComponentKey::new(repo, id);

        let Some((entry, age, has_descriptor)) = caches.inspect(&key) else {
            println!("No cache entry for {key}");
            return Ok(());
        };

        println!("{}", key.to_string().bold());
        match entry {
            CachedMetadataEntry::Missing {
                create_timestamp,
            } => {
                println!("  State:      {}", "missing".yellow());
                println!("  Cached at:  {}", format_timestamp(create_timestamp));
                println!("  Age:        {}", format_age(age));
            }
            CachedMetadataEntry::Present {
                is_changing,
                create_timestamp,
                module_sources,
                descriptor_hash,
            } => {
                println!("  State:      {}", "present".green());
                println!("  Changing:   {is_changing}");
                println!("  Cached at:  {}", format_timestamp(create_timestamp));
                println!("  Age:        {}", format_age(age));
                println!("  Descriptor: {descriptor_hash}");
                if !has_descriptor {
                    println!("              {}", "descriptor file is missing, next lookup refetches".red());
                }
                println!("  Sources:");
                for source in module_sources.iter() {
                    println!("    - {}", describe_source(source));
                }
            }
        }
        Ok(())
    }

    fn clean(caches: &ResolutionCaches, older_than: Option<Duration>) -> Result<()> {
        let report = caches.clean(older_than)?;
        info!(
            "Cleaned {} metadata entries, {} artifact listings, {} artifact files",
            report.metadata_entries, report.artifact_listings, report.artifact_files
        );
        println!("{} {} cache entries", "Removed".green(), report.total());
        Ok(())
    }

    fn gc(caches: &ResolutionCaches) -> Result<()> {
        let report = caches.gc()?;
        println!("{}", "Garbage collection complete".green());
        println!("  Orphaned descriptors:    {}", report.orphaned_descriptors);
        println!("  Dangling entries:        {}", report.dangling_entries);
        println!("  Dangling artifact files: {}", report.dangling_artifact_files);
        println!("  Old cache layouts:       {}", report.foreign_layouts);
        println!("  Stale locks:             {}", report.stale_locks);
        Ok(())
    }
}

/// The age past which nothing in the cache would be trusted without a re-check.
fn longest_ttl(policy: &CachePolicy) -> Duration {
    [
        policy.missing_module_ttl,
        policy.changing_module_ttl,
        policy.artifacts_ttl,
        policy.missing_artifact_ttl,
        policy.module_ttl.unwrap_or(Duration::ZERO),
    ]
    .into_iter()
    .max()
    .unwrap_or(Duration::ZERO)
}

fn format_age(age: Duration) -> String {
    let secs = age.as_secs();
    match secs {
        0..60 => format!("{secs}s"),
        60..3600 => format!("{}m {}s", secs / 60, secs % 60),
        3600..86_400 => format!("{}h {}m", secs / 3600, (secs % 3600) / 60),
        _ => format!("{}d {}h", secs / 86_400, (secs % 86_400) / 3600),
    }
}

fn describe_source(source: &ModuleSource) -> String {
    match source {
        ModuleSource::DescriptorHash {
            hash,
            changing,
        } => format!("descriptor hash {hash}{}", if *changing { " (changing)" } else { "" }),
        ModuleSource::Repository {
            repository_id,
        } => format!("repository {repository_id}"),
        ModuleSource::Opaque {
            tag,
            data,
        } => format!("{tag} ({} bytes)", data.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_age() {
        assert_eq!(format_age(Duration::from_secs(5)), "5s");
        assert_eq!(format_age(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_age(Duration::from_secs(7_260)), "2h 1m");
        assert_eq!(format_age(Duration::from_secs(90_000)), "1d 1h");
    }

    #[test]
    fn test_longest_ttl() {
        let policy = CachePolicy {
            changing_module_ttl: Duration::from_secs(10),
            module_ttl: Some(Duration::from_secs(7 * 86_400)),
            ..CachePolicy::default()
        };
        assert_eq!(longest_ttl(&policy), Duration::from_secs(7 * 86_400));
        assert_eq!(longest_ttl(&CachePolicy::refresh_all()), Duration::ZERO);
    }
}
