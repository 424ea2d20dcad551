//! Configuration management for depot
//!
//! depot reads a single user-wide TOML file. Every key is optional; a missing file
//! means defaults everywhere.
//!
//! # Location
//!
//! 1. `--config <path>` on the command line
//! 2. the `DEPOT_CONFIG` environment variable
//! 3. `~/.depot/config.toml` (`%LOCALAPPDATA%\depot\config.toml` on Windows)
//!
//! # Format
//!
//! ```toml
//! cache_dir = "/var/cache/depot"
//! max_parallel = 16
//! offline = false
//!
//! [cache_policy]
//! missing_module_ttl_secs = 86400
//! changing_module_ttl_secs = 3600
//! # module_ttl_secs is absent: released modules never expire
//! artifacts_ttl_secs = 86400
//! missing_artifact_ttl_secs = 86400
//! ```
//!
//! The cache directory can also be set with `DEPOT_CACHE_DIR` or `--cache-dir`;
//! the command line wins over the environment, which wins over the file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::debug;

use crate::cache::policy::CachePolicy;
use crate::constants::{
    DEFAULT_ARTIFACTS_TTL, DEFAULT_CHANGING_MODULE_TTL, DEFAULT_MISSING_ARTIFACT_TTL, DEFAULT_MISSING_MODULE_TTL,
    default_max_parallel,
};

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "DEPOT_CONFIG";

/// Environment variable naming the cache directory.
pub const CACHE_DIR_ENV: &str = "DEPOT_CACHE_DIR";

/// Expiry settings, in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CachePolicyConfig {
    /// How long a "module is missing" answer is trusted
    pub missing_module_ttl_secs: u64,
    /// How long metadata of a changing module is trusted
    pub changing_module_ttl_secs: u64,
    /// How long metadata of a released module is trusted; absent means forever
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_ttl_secs: Option<u64>,
    /// How long an artifact listing is trusted
    pub artifacts_ttl_secs: u64,
    /// How long an "artifact is missing" answer is trusted
    pub missing_artifact_ttl_secs: u64,
}

impl Default for CachePolicyConfig {
    fn default() -> Self {
        Self {
            missing_module_ttl_secs: DEFAULT_MISSING_MODULE_TTL.as_secs(),
            changing_module_ttl_secs: DEFAULT_CHANGING_MODULE_TTL.as_secs(),
            module_ttl_secs: None,
            artifacts_ttl_secs: DEFAULT_ARTIFACTS_TTL.as_secs(),
            missing_artifact_ttl_secs: DEFAULT_MISSING_ARTIFACT_TTL.as_secs(),
        }
    }
}

fn is_default_policy(policy: &CachePolicyConfig) -> bool {
    *policy == CachePolicyConfig::default()
}

/// User-wide depot settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DepotConfig {
    /// Cache base directory; defaults to `~/.depot/cache`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,

    /// Maximum concurrent prepare operations; defaults to twice the core count, at
    /// least ten
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_parallel: Option<usize>,

    /// Never expire cached answers
    pub offline: bool,

    /// Expiry settings
    #[serde(skip_serializing_if = "is_default_policy")]
    pub cache_policy: CachePolicyConfig,
}

impl DepotConfig {
    /// Loads the configuration from `path`, `DEPOT_CONFIG` or the default location,
    /// in that order. A missing file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn load_with_optional(path: Option<PathBuf>) -> Result<Self> {
        let path = Self::resolve_path(path)?;
        Self::load_from_or_default(&path).await
    }

    /// Loads `path`, or returns defaults when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn load_from_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load_from(path).await
        } else {
            debug!("No configuration at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Loads the configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid configuration.
    pub async fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        toml::from_str(&content).with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Writes the configuration as pretty TOML, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or the file cannot be written.
    pub async fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }

    /// The file the configuration is read from: `explicit`, else `DEPOT_CONFIG`,
    /// else the default location.
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    pub fn resolve_path(explicit: Option<PathBuf>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            return Ok(path);
        }
        if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|p| !p.is_empty()) {
            return Ok(PathBuf::from(path));
        }
        Self::default_path()
    }

    /// `~/.depot/config.toml`, or `%LOCALAPPDATA%\depot\config.toml` on Windows.
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    pub fn default_path() -> Result<PathBuf> {
        Ok(Self::depot_dir()?.join("config.toml"))
    }

    fn depot_dir() -> Result<PathBuf> {
        let dir = if cfg!(target_os = "windows") {
            dirs::data_local_dir()
                .ok_or_else(|| anyhow::anyhow!("Unable to determine local data directory"))?
                .join("depot")
        } else {
            dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Unable to determine home directory"))?.join(".depot")
        };
        Ok(dir)
    }

    /// The cache directory: `cli_override`, else `DEPOT_CACHE_DIR`, else `cache_dir`,
    /// else `~/.depot/cache`.
    ///
    /// # Errors
    ///
    /// Returns an error if the default is needed and the home directory cannot be
    /// determined.
    pub fn cache_dir(&self, cli_override: Option<PathBuf>) -> Result<PathBuf> {
        if let Some(dir) = cli_override {
            return Ok(dir);
        }
        if let Some(dir) = std::env::var_os(CACHE_DIR_ENV).filter(|d| !d.is_empty()) {
            return Ok(PathBuf::from(dir));
        }
        if let Some(dir) = &self.cache_dir {
            return Ok(dir.clone());
        }
        Ok(Self::depot_dir()?.join("cache"))
    }

    /// Effective parallelism for prepare work.
    pub fn max_parallel(&self) -> usize {
        self.max_parallel.filter(|n| *n > 0).unwrap_or_else(default_max_parallel)
    }

    /// The expiry policy these settings describe.
    pub fn cache_policy(&self) -> CachePolicy {
        let p = &self.cache_policy;
        CachePolicy {
            missing_module_ttl: Duration::from_secs(p.missing_module_ttl_secs),
            changing_module_ttl: Duration::from_secs(p.changing_module_ttl_secs),
            module_ttl: p.module_ttl_secs.map(Duration::from_secs),
            artifacts_ttl: Duration::from_secs(p.artifacts_ttl_secs),
            missing_artifact_ttl: Duration::from_secs(p.missing_artifact_ttl_secs),
            offline: self.offline,
        }
    }

    /// The configuration written by `depot config init`.
    pub fn init_example() -> Self {
        Self {
            cache_dir: None,
            max_parallel: Some(default_max_parallel()),
            offline: false,
            cache_policy: CachePolicyConfig {
                changing_module_ttl_secs: 60 * 60,
                ..CachePolicyConfig::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_yields_defaults() {
        let temp = TempDir::new().unwrap();
        let config = DepotConfig::load_with_optional(Some(temp.path().join("absent.toml"))).await.unwrap();
        assert_eq!(config, DepotConfig::default());
        assert_eq!(config.cache_policy(), CachePolicy::default());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("config.toml");
        let config = DepotConfig {
            cache_dir: Some(temp.path().join("cache")),
            max_parallel: Some(3),
            offline: true,
            cache_policy: CachePolicyConfig {
                module_ttl_secs: Some(600),
                ..CachePolicyConfig::default()
            },
        };
        config.save_to(&path).await.unwrap();

        let loaded = DepotConfig::load_from(&path).await.unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.max_parallel(), 3);
        let policy = loaded.cache_policy();
        assert!(policy.offline);
        assert_eq!(policy.module_ttl, Some(Duration::from_secs(600)));
    }

    #[tokio::test]
    async fn test_partial_policy_table() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[cache_policy]\nchanging_module_ttl_secs = 60\n").unwrap();

        let config = DepotConfig::load_from(&path).await.unwrap();
        assert_eq!(config.cache_policy.changing_module_ttl_secs, 60);
        assert_eq!(config.cache_policy.missing_module_ttl_secs, DEFAULT_MISSING_MODULE_TTL.as_secs());
        assert!(!config.offline);
    }

    #[tokio::test]
    async fn test_invalid_toml_is_reported_with_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "max_parallel = \"many\"").unwrap();
        let error = DepotConfig::load_from(&path).await.unwrap_err();
        assert!(error.to_string().contains("config.toml"));
    }

    #[test]
    #[serial]
    fn test_cache_dir_precedence() {
        let config = DepotConfig {
            cache_dir: Some(PathBuf::from("/from/file")),
            ..DepotConfig::default()
        };
        unsafe { std::env::remove_var(CACHE_DIR_ENV) };
        assert_eq!(config.cache_dir(None).unwrap(), PathBuf::from("/from/file"));

        unsafe { std::env::set_var(CACHE_DIR_ENV, "/from/env") };
        assert_eq!(config.cache_dir(None).unwrap(), PathBuf::from("/from/env"));
        assert_eq!(config.cache_dir(Some(PathBuf::from("/from/cli"))).unwrap(), PathBuf::from("/from/cli"));
        unsafe { std::env::remove_var(CACHE_DIR_ENV) };
    }

    #[test]
    #[serial]
    fn test_config_path_from_environment() {
        unsafe { std::env::set_var(CONFIG_ENV, "/etc/depot.toml") };
        assert_eq!(DepotConfig::resolve_path(None).unwrap(), PathBuf::from("/etc/depot.toml"));
        assert_eq!(
            DepotConfig::resolve_path(Some(PathBuf::from("/explicit.toml"))).unwrap(),
            PathBuf::from("/explicit.toml")
        );
        unsafe { std::env::remove_var(CONFIG_ENV) };
    }
}
