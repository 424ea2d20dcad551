//! Persistent resolution caches.
//!
//! This module owns everything depot remembers between builds: module metadata,
//! artifact listings and resolved artifact files. It is organised in layers:
//!
//! - [`codec`]: binary encoding shared by all stores, including the module
//!   descriptor format whose SHA-256 is the descriptor hash
//! - [`index`]: [`PersistentIndexedCache`], the append-only key-value store every
//!   index is built on, guarded by [`lock::CacheLock`]
//! - [`file_store`]: serialized descriptors, one file per (repository, component)
//! - [`metadata`], [`artifacts`], [`artifact_files`]: the three caches, each with a
//!   persistent implementation and, where useful, an in-memory tier in front
//! - [`policy`]: expiry rules
//! - [`repository`]: the repository abstraction and the caching decorator that
//!   ties caches, policy and repository together
//!
//! # Cache Directory Structure
//!
//! ```text
//! ~/.depot/cache/
//! └── modules-3/                 # one directory per layout version
//!     ├── descriptors/
//!     │   └── com.x/y/1.0/R1/descriptor.bin
//!     ├── metadata.bin           # module metadata index
//!     ├── artifacts.bin          # artifact listings index
//!     ├── artifact-files.bin     # resolved artifact files index
//!     └── .locks/                # one lock file per store
//! ```
//!
//! Directories of other layout versions are never read; `depot cache gc` deletes
//! them.
//!
//! # Usage
//!
//! ```rust,no_run
//! use depot::cache::{CacheLayout, ResolutionCaches, SystemClock};
//! use depot::cache::policy::CachePolicy;
//! use std::sync::Arc;
//!
//! # fn example(repository: Arc<dyn depot::cache::repository::ModuleComponentRepository>) -> anyhow::Result<()> {
//! let layout = CacheLayout::new("/home/user/.depot/cache");
//! let caches = ResolutionCaches::open(layout, Arc::new(SystemClock), None)?;
//! let caching = caches.caching_repository(repository, CachePolicy::default());
//! # Ok(())
//! # }
//! ```

pub mod artifact_files;
pub mod artifacts;
pub mod clock;
pub mod codec;
pub mod file_store;
pub mod index;
pub mod lock;
pub mod metadata;
pub mod policy;
pub mod repository;

pub use clock::{Clock, SystemClock};
pub use index::PersistentIndexedCache;

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::constants::{CACHE_LAYOUT_VERSION, DESCRIPTORS_DIR, LOCKS_DIR};
use crate::core::ResolveError;
use crate::models::ComponentKey;
use crate::utils::dir_size;
use artifact_files::{ArtifactFileOutcome, CacheScopeId, ModuleArtifactCache, SharedArtifactCaches};
use artifacts::{InMemoryModuleArtifactsCache, PersistentModuleArtifactsCache};
use metadata::{
    CachedMetadataEntry, InMemoryModuleMetadataCache, ModuleMetadataCache,
    PersistentModuleMetadataCache,
};
use policy::CachePolicy;
use repository::{CachingModuleRepository, ModuleComponentRepository};

/// Maps the cache base directory onto the versioned layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLayout {
    base: PathBuf,
    root: PathBuf,
}

impl CacheLayout {
    /// Layout for the current version under `base`.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        let base = base.into();
        let root = base.join(format!("modules-{CACHE_LAYOUT_VERSION}"));
        Self {
            base,
            root,
        }
    }

    /// The configured cache directory.
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// The versioned root all stores live in.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of serialized descriptors.
    pub fn descriptors_dir(&self) -> PathBuf {
        self.root.join(DESCRIPTORS_DIR)
    }

    /// Directory of store lock files.
    pub fn locks_dir(&self) -> PathBuf {
        self.root.join(LOCKS_DIR)
    }

    /// Creates the versioned root.
    pub fn ensure(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root)
            .with_context(|| format!("Failed to create cache directory {}", self.root.display()))
    }

    /// Whether the versioned root exists.
    pub fn exists(&self) -> bool {
        self.root.is_dir()
    }

    /// Total size of the versioned root in bytes.
    pub fn size(&self) -> u64 {
        dir_size(&self.root)
    }

    /// Directories of other layout versions under the base directory.
    pub fn foreign_layouts(&self) -> Vec<PathBuf> {
        let Ok(entries) = std::fs::read_dir(&self.base) else {
            return Vec::new();
        };
        let mut dirs: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.is_dir() && *p != self.root)
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .and_then(|n| n.strip_prefix("modules-"))
                    .is_some_and(|v| v.parse::<u32>().is_ok())
            })
            .collect();
        dirs.sort();
        dirs
    }
}

/// Entry counts and size of a cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Versioned cache root
    pub location: PathBuf,
    /// Present metadata entries
    pub modules: usize,
    /// Missing-module entries
    pub missing_modules: usize,
    /// Artifact listings
    pub artifact_listings: usize,
    /// Cached artifact outcomes
    pub artifact_files: usize,
    /// Descriptor files on disk
    pub descriptor_files: usize,
    /// Size on disk in bytes
    pub size_bytes: u64,
}

/// What a clean removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanReport {
    /// Metadata entries removed
    pub metadata_entries: usize,
    /// Artifact listings removed
    pub artifact_listings: usize,
    /// Artifact outcomes removed
    pub artifact_files: usize,
}

impl CleanReport {
    /// Total entries removed.
    pub fn total(&self) -> usize {
        self.metadata_entries + self.artifact_listings + self.artifact_files
    }
}

/// What a garbage collection removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GcReport {
    /// Descriptor files no entry referenced
    pub orphaned_descriptors: usize,
    /// Metadata entries whose descriptor file was gone
    pub dangling_entries: usize,
    /// Artifact outcomes whose file was gone
    pub dangling_artifact_files: usize,
    /// Directories of other layout versions
    pub foreign_layouts: usize,
    /// Stale lock files
    pub stale_locks: usize,
}

/// The three persistent caches of one layout, with their in-memory tiers.
pub struct ResolutionCaches {
    layout: CacheLayout,
    clock: Arc<dyn Clock>,
    persistent_metadata: Arc<PersistentModuleMetadataCache>,
    metadata: Arc<InMemoryModuleMetadataCache>,
    persistent_artifacts: Arc<PersistentModuleArtifactsCache>,
    artifacts: Arc<InMemoryModuleArtifactsCache>,
    artifact_files: Arc<ModuleArtifactCache>,
}

impl ResolutionCaches {
    /// Opens every store under `layout`. With a `scope`, found artifact files are also
    /// shared with every other cache opened with the same scope.
    pub fn open(
        layout: CacheLayout,
        clock: Arc<dyn Clock>,
        scope: Option<(&SharedArtifactCaches, &CacheScopeId)>,
    ) -> Result<Self> {
        layout.ensure()?;
        let root = layout.root().to_path_buf();

        let persistent_metadata = Arc::new(
            PersistentModuleMetadataCache::open(&root, clock.clone())
                .context("Failed to open the metadata cache")?,
        );
        let persistent_artifacts = Arc::new(
            PersistentModuleArtifactsCache::open(&root, clock.clone())
                .context("Failed to open the artifact listing cache")?,
        );
        let shared = scope.map(|(caches, id)| caches.for_scope(id));
        let artifact_files = Arc::new(
            ModuleArtifactCache::open(&root, shared, clock.clone())
                .context("Failed to open the artifact file cache")?,
        );

        debug!("Opened resolution caches at {}", root.display());
        Ok(Self {
            metadata: Arc::new(InMemoryModuleMetadataCache::new(
                persistent_metadata.clone(),
                clock.clone(),
            )),
            artifacts: Arc::new(InMemoryModuleArtifactsCache::new(
                persistent_artifacts.clone(),
                clock.clone(),
            )),
            layout,
            clock,
            persistent_metadata,
            persistent_artifacts,
            artifact_files,
        })
    }

    /// The layout the caches live in.
    pub fn layout(&self) -> &CacheLayout {
        &self.layout
    }

    /// The metadata cache, in-memory tier included.
    pub fn metadata(&self) -> Arc<InMemoryModuleMetadataCache> {
        self.metadata.clone()
    }

    /// The artifact listing cache, in-memory tier included.
    pub fn artifacts(&self) -> Arc<InMemoryModuleArtifactsCache> {
        self.artifacts.clone()
    }

    /// The artifact file cache.
    pub fn artifact_files(&self) -> Arc<ModuleArtifactCache> {
        self.artifact_files.clone()
    }

    /// Wraps `repository` with these caches.
    pub fn caching_repository(
        &self,
        repository: Arc<dyn ModuleComponentRepository>,
        policy: CachePolicy,
    ) -> CachingModuleRepository {
        CachingModuleRepository::new(
            repository,
            self.metadata.clone(),
            self.artifacts.clone(),
            self.artifact_files.clone(),
            policy,
        )
    }

    /// The raw metadata index entry for `key`, with its age.
    pub fn inspect(&self, key: &ComponentKey) -> Option<(CachedMetadataEntry, Duration, bool)> {
        let entry = self.persistent_metadata.index().get(key)?;
        let age = self.clock.age_of(entry.create_timestamp());
        let has_descriptor = self.persistent_metadata.files().exists(key);
        Some((entry, age, has_descriptor))
    }

    /// Looks up `key` through the metadata cache.
    pub fn cached_metadata(&self, key: &ComponentKey) -> Result<Option<metadata::CachedMetadata>, ResolveError> {
        self.metadata.get(key)
    }

    /// Entry counts and size on disk.
    pub fn stats(&self) -> CacheStats {
        let entries = self.persistent_metadata.index().entries();
        let missing_modules = entries
            .iter()
            .filter(|(_, e)| matches!(e, CachedMetadataEntry::Missing { .. }))
            .count();
        CacheStats {
            location: self.layout.root().to_path_buf(),
            modules: entries.len() - missing_modules,
            missing_modules,
            artifact_listings: self.persistent_artifacts.index().len(),
            artifact_files: self.artifact_files.index().len(),
            descriptor_files: self.persistent_metadata.files().files().len(),
            size_bytes: self.layout.size(),
        }
    }

    /// Removes entries older than `older_than`, or everything when `None`.
    pub fn clean(&self, older_than: Option<Duration>) -> Result<CleanReport> {
        let mut report = CleanReport::default();
        let expired = |timestamp: i64| older_than.is_none_or(|limit| self.clock.age_of(timestamp) > limit);

        let doomed: Vec<ComponentKey> = self
            .persistent_metadata
            .index()
            .entries()
            .into_iter()
            .filter(|(_, entry)| expired(entry.create_timestamp()))
            .map(|(key, _)| key)
            .collect();
        for key in &doomed {
            self.persistent_metadata
                .remove(key)
                .with_context(|| format!("Failed to remove cached metadata for {key}"))?;
        }
        report.metadata_entries = doomed.len();

        report.artifact_listings = self
            .persistent_artifacts
            .index()
            .retain(|_, entry| !expired(entry.create_timestamp))
            .context("Failed to clean the artifact listing cache")?;
        report.artifact_files = self
            .artifact_files
            .index()
            .retain(|_, entry| !expired(entry.create_timestamp))
            .context("Failed to clean the artifact file cache")?;

        if older_than.is_none() {
            for path in self.persistent_metadata.files().files() {
                self.persistent_metadata.files().remove_file(&path)?;
            }
        }

        info!("Removed {} cache entries", report.total());
        Ok(report)
    }

    /// Removes unreferenced descriptor files, entries whose files are gone, directories
    /// of other layout versions and stale lock files.
    pub fn gc(&self) -> Result<GcReport> {
        let mut report = GcReport::default();
        let files = self.persistent_metadata.files();

        let mut referenced = HashSet::new();
        let mut dangling = Vec::new();
        for (key, entry) in self.persistent_metadata.index().entries() {
            if let CachedMetadataEntry::Present {
                ..
            } = entry
            {
                if files.exists(&key) {
                    referenced.insert(files.path_for(&key));
                } else {
                    dangling.push(key);
                }
            }
        }
        for key in &dangling {
            self.persistent_metadata.index().remove(key)?;
        }
        report.dangling_entries = dangling.len();

        for path in files.files() {
            if !referenced.contains(&path) {
                debug!("Removing orphaned descriptor {}", path.display());
                files.remove_file(&path)?;
                report.orphaned_descriptors += 1;
            }
        }

        report.dangling_artifact_files = self.artifact_files.index().retain(|_, entry| match &entry.outcome {
            ArtifactFileOutcome::Found(path) => path.is_file(),
            ArtifactFileOutcome::Missing {
                ..
            } => true,
        })?;

        for dir in self.layout.foreign_layouts() {
            std::fs::remove_dir_all(&dir)
                .with_context(|| format!("Failed to remove old cache layout {}", dir.display()))?;
            report.foreign_layouts += 1;
        }

        report.stale_locks =
            lock::cleanup_stale_locks(self.layout.root(), Duration::from_secs(24 * 60 * 60))?;

        info!(
            "Garbage collection removed {} descriptors and {} dangling entries",
            report.orphaned_descriptors,
            report.dangling_entries + report.dangling_artifact_files
        );
        Ok(report)
    }
}
