//! File locking for persistent cache stores.
//!
//! Every physical store (an index file, the descriptor file store) is guarded by one
//! exclusive lock file so that two processes sharing a cache directory never interleave
//! structural writes. Locks are released when the [`CacheLock`] is dropped.

use anyhow::{Context, Result};
use fs4::fs_std::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::constants::LOCKS_DIR;
use crate::core::ResolveError;

/// An exclusive, process-wide lock on one cache store.
pub struct CacheLock {
    file: File,
    path: PathBuf,
}

impl CacheLock {
    /// Acquires the exclusive lock for `store_name` inside `cache_dir`, blocking until it
    /// is available.
    ///
    /// The lock file lives at `{cache_dir}/.locks/{store_name}.lock` and is never
    /// deleted; only the OS lock on it matters.
    ///
    /// Callers on an async runtime must run this from a blocking context
    /// (`tokio::task::spawn_blocking`); all cache stores are synchronous.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::IoError`] when the locks directory or the lock file
    /// cannot be created, or when the file system does not support locking.
    pub fn acquire(cache_dir: &Path, store_name: &str) -> Result<Self, ResolveError> {
        let locks_dir = cache_dir.join(LOCKS_DIR);
        std::fs::create_dir_all(&locks_dir)?;

        let path = locks_dir.join(format!("{store_name}.lock"));
        let file = OpenOptions::new().create(true).write(true).truncate(false).open(&path)?;
        FileExt::lock_exclusive(&file)?;

        tracing::trace!("Acquired cache lock {}", path.display());
        Ok(Self {
            file,
            path,
        })
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!("Failed to unlock {}: {}", self.path.display(), e);
        }
    }
}

/// Removes lock files older than `ttl` from `{cache_dir}/.locks`.
///
/// Lock files left behind by crashed processes are harmless but accumulate. Files that
/// cannot be inspected or removed (for example because they are held) are skipped.
/// Returns the number of files removed.
pub fn cleanup_stale_locks(cache_dir: &Path, ttl: Duration) -> Result<usize> {
    let locks_dir = cache_dir.join(LOCKS_DIR);
    if !locks_dir.exists() {
        return Ok(0);
    }

    let now = SystemTime::now();
    let mut removed = 0;
    let entries = std::fs::read_dir(&locks_dir)
        .with_context(|| format!("Failed to read locks directory {}", locks_dir.display()))?;

    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some("lock") {
            continue;
        }
        let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
            continue;
        };
        if let Ok(age) = now.duration_since(modified)
            && age > ttl
        {
            let Ok(file) = OpenOptions::new().write(true).open(&path) else {
                continue;
            };
            // Held locks belong to live processes.
            if !matches!(FileExt::try_lock_exclusive(&file), Ok(true)) {
                continue;
            }
            if std::fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }
    }

    Ok(removed)
}
