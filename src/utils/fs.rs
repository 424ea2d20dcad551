//! File system helpers for the on-disk cache.
//!
//! Every file the cache writes goes through [`atomic_write`] so that a reader in
//! another process never observes a partially written descriptor or index.

use std::io::Write;
use std::path::Path;
use walkdir::WalkDir;

/// Atomically replaces `path` with `content`.
///
/// The bytes are written to a temporary file in the same directory, synced, and then
/// renamed over the target. Parent directories are created as needed.
///
/// # Errors
///
/// Returns the underlying I/O error when the directory cannot be created or the
/// temporary file cannot be written or renamed.
pub fn atomic_write(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    std::fs::create_dir_all(parent)?;

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Total size in bytes of all regular files below `path`.
///
/// Entries that disappear or cannot be read during the walk are skipped; a missing
/// `path` has size zero.
pub fn dir_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|metadata| metadata.len())
        .sum()
}

/// Removes `path` and, walking upwards, every parent that became empty, stopping at
/// (and never removing) `root`.
pub fn remove_file_and_empty_parents(path: &Path, root: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    let mut current = path.parent();
    while let Some(dir) = current {
        if dir == root || !dir.starts_with(root) {
            break;
        }
        // Non-empty directories refuse removal, which ends the walk.
        if std::fs::remove_dir(dir).is_err() {
            break;
        }
        current = dir.parent();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_write_creates_parents_and_replaces() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("a").join("b").join("file.bin");

        atomic_write(&target, b"first").unwrap();
        atomic_write(&target, b"second").unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"second");
        let leftovers = std::fs::read_dir(target.parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn test_dir_size_counts_nested_files() {
        let temp = TempDir::new().unwrap();
        atomic_write(&temp.path().join("x"), &[0; 10]).unwrap();
        atomic_write(&temp.path().join("d").join("y"), &[0; 5]).unwrap();

        assert_eq!(dir_size(temp.path()), 15);
        assert_eq!(dir_size(&temp.path().join("missing")), 0);
    }

    #[test]
    fn test_remove_file_and_empty_parents_stops_at_root() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("root");
        let file = root.join("g").join("m").join("f");
        let sibling = root.join("g").join("other");
        atomic_write(&file, b"x").unwrap();
        atomic_write(&sibling, b"y").unwrap();

        remove_file_and_empty_parents(&file, &root).unwrap();

        assert!(!root.join("g").join("m").exists());
        assert!(root.join("g").exists());
        assert!(root.exists());
    }
}
