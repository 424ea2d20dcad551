//! On-disk store for serialized module descriptors.
//!
//! Descriptors are the heavy part of a metadata entry, so they live in their own files
//! and the metadata index only records their hash. Paths are derived from the
//! component coordinates and the repository:
//!
//! ```text
//! descriptors/{group}/{module}/{version}/{repository}/descriptor.bin
//! ```

use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use super::codec::ModuleDescriptorSerializer;
use crate::constants::{DESCRIPTOR_FILE, DESCRIPTORS_DIR};
use crate::core::ResolveError;
use crate::models::{ComponentKey, DescriptorHash, ModuleDescriptor};
use crate::utils::{atomic_write, remove_file_and_empty_parents};

/// Stores one serialized descriptor per (repository, component).
#[derive(Debug, Clone)]
pub struct ModuleFileStore {
    root: PathBuf,
}

impl ModuleFileStore {
    /// A store rooted at `{cache_root}/descriptors`.
    pub fn new(cache_root: &Path) -> Self {
        Self {
            root: cache_root.join(DESCRIPTORS_DIR),
        }
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of the descriptor for `key`.
    pub fn path_for(&self, key: &ComponentKey) -> PathBuf {
        self.root
            .join(sanitize(&key.component.group))
            .join(sanitize(&key.component.module))
            .join(sanitize(&key.component.version))
            .join(sanitize(&key.repository_id))
            .join(DESCRIPTOR_FILE)
    }

    /// Serializes and writes `descriptor`, returning its hash.
    pub fn write(
        &self,
        key: &ComponentKey,
        descriptor: &ModuleDescriptor,
    ) -> Result<DescriptorHash, ResolveError> {
        let bytes = ModuleDescriptorSerializer::serialize(descriptor);
        let hash = DescriptorHash::of_bytes(&bytes);
        let path = self.path_for(key);
        atomic_write(&path, &bytes)?;
        debug!("Stored descriptor for {} at {}", key, path.display());
        Ok(hash)
    }

    /// Reads the descriptor for `key`.
    ///
    /// Returns `Ok(None)` when the file is gone or no longer matches `expected`, so
    /// the caller treats the entry as a miss. Undecodable files are reported as
    /// misses too, after a warning.
    pub fn read(
        &self,
        key: &ComponentKey,
        expected: Option<DescriptorHash>,
    ) -> Result<Option<ModuleDescriptor>, ResolveError> {
        let path = self.path_for(key);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Descriptor file for {} is missing", key);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(expected) = expected
            && DescriptorHash::of_bytes(&bytes) != expected
        {
            debug!("Descriptor file for {} does not match its index entry", key);
            return Ok(None);
        }

        match ModuleDescriptorSerializer::deserialize(&bytes) {
            Ok(descriptor) => Ok(Some(descriptor)),
            Err(e) => {
                warn!("Ignoring unreadable descriptor {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }

    /// Whether a descriptor file exists for `key`.
    pub fn exists(&self, key: &ComponentKey) -> bool {
        self.path_for(key).is_file()
    }

    /// Deletes the descriptor for `key` and any directories left empty.
    pub fn remove(&self, key: &ComponentKey) -> Result<(), ResolveError> {
        remove_file_and_empty_parents(&self.path_for(key), &self.root)?;
        Ok(())
    }

    /// Every descriptor file currently on disk.
    pub fn files(&self) -> Vec<PathBuf> {
        WalkDir::new(&self.root)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file() && e.file_name() == DESCRIPTOR_FILE)
            .map(walkdir::DirEntry::into_path)
            .collect()
    }

    /// Deletes a descriptor file found by [`files`](Self::files).
    pub fn remove_file(&self, path: &Path) -> Result<(), ResolveError> {
        remove_file_and_empty_parents(path, &self.root)?;
        Ok(())
    }
}

/// Maps a coordinate segment onto a single safe path component.
///
/// Reserved characters, control characters and `%` itself are percent-encoded, so
/// distinct segments always map to distinct components. `.` and `..` are encoded
/// whole; the empty segment becomes a lone `%`, which no encoding produces.
fn sanitize(segment: &str) -> String {
    match segment {
        "" => return "%".to_string(),
        "." => return "%2E".to_string(),
        ".." => return "%2E%2E".to_string(),
        _ => {}
    }
    let mut encoded = String::with_capacity(segment.len());
    for c in segment.chars() {
        if matches!(c, '%' | '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|') || c.is_control() {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).bytes() {
                encoded.push_str(&format!("%{byte:02X}"));
            }
        } else {
            encoded.push(c);
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ModuleComponentIdentifier;
    use tempfile::TempDir;

    fn key() -> ComponentKey {
        ComponentKey::new("R1", ModuleComponentIdentifier::new("com.x", "y", "1.0"))
    }

    #[test]
    fn test_path_layout() {
        let temp = TempDir::new().unwrap();
        let store = ModuleFileStore::new(temp.path());
        let expected = temp
            .path()
            .join("descriptors")
            .join("com.x")
            .join("y")
            .join("1.0")
            .join("R1")
            .join("descriptor.bin");
        assert_eq!(store.path_for(&key()), expected);
    }

    #[test]
    fn test_write_then_read() {
        let temp = TempDir::new().unwrap();
        let store = ModuleFileStore::new(temp.path());
        let descriptor = ModuleDescriptor::new(key().component);

        let hash = store.write(&key(), &descriptor).unwrap();
        assert_eq!(store.read(&key(), Some(hash)).unwrap(), Some(descriptor.clone()));
        assert_eq!(store.read(&key(), None).unwrap(), Some(descriptor));
        assert_eq!(store.files().len(), 1);
    }

    #[test]
    fn test_missing_or_mismatched_file_is_a_miss() {
        let temp = TempDir::new().unwrap();
        let store = ModuleFileStore::new(temp.path());
        assert_eq!(store.read(&key(), None).unwrap(), None);

        store.write(&key(), &ModuleDescriptor::new(key().component)).unwrap();
        let other = DescriptorHash::of_bytes(b"other");
        assert_eq!(store.read(&key(), Some(other)).unwrap(), None);

        store.remove(&key()).unwrap();
        assert!(!store.exists(&key()));
        assert!(store.root().exists());
    }

    #[test]
    fn test_sanitize_traversal() {
        assert_eq!(sanitize(".."), "%2E%2E");
        assert_eq!(sanitize("."), "%2E");
        assert_eq!(sanitize("a/b"), "a%2Fb");
        assert_eq!(sanitize(""), "%");
        assert_eq!(sanitize("1.0"), "1.0");
    }

    #[test]
    fn test_distinct_segments_get_distinct_paths() {
        let segments = ["a/b", "a_b", "a%2Fb", "a:b", "", "%", ".", "%2E", "a\\b", "a\u{85}b"];
        let encoded: std::collections::HashSet<String> = segments.iter().map(|s| sanitize(s)).collect();
        assert_eq!(encoded.len(), segments.len());

        let temp = TempDir::new().unwrap();
        let store = ModuleFileStore::new(temp.path());
        let component = ModuleComponentIdentifier::new("com.x", "y", "1.0");
        let slashed = ComponentKey::new("a/b", component.clone());
        let underscored = ComponentKey::new("a_b", component);
        assert_ne!(store.path_for(&slashed), store.path_for(&underscored));
        assert!(store.path_for(&slashed).starts_with(temp.path()));
    }
}
