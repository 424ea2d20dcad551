//! Module metadata cache.
//!
//! Remembers, per (repository, component), whether the repository had the module and
//! if so which descriptor it served. Two implementations form the usual stack:
//!
//! - [`PersistentModuleMetadataCache`] keeps a small entry (flags, timestamp, sources,
//!   descriptor hash) in a [`PersistentIndexedCache`] and the descriptor itself in the
//!   [`ModuleFileStore`]. An index entry whose file has disappeared is a miss.
//! - [`InMemoryModuleMetadataCache`] sits in front of any other cache and keeps
//!   dehydrated copies of everything it has seen in a [`DashMap`].
//!
//! ```rust,no_run
//! use depot::cache::metadata::{InMemoryModuleMetadataCache, ModuleMetadataCache, PersistentModuleMetadataCache};
//! use depot::cache::SystemClock;
//! use depot::models::{ComponentKey, ModuleComponentIdentifier, ModuleDescriptor, ModuleSources};
//! use std::sync::Arc;
//!
//! # fn example() -> Result<(), depot::core::ResolveError> {
//! let clock = Arc::new(SystemClock);
//! let persistent = PersistentModuleMetadataCache::open("/tmp/cache".as_ref(), clock.clone())?;
//! let cache = InMemoryModuleMetadataCache::new(Arc::new(persistent), clock);
//!
//! let id = ModuleComponentIdentifier::new("com.x", "y", "1.0");
//! let key = ComponentKey::new("R1", id.clone());
//! cache.put_present(&key, &ModuleDescriptor::new(id), &ModuleSources::new())?;
//! assert!(cache.get(&key)?.is_some());
//! # Ok(())
//! # }
//! ```

use dashmap::DashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::clock::Clock;
use super::codec::{
    Codec, Decoder, Encoder, read_component_id, read_descriptor_hash, read_module_sources,
    write_component_id, write_descriptor_hash, write_module_sources,
};
use super::file_store::ModuleFileStore;
use super::index::PersistentIndexedCache;
use crate::constants::METADATA_STORE;
use crate::core::ResolveError;
use crate::models::{ComponentKey, DescriptorHash, ModuleDescriptor, ModuleSource, ModuleSources};

/// The lightweight record kept in the metadata index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedMetadataEntry {
    /// The repository reported the module as absent.
    Missing {
        /// Creation time, milliseconds since the epoch
        create_timestamp: i64,
    },
    /// The repository served a descriptor.
    Present {
        /// Whether the module may change without a version change
        is_changing: bool,
        /// Creation time, milliseconds since the epoch
        create_timestamp: i64,
        /// Sources attached to the resolved metadata
        module_sources: ModuleSources,
        /// Hash of the stored descriptor
        descriptor_hash: DescriptorHash,
    },
}

impl CachedMetadataEntry {
    /// Creation time of the entry.
    pub fn create_timestamp(&self) -> i64 {
        match self {
            Self::Missing {
                create_timestamp,
            }
            | Self::Present {
                create_timestamp,
                ..
            } => *create_timestamp,
        }
    }
}

/// Key used by the persistent metadata and artifact stores.
#[derive(Debug, Clone, Copy, Default)]
pub struct ComponentKeyCodec;

impl Codec<ComponentKey> for ComponentKeyCodec {
    fn encode(&self, key: &ComponentKey, encoder: &mut Encoder) {
        encoder.write_string(&key.repository_id);
        write_component_id(encoder, &key.component);
    }

    fn decode(&self, decoder: &mut Decoder<'_>) -> Result<ComponentKey, ResolveError> {
        Ok(ComponentKey {
            repository_id: decoder.read_string()?,
            component: read_component_id(decoder)?,
        })
    }
}

/// Value codec of the metadata index.
#[derive(Debug, Clone, Copy, Default)]
pub struct CachedMetadataEntryCodec;

const ENTRY_MISSING: u8 = 0;
const ENTRY_PRESENT: u8 = 1;

impl Codec<CachedMetadataEntry> for CachedMetadataEntryCodec {
    fn encode(&self, entry: &CachedMetadataEntry, encoder: &mut Encoder) {
        match entry {
            CachedMetadataEntry::Missing {
                create_timestamp,
            } => {
                encoder.write_byte(ENTRY_MISSING);
                encoder.write_i64(*create_timestamp);
            }
            CachedMetadataEntry::Present {
                is_changing,
                create_timestamp,
                module_sources,
                descriptor_hash,
            } => {
                encoder.write_byte(ENTRY_PRESENT);
                encoder.write_bool(*is_changing);
                encoder.write_i64(*create_timestamp);
                write_module_sources(encoder, module_sources);
                write_descriptor_hash(encoder, descriptor_hash);
            }
        }
    }

    fn decode(&self, decoder: &mut Decoder<'_>) -> Result<CachedMetadataEntry, ResolveError> {
        match decoder.read_byte()? {
            ENTRY_MISSING => Ok(CachedMetadataEntry::Missing {
                create_timestamp: decoder.read_i64()?,
            }),
            ENTRY_PRESENT => Ok(CachedMetadataEntry::Present {
                is_changing: decoder.read_bool()?,
                create_timestamp: decoder.read_i64()?,
                module_sources: read_module_sources(decoder)?,
                descriptor_hash: read_descriptor_hash(decoder)?,
            }),
            other => Err(ResolveError::Decode {
                what: "metadata entry".to_string(),
                reason: format!("unknown entry kind {other}"),
            }),
        }
    }
}

/// A metadata cache hit, with its age at lookup time.
///
/// Present hits carry the descriptor and a memo of descriptors produced by metadata
/// rules, keyed by the rules' hash. Clones share the memo.
#[derive(Debug, Clone)]
pub struct CachedMetadata {
    entry: CachedMetadataEntry,
    descriptor: Option<Arc<ModuleDescriptor>>,
    age: Duration,
    processed: Arc<DashMap<String, Arc<ModuleDescriptor>>>,
}

impl CachedMetadata {
    fn new(entry: CachedMetadataEntry, descriptor: Option<Arc<ModuleDescriptor>>, age: Duration) -> Self {
        Self {
            entry,
            descriptor,
            age,
            processed: Arc::new(DashMap::new()),
        }
    }

    /// The index entry.
    pub fn entry(&self) -> &CachedMetadataEntry {
        &self.entry
    }

    /// Whether the repository reported the module as absent.
    pub fn is_missing(&self) -> bool {
        matches!(self.entry, CachedMetadataEntry::Missing { .. })
    }

    /// Whether the module may change without a version change.
    pub fn is_changing(&self) -> bool {
        matches!(
            self.entry,
            CachedMetadataEntry::Present {
                is_changing: true,
                ..
            }
        )
    }

    /// Age of the entry when it was looked up.
    pub fn age(&self) -> Duration {
        self.age
    }

    /// The cached descriptor, for present entries.
    pub fn descriptor(&self) -> Option<&Arc<ModuleDescriptor>> {
        self.descriptor.as_ref()
    }

    /// Hash of the cached descriptor, for present entries.
    pub fn descriptor_hash(&self) -> Option<DescriptorHash> {
        match &self.entry {
            CachedMetadataEntry::Present {
                descriptor_hash,
                ..
            } => Some(*descriptor_hash),
            CachedMetadataEntry::Missing {
                ..
            } => None,
        }
    }

    /// Sources attached to the metadata; empty for missing entries.
    pub fn module_sources(&self) -> ModuleSources {
        match &self.entry {
            CachedMetadataEntry::Present {
                module_sources,
                ..
            } => module_sources.clone(),
            CachedMetadataEntry::Missing {
                ..
            } => ModuleSources::new(),
        }
    }

    /// Descriptor previously produced by the rules identified by `rules_hash`.
    pub fn processed_metadata(&self, rules_hash: &str) -> Option<Arc<ModuleDescriptor>> {
        self.processed.get(rules_hash).map(|entry| entry.value().clone())
    }

    /// Remember the descriptor produced by the rules identified by `rules_hash`.
    pub fn set_processed_metadata(&self, rules_hash: &str, descriptor: Arc<ModuleDescriptor>) {
        self.processed.insert(rules_hash.to_string(), descriptor);
    }

    /// A copy without processed descriptors, sharing nothing mutable with `self`.
    #[must_use]
    pub fn dehydrate(&self) -> Self {
        Self::new(self.entry.clone(), self.descriptor.clone(), self.age)
    }

    #[must_use]
    fn with_age(&self, age: Duration) -> Self {
        Self {
            age,
            ..self.clone()
        }
    }
}

/// Stores module metadata per (repository, component).
///
/// `Ok(None)` from [`get`](Self::get) means "not yet attempted"; a missing module
/// is a hit whose [`CachedMetadata::is_missing`] is true.
pub trait ModuleMetadataCache: Send + Sync {
    /// Looks up the entry for `key`.
    fn get(&self, key: &ComponentKey) -> Result<Option<CachedMetadata>, ResolveError>;

    /// Records that the repository served `descriptor`.
    fn put_present(
        &self,
        key: &ComponentKey,
        descriptor: &ModuleDescriptor,
        sources: &ModuleSources,
    ) -> Result<CachedMetadata, ResolveError>;

    /// Records that the repository does not have the module.
    fn put_missing(&self, key: &ComponentKey) -> Result<CachedMetadata, ResolveError>;
}

/// Metadata cache backed by the metadata index and the descriptor file store.
pub struct PersistentModuleMetadataCache {
    index: PersistentIndexedCache<ComponentKey, CachedMetadataEntry>,
    files: ModuleFileStore,
    clock: Arc<dyn Clock>,
}

impl PersistentModuleMetadataCache {
    /// Opens the metadata store inside the versioned cache root.
    pub fn open(cache_root: &Path, clock: Arc<dyn Clock>) -> Result<Self, ResolveError> {
        Ok(Self {
            index: PersistentIndexedCache::open(
                cache_root,
                METADATA_STORE,
                ComponentKeyCodec,
                CachedMetadataEntryCodec,
            )?,
            files: ModuleFileStore::new(cache_root),
            clock,
        })
    }

    /// The underlying index.
    pub fn index(&self) -> &PersistentIndexedCache<ComponentKey, CachedMetadataEntry> {
        &self.index
    }

    /// The descriptor file store.
    pub fn files(&self) -> &ModuleFileStore {
        &self.files
    }

    /// Removes the entry for `key` and its descriptor file.
    pub fn remove(&self, key: &ComponentKey) -> Result<bool, ResolveError> {
        self.files.remove(key)?;
        self.index.remove(key)
    }
}

impl ModuleMetadataCache for PersistentModuleMetadataCache {
    fn get(&self, key: &ComponentKey) -> Result<Option<CachedMetadata>, ResolveError> {
        let Some(entry) = self.index.get(key) else {
            return Ok(None);
        };
        let age = self.clock.age_of(entry.create_timestamp());

        let descriptor = match &entry {
            CachedMetadataEntry::Missing {
                ..
            } => None,
            CachedMetadataEntry::Present {
                descriptor_hash,
                ..
            } => match self.files.read(key, Some(*descriptor_hash))? {
                Some(descriptor) => Some(Arc::new(descriptor)),
                None => {
                    debug!("Metadata entry for {} has no usable descriptor file, treating as miss", key);
                    return Ok(None);
                }
            },
        };
        Ok(Some(CachedMetadata::new(entry, descriptor, age)))
    }

    fn put_present(
        &self,
        key: &ComponentKey,
        descriptor: &ModuleDescriptor,
        sources: &ModuleSources,
    ) -> Result<CachedMetadata, ResolveError> {
        let hash = self.files.write(key, descriptor)?;
        let module_sources = if sources.descriptor_hash().is_some() {
            sources.clone()
        } else {
            sources.with(ModuleSource::DescriptorHash {
                hash,
                changing: descriptor.changing,
            })
        };
        let entry = CachedMetadataEntry::Present {
            is_changing: descriptor.changing,
            create_timestamp: self.clock.now_millis(),
            module_sources,
            descriptor_hash: hash,
        };
        self.index.put(key.clone(), entry.clone())?;
        debug!("Cached metadata for {} (descriptor {})", key, hash);
        Ok(CachedMetadata::new(entry, Some(Arc::new(descriptor.clone())), Duration::ZERO))
    }

    fn put_missing(&self, key: &ComponentKey) -> Result<CachedMetadata, ResolveError> {
        let entry = CachedMetadataEntry::Missing {
            create_timestamp: self.clock.now_millis(),
        };
        self.index.put(key.clone(), entry.clone())?;
        debug!("Cached missing module {}", key);
        Ok(CachedMetadata::new(entry, None, Duration::ZERO))
    }
}

/// In-memory tier in front of another [`ModuleMetadataCache`].
///
/// Hits from the delegate are stored dehydrated. Ages are recomputed on every lookup.
pub struct InMemoryModuleMetadataCache {
    delegate: Arc<dyn ModuleMetadataCache>,
    entries: DashMap<ComponentKey, CachedMetadata>,
    clock: Arc<dyn Clock>,
}

impl InMemoryModuleMetadataCache {
    /// Wraps `delegate`.
    pub fn new(delegate: Arc<dyn ModuleMetadataCache>, clock: Arc<dyn Clock>) -> Self {
        Self {
            delegate,
            entries: DashMap::new(),
            clock,
        }
    }

    /// Number of entries held in memory.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is held in memory.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ModuleMetadataCache for InMemoryModuleMetadataCache {
    fn get(&self, key: &ComponentKey) -> Result<Option<CachedMetadata>, ResolveError> {
        if let Some(hit) = self.entries.get(key) {
            let age = self.clock.age_of(hit.entry.create_timestamp());
            return Ok(Some(hit.with_age(age)));
        }

        let found = self.delegate.get(key)?;
        if let Some(metadata) = &found {
            self.entries.insert(key.clone(), metadata.dehydrate());
        }
        Ok(found)
    }

    fn put_present(
        &self,
        key: &ComponentKey,
        descriptor: &ModuleDescriptor,
        sources: &ModuleSources,
    ) -> Result<CachedMetadata, ResolveError> {
        let metadata = self.delegate.put_present(key, descriptor, sources)?;
        self.entries.insert(key.clone(), metadata.clone());
        Ok(metadata)
    }

    fn put_missing(&self, key: &ComponentKey) -> Result<CachedMetadata, ResolveError> {
        let metadata = self.delegate.put_missing(key)?;
        self.entries.insert(key.clone(), metadata.clone());
        Ok(metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ModuleComponentIdentifier;
    use crate::test_utils::ManualClock;
    use tempfile::TempDir;

    fn key() -> ComponentKey {
        ComponentKey::new("R1", ModuleComponentIdentifier::new("com.x", "y", "1.0"))
    }

    fn descriptor() -> ModuleDescriptor {
        ModuleDescriptor::new(key().component)
    }

    #[test]
    fn test_present_entry_survives_reopen() {
        let temp = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(1_000));
        {
            let cache = PersistentModuleMetadataCache::open(temp.path(), clock.clone()).unwrap();
            cache.put_present(&key(), &descriptor(), &ModuleSources::new()).unwrap();
        }
        clock.advance(Duration::from_secs(5));

        let cache = PersistentModuleMetadataCache::open(temp.path(), clock).unwrap();
        let hit = cache.get(&key()).unwrap().unwrap();
        assert!(!hit.is_missing());
        assert_eq!(hit.age(), Duration::from_secs(5));
        assert_eq!(hit.descriptor().map(|d| d.as_ref()), Some(&descriptor()));
        assert_eq!(
            hit.descriptor_hash(),
            hit.module_sources().descriptor_hash().map(|(hash, _)| hash)
        );
    }

    #[test]
    fn test_missing_entry() {
        let temp = TempDir::new().unwrap();
        let cache =
            PersistentModuleMetadataCache::open(temp.path(), Arc::new(ManualClock::new(0))).unwrap();
        assert!(cache.get(&key()).unwrap().is_none());

        cache.put_missing(&key()).unwrap();
        let hit = cache.get(&key()).unwrap().unwrap();
        assert!(hit.is_missing());
        assert!(hit.descriptor().is_none());
    }

    #[test]
    fn test_deleted_descriptor_file_is_a_miss() {
        let temp = TempDir::new().unwrap();
        let cache =
            PersistentModuleMetadataCache::open(temp.path(), Arc::new(ManualClock::new(0))).unwrap();
        cache.put_present(&key(), &descriptor(), &ModuleSources::new()).unwrap();
        std::fs::remove_file(cache.files().path_for(&key())).unwrap();

        assert!(cache.get(&key()).unwrap().is_none());
    }

    #[test]
    fn test_in_memory_tier_serves_dehydrated_copies() {
        let temp = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(0));
        let persistent =
            Arc::new(PersistentModuleMetadataCache::open(temp.path(), clock.clone()).unwrap());
        persistent.put_present(&key(), &descriptor(), &ModuleSources::new()).unwrap();

        let cache = InMemoryModuleMetadataCache::new(persistent.clone(), clock.clone());
        let first = cache.get(&key()).unwrap().unwrap();
        first.set_processed_metadata("rules", Arc::new(descriptor()));
        assert_eq!(cache.len(), 1);

        // The persistent copy is gone, the memory tier still answers.
        persistent.remove(&key()).unwrap();
        clock.advance(Duration::from_millis(250));
        let second = cache.get(&key()).unwrap().unwrap();
        assert_eq!(second.age(), Duration::from_millis(250));
        assert!(second.processed_metadata("rules").is_none());
    }

    #[test]
    fn test_processed_memo_is_shared_between_clones() {
        let metadata = CachedMetadata::new(
            CachedMetadataEntry::Missing {
                create_timestamp: 0,
            },
            None,
            Duration::ZERO,
        );
        let clone = metadata.clone();
        clone.set_processed_metadata("r", Arc::new(descriptor()));
        assert!(metadata.processed_metadata("r").is_some());
        assert!(metadata.dehydrate().processed_metadata("r").is_none());
    }
}
