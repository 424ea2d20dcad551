//! Artifact listing cache.
//!
//! Remembers which artifacts a module exposes for a given context string (for
//! example `artifacts:jar` or a classifier probe), tagged with the hash of the
//! descriptor the listing was computed from.
//!
//! The cache does not invalidate itself: callers compare
//! [`CachedArtifacts::descriptor_hash`] with the current descriptor and discard the
//! listing on mismatch.

use dashmap::DashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::clock::Clock;
use super::codec::{
    Codec, Decoder, Encoder, read_artifact_name, read_component_id, read_descriptor_hash,
    write_artifact_name, write_component_id, write_descriptor_hash,
};
use super::index::PersistentIndexedCache;
use crate::constants::ARTIFACTS_STORE;
use crate::core::ResolveError;
use crate::models::{ArtifactIdentifier, ArtifactName, DescriptorHash, ModuleComponentIdentifier};

/// Key of an artifact listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactsKey {
    /// Repository the listing came from
    pub repository_id: String,
    /// The module
    pub component: ModuleComponentIdentifier,
    /// Which view of the module's artifacts
    pub context: String,
}

/// Persisted artifact listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedArtifactsEntry {
    /// Artifact names, in repository order
    pub artifacts: Vec<ArtifactName>,
    /// Hash of the descriptor the listing was computed from
    pub descriptor_hash: DescriptorHash,
    /// Creation time, milliseconds since the epoch
    pub create_timestamp: i64,
}

/// A listing hit with its age at lookup time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedArtifacts {
    /// The artifacts
    pub artifacts: Vec<ArtifactIdentifier>,
    /// Hash of the descriptor the listing was computed from
    pub descriptor_hash: DescriptorHash,
    /// Age of the entry
    pub age: Duration,
}

impl CachedArtifacts {
    fn from_entry(component: &ModuleComponentIdentifier, entry: &CachedArtifactsEntry, age: Duration) -> Self {
        Self {
            artifacts: entry
                .artifacts
                .iter()
                .map(|name| ArtifactIdentifier::new(component.clone(), name.clone()))
                .collect(),
            descriptor_hash: entry.descriptor_hash,
            age,
        }
    }
}

/// Stores artifact listings per (repository, component, context).
pub trait ModuleArtifactsCache: Send + Sync {
    /// Looks up a listing.
    fn get_cached_artifacts(
        &self,
        repository_id: &str,
        component: &ModuleComponentIdentifier,
        context: &str,
    ) -> Result<Option<CachedArtifacts>, ResolveError>;

    /// Stores a listing computed against `descriptor_hash`.
    fn cache_artifacts(
        &self,
        repository_id: &str,
        component: &ModuleComponentIdentifier,
        context: &str,
        descriptor_hash: DescriptorHash,
        artifacts: &[ArtifactIdentifier],
    ) -> Result<CachedArtifacts, ResolveError>;
}

#[derive(Debug, Clone, Copy, Default)]
struct ArtifactsKeyCodec;

impl Codec<ArtifactsKey> for ArtifactsKeyCodec {
    fn encode(&self, key: &ArtifactsKey, encoder: &mut Encoder) {
        encoder.write_string(&key.repository_id);
        write_component_id(encoder, &key.component);
        encoder.write_string(&key.context);
    }

    fn decode(&self, decoder: &mut Decoder<'_>) -> Result<ArtifactsKey, ResolveError> {
        Ok(ArtifactsKey {
            repository_id: decoder.read_string()?,
            component: read_component_id(decoder)?,
            context: decoder.read_string()?,
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct CachedArtifactsEntryCodec;

impl Codec<CachedArtifactsEntry> for CachedArtifactsEntryCodec {
    fn encode(&self, entry: &CachedArtifactsEntry, encoder: &mut Encoder) {
        encoder.write_small_int(entry.artifacts.len());
        for artifact in &entry.artifacts {
            write_artifact_name(encoder, artifact);
        }
        write_descriptor_hash(encoder, &entry.descriptor_hash);
        encoder.write_i64(entry.create_timestamp);
    }

    fn decode(&self, decoder: &mut Decoder<'_>) -> Result<CachedArtifactsEntry, ResolveError> {
        let count = decoder.read_small_int()?;
        let artifacts = (0..count).map(|_| read_artifact_name(decoder)).collect::<Result<_, _>>()?;
        Ok(CachedArtifactsEntry {
            artifacts,
            descriptor_hash: read_descriptor_hash(decoder)?,
            create_timestamp: decoder.read_i64()?,
        })
    }
}

fn to_entry(
    artifacts: &[ArtifactIdentifier],
    descriptor_hash: DescriptorHash,
    create_timestamp: i64,
) -> CachedArtifactsEntry {
    CachedArtifactsEntry {
        artifacts: artifacts.iter().map(|a| a.name.clone()).collect(),
        descriptor_hash,
        create_timestamp,
    }
}

fn key(repository_id: &str, component: &ModuleComponentIdentifier, context: &str) -> ArtifactsKey {
    ArtifactsKey {
        repository_id: repository_id.to_string(),
        component: component.clone(),
        context: context.to_string(),
    }
}

/// Artifact listings persisted in the artifacts index.
pub struct PersistentModuleArtifactsCache {
    index: PersistentIndexedCache<ArtifactsKey, CachedArtifactsEntry>,
    clock: Arc<dyn Clock>,
}

impl PersistentModuleArtifactsCache {
    /// Opens the artifacts store inside the versioned cache root.
    pub fn open(cache_root: &Path, clock: Arc<dyn Clock>) -> Result<Self, ResolveError> {
        Ok(Self {
            index: PersistentIndexedCache::open(
                cache_root,
                ARTIFACTS_STORE,
                ArtifactsKeyCodec,
                CachedArtifactsEntryCodec,
            )?,
            clock,
        })
    }

    /// The underlying index.
    pub fn index(&self) -> &PersistentIndexedCache<ArtifactsKey, CachedArtifactsEntry> {
        &self.index
    }
}

impl ModuleArtifactsCache for PersistentModuleArtifactsCache {
    fn get_cached_artifacts(
        &self,
        repository_id: &str,
        component: &ModuleComponentIdentifier,
        context: &str,
    ) -> Result<Option<CachedArtifacts>, ResolveError> {
        Ok(self.index.get(&key(repository_id, component, context)).map(|entry| {
            CachedArtifacts::from_entry(component, &entry, self.clock.age_of(entry.create_timestamp))
        }))
    }

    fn cache_artifacts(
        &self,
        repository_id: &str,
        component: &ModuleComponentIdentifier,
        context: &str,
        descriptor_hash: DescriptorHash,
        artifacts: &[ArtifactIdentifier],
    ) -> Result<CachedArtifacts, ResolveError> {
        let entry = to_entry(artifacts, descriptor_hash, self.clock.now_millis());
        self.index.put(key(repository_id, component, context), entry.clone())?;
        Ok(CachedArtifacts::from_entry(component, &entry, Duration::ZERO))
    }
}

/// In-memory tier in front of another [`ModuleArtifactsCache`].
pub struct InMemoryModuleArtifactsCache {
    delegate: Arc<dyn ModuleArtifactsCache>,
    entries: DashMap<ArtifactsKey, CachedArtifactsEntry>,
    clock: Arc<dyn Clock>,
}

impl InMemoryModuleArtifactsCache {
    /// Wraps `delegate`.
    pub fn new(delegate: Arc<dyn ModuleArtifactsCache>, clock: Arc<dyn Clock>) -> Self {
        Self {
            delegate,
            entries: DashMap::new(),
            clock,
        }
    }
}

impl ModuleArtifactsCache for InMemoryModuleArtifactsCache {
    fn get_cached_artifacts(
        &self,
        repository_id: &str,
        component: &ModuleComponentIdentifier,
        context: &str,
    ) -> Result<Option<CachedArtifacts>, ResolveError> {
        let key = key(repository_id, component, context);
        if let Some(entry) = self.entries.get(&key) {
            let age = self.clock.age_of(entry.create_timestamp);
            return Ok(Some(CachedArtifacts::from_entry(component, &entry, age)));
        }

        let found = self.delegate.get_cached_artifacts(repository_id, component, context)?;
        if let Some(hit) = &found {
            let created = self.clock.now_millis() - i64::try_from(hit.age.as_millis()).unwrap_or(0);
            self.entries.insert(key, to_entry(&hit.artifacts, hit.descriptor_hash, created));
        }
        Ok(found)
    }

    fn cache_artifacts(
        &self,
        repository_id: &str,
        component: &ModuleComponentIdentifier,
        context: &str,
        descriptor_hash: DescriptorHash,
        artifacts: &[ArtifactIdentifier],
    ) -> Result<CachedArtifacts, ResolveError> {
        let cached =
            self.delegate.cache_artifacts(repository_id, component, context, descriptor_hash, artifacts)?;
        self.entries.insert(
            key(repository_id, component, context),
            to_entry(artifacts, descriptor_hash, self.clock.now_millis()),
        );
        Ok(cached)
    }
}
