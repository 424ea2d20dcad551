//! Cache of resolved artifact files.
//!
//! For every artifact fetched from a repository the cache remembers either the local
//! file or the fact that the artifact was not found, together with the locations that
//! were searched. Both outcomes are tagged with the descriptor hash of the owning
//! module so a republished module invalidates them.
//!
//! Two tiers may answer a lookup:
//!
//! 1. the repository-scoped persistent store, keyed by (repository, artifact)
//! 2. a shared in-memory tier keyed by artifact only, scoped by an explicit
//!    [`CacheScopeId`] and shared by every repository created with that scope
//!
//! The repository-scoped entry always wins. The shared tier is consulted only on a
//! scoped miss, only holds found files, and only answers when its descriptor hash
//! matches the current one.

use dashmap::DashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::clock::Clock;
use super::codec::{
    Codec, Decoder, Encoder, read_artifact_name, read_component_id, read_descriptor_hash,
    write_artifact_name, write_component_id, write_descriptor_hash,
};
use super::index::PersistentIndexedCache;
use crate::constants::ARTIFACT_FILES_STORE;
use crate::core::ResolveError;
use crate::models::{ArtifactIdentifier, ComponentIdentifier, DescriptorHash};

/// Identifies a group of repositories sharing one in-memory artifact cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheScopeId(String);

impl CacheScopeId {
    /// Create a scope id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for CacheScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a repository answered for one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactFileOutcome {
    /// The artifact was downloaded to this file.
    Found(PathBuf),
    /// The artifact does not exist in the repository.
    Missing {
        /// Locations that were searched
        attempted: Vec<String>,
    },
}

/// A cached artifact outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedArtifactFile {
    /// What the repository answered
    pub outcome: ArtifactFileOutcome,
    /// Descriptor hash of the owning module when the answer was recorded
    pub descriptor_hash: DescriptorHash,
    /// Creation time, milliseconds since the epoch
    pub create_timestamp: i64,
}

impl CachedArtifactFile {
    /// Whether this records a missing artifact.
    pub fn is_missing(&self) -> bool {
        matches!(self.outcome, ArtifactFileOutcome::Missing { .. })
    }
}

/// Cache lookup result with the age of the entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactFileHit {
    /// The cached outcome
    pub file: CachedArtifactFile,
    /// Age of the entry
    pub age: Duration,
    /// Whether the hit came from the shared tier
    pub shared: bool,
}

/// Key of the repository-scoped store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactAtRepositoryKey {
    /// Repository identifier
    pub repository_id: String,
    /// The artifact
    pub artifact: ArtifactIdentifier,
}

/// Provides the shared tier for each [`CacheScopeId`].
#[derive(Debug, Default)]
pub struct SharedArtifactCaches {
    scopes: DashMap<CacheScopeId, Arc<DashMap<ArtifactIdentifier, CachedArtifactFile>>>,
}

impl SharedArtifactCaches {
    /// No scopes yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared tier for `scope`, created on first use.
    pub fn for_scope(&self, scope: &CacheScopeId) -> Arc<DashMap<ArtifactIdentifier, CachedArtifactFile>> {
        self.scopes.entry(scope.clone()).or_default().clone()
    }
}

const COMPONENT_MODULE: u8 = 0;
const COMPONENT_PROJECT: u8 = 1;
const COMPONENT_OPAQUE: u8 = 2;

fn write_artifact_identifier(encoder: &mut Encoder, artifact: &ArtifactIdentifier) {
    match &artifact.component {
        ComponentIdentifier::Module(id) => {
            encoder.write_byte(COMPONENT_MODULE);
            write_component_id(encoder, id);
        }
        ComponentIdentifier::Project {
            build,
            path,
        } => {
            encoder.write_byte(COMPONENT_PROJECT);
            encoder.write_string(build);
            encoder.write_string(path);
        }
        ComponentIdentifier::Opaque(name) => {
            encoder.write_byte(COMPONENT_OPAQUE);
            encoder.write_string(name);
        }
    }
    write_artifact_name(encoder, &artifact.name);
}

fn read_artifact_identifier(decoder: &mut Decoder<'_>) -> Result<ArtifactIdentifier, ResolveError> {
    let component = match decoder.read_byte()? {
        COMPONENT_MODULE => ComponentIdentifier::Module(read_component_id(decoder)?),
        COMPONENT_PROJECT => ComponentIdentifier::Project {
            build: decoder.read_string()?,
            path: decoder.read_string()?,
        },
        COMPONENT_OPAQUE => ComponentIdentifier::Opaque(decoder.read_string()?),
        other => {
            return Err(ResolveError::Decode {
                what: "artifact identifier".to_string(),
                reason: format!("unknown component kind {other}"),
            });
        }
    };
    Ok(ArtifactIdentifier {
        component,
        name: read_artifact_name(decoder)?,
    })
}

#[derive(Debug, Clone, Copy, Default)]
struct ArtifactAtRepositoryKeyCodec;

impl Codec<ArtifactAtRepositoryKey> for ArtifactAtRepositoryKeyCodec {
    fn encode(&self, key: &ArtifactAtRepositoryKey, encoder: &mut Encoder) {
        encoder.write_string(&key.repository_id);
        write_artifact_identifier(encoder, &key.artifact);
    }

    fn decode(&self, decoder: &mut Decoder<'_>) -> Result<ArtifactAtRepositoryKey, ResolveError> {
        Ok(ArtifactAtRepositoryKey {
            repository_id: decoder.read_string()?,
            artifact: read_artifact_identifier(decoder)?,
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct CachedArtifactFileCodec;

impl Codec<CachedArtifactFile> for CachedArtifactFileCodec {
    fn encode(&self, value: &CachedArtifactFile, encoder: &mut Encoder) {
        match &value.outcome {
            ArtifactFileOutcome::Found(path) => {
                encoder.write_bool(true);
                encoder.write_string(&path.to_string_lossy());
            }
            ArtifactFileOutcome::Missing {
                attempted,
            } => {
                encoder.write_bool(false);
                encoder.write_small_int(attempted.len());
                for location in attempted {
                    encoder.write_string(location);
                }
            }
        }
        write_descriptor_hash(encoder, &value.descriptor_hash);
        encoder.write_i64(value.create_timestamp);
    }

    fn decode(&self, decoder: &mut Decoder<'_>) -> Result<CachedArtifactFile, ResolveError> {
        let outcome = if decoder.read_bool()? {
            ArtifactFileOutcome::Found(PathBuf::from(decoder.read_string()?))
        } else {
            let count = decoder.read_small_int()?;
            ArtifactFileOutcome::Missing {
                attempted: (0..count).map(|_| decoder.read_string()).collect::<Result<_, _>>()?,
            }
        };
        Ok(CachedArtifactFile {
            outcome,
            descriptor_hash: read_descriptor_hash(decoder)?,
            create_timestamp: decoder.read_i64()?,
        })
    }
}

/// Two-tier cache of artifact files and missing-artifact answers.
pub struct ModuleArtifactCache {
    index: PersistentIndexedCache<ArtifactAtRepositoryKey, CachedArtifactFile>,
    shared: Option<Arc<DashMap<ArtifactIdentifier, CachedArtifactFile>>>,
    clock: Arc<dyn Clock>,
}

impl ModuleArtifactCache {
    /// Opens the repository-scoped store; `shared` is the optional shared tier.
    pub fn open(
        cache_root: &Path,
        shared: Option<Arc<DashMap<ArtifactIdentifier, CachedArtifactFile>>>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ResolveError> {
        Ok(Self {
            index: PersistentIndexedCache::open(
                cache_root,
                ARTIFACT_FILES_STORE,
                ArtifactAtRepositoryKeyCodec,
                CachedArtifactFileCodec,
            )?,
            shared,
            clock,
        })
    }

    /// The underlying index.
    pub fn index(&self) -> &PersistentIndexedCache<ArtifactAtRepositoryKey, CachedArtifactFile> {
        &self.index
    }

    /// Looks up an artifact for `repository_id`.
    ///
    /// Found entries whose file no longer exists are misses. A scoped entry recorded
    /// against a descriptor hash other than `current_hash` is unusable and defers to the
    /// shared tier, which only answers for a matching hash. The caller applies expiry to
    /// scoped hits.
    pub fn lookup(
        &self,
        repository_id: &str,
        artifact: &ArtifactIdentifier,
        current_hash: Option<DescriptorHash>,
    ) -> Option<ArtifactFileHit> {
        let key = ArtifactAtRepositoryKey {
            repository_id: repository_id.to_string(),
            artifact: artifact.clone(),
        };
        let usable = |file: &CachedArtifactFile| {
            current_hash.is_none_or(|hash| file.descriptor_hash == hash) && file_still_exists(file)
        };
        if let Some(file) = self.index.get(&key).filter(usable) {
            return Some(ArtifactFileHit {
                age: self.clock.age_of(file.create_timestamp),
                file,
                shared: false,
            });
        }

        let shared = self.shared.as_ref()?;
        let file = shared.get(artifact).map(|entry| entry.value().clone())?;
        if Some(file.descriptor_hash) != current_hash || !file_still_exists(&file) {
            return None;
        }
        debug!("Using {} from the shared artifact cache", artifact);
        Some(ArtifactFileHit {
            age: self.clock.age_of(file.create_timestamp),
            file,
            shared: true,
        })
    }

    /// Records an outcome for `repository_id`; found files also enter the shared tier.
    pub fn store(
        &self,
        repository_id: &str,
        artifact: &ArtifactIdentifier,
        outcome: ArtifactFileOutcome,
        descriptor_hash: DescriptorHash,
    ) -> Result<CachedArtifactFile, ResolveError> {
        let file = CachedArtifactFile {
            outcome,
            descriptor_hash,
            create_timestamp: self.clock.now_millis(),
        };
        if let Some(shared) = &self.shared
            && !file.is_missing()
        {
            shared.insert(artifact.clone(), file.clone());
        }
        self.index.put(
            ArtifactAtRepositoryKey {
                repository_id: repository_id.to_string(),
                artifact: artifact.clone(),
            },
            file.clone(),
        )?;
        Ok(file)
    }
}

fn file_still_exists(file: &CachedArtifactFile) -> bool {
    match &file.outcome {
        ArtifactFileOutcome::Found(path) => path.is_file(),
        ArtifactFileOutcome::Missing {
            ..
        } => true,
    }
}
