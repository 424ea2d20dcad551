//! Repository abstraction and the caching decorator in front of it.
//!
//! [`ModuleComponentRepository`] is what a transport-specific repository (HTTP,
//! file, ...) implements. [`CachingModuleRepository`] wraps one and routes every
//! request through the metadata cache, the artifact listing cache and the artifact
//! file cache, consulting the [`CachePolicy`] to decide when a cached answer must be
//! re-checked.
//!
//! # Metadata flow
//!
//! ```text
//! metadata cache ──hit, not expired──▶ answer (authoritative when age is zero)
//!        │
//!        └─miss or expired──▶ delegate ──▶ put_present / put_missing ──▶ answer
//! ```
//!
//! Missing modules are answers, not errors. Failures of the delegate propagate and
//! are never cached.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

use super::artifact_files::{ArtifactFileOutcome, ModuleArtifactCache};
use super::artifacts::ModuleArtifactsCache;
use super::metadata::{CachedMetadata, ModuleMetadataCache};
use super::policy::CachePolicy;
use crate::core::ResolveError;
use crate::models::{
    ArtifactIdentifier, ComponentKey, DescriptorHash, ModuleComponentIdentifier, ModuleDescriptor,
    ModuleSources,
};

/// Collects the outcome of resolving one artifact file.
///
/// Repositories record every location they search and then settle the result exactly
/// once with [`resolved`](Self::resolved), [`not_found`](Self::not_found) or
/// [`failed`](Self::failed).
#[derive(Debug, Default)]
pub struct ArtifactResolveResult {
    attempted: Vec<String>,
    outcome: Option<Result<PathBuf, ResolveError>>,
}

impl ArtifactResolveResult {
    /// An unsettled result.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a searched location.
    pub fn attempted(&mut self, location: impl Into<String>) {
        self.attempted.push(location.into());
    }

    /// The artifact is available at `file`.
    pub fn resolved(&mut self, file: PathBuf) {
        self.outcome = Some(Ok(file));
    }

    /// The artifact does not exist at any searched location.
    pub fn not_found(&mut self, artifact: &ArtifactIdentifier) {
        self.outcome = Some(Err(ResolveError::ArtifactNotFound {
            artifact: artifact.to_string(),
            attempted: self.attempted.clone(),
        }));
    }

    /// Resolution failed for another reason.
    pub fn failed(&mut self, error: ResolveError) {
        self.outcome = Some(Err(error));
    }

    /// Whether the result has been settled.
    pub fn has_result(&self) -> bool {
        self.outcome.is_some()
    }

    /// Locations searched so far.
    pub fn attempted_locations(&self) -> &[String] {
        &self.attempted
    }

    /// The settled outcome, if any.
    pub fn outcome(&self) -> Option<&Result<PathBuf, ResolveError>> {
        self.outcome.as_ref()
    }

    /// The file, or the failure. An unsettled result is a contract violation.
    pub fn into_file(self, artifact: &ArtifactIdentifier) -> Result<PathBuf, ResolveError> {
        self.outcome.unwrap_or_else(|| {
            Err(ResolveError::illegal_state(format!(
                "repository returned no result for {artifact}"
            )))
        })
    }
}

/// A repository that can serve module descriptors and artifact files.
///
/// Implementations are called from worker threads and must be thread-safe.
pub trait ModuleComponentRepository: Send + Sync {
    /// Identifier of the repository; part of every cache key.
    fn id(&self) -> &str;

    /// Fetches the descriptor of `id`. `Ok(None)` means the repository does not have it.
    fn resolve_component_metadata(
        &self,
        id: &ModuleComponentIdentifier,
    ) -> Result<Option<(ModuleDescriptor, ModuleSources)>, ResolveError>;

    /// Lists the artifacts of the given type published by a module.
    ///
    /// The default lists every published artifact of that type.
    fn resolve_artifacts_with_type(
        &self,
        descriptor: &ModuleDescriptor,
        artifact_type: &str,
    ) -> Result<Vec<ArtifactIdentifier>, ResolveError> {
        let mut artifacts: Vec<ArtifactIdentifier> = Vec::new();
        for artifact in &descriptor.artifacts {
            if artifact.name.artifact_type == artifact_type {
                let id = ArtifactIdentifier::new(descriptor.id.clone(), artifact.name.clone());
                if !artifacts.contains(&id) {
                    artifacts.push(id);
                }
            }
        }
        Ok(artifacts)
    }

    /// Locates the file of `artifact`, settling `result`.
    fn resolve_artifact(
        &self,
        artifact: &ArtifactIdentifier,
        sources: &ModuleSources,
        result: &mut ArtifactResolveResult,
    );
}

/// Transforms descriptors after they are read ("component metadata rules").
pub trait MetadataProcessor: Send + Sync {
    /// Identifies the rule set. `None` when no rules apply.
    fn rules_hash(&self) -> Option<String>;

    /// Applies the rules.
    fn process(&self, descriptor: &ModuleDescriptor) -> ModuleDescriptor;
}

/// Applies no rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityMetadataProcessor;

impl MetadataProcessor for IdentityMetadataProcessor {
    fn rules_hash(&self) -> Option<String> {
        None
    }

    fn process(&self, descriptor: &ModuleDescriptor) -> ModuleDescriptor {
        descriptor.clone()
    }
}

/// Resolved metadata of one component in one repository.
#[derive(Debug, Clone)]
pub struct ResolvedComponentMetadata {
    /// Repository that served it
    pub repository_id: String,
    /// The descriptor after metadata rules
    pub descriptor: Arc<ModuleDescriptor>,
    /// Sources attached to the metadata
    pub sources: ModuleSources,
    /// Hash of the descriptor as served
    pub descriptor_hash: DescriptorHash,
    /// Whether the module may change without a version change
    pub changing: bool,
}

impl ResolvedComponentMetadata {
    /// Component coordinates.
    pub fn id(&self) -> &ModuleComponentIdentifier {
        &self.descriptor.id
    }
}

/// Answer of [`CachingModuleRepository::resolve_component_metadata`].
#[derive(Debug, Clone)]
pub enum ComponentMetadataResult {
    /// The repository has the module.
    Resolved {
        /// The metadata
        metadata: ResolvedComponentMetadata,
        /// Whether the answer was fetched from the repository during this call
        authoritative: bool,
    },
    /// The repository does not have the module.
    Missing {
        /// Whether the answer was fetched from the repository during this call
        authoritative: bool,
    },
}

impl ComponentMetadataResult {
    /// The metadata, when resolved.
    pub fn metadata(&self) -> Option<&ResolvedComponentMetadata> {
        match self {
            Self::Resolved {
                metadata,
                ..
            } => Some(metadata),
            Self::Missing {
                ..
            } => None,
        }
    }

    /// Whether the answer was fetched during this call.
    pub fn is_authoritative(&self) -> bool {
        match self {
            Self::Resolved {
                authoritative,
                ..
            }
            | Self::Missing {
                authoritative,
            } => *authoritative,
        }
    }
}

/// A [`ModuleComponentRepository`] seen through the resolution caches.
pub struct CachingModuleRepository {
    delegate: Arc<dyn ModuleComponentRepository>,
    metadata_cache: Arc<dyn ModuleMetadataCache>,
    artifacts_cache: Arc<dyn ModuleArtifactsCache>,
    artifact_files: Arc<ModuleArtifactCache>,
    policy: CachePolicy,
    processor: Arc<dyn MetadataProcessor>,
}

impl CachingModuleRepository {
    /// Wraps `delegate` with the given caches and policy and no metadata rules.
    pub fn new(
        delegate: Arc<dyn ModuleComponentRepository>,
        metadata_cache: Arc<dyn ModuleMetadataCache>,
        artifacts_cache: Arc<dyn ModuleArtifactsCache>,
        artifact_files: Arc<ModuleArtifactCache>,
        policy: CachePolicy,
    ) -> Self {
        Self {
            delegate,
            metadata_cache,
            artifacts_cache,
            artifact_files,
            policy,
            processor: Arc::new(IdentityMetadataProcessor),
        }
    }

    /// Same repository with metadata rules.
    #[must_use]
    pub fn with_processor(mut self, processor: Arc<dyn MetadataProcessor>) -> Self {
        self.processor = processor;
        self
    }

    /// Identifier of the wrapped repository.
    pub fn id(&self) -> &str {
        self.delegate.id()
    }

    fn key(&self, id: &ModuleComponentIdentifier) -> ComponentKey {
        ComponentKey::new(self.delegate.id(), id.clone())
    }

    /// Resolves the metadata of `id`, from cache when the policy allows.
    pub fn resolve_component_metadata(
        &self,
        id: &ModuleComponentIdentifier,
    ) -> Result<ComponentMetadataResult, ResolveError> {
        let key = self.key(id);

        if let Some(cached) = self.metadata_cache.get(&key)? {
            if let Some(result) = self.use_cached_metadata(&key, &cached) {
                return Ok(result);
            }
        } else {
            debug!("No cached metadata for {}", key);
        }

        match self.delegate.resolve_component_metadata(id)? {
            None => {
                self.metadata_cache.put_missing(&key)?;
                debug!("Module {} not found, recorded as missing", key);
                Ok(ComponentMetadataResult::Missing {
                    authoritative: true,
                })
            }
            Some((descriptor, sources)) => {
                let cached = self.metadata_cache.put_present(&key, &descriptor, &sources)?;
                let metadata = self.resolved_metadata(&cached)?;
                Ok(ComponentMetadataResult::Resolved {
                    metadata,
                    authoritative: true,
                })
            }
        }
    }

    fn use_cached_metadata(
        &self,
        key: &ComponentKey,
        cached: &CachedMetadata,
    ) -> Option<ComponentMetadataResult> {
        let age = cached.age();
        let authoritative = age == Duration::ZERO;

        if cached.is_missing() {
            if self.policy.missing_module_expiry(age).must_check {
                debug!("Cached missing module {} expired (age {:?})", key, age);
                return None;
            }
            debug!("Using cached missing module {}", key);
            return Some(ComponentMetadataResult::Missing {
                authoritative,
            });
        }

        let expiry = if cached.is_changing() {
            self.policy.changing_module_expiry(age)
        } else {
            self.policy.module_expiry(age)
        };
        if expiry.must_check {
            debug!("Cached metadata for {} expired (age {:?})", key, age);
            return None;
        }

        match self.resolved_metadata(cached) {
            Ok(metadata) => {
                debug!("Using cached metadata for {}", key);
                Some(ComponentMetadataResult::Resolved {
                    metadata,
                    authoritative,
                })
            }
            Err(e) => {
                warn!("Ignoring unusable cached metadata for {}: {}", key, e);
                None
            }
        }
    }

    fn resolved_metadata(&self, cached: &CachedMetadata) -> Result<ResolvedComponentMetadata, ResolveError> {
        let (Some(raw), Some(descriptor_hash)) = (cached.descriptor(), cached.descriptor_hash()) else {
            return Err(ResolveError::illegal_state("present metadata without a descriptor"));
        };

        let descriptor = match self.processor.rules_hash() {
            None => raw.clone(),
            Some(rules) => match cached.processed_metadata(&rules) {
                Some(processed) => processed,
                None => {
                    let processed = Arc::new(self.processor.process(raw));
                    cached.set_processed_metadata(&rules, processed.clone());
                    processed
                }
            },
        };

        Ok(ResolvedComponentMetadata {
            repository_id: self.delegate.id().to_string(),
            changing: cached.is_changing(),
            sources: cached.module_sources(),
            descriptor_hash,
            descriptor,
        })
    }

    /// Lists the artifacts of `artifact_type` for resolved metadata, from the listing
    /// cache when its descriptor hash still matches.
    pub fn resolve_artifacts_with_type(
        &self,
        metadata: &ResolvedComponentMetadata,
        artifact_type: &str,
    ) -> Result<Vec<ArtifactIdentifier>, ResolveError> {
        let context = format!("artifacts:{artifact_type}");
        let repository_id = self.delegate.id();

        if let Some(cached) =
            self.artifacts_cache.get_cached_artifacts(repository_id, metadata.id(), &context)?
        {
            let hash_matches = cached.descriptor_hash == metadata.descriptor_hash;
            let expiry =
                self.policy.module_artifacts_expiry(cached.age, metadata.changing, hash_matches);
            if !expiry.must_check {
                debug!("Using cached {} listing for {}", context, metadata.id());
                return Ok(cached.artifacts);
            }
            debug!(
                "Cached {} listing for {} is stale (hash matches: {})",
                context,
                metadata.id(),
                hash_matches
            );
        }

        let artifacts = self.delegate.resolve_artifacts_with_type(&metadata.descriptor, artifact_type)?;
        self.artifacts_cache.cache_artifacts(
            repository_id,
            metadata.id(),
            &context,
            metadata.descriptor_hash,
            &artifacts,
        )?;
        Ok(artifacts)
    }

    /// Locates the file of `artifact`, from the artifact file cache when possible.
    ///
    /// Without a descriptor hash among `sources` nothing is cached.
    pub fn resolve_artifact(
        &self,
        artifact: &ArtifactIdentifier,
        sources: &ModuleSources,
        result: &mut ArtifactResolveResult,
    ) {
        let repository_id = self.delegate.id();
        let Some((hash, changing)) = sources.descriptor_hash() else {
            self.delegate.resolve_artifact(artifact, sources, result);
            return;
        };

        if let Some(hit) = self.artifact_files.lookup(repository_id, artifact, Some(hash)) {
            let expiry = self.policy.artifact_expiry(
                hit.age,
                changing,
                hit.file.descriptor_hash == hash,
                hit.file.is_missing(),
            );
            if !expiry.must_check {
                trace!("Using cached outcome for {}", artifact);
                match hit.file.outcome {
                    ArtifactFileOutcome::Found(path) => result.resolved(path),
                    ArtifactFileOutcome::Missing {
                        attempted,
                    } => {
                        for location in attempted {
                            result.attempted(location);
                        }
                        result.not_found(artifact);
                    }
                }
                return;
            }
        }

        self.delegate.resolve_artifact(artifact, sources, result);

        let outcome = match result.outcome() {
            Some(Ok(path)) => ArtifactFileOutcome::Found(path.clone()),
            Some(Err(e)) if e.is_not_found() => ArtifactFileOutcome::Missing {
                attempted: result.attempted_locations().to_vec(),
            },
            _ => return,
        };
        if let Err(e) = self.artifact_files.store(repository_id, artifact, outcome, hash) {
            warn!("Failed to cache outcome for {}: {}", artifact, e);
        }
    }

    /// Resolves an artifact file, turning the result sink into a `Result`.
    pub fn artifact_file(
        &self,
        artifact: &ArtifactIdentifier,
        sources: &ModuleSources,
    ) -> Result<PathBuf, ResolveError> {
        let mut result = ArtifactResolveResult::new();
        self.resolve_artifact(artifact, sources, &mut result);
        result.into_file(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::artifacts::PersistentModuleArtifactsCache;
    use crate::cache::metadata::{InMemoryModuleMetadataCache, PersistentModuleMetadataCache};
    use crate::models::{ArtifactName, ConfigurationArtifact};
    use crate::test_utils::{FakeRepository, ManualClock};
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        clock: Arc<ManualClock>,
        repository: Arc<FakeRepository>,
        caching: CachingModuleRepository,
    }

    fn id() -> ModuleComponentIdentifier {
        ModuleComponentIdentifier::new("com.x", "y", "1.0")
    }

    fn descriptor() -> ModuleDescriptor {
        let mut descriptor = ModuleDescriptor::new(id());
        descriptor.artifacts.push(ConfigurationArtifact {
            name: ArtifactName::jar("y"),
            configurations: vec!["default".to_string()],
        });
        descriptor
    }

    fn fixture(policy: CachePolicy) -> Fixture {
        let temp = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(1_000_000));
        let repository = Arc::new(FakeRepository::new("R1", temp.path().join("repo")));
        let persistent =
            Arc::new(PersistentModuleMetadataCache::open(temp.path(), clock.clone()).unwrap());
        let caching = CachingModuleRepository::new(
            repository.clone(),
            Arc::new(InMemoryModuleMetadataCache::new(persistent, clock.clone())),
            Arc::new(PersistentModuleArtifactsCache::open(temp.path(), clock.clone()).unwrap()),
            Arc::new(ModuleArtifactCache::open(temp.path(), None, clock.clone()).unwrap()),
            policy,
        );
        Fixture {
            _temp: temp,
            clock,
            repository,
            caching,
        }
    }

    #[test]
    fn test_metadata_is_fetched_once() {
        let f = fixture(CachePolicy::default());
        f.repository.publish(descriptor());

        let first = f.caching.resolve_component_metadata(&id()).unwrap();
        assert!(first.is_authoritative());
        f.clock.advance(Duration::from_secs(1));
        let second = f.caching.resolve_component_metadata(&id()).unwrap();
        assert!(!second.is_authoritative());

        assert_eq!(f.repository.metadata_requests(), 1);
        assert_eq!(second.metadata().unwrap().descriptor.as_ref(), &descriptor());
    }

    #[test]
    fn test_missing_module_is_cached_until_ttl() {
        let f = fixture(CachePolicy::default());
        assert!(f.caching.resolve_component_metadata(&id()).unwrap().metadata().is_none());
        f.clock.advance(Duration::from_secs(60));
        assert!(f.caching.resolve_component_metadata(&id()).unwrap().metadata().is_none());
        assert_eq!(f.repository.metadata_requests(), 1);

        f.repository.publish(descriptor());
        f.clock.advance(Duration::from_secs(25 * 3600));
        assert!(f.caching.resolve_component_metadata(&id()).unwrap().metadata().is_some());
        assert_eq!(f.repository.metadata_requests(), 2);
    }

    #[test]
    fn test_artifact_listing_refetched_after_descriptor_change() {
        let f = fixture(CachePolicy::default());
        f.repository.publish(descriptor());
        let metadata = f.caching.resolve_component_metadata(&id()).unwrap().metadata().cloned().unwrap();

        let listed = f.caching.resolve_artifacts_with_type(&metadata, "jar").unwrap();
        assert_eq!(listed.len(), 1);
        f.caching.resolve_artifacts_with_type(&metadata, "jar").unwrap();
        assert_eq!(f.repository.listing_requests(), 1);

        let mut republished = metadata.clone();
        republished.descriptor_hash = DescriptorHash::of_bytes(b"republished");
        f.caching.resolve_artifacts_with_type(&republished, "jar").unwrap();
        assert_eq!(f.repository.listing_requests(), 2);
    }

    #[test]
    fn test_missing_artifact_keeps_attempted_locations() {
        let f = fixture(CachePolicy::default());
        f.repository.publish(descriptor());
        let metadata = f.caching.resolve_component_metadata(&id()).unwrap().metadata().cloned().unwrap();
        let artifact = ArtifactIdentifier::new(id(), ArtifactName::jar("y"));

        let error = f.caching.artifact_file(&artifact, &metadata.sources).unwrap_err();
        let cached_error = f.caching.artifact_file(&artifact, &metadata.sources).unwrap_err();

        assert_eq!(f.repository.artifact_requests(), 1);
        match (error, cached_error) {
            (
                ResolveError::ArtifactNotFound {
                    attempted: first,
                    ..
                },
                ResolveError::ArtifactNotFound {
                    attempted: second,
                    ..
                },
            ) => {
                assert!(!first.is_empty());
                assert_eq!(first, second);
            }
            other => panic!("unexpected errors: {other:?}"),
        }
    }

    #[test]
    fn test_found_artifact_is_cached() {
        let f = fixture(CachePolicy::default());
        f.repository.publish(descriptor());
        let artifact = ArtifactIdentifier::new(id(), ArtifactName::jar("y"));
        f.repository.publish_file(&artifact, b"jar bytes");
        let metadata = f.caching.resolve_component_metadata(&id()).unwrap().metadata().cloned().unwrap();

        let path = f.caching.artifact_file(&artifact, &metadata.sources).unwrap();
        assert_eq!(f.caching.artifact_file(&artifact, &metadata.sources).unwrap(), path);
        assert_eq!(f.repository.artifact_requests(), 1);
    }
}
