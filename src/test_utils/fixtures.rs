//! Fake repository, clock and descriptor fixtures.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;

use crate::cache::Clock;
use crate::cache::repository::{ArtifactResolveResult, ModuleComponentRepository};
use crate::core::ResolveError;
use crate::models::{
    ArtifactIdentifier, ArtifactName, AttributeMap, Capability, ConfigurationArtifact, ModuleComponentIdentifier,
    ModuleDescriptor, ModuleSource, ModuleSources, VariantDescriptor, VariantReference,
};

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    /// A clock stopped at `now_millis`.
    pub fn new(now_millis: i64) -> Self {
        Self {
            now: AtomicI64::new(now_millis),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let millis = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        self.now.fetch_add(millis, Ordering::SeqCst);
    }

    /// Sets the clock.
    pub fn set(&self, now_millis: i64) {
        self.now.store(now_millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// A repository backed by a map of descriptors and a directory of files.
///
/// Files live at `root/group/module/version/file-name`. Every request is counted so
/// tests can assert what the caches let through.
pub struct FakeRepository {
    id: String,
    root: PathBuf,
    descriptors: DashMap<ModuleComponentIdentifier, ModuleDescriptor>,
    failure: Mutex<Option<String>>,
    metadata_requests: AtomicUsize,
    listing_requests: AtomicUsize,
    artifact_requests: AtomicUsize,
}

impl FakeRepository {
    /// An empty repository named `id` serving files from `root`.
    pub fn new(id: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            root: root.into(),
            descriptors: DashMap::new(),
            failure: Mutex::new(None),
            metadata_requests: AtomicUsize::new(0),
            listing_requests: AtomicUsize::new(0),
            artifact_requests: AtomicUsize::new(0),
        }
    }

    /// The directory files are served from.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Publishes (or republishes) a descriptor.
    pub fn publish(&self, descriptor: ModuleDescriptor) {
        self.descriptors.insert(descriptor.id.clone(), descriptor);
    }

    /// Removes a descriptor.
    pub fn unpublish(&self, id: &ModuleComponentIdentifier) {
        self.descriptors.remove(id);
    }

    /// Writes the file of `artifact` and returns its path.
    pub fn publish_file(&self, artifact: &ArtifactIdentifier, content: &[u8]) -> PathBuf {
        let path = self.location(artifact);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
        path
    }

    /// Makes every following request fail with `reason` until [`recover`](Self::recover).
    pub fn fail_with(&self, reason: impl Into<String>) {
        *self.failure.lock().unwrap() = Some(reason.into());
    }

    /// Stops failing.
    pub fn recover(&self) {
        *self.failure.lock().unwrap() = None;
    }

    /// Descriptor requests received.
    pub fn metadata_requests(&self) -> usize {
        self.metadata_requests.load(Ordering::SeqCst)
    }

    /// Artifact listing requests received.
    pub fn listing_requests(&self) -> usize {
        self.listing_requests.load(Ordering::SeqCst)
    }

    /// Artifact file requests received.
    pub fn artifact_requests(&self) -> usize {
        self.artifact_requests.load(Ordering::SeqCst)
    }

    fn location(&self, artifact: &ArtifactIdentifier) -> PathBuf {
        let dir = match artifact.component.as_module() {
            Some(id) => self.root.join(&id.group).join(&id.module).join(&id.version),
            None => self.root.join("local"),
        };
        dir.join(artifact.file_name())
    }

    fn injected_failure(&self) -> Option<String> {
        self.failure.lock().unwrap().clone()
    }
}

impl ModuleComponentRepository for FakeRepository {
    fn id(&self) -> &str {
        &self.id
    }

    fn resolve_component_metadata(
        &self,
        id: &ModuleComponentIdentifier,
    ) -> Result<Option<(ModuleDescriptor, ModuleSources)>, ResolveError> {
        self.metadata_requests.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = self.injected_failure() {
            return Err(ResolveError::ModuleResolutionFailed {
                component: id.to_string(),
                repository: self.id.clone(),
                reason,
            });
        }
        Ok(self.descriptors.get(id).map(|descriptor| {
            let sources = ModuleSources::new().with(ModuleSource::Repository {
                repository_id: self.id.clone(),
            });
            (descriptor.clone(), sources)
        }))
    }

    fn resolve_artifacts_with_type(
        &self,
        descriptor: &ModuleDescriptor,
        artifact_type: &str,
    ) -> Result<Vec<ArtifactIdentifier>, ResolveError> {
        self.listing_requests.fetch_add(1, Ordering::SeqCst);
        let mut artifacts = Vec::new();
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

    fn resolve_artifact(
        &self,
        artifact: &ArtifactIdentifier,
        _sources: &ModuleSources,
        result: &mut ArtifactResolveResult,
    ) {
        self.artifact_requests.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = self.injected_failure() {
            result.failed(ResolveError::ArtifactResolutionFailed {
                artifact: artifact.to_string(),
                reason,
            });
            return;
        }
        let location = self.location(artifact);
        result.attempted(location.display().to_string());
        if location.is_file() {
            result.resolved(location);
        } else {
            result.not_found(artifact);
        }
    }
}

/// Builds a [`ModuleDescriptor`].
///
/// ```rust,no_run
/// use depot::test_utils::DescriptorBuilder;
///
/// let descriptor = DescriptorBuilder::new("org", "lib", "1.0")
///     .variant("runtime", &[("usage", "runtime")], &["lib"])
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct DescriptorBuilder {
    descriptor: ModuleDescriptor,
}

impl DescriptorBuilder {
    /// A descriptor with no configurations, artifacts or variants.
    pub fn new(group: &str, module: &str, version: &str) -> Self {
        Self {
            descriptor: ModuleDescriptor::new(ModuleComponentIdentifier::new(group, module, version)),
        }
    }

    /// Adds a `jar` artifact published in `configurations`.
    #[must_use]
    pub fn artifact(mut self, name: &str, configurations: &[&str]) -> Self {
        self.descriptor.artifacts.push(ConfigurationArtifact {
            name: ArtifactName::jar(name),
            configurations: configurations.iter().map(|c| (*c).to_string()).collect(),
        });
        self
    }

    /// Adds a variant publishing `jar` files.
    #[must_use]
    pub fn variant(mut self, name: &str, attributes: &[(&str, &str)], files: &[&str]) -> Self {
        let mut variant = VariantDescriptor::new(name, AttributeMap::of(attributes.iter().copied()));
        variant.files = files.iter().map(|f| ArtifactName::jar(*f)).collect();
        self.descriptor.variants.push(variant);
        self
    }

    /// Makes the last variant include `variant` of `component`.
    #[must_use]
    pub fn including(mut self, component: ModuleComponentIdentifier, variant: &str) -> Self {
        if let Some(last) = self.descriptor.variants.last_mut() {
            last.includes.push(VariantReference {
                component,
                variant: variant.to_string(),
            });
        }
        self
    }

    /// Makes the last variant provide `capability`.
    #[must_use]
    pub fn providing(mut self, capability: Capability) -> Self {
        if let Some(last) = self.descriptor.variants.last_mut() {
            last.capabilities.push(capability);
        }
        self
    }

    /// Marks the module as changing.
    #[must_use]
    pub fn changing(mut self) -> Self {
        self.descriptor.changing = true;
        self
    }

    /// The descriptor.
    pub fn build(self) -> ModuleDescriptor {
        self.descriptor
    }
}
