//! Artifact, visitor and variant-source fakes.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::artifacts::{ArtifactVisitor, FileCollection, ResolvableArtifact, ResolvedArtifactSet, VariantInfo, VisitAction};
use crate::core::ResolveError;
use crate::models::{ArtifactIdentifier, ArtifactName, AttributeMap, ComponentIdentifier, ModuleComponentIdentifier};
use crate::variants::{AttributeSchema, ComponentVariantSource, DefaultAttributeSchema, ResolvedVariant};

/// One callback received by a [`RecordingVisitor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VisitEvent {
    /// An artifact, by base name
    Artifact(String),
    /// A failure, by message
    Failure(String),
    /// A file collection visited as a whole, by display name
    Spec(String),
}

/// Records every visitor callback in order.
#[derive(Debug, Default)]
pub struct RecordingVisitor {
    events: Vec<VisitEvent>,
    require_files: bool,
    collection_action: VisitAction,
}

impl RecordingVisitor {
    /// A visitor that does not need files.
    pub fn new() -> Self {
        Self::default()
    }

    /// A visitor that needs every file resolved before it sees the artifact.
    pub fn requiring_files() -> Self {
        Self {
            require_files: true,
            ..Self::default()
        }
    }

    /// Answers `action` to every dynamic file collection.
    #[must_use]
    pub fn with_collection_action(mut self, action: VisitAction) -> Self {
        self.collection_action = action;
        self
    }

    /// Every event, in order.
    pub fn events(&self) -> &[VisitEvent] {
        &self.events
    }

    /// Base names of the visited artifacts, in order.
    pub fn artifact_names(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|e| match e {
                VisitEvent::Artifact(name) => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    /// Messages of the visited failures, in order.
    pub fn failures(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|e| match e {
                VisitEvent::Failure(message) => Some(message.clone()),
                _ => None,
            })
            .collect()
    }
}

impl ArtifactVisitor for RecordingVisitor {
    fn visit_artifact(&mut self, artifact: &ResolvableArtifact) {
        self.events.push(VisitEvent::Artifact(artifact.id().name.name.clone()));
    }

    fn visit_failure(&mut self, failure: &ResolveError) {
        self.events.push(VisitEvent::Failure(failure.to_string()));
    }

    fn require_artifact_files(&self) -> bool {
        self.require_files
    }

    fn prepare_for_visit(&mut self, _collection: &dyn FileCollection) -> VisitAction {
        self.collection_action
    }

    fn visit_spec(&mut self, collection: &dyn FileCollection) {
        self.events.push(VisitEvent::Spec(collection.display_name()));
    }
}

fn test_id(name: &str) -> ArtifactIdentifier {
    ArtifactIdentifier::new(ModuleComponentIdentifier::new("org", name, "1.0"), ArtifactName::jar(name))
}

fn test_variant(name: &str) -> Arc<VariantInfo> {
    Arc::new(VariantInfo::new(format!("org:{name}:1.0 variant runtime"), AttributeMap::empty()))
}

/// An artifact of `org:{name}:1.0` whose file resolves to `/repo/{name}.jar`.
pub fn artifact(name: &str) -> ResolvableArtifact {
    let path = PathBuf::from(format!("/repo/{name}.jar"));
    artifact_with_resolver(name, move || Ok(path.clone()))
}

/// An artifact whose file resolution fails with `reason`.
pub fn failing_artifact(name: &str, reason: &str) -> ResolvableArtifact {
    let id = test_id(name);
    let failure = ResolveError::ArtifactResolutionFailed {
        artifact: id.to_string(),
        reason: reason.to_string(),
    };
    ResolvableArtifact::new(id, test_variant(name), Arc::new(move || Err(failure.clone())))
}

/// An artifact whose file resolution blocks the calling thread for `delay`.
pub fn delayed_artifact(name: &str, delay: Duration) -> ResolvableArtifact {
    let path = PathBuf::from(format!("/repo/{name}.jar"));
    artifact_with_resolver(name, move || {
        std::thread::sleep(delay);
        Ok(path.clone())
    })
}

/// An artifact of `org:{name}:1.0` resolved by `resolver`.
pub fn artifact_with_resolver(
    name: &str,
    resolver: impl Fn() -> Result<PathBuf, ResolveError> + Send + Sync + 'static,
) -> ResolvableArtifact {
    ResolvableArtifact::new(test_id(name), test_variant(name), Arc::new(resolver))
}

/// A component with a fixed list of variants, each made of `jar` artifacts.
///
/// `resolutions` counts calls to `resolve_variants`.
pub struct StaticVariantSource {
    component: ComponentIdentifier,
    variants: Vec<(String, AttributeMap, Vec<String>)>,
    schema: Arc<dyn AttributeSchema>,
    /// Number of times the variants were built
    pub resolutions: AtomicUsize,
}

impl StaticVariantSource {
    /// A component with no variants.
    pub fn new(component: ModuleComponentIdentifier) -> Self {
        Self {
            component: component.into(),
            variants: Vec::new(),
            schema: Arc::new(DefaultAttributeSchema::new()),
            resolutions: AtomicUsize::new(0),
        }
    }

    /// Adds a variant with the given attributes and artifact base names.
    #[must_use]
    pub fn variant(mut self, name: &str, attributes: &[(&str, &str)], artifacts: &[&str]) -> Self {
        self.variants.push((
            name.to_string(),
            AttributeMap::of(attributes.iter().copied()),
            artifacts.iter().map(|a| (*a).to_string()).collect(),
        ));
        self
    }

    /// Same source with another schema.
    #[must_use]
    pub fn with_schema(mut self, schema: Arc<dyn AttributeSchema>) -> Self {
        self.schema = schema;
        self
    }

    fn file_artifact(&self, variant: &Arc<VariantInfo>, name: ArtifactName) -> ResolvableArtifact {
        let path = PathBuf::from(format!("/repo/{}.jar", name.name));
        let id = ArtifactIdentifier::new(self.component.clone(), name);
        ResolvableArtifact::new(id, variant.clone(), Arc::new(move || Ok(path.clone())))
    }
}

impl ComponentVariantSource for StaticVariantSource {
    fn component(&self) -> &ComponentIdentifier {
        &self.component
    }

    fn schema(&self) -> Arc<dyn AttributeSchema> {
        self.schema.clone()
    }

    fn resolve_variants(&self) -> Result<Vec<ResolvedVariant>, ResolveError> {
        self.resolutions.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .variants
            .iter()
            .map(|(name, attributes, artifacts)| {
                let info = Arc::new(VariantInfo::new(format!("{} variant {name}", self.component), attributes.clone()));
                let set = ResolvedArtifactSet::of(
                    artifacts
                        .iter()
                        .map(|a| ResolvedArtifactSet::single(self.file_artifact(&info, ArtifactName::jar(a.as_str())))),
                );
                ResolvedVariant::from_info(name.clone(), info, set)
            })
            .collect())
    }

    fn adhoc_artifact(&self, variant: &Arc<VariantInfo>, name: &ArtifactName) -> ResolvableArtifact {
        self.file_artifact(variant, name.clone())
    }
}
