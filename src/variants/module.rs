//! Variants of repository modules, resolved through the caching repository.

use std::sync::Arc;

use dashmap::DashMap;

use super::composition::{ComposableVariant, VariantCatalog, VariantComposer};
use super::resolving::{ComponentVariantSource, ComponentVariants};
use super::schema::AttributeSchema;
use super::variant::ResolvedVariant;
use crate::artifacts::{ResolvableArtifact, ResolvedArtifactSet, VariantInfo};
use crate::cache::repository::{CachingModuleRepository, ComponentMetadataResult, ResolvedComponentMetadata};
use crate::core::ResolveError;
use crate::models::{
    ArtifactIdentifier, ArtifactName, ComponentIdentifier, ModuleComponentIdentifier, VariantDescriptor,
    VariantReference,
};

fn resolve_metadata(
    repository: &CachingModuleRepository,
    id: &ModuleComponentIdentifier,
) -> Result<ResolvedComponentMetadata, ResolveError> {
    match repository.resolve_component_metadata(id)? {
        ComponentMetadataResult::Resolved {
            metadata,
            ..
        } => Ok(metadata),
        ComponentMetadataResult::Missing {
            ..
        } => Err(ResolveError::ModuleResolutionFailed {
            component: id.to_string(),
            repository: repository.id().to_string(),
            reason: "module not found".to_string(),
        }),
    }
}

fn variant_info(metadata: &ResolvedComponentMetadata, variant: &VariantDescriptor) -> Arc<VariantInfo> {
    let capabilities = if variant.capabilities.is_empty() {
        vec![metadata.descriptor.default_capability()]
    } else {
        variant.capabilities.clone()
    };
    Arc::new(VariantInfo {
        display_name: format!("{} variant {}", metadata.id(), variant.name),
        attributes: variant.attributes.clone(),
        capabilities,
    })
}

fn module_artifact(
    repository: &Arc<CachingModuleRepository>,
    metadata: &ResolvedComponentMetadata,
    info: &Arc<VariantInfo>,
    name: &ArtifactName,
) -> ResolvableArtifact {
    let id = ArtifactIdentifier::new(metadata.id().clone(), name.clone());
    let repository = repository.clone();
    let sources = metadata.sources.clone();
    let target = id.clone();
    ResolvableArtifact::new(id, info.clone(), Arc::new(move || repository.artifact_file(&target, &sources)))
}

fn own_artifacts(
    repository: &Arc<CachingModuleRepository>,
    metadata: &ResolvedComponentMetadata,
    info: &Arc<VariantInfo>,
    files: &[ArtifactName],
) -> ResolvedArtifactSet {
    ResolvedArtifactSet::of(
        files.iter().map(|name| ResolvedArtifactSet::single(module_artifact(repository, metadata, info, name))),
    )
}

/// Looks up module variants for composition.
struct ModuleCatalog<'a> {
    repository: &'a Arc<CachingModuleRepository>,
}

impl VariantCatalog for ModuleCatalog<'_> {
    fn lookup(&self, reference: &VariantReference) -> Result<ComposableVariant, ResolveError> {
        let metadata = resolve_metadata(self.repository, &reference.component)?;
        let variant = metadata
            .descriptor
            .effective_variants()
            .into_iter()
            .find(|v| v.name == reference.variant)
            .ok_or_else(|| ResolveError::VariantNotFound {
                component: reference.component.to_string(),
                variant: reference.variant.clone(),
            })?;
        let info = variant_info(&metadata, &variant);
        Ok(ComposableVariant {
            artifacts: own_artifacts(self.repository, &metadata, &info, &variant.files),
            info,
            includes: variant.includes,
        })
    }
}

/// The variants of one module, built from its cached descriptor.
pub struct ModuleVariantSource {
    id: ModuleComponentIdentifier,
    component: ComponentIdentifier,
    repository: Arc<CachingModuleRepository>,
    schema: Arc<dyn AttributeSchema>,
}

impl ModuleVariantSource {
    /// Variants of `id` served by `repository`.
    pub fn new(
        id: ModuleComponentIdentifier,
        repository: Arc<CachingModuleRepository>,
        schema: Arc<dyn AttributeSchema>,
    ) -> Self {
        Self {
            component: id.clone().into(),
            id,
            repository,
            schema,
        }
    }
}

impl ComponentVariantSource for ModuleVariantSource {
    fn component(&self) -> &ComponentIdentifier {
        &self.component
    }

    fn schema(&self) -> Arc<dyn AttributeSchema> {
        self.schema.clone()
    }

    fn resolve_variants(&self) -> Result<Vec<ResolvedVariant>, ResolveError> {
        let metadata = resolve_metadata(&self.repository, &self.id)?;
        let catalog = ModuleCatalog {
            repository: &self.repository,
        };

        let mut variants = Vec::new();
        for variant in metadata.descriptor.effective_variants() {
            let info = variant_info(&metadata, &variant);
            let artifacts = if variant.includes.is_empty() {
                own_artifacts(&self.repository, &metadata, &info, &variant.files)
            } else {
                let root = VariantReference {
                    component: self.id.clone(),
                    variant: variant.name.clone(),
                };
                VariantComposer::new().compose(&catalog, &root)?
            };
            variants.push(ResolvedVariant::from_info(variant.name, info, artifacts));
        }
        Ok(variants)
    }

    fn adhoc_artifact(&self, variant: &Arc<VariantInfo>, name: &ArtifactName) -> ResolvableArtifact {
        let id = ArtifactIdentifier::new(self.id.clone(), name.clone());
        let repository = self.repository.clone();
        let module = self.id.clone();
        let target = id.clone();
        ResolvableArtifact::new(
            id,
            variant.clone(),
            Arc::new(move || {
                let metadata = resolve_metadata(&repository, &module)?;
                repository.artifact_file(&target, &metadata.sources)
            }),
        )
    }
}

/// Hands out one [`ComponentVariants`] per module so variants are resolved once per
/// component, whichever edge asks first.
pub struct ModuleVariantResolver {
    repository: Arc<CachingModuleRepository>,
    schema: Arc<dyn AttributeSchema>,
    components: DashMap<ModuleComponentIdentifier, Arc<ComponentVariants>>,
}

impl ModuleVariantResolver {
    /// Resolves module variants through `repository`, matching with `schema`.
    pub fn new(repository: Arc<CachingModuleRepository>, schema: Arc<dyn AttributeSchema>) -> Self {
        Self {
            repository,
            schema,
            components: DashMap::new(),
        }
    }

    /// The shared variants of `id`.
    pub fn component(&self, id: &ModuleComponentIdentifier) -> Arc<ComponentVariants> {
        self.components
            .entry(id.clone())
            .or_insert_with(|| {
                Arc::new(ComponentVariants::new(Arc::new(ModuleVariantSource::new(
                    id.clone(),
                    self.repository.clone(),
                    self.schema.clone(),
                ))))
            })
            .clone()
    }

    /// Number of components seen so far.
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Whether no component was requested yet.
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}
