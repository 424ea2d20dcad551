//! Per-edge artifact selection over a component's variants.
//!
//! A [`ComponentVariants`] resolves a component's variants once and shares them with
//! every dependency edge pointing at the component. A [`VariantResolvingArtifactSet`]
//! is the view of one such edge: which variants the graph picked, plus whatever the
//! dependency changes (forced attributes, explicit artifacts, exclusions).

use std::fmt;
use std::sync::{Arc, OnceLock};

use tracing::debug;

use super::schema::AttributeSchema;
use super::selector::VariantSelector;
use super::variant::{ResolvedVariant, ResolvedVariantSet};
use crate::artifacts::{ResolvableArtifact, ResolvedArtifactSet, VariantInfo};
use crate::core::ResolveError;
use crate::models::{ArtifactName, AttributeMap, ComponentIdentifier, DependencyDescriptor, ExcludeRule};

/// Supplies the variants of one component.
pub trait ComponentVariantSource: Send + Sync {
    /// The component.
    fn component(&self) -> &ComponentIdentifier;

    /// Matching rules for the component's attributes.
    fn schema(&self) -> Arc<dyn AttributeSchema>;

    /// Builds every variant. Potentially expensive; called at most once per component.
    fn resolve_variants(&self) -> Result<Vec<ResolvedVariant>, ResolveError>;

    /// An artifact explicitly requested by a dependency, attached to `variant`.
    fn adhoc_artifact(&self, variant: &Arc<VariantInfo>, name: &ArtifactName) -> ResolvableArtifact;
}

type VariantsResult = Result<Arc<[Arc<ResolvedVariant>]>, ResolveError>;

/// The variants of one component, resolved on first use.
pub struct ComponentVariants {
    source: Arc<dyn ComponentVariantSource>,
    variants: OnceLock<VariantsResult>,
}

impl ComponentVariants {
    /// Wraps `source`.
    pub fn new(source: Arc<dyn ComponentVariantSource>) -> Self {
        Self {
            source,
            variants: OnceLock::new(),
        }
    }

    /// The component.
    pub fn component(&self) -> &ComponentIdentifier {
        self.source.component()
    }

    /// The source.
    pub fn source(&self) -> &Arc<dyn ComponentVariantSource> {
        &self.source
    }

    /// Every variant; resolved once, later calls share the outcome.
    pub fn all_variants(&self) -> VariantsResult {
        self.variants
            .get_or_init(|| {
                debug!("Resolving variants of {}", self.source.component());
                self.source
                    .resolve_variants()
                    .map(|variants| variants.into_iter().map(Arc::new).collect())
            })
            .clone()
    }
}

impl fmt::Debug for ComponentVariants {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentVariants")
            .field("component", self.component())
            .field("resolved", &self.variants.get().is_some())
            .finish()
    }
}

/// How a selection should proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArtifactSelectionSpec {
    /// Reselect among all variants of the component instead of the ones the graph picked
    pub select_from_all_variants: bool,
}

impl ArtifactSelectionSpec {
    /// Select among the variants the graph picked.
    pub fn graph_variants() -> Self {
        Self {
            select_from_all_variants: false,
        }
    }

    /// Reselect among all variants.
    pub fn all_variants() -> Self {
        Self {
            select_from_all_variants: true,
        }
    }
}

/// The artifacts one dependency edge contributes for a component.
#[derive(Debug, Clone)]
pub struct VariantResolvingArtifactSet {
    component: Arc<ComponentVariants>,
    graph_variants: Vec<String>,
    dependency_attributes: AttributeMap,
    artifact_overrides: Vec<ArtifactName>,
    excludes: Vec<ExcludeRule>,
}

impl VariantResolvingArtifactSet {
    /// Edge to `component` on which the graph picked `graph_variants`.
    pub fn new(component: Arc<ComponentVariants>, graph_variants: Vec<String>) -> Self {
        Self {
            component,
            graph_variants,
            dependency_attributes: AttributeMap::empty(),
            artifact_overrides: Vec::new(),
            excludes: Vec::new(),
        }
    }

    /// Edge carrying the artifact overrides and exclusions of `dependency`.
    pub fn for_dependency(
        component: Arc<ComponentVariants>,
        graph_variants: Vec<String>,
        dependency: &DependencyDescriptor,
    ) -> Self {
        Self::new(component, graph_variants)
            .with_artifact_overrides(dependency.artifacts.clone())
            .with_excludes(dependency.excludes.clone())
    }

    /// Attributes the dependency forces.
    #[must_use]
    pub fn with_dependency_attributes(mut self, attributes: AttributeMap) -> Self {
        self.dependency_attributes = attributes;
        self
    }

    /// Explicit artifacts replacing the variants' own.
    #[must_use]
    pub fn with_artifact_overrides(mut self, artifacts: Vec<ArtifactName>) -> Self {
        self.artifact_overrides = artifacts;
        self
    }

    /// Exclusions applied to the selected artifacts.
    #[must_use]
    pub fn with_excludes(mut self, excludes: Vec<ExcludeRule>) -> Self {
        self.excludes = excludes;
        self
    }

    /// The component.
    pub fn component(&self) -> &Arc<ComponentVariants> {
        &self.component
    }

    /// Whether this edge changes the component's artifacts. Edges that do not can
    /// share one artifact set per component.
    pub fn modifies_artifacts(&self) -> bool {
        !self.artifact_overrides.is_empty()
            || !self.dependency_attributes.is_empty()
            || self.excludes.iter().any(ExcludeRule::may_exclude_artifacts)
    }

    /// Selects the artifacts of this edge.
    ///
    /// Reselecting from all variants is refused (empty set) when the dependency
    /// declares explicit artifacts. Failures to resolve the component's variants come
    /// back as a broken set; configuration conflicts are returned as errors.
    pub fn select(
        &self,
        selector: &dyn VariantSelector,
        spec: ArtifactSelectionSpec,
    ) -> Result<ResolvedArtifactSet, ResolveError> {
        if spec.select_from_all_variants && !self.artifact_overrides.is_empty() {
            debug!("Refusing to reselect variants of {} with explicit artifacts", self.component.component());
            return Ok(ResolvedArtifactSet::Empty);
        }

        let all = match self.component.all_variants() {
            Ok(all) => all,
            Err(e) if e.is_fatal_conflict() => return Err(e),
            Err(e) => return Ok(ResolvedArtifactSet::Broken(e)),
        };

        let candidates = if spec.select_from_all_variants {
            all.to_vec()
        } else {
            match self.own_variants(&all) {
                Ok(own) => own,
                Err(e) => return Ok(ResolvedArtifactSet::Broken(e)),
            }
        };

        let variants = ResolvedVariantSet::new(
            self.component.component().clone(),
            self.component.source().schema(),
            self.dependency_attributes.clone(),
            candidates,
        )?;
        Ok(self.apply_excludes(selector.select(&variants)))
    }

    fn own_variants(&self, all: &[Arc<ResolvedVariant>]) -> Result<Vec<Arc<ResolvedVariant>>, ResolveError> {
        let mut own = Vec::with_capacity(self.graph_variants.len());
        for name in &self.graph_variants {
            let variant = all.iter().find(|v| v.name() == name).ok_or_else(|| ResolveError::VariantNotFound {
                component: self.component.component().to_string(),
                variant: name.clone(),
            })?;
            if self.artifact_overrides.is_empty() {
                own.push(variant.clone());
            } else {
                let source = self.component.source();
                let artifacts = ResolvedArtifactSet::of(
                    self.artifact_overrides
                        .iter()
                        .map(|name| ResolvedArtifactSet::single(source.adhoc_artifact(variant.info(), name))),
                );
                own.push(Arc::new(variant.with_artifacts(artifacts)));
            }
        }
        Ok(own)
    }

    fn apply_excludes(&self, selected: ResolvedArtifactSet) -> ResolvedArtifactSet {
        let Some(module) = self.component.component().as_module().map(|id| id.module_id()) else {
            return selected;
        };
        let rules: Vec<&ExcludeRule> = self.excludes.iter().filter(|r| r.may_exclude_artifacts()).collect();
        if rules.is_empty() {
            return selected;
        }
        selected.retain(&|artifact| !rules.iter().any(|rule| rule.excludes_artifact(&module, &artifact.id().name)))
    }
}
