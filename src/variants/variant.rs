//! Resolved variants and the per-component variant set handed to selectors.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use super::schema::AttributeSchema;
use crate::artifacts::{ResolvedArtifactSet, VariantInfo};
use crate::core::ResolveError;
use crate::models::{AttributeMap, Capability, ComponentIdentifier};

/// One selectable variant of a component and its artifacts.
#[derive(Debug, Clone)]
pub struct ResolvedVariant {
    name: String,
    info: Arc<VariantInfo>,
    artifacts: ResolvedArtifactSet,
}

impl ResolvedVariant {
    /// A variant of `component` named `name`.
    pub fn new(
        component: &ComponentIdentifier,
        name: impl Into<String>,
        attributes: AttributeMap,
        capabilities: Vec<Capability>,
        artifacts: ResolvedArtifactSet,
    ) -> Self {
        let name = name.into();
        let info = VariantInfo {
            display_name: format!("{component} variant {name}"),
            attributes,
            capabilities,
        };
        Self {
            name,
            info: Arc::new(info),
            artifacts,
        }
    }

    /// A variant sharing an already built [`VariantInfo`].
    pub fn from_info(name: impl Into<String>, info: Arc<VariantInfo>, artifacts: ResolvedArtifactSet) -> Self {
        Self {
            name: name.into(),
            info,
            artifacts,
        }
    }

    /// Variant name, unique within its component.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Display name, including the component.
    pub fn display_name(&self) -> &str {
        &self.info.display_name
    }

    /// Attributes of the variant.
    pub fn attributes(&self) -> &AttributeMap {
        &self.info.attributes
    }

    /// Capabilities the variant provides.
    pub fn capabilities(&self) -> &[Capability] {
        &self.info.capabilities
    }

    /// Shared description of the variant, as carried by its artifacts.
    pub fn info(&self) -> &Arc<VariantInfo> {
        &self.info
    }

    /// The variant's artifacts.
    pub fn artifacts(&self) -> &ResolvedArtifactSet {
        &self.artifacts
    }

    /// Same variant with different artifacts.
    #[must_use]
    pub fn with_artifacts(&self, artifacts: ResolvedArtifactSet) -> Self {
        Self {
            name: self.name.clone(),
            info: self.info.clone(),
            artifacts,
        }
    }
}

impl fmt::Display for ResolvedVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// All variants of one component offered to a selector, with the component's schema
/// and the attributes the referencing dependency forces.
#[derive(Clone)]
pub struct ResolvedVariantSet {
    component: ComponentIdentifier,
    schema: Arc<dyn AttributeSchema>,
    overridden_attributes: AttributeMap,
    variants: Vec<Arc<ResolvedVariant>>,
}

impl ResolvedVariantSet {
    /// Builds a variant set, rejecting duplicate variant names.
    pub fn new(
        component: ComponentIdentifier,
        schema: Arc<dyn AttributeSchema>,
        overridden_attributes: AttributeMap,
        variants: Vec<Arc<ResolvedVariant>>,
    ) -> Result<Self, ResolveError> {
        let mut names = HashSet::new();
        for variant in &variants {
            if !names.insert(variant.name()) {
                return Err(ResolveError::DuplicateVariant {
                    component: component.to_string(),
                    variant: variant.name().to_string(),
                });
            }
        }
        Ok(Self {
            component,
            schema,
            overridden_attributes,
            variants,
        })
    }

    /// The component.
    pub fn component(&self) -> &ComponentIdentifier {
        &self.component
    }

    /// Matching rules of the component.
    pub fn schema(&self) -> &dyn AttributeSchema {
        self.schema.as_ref()
    }

    /// Attributes forced by the dependency; they win over the consumer's request.
    pub fn overridden_attributes(&self) -> &AttributeMap {
        &self.overridden_attributes
    }

    /// Candidate variants, in declaration order.
    pub fn variants(&self) -> &[Arc<ResolvedVariant>] {
        &self.variants
    }

    /// Whether the set offers no variant at all.
    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }
}

impl fmt::Debug for ResolvedVariantSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedVariantSet")
            .field("component", &self.component)
            .field("overridden_attributes", &self.overridden_attributes)
            .field("variants", &self.variants.iter().map(|v| v.name()).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ModuleComponentIdentifier;
    use crate::variants::DefaultAttributeSchema;

    #[test]
    fn test_duplicate_variant_names_are_rejected() {
        let component: ComponentIdentifier = ModuleComponentIdentifier::new("org", "lib", "1.0").into();
        let variant = |name: &str| {
            Arc::new(ResolvedVariant::new(
                &component,
                name,
                AttributeMap::empty(),
                Vec::new(),
                ResolvedArtifactSet::Empty,
            ))
        };

        let error = ResolvedVariantSet::new(
            component.clone(),
            Arc::new(DefaultAttributeSchema::new()),
            AttributeMap::empty(),
            vec![variant("api"), variant("runtime"), variant("api")],
        )
        .unwrap_err();
        assert!(matches!(error, ResolveError::DuplicateVariant { ref variant, .. } if variant == "api"));
        assert!(error.is_fatal_conflict());
    }

    #[test]
    fn test_display_name_includes_component() {
        let component: ComponentIdentifier = ModuleComponentIdentifier::new("org", "lib", "1.0").into();
        let variant =
            ResolvedVariant::new(&component, "runtime", AttributeMap::empty(), Vec::new(), ResolvedArtifactSet::Empty);
        assert_eq!(variant.display_name(), "org:lib:1.0 variant runtime");
    }
}
