//! Attribute-based variant selection.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use super::variant::{ResolvedVariant, ResolvedVariantSet};
use crate::artifacts::ResolvedArtifactSet;
use crate::core::ResolveError;
use crate::models::AttributeMap;

/// Produces the artifacts of a variant converted to satisfy the requested attributes,
/// or `None` when the variant cannot be converted.
pub type TransformCallback =
    Arc<dyn Fn(&ResolvedVariant, &AttributeMap) -> Option<ResolvedArtifactSet> + Send + Sync>;

/// Picks the artifacts of one variant out of a component's variants.
pub trait VariantSelector: Send + Sync {
    /// The attributes the consumer asks for.
    fn requested_attributes(&self) -> &AttributeMap;

    /// Selects from `variants`. Selection failures come back as a broken set.
    fn select(&self, variants: &ResolvedVariantSet) -> ResolvedArtifactSet;
}

/// Matches requested attributes against variant attributes using the component's schema.
///
/// When no variant matches, each variant is offered to the transform callback. When
/// that fails too, a lenient selector answers with an empty set and a strict one with
/// a [`ResolveError::NoMatchingVariant`] failure.
#[derive(Clone)]
pub struct AttributeMatchingSelector {
    requested: AttributeMap,
    lenient: bool,
    transform: Option<TransformCallback>,
}

impl AttributeMatchingSelector {
    /// A strict selector for `requested`.
    pub fn new(requested: AttributeMap) -> Self {
        Self {
            requested,
            lenient: false,
            transform: None,
        }
    }

    /// Same selector, answering an empty set when nothing matches.
    #[must_use]
    pub fn lenient(mut self, lenient: bool) -> Self {
        self.lenient = lenient;
        self
    }

    /// Same selector, falling back to `transform` when no variant matches.
    #[must_use]
    pub fn with_transform(mut self, transform: TransformCallback) -> Self {
        self.transform = Some(transform);
        self
    }

    /// Whether an unmatched selection yields an empty set.
    pub fn is_lenient(&self) -> bool {
        self.lenient
    }

    fn select_transformed(&self, variants: &ResolvedVariantSet, requested: &AttributeMap) -> Option<ResolvedArtifactSet> {
        let transform = self.transform.as_ref()?;
        let transformed: Vec<(&Arc<ResolvedVariant>, ResolvedArtifactSet)> = variants
            .variants()
            .iter()
            .filter_map(|variant| transform(variant, requested).map(|set| (variant, set)))
            .collect();
        match transformed.as_slice() {
            [] => None,
            [(variant, set)] => {
                debug!("Selected transformed {} for {}", variant, requested);
                Some(set.clone())
            }
            many => Some(ResolvedArtifactSet::Broken(ResolveError::AmbiguousVariants {
                component: variants.component().to_string(),
                requested: requested.to_string(),
                candidates: many.iter().map(|(v, _)| format!("{} (transformed)", v.display_name())).collect(),
            })),
        }
    }
}

impl VariantSelector for AttributeMatchingSelector {
    fn requested_attributes(&self) -> &AttributeMap {
        &self.requested
    }

    fn select(&self, variants: &ResolvedVariantSet) -> ResolvedArtifactSet {
        let requested = self.requested.overlay(variants.overridden_attributes());
        let schema = variants.schema();

        let matching: Vec<&Arc<ResolvedVariant>> =
            variants.variants().iter().filter(|v| schema.matches(&requested, v.attributes())).collect();

        match matching.as_slice() {
            [only] => return only.artifacts().clone(),
            [] => {}
            _ => {
                let attributes: Vec<&AttributeMap> = matching.iter().map(|v| v.attributes()).collect();
                let chosen = schema.disambiguate(&requested, &attributes);
                if let [index] = chosen.as_slice() {
                    debug!("Disambiguated {} for {}", matching[*index], requested);
                    return matching[*index].artifacts().clone();
                }
                return ResolvedArtifactSet::Broken(ResolveError::AmbiguousVariants {
                    component: variants.component().to_string(),
                    requested: requested.to_string(),
                    candidates: chosen.iter().map(|&i| matching[i].display_name().to_string()).collect(),
                });
            }
        }

        if let Some(transformed) = self.select_transformed(variants, &requested) {
            return transformed;
        }

        if self.lenient {
            debug!("No variant of {} matches {}, lenient selection", variants.component(), requested);
            return ResolvedArtifactSet::Empty;
        }
        ResolvedArtifactSet::Broken(ResolveError::NoMatchingVariant {
            component: variants.component().to_string(),
            requested: requested.to_string(),
            available: variants.variants().iter().map(|v| v.display_name().to_string()).collect(),
        })
    }
}

impl fmt::Debug for AttributeMatchingSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttributeMatchingSelector")
            .field("requested", &self.requested)
            .field("lenient", &self.lenient)
            .field("transform", &self.transform.is_some())
            .finish()
    }
}
