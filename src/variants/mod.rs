//! Variant selection.
//!
//! A component exposes variants: attribute-tagged groups of artifacts such as
//! `api` and `runtime`. For every dependency edge the consumer requests a set of
//! attributes, and selection picks the variant whose attributes match, producing the
//! [`ResolvedArtifactSet`](crate::artifacts::ResolvedArtifactSet) the edge
//! contributes.
//!
//! # Module layout
//!
//! - [`schema`]: attribute compatibility and disambiguation rules
//! - [`variant`]: [`ResolvedVariant`] and the per-component [`ResolvedVariantSet`]
//! - [`selector`]: the [`VariantSelector`] contract and [`AttributeMatchingSelector`]
//! - [`resolving`]: per-component variant memoisation and per-edge selection
//! - [`composition`]: variants that include variants of other components
//! - [`module`]: variants of repository modules backed by the resolution caches
//!
//! # Failures
//!
//! Selection problems that only affect one edge (no match, ambiguity, a module that
//! cannot be fetched) become broken leaves and surface when the set is visited.
//! Configuration conflicts (duplicate variant names, composition cycles,
//! capability clashes) are returned as errors and abort the resolution.

pub mod composition;
pub mod module;
pub mod resolving;
pub mod schema;
pub mod selector;
pub mod variant;

pub use composition::{ComposableVariant, VariantCatalog, VariantComposer};
pub use module::{ModuleVariantResolver, ModuleVariantSource};
pub use resolving::{ArtifactSelectionSpec, ComponentVariantSource, ComponentVariants, VariantResolvingArtifactSet};
pub use schema::{AttributeSchema, DefaultAttributeSchema};
pub use selector::{AttributeMatchingSelector, TransformCallback, VariantSelector};
pub use variant::{ResolvedVariant, ResolvedVariantSet};
