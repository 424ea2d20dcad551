//! Value types shared by the caches, the artifact set algebra and variant selection.
//!
//! Every type here is an immutable value with structural equality, so instances can be
//! used as cache keys and shared freely between threads.

pub mod attributes;
pub mod descriptor;
pub mod identifiers;
pub mod sources;

pub use attributes::{AttributeMap, Capability};
pub use descriptor::{
    Configuration, ConfigurationArtifact, DependencyDescriptor, ExcludeRule, ModuleDescriptor,
    VariantDescriptor, VariantReference,
};
pub use identifiers::{
    ArtifactIdentifier, ArtifactName, ComponentIdentifier, ComponentKey, ModuleComponentIdentifier,
    ModuleIdentifier,
};
pub use sources::{DescriptorHash, ModuleSource, ModuleSources};
