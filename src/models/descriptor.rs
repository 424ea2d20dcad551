//! Module descriptors: the metadata a repository publishes for one component.
//!
//! A [`ModuleDescriptor`] is what the metadata cache persists. It carries the module's
//! configurations, the artifacts published in each configuration, its dependencies,
//! exclude rules and (optionally) explicit variants. Components that publish no
//! explicit variants get one derived variant per visible configuration, see
//! [`ModuleDescriptor::effective_variants`].

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use super::attributes::{AttributeMap, Capability};
use super::identifiers::{ArtifactName, ModuleComponentIdentifier, ModuleIdentifier};

/// Attribute carried by variants derived from configurations.
pub const CONFIGURATION_ATTRIBUTE: &str = "depot.configuration";

/// Default status of a published module.
pub const DEFAULT_STATUS: &str = "release";

/// A named configuration of a module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Configuration {
    /// Configuration name, e.g. `runtime`
    pub name: String,
    /// Whether dependencies of this configuration are followed transitively
    pub transitive: bool,
    /// Whether consumers may select this configuration
    pub visible: bool,
    /// Configurations this one inherits artifacts and dependencies from
    pub extends_from: Vec<String>,
}

impl Configuration {
    /// A visible, transitive configuration that extends nothing.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transitive: true,
            visible: true,
            extends_from: Vec::new(),
        }
    }

    /// Same configuration extending `parents`.
    #[must_use]
    pub fn extending<I, S>(mut self, parents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extends_from = parents.into_iter().map(Into::into).collect();
        self
    }

    /// Same configuration, hidden from consumers.
    #[must_use]
    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }
}

/// An artifact published in one or more configurations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigurationArtifact {
    /// The artifact
    pub name: ArtifactName,
    /// Configurations that publish it
    pub configurations: Vec<String>,
}

/// Excludes modules or artifacts from a dependency or a whole descriptor.
///
/// `None` fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExcludeRule {
    /// Group to exclude
    pub group: Option<String>,
    /// Module name to exclude
    pub module: Option<String>,
    /// Artifact name to exclude
    pub artifact: Option<String>,
    /// Artifact type to exclude
    pub artifact_type: Option<String>,
    /// Artifact extension to exclude
    pub extension: Option<String>,
    /// Configurations the rule applies to; empty means all
    pub configurations: Vec<String>,
}

impl ExcludeRule {
    /// Exclude a whole module. `"*"` for either part matches anything.
    pub fn module(group: &str, module: &str) -> Self {
        Self {
            group: wildcard(group),
            module: wildcard(module),
            ..Self::default()
        }
    }

    /// Exclude artifacts of a given type from every module.
    pub fn artifact_type(artifact_type: impl Into<String>) -> Self {
        Self {
            artifact_type: Some(artifact_type.into()),
            ..Self::default()
        }
    }

    /// Whether the rule excludes the module itself.
    pub fn excludes_module(&self, id: &ModuleIdentifier) -> bool {
        !self.targets_artifacts()
            && self.group.as_deref().is_none_or(|g| g == id.group)
            && self.module.as_deref().is_none_or(|m| m == id.name)
    }

    /// Whether the rule excludes a specific artifact of a module.
    pub fn excludes_artifact(&self, id: &ModuleIdentifier, artifact: &ArtifactName) -> bool {
        if !self.targets_artifacts() {
            return false;
        }
        self.group.as_deref().is_none_or(|g| g == id.group)
            && self.module.as_deref().is_none_or(|m| m == id.name)
            && self.artifact.as_deref().is_none_or(|a| a == artifact.name)
            && self.artifact_type.as_deref().is_none_or(|t| t == artifact.artifact_type)
            && self.extension.as_deref().is_none_or(|e| Some(e) == artifact.extension.as_deref())
    }

    /// Whether applying the rule could remove artifacts from a variant.
    pub fn may_exclude_artifacts(&self) -> bool {
        self.targets_artifacts()
    }

    fn targets_artifacts(&self) -> bool {
        self.artifact.is_some() || self.artifact_type.is_some() || self.extension.is_some()
    }
}

fn wildcard(value: &str) -> Option<String> {
    if value == "*" {
        None
    } else {
        Some(value.to_string())
    }
}

/// A dependency declared by a module descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DependencyDescriptor {
    /// Requested coordinates
    pub target: ModuleComponentIdentifier,
    /// `from configuration -> target configurations`
    pub configuration_mappings: BTreeMap<String, Vec<String>>,
    /// Whether the target may change without a version change
    pub changing: bool,
    /// Whether the target's own dependencies are followed
    pub transitive: bool,
    /// Whether the dependency is optional
    pub optional: bool,
    /// Explicit artifacts requested instead of the target's defaults
    pub artifacts: Vec<ArtifactName>,
    /// Exclusions applied below this dependency
    pub excludes: Vec<ExcludeRule>,
    /// Human readable reason, if declared
    pub reason: Option<String>,
}

impl DependencyDescriptor {
    /// A transitive dependency on `target` mapped `default -> default`.
    pub fn new(target: ModuleComponentIdentifier) -> Self {
        let mut configuration_mappings = BTreeMap::new();
        configuration_mappings.insert("default".to_string(), vec!["default".to_string()]);
        Self {
            target,
            configuration_mappings,
            changing: false,
            transitive: true,
            optional: false,
            artifacts: Vec::new(),
            excludes: Vec::new(),
            reason: None,
        }
    }

    /// Whether the dependency overrides the target's artifacts.
    pub fn has_artifact_overrides(&self) -> bool {
        !self.artifacts.is_empty()
    }
}

/// Reference from one variant to a variant of another component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VariantReference {
    /// Component owning the referenced variant
    pub component: ModuleComponentIdentifier,
    /// Referenced variant name
    pub variant: String,
}

/// A variant explicitly published by a module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VariantDescriptor {
    /// Variant name, unique within the component
    pub name: String,
    /// Attributes describing the variant
    pub attributes: AttributeMap,
    /// Capabilities provided; empty means the component's own coordinates
    pub capabilities: Vec<Capability>,
    /// Files of the variant
    pub files: Vec<ArtifactName>,
    /// Variants of other components whose artifacts this variant includes
    pub includes: Vec<VariantReference>,
}

impl VariantDescriptor {
    /// A variant with no files, capabilities or includes.
    pub fn new(name: impl Into<String>, attributes: AttributeMap) -> Self {
        Self {
            name: name.into(),
            attributes,
            capabilities: Vec::new(),
            files: Vec::new(),
            includes: Vec::new(),
        }
    }
}

/// The complete metadata of one module component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    /// Component coordinates
    pub id: ModuleComponentIdentifier,
    /// Publication status, e.g. `release` or `integration`
    pub status: String,
    /// Whether the module may change without a version change
    pub changing: bool,
    /// Free-form extra information (description, licenses...)
    pub extra_info: BTreeMap<String, String>,
    /// Declared configurations
    pub configurations: Vec<Configuration>,
    /// Published artifacts
    pub artifacts: Vec<ConfigurationArtifact>,
    /// Declared dependencies
    pub dependencies: Vec<DependencyDescriptor>,
    /// Module-wide exclusions
    pub excludes: Vec<ExcludeRule>,
    /// Explicitly published variants
    pub variants: Vec<VariantDescriptor>,
}

impl ModuleDescriptor {
    /// An empty descriptor with the default status.
    pub fn new(id: ModuleComponentIdentifier) -> Self {
        Self {
            id,
            status: DEFAULT_STATUS.to_string(),
            changing: false,
            extra_info: BTreeMap::new(),
            configurations: Vec::new(),
            artifacts: Vec::new(),
            dependencies: Vec::new(),
            excludes: Vec::new(),
            variants: Vec::new(),
        }
    }

    /// Look up a configuration by name.
    pub fn configuration(&self, name: &str) -> Option<&Configuration> {
        self.configurations.iter().find(|c| c.name == name)
    }

    /// A configuration and everything it extends, nearest first. Unknown names are skipped.
    pub fn hierarchy(&self, name: &str) -> Vec<&Configuration> {
        let mut seen = HashSet::new();
        let mut ordered = Vec::new();
        let mut pending = vec![name];
        while let Some(current) = pending.pop() {
            if !seen.insert(current) {
                continue;
            }
            if let Some(configuration) = self.configuration(current) {
                ordered.push(configuration);
                for parent in configuration.extends_from.iter().rev() {
                    pending.push(parent);
                }
            }
        }
        ordered
    }

    /// Artifacts published by a configuration or any configuration it extends.
    pub fn artifacts_for(&self, configuration: &str) -> Vec<ArtifactName> {
        let names: HashSet<&str> =
            self.hierarchy(configuration).into_iter().map(|c| c.name.as_str()).collect();
        let mut result: Vec<ArtifactName> = Vec::new();
        for artifact in &self.artifacts {
            if artifact.configurations.iter().any(|c| names.contains(c.as_str()))
                && !result.contains(&artifact.name)
            {
                result.push(artifact.name.clone());
            }
        }
        result
    }

    /// The capability every variant provides unless it declares its own.
    pub fn default_capability(&self) -> Capability {
        Capability::new(&self.id.group, &self.id.module, &self.id.version)
    }

    /// Published variants, or one derived variant per visible configuration.
    ///
    /// Derived variants carry the [`CONFIGURATION_ATTRIBUTE`] attribute and the
    /// artifacts of the configuration hierarchy.
    pub fn effective_variants(&self) -> Vec<VariantDescriptor> {
        if !self.variants.is_empty() {
            return self.variants.clone();
        }
        self.configurations
            .iter()
            .filter(|c| c.visible)
            .map(|c| VariantDescriptor {
                name: c.name.clone(),
                attributes: AttributeMap::of([(CONFIGURATION_ATTRIBUTE, c.name.as_str())]),
                capabilities: Vec::new(),
                files: self.artifacts_for(&c.name),
                includes: Vec::new(),
            })
            .collect()
    }
}
