//! Component, module and artifact identifiers.
//!
//! All identifiers are immutable values with structural equality and hashing so they
//! can be used directly as cache keys.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::core::ResolveError;

/// A module without a version: `group:name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleIdentifier {
    /// Module group, e.g. `org.slf4j`
    pub group: String,
    /// Module name, e.g. `slf4j-api`
    pub name: String,
}

impl ModuleIdentifier {
    /// Create a module identifier.
    pub fn new(group: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ModuleIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.group, self.name)
    }
}

/// A module component published to a repository: `group:module:version`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleComponentIdentifier {
    /// Module group
    pub group: String,
    /// Module name
    pub module: String,
    /// Exact version
    pub version: String,
}

impl ModuleComponentIdentifier {
    /// Create a module component identifier.
    pub fn new(
        group: impl Into<String>,
        module: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            module: module.into(),
            version: version.into(),
        }
    }

    /// The version-less module this component belongs to.
    pub fn module_id(&self) -> ModuleIdentifier {
        ModuleIdentifier::new(&self.group, &self.module)
    }
}

impl fmt::Display for ModuleComponentIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group, self.module, self.version)
    }
}

impl FromStr for ModuleComponentIdentifier {
    type Err = ResolveError;

    /// Parses `group:module:version`. Every segment must be non-empty.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = value.split(':').collect();
        if parts.len() != 3 {
            return Err(ResolveError::InvalidIdentifier {
                value: value.to_string(),
                reason: "expected 'group:module:version'".to_string(),
            });
        }
        if parts.iter().any(|p| p.trim().is_empty()) {
            return Err(ResolveError::InvalidIdentifier {
                value: value.to_string(),
                reason: "group, module and version must not be empty".to_string(),
            });
        }
        Ok(Self::new(parts[0].trim(), parts[1].trim(), parts[2].trim()))
    }
}

/// Identifies any component that can appear in a dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ComponentIdentifier {
    /// A module fetched from a repository
    Module(ModuleComponentIdentifier),
    /// A project of the current (or an included) build
    Project {
        /// Build the project belongs to
        build: String,
        /// Project path, e.g. `:lib`
        path: String,
    },
    /// A component with no coordinates, such as a set of local files
    Opaque(String),
}

impl ComponentIdentifier {
    /// The module coordinates, when this is a module component.
    pub fn as_module(&self) -> Option<&ModuleComponentIdentifier> {
        match self {
            Self::Module(id) => Some(id),
            _ => None,
        }
    }
}

impl From<ModuleComponentIdentifier> for ComponentIdentifier {
    fn from(id: ModuleComponentIdentifier) -> Self {
        Self::Module(id)
    }
}

impl fmt::Display for ComponentIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Module(id) => write!(f, "{id}"),
            Self::Project {
                build,
                path,
            } => {
                if build.is_empty() || build == ":" {
                    write!(f, "project {path}")
                } else {
                    write!(f, "project :{build}{path}")
                }
            }
            Self::Opaque(name) => write!(f, "{name}"),
        }
    }
}

/// Cache key for everything known about a component in one repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentKey {
    /// Identifier of the repository the component was resolved from
    pub repository_id: String,
    /// The component
    pub component: ModuleComponentIdentifier,
}

impl ComponentKey {
    /// Create a key.
    pub fn new(repository_id: impl Into<String>, component: ModuleComponentIdentifier) -> Self {
        Self {
            repository_id: repository_id.into(),
            component,
        }
    }
}

impl fmt::Display for ComponentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in '{}'", self.component, self.repository_id)
    }
}

/// The name of an artifact as declared in a module descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArtifactName {
    /// Base name, usually the module name
    pub name: String,
    /// Artifact type, e.g. `jar`, `pom`, `source`
    pub artifact_type: String,
    /// File extension, `None` for extension-less files
    pub extension: Option<String>,
    /// Optional classifier, e.g. `sources`
    pub classifier: Option<String>,
}

impl ArtifactName {
    /// Create an artifact name with no classifier.
    pub fn new(
        name: impl Into<String>,
        artifact_type: impl Into<String>,
        extension: Option<&str>,
    ) -> Self {
        Self {
            name: name.into(),
            artifact_type: artifact_type.into(),
            extension: extension.map(str::to_string),
            classifier: None,
        }
    }

    /// A `jar` artifact named after the module.
    pub fn jar(name: impl Into<String>) -> Self {
        Self::new(name, "jar", Some("jar"))
    }

    /// Same name with a classifier.
    #[must_use]
    pub fn with_classifier(mut self, classifier: impl Into<String>) -> Self {
        self.classifier = Some(classifier.into());
        self
    }

    /// File name for this artifact at a given version: `name-version[-classifier][.ext]`.
    pub fn file_name(&self, version: &str) -> String {
        let mut file = format!("{}-{}", self.name, version);
        if let Some(classifier) = &self.classifier {
            file.push('-');
            file.push_str(classifier);
        }
        if let Some(extension) = &self.extension {
            file.push('.');
            file.push_str(extension);
        }
        file
    }
}

impl fmt::Display for ArtifactName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(classifier) = &self.classifier {
            write!(f, "-{classifier}")?;
        }
        if let Some(extension) = &self.extension {
            write!(f, ".{extension}")?;
        }
        Ok(())
    }
}

/// Globally identifies one artifact of one component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArtifactIdentifier {
    /// Owning component
    pub component: ComponentIdentifier,
    /// Artifact name within the component
    pub name: ArtifactName,
}

impl ArtifactIdentifier {
    /// Create an artifact identifier.
    pub fn new(component: impl Into<ComponentIdentifier>, name: ArtifactName) -> Self {
        Self {
            component: component.into(),
            name,
        }
    }

    /// File name of the artifact, using the component version when there is one.
    pub fn file_name(&self) -> String {
        match &self.component {
            ComponentIdentifier::Module(id) => self.name.file_name(&id.version),
            _ => self.name.to_string(),
        }
    }
}

impl fmt::Display for ArtifactIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.file_name(), self.component)
    }
}
