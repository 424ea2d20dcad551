//! A single artifact whose backing file is resolved lazily, at most once.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use crate::core::ResolveError;
use crate::models::{ArtifactIdentifier, ArtifactName, AttributeMap, Capability, ComponentIdentifier};

/// Produces the backing file of an artifact: a download, a copy, a nested build.
pub type FileResolver = Arc<dyn Fn() -> Result<PathBuf, ResolveError> + Send + Sync>;

/// The variant an artifact was selected from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct VariantInfo {
    /// Human readable variant name, e.g. `com.x:y:1.0 variant runtime`
    pub display_name: String,
    /// Attributes of the variant
    pub attributes: AttributeMap,
    /// Capabilities the variant provides
    pub capabilities: Vec<Capability>,
}

impl VariantInfo {
    /// A variant with a name and attributes and no capabilities.
    pub fn new(display_name: impl Into<String>, attributes: AttributeMap) -> Self {
        Self {
            display_name: display_name.into(),
            attributes,
            capabilities: Vec::new(),
        }
    }
}

/// An artifact reference whose file has not necessarily been fetched yet.
///
/// The resolver runs on the first call to [`file`](Self::file); every later call,
/// from any thread, observes the same outcome. A panicking resolver is recorded as a
/// failure like any other.
pub struct ResolvableArtifact {
    id: ArtifactIdentifier,
    variant: Arc<VariantInfo>,
    resolver: FileResolver,
    resolve_synchronously: bool,
    build_dependencies: Vec<String>,
    file: OnceLock<Result<PathBuf, ResolveError>>,
}

impl ResolvableArtifact {
    /// An artifact whose file is produced by `resolver`.
    pub fn new(id: ArtifactIdentifier, variant: Arc<VariantInfo>, resolver: FileResolver) -> Self {
        Self {
            id,
            variant,
            resolver,
            resolve_synchronously: false,
            build_dependencies: Vec::new(),
            file: OnceLock::new(),
        }
    }

    /// An artifact whose file is already on disk; it resolves synchronously.
    pub fn local(id: ArtifactIdentifier, variant: Arc<VariantInfo>, path: PathBuf) -> Self {
        let file = OnceLock::new();
        let resolved = path.clone();
        let _ = file.set(Ok(path));
        Self {
            id,
            variant,
            resolver: Arc::new(move || Ok(resolved.clone())),
            resolve_synchronously: true,
            build_dependencies: Vec::new(),
            file,
        }
    }

    /// An artifact for a plain file that belongs to no module.
    pub fn for_file(component: ComponentIdentifier, variant: Arc<VariantInfo>, path: PathBuf) -> Self {
        let name = path.file_name().map_or_else(|| path.to_string_lossy().into_owned(), |n| n.to_string_lossy().into_owned());
        let (base, extension) = match name.rsplit_once('.') {
            Some((base, extension)) if !base.is_empty() => (base.to_string(), Some(extension)),
            _ => (name.clone(), None),
        };
        let artifact_type = extension.unwrap_or("").to_string();
        let id = ArtifactIdentifier::new(component, ArtifactName::new(base, artifact_type, extension));
        Self::local(id, variant, path)
    }

    /// Same artifact, resolved on the calling thread rather than queued.
    #[must_use]
    pub fn resolve_synchronously(mut self, synchronous: bool) -> Self {
        self.resolve_synchronously = synchronous;
        self
    }

    /// Same artifact, produced by the named build work.
    #[must_use]
    pub fn with_build_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.build_dependencies = dependencies;
        self
    }

    /// The artifact identifier.
    pub fn id(&self) -> &ArtifactIdentifier {
        &self.id
    }

    /// The variant the artifact belongs to.
    pub fn variant(&self) -> &VariantInfo {
        &self.variant
    }

    /// Whether the file is cheap to resolve and should not be queued.
    pub fn is_resolve_synchronously(&self) -> bool {
        self.resolve_synchronously
    }

    /// Build work that produces the file.
    pub fn build_dependencies(&self) -> &[String] {
        &self.build_dependencies
    }

    /// Whether the resolver has already run.
    pub fn is_resolved(&self) -> bool {
        self.file.get().is_some()
    }

    /// The backing file, resolving it on first use.
    pub fn file(&self) -> Result<PathBuf, ResolveError> {
        self.file.get_or_init(|| self.run_resolver()).clone()
    }

    /// The backing file, if already resolved successfully.
    pub fn resolved_file(&self) -> Option<&Path> {
        match self.file.get() {
            Some(Ok(path)) => Some(path.as_path()),
            _ => None,
        }
    }

    fn run_resolver(&self) -> Result<PathBuf, ResolveError> {
        tracing::trace!("Resolving file of {}", self.id);
        match catch_unwind(AssertUnwindSafe(|| (self.resolver)())) {
            Ok(result) => result,
            Err(payload) => {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "resolver panicked".to_string());
                Err(ResolveError::ArtifactResolutionFailed {
                    artifact: self.id.to_string(),
                    reason,
                })
            }
        }
    }
}

impl fmt::Debug for ResolvableArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvableArtifact")
            .field("id", &self.id)
            .field("variant", &self.variant.display_name)
            .field("resolve_synchronously", &self.resolve_synchronously)
            .field("resolved", &self.is_resolved())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for ResolvableArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}
