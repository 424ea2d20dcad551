//! Artifacts backed by plain files rather than repository modules.
//!
//! A file-backed leaf either names one fixed file or wraps a [`FileCollection`]
//! whose contents are only known when it is evaluated, such as a directory of
//! libraries. Dynamic collections are evaluated on every visit until the set is
//! [snapshotted](super::ResolvedArtifactSet::snapshot).

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use walkdir::WalkDir;

use super::artifact::{ResolvableArtifact, VariantInfo};
use super::set::ResolvedArtifactSet;
use super::visitor::{ArtifactVisitor, VisitAction};
use crate::core::ResolveError;
use crate::models::{AttributeMap, ComponentIdentifier};

/// A lazily evaluated set of files.
pub trait FileCollection: Send + Sync {
    /// Name used in diagnostics.
    fn display_name(&self) -> String;

    /// Evaluates the collection.
    fn files(&self) -> Result<Vec<PathBuf>, ResolveError>;
}

/// Every regular file below a directory, optionally filtered by extension, in path order.
#[derive(Debug, Clone)]
pub struct DirectoryFiles {
    root: PathBuf,
    extension: Option<String>,
}

impl DirectoryFiles {
    /// All files below `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extension: None,
        }
    }

    /// Only files with the given extension.
    #[must_use]
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = Some(extension.into());
        self
    }

    fn accepts(&self, path: &Path) -> bool {
        self.extension
            .as_deref()
            .is_none_or(|wanted| path.extension().is_some_and(|ext| ext == wanted))
    }
}

impl FileCollection for DirectoryFiles {
    fn display_name(&self) -> String {
        match &self.extension {
            Some(extension) => format!("*.{} in {}", extension, self.root.display()),
            None => format!("files in {}", self.root.display()),
        }
    }

    fn files(&self) -> Result<Vec<PathBuf>, ResolveError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in WalkDir::new(&self.root).sort_by_file_name() {
            let entry = entry.map_err(|e| ResolveError::ArtifactResolutionFailed {
                artifact: self.display_name(),
                reason: e.to_string(),
            })?;
            if entry.file_type().is_file() && self.accepts(entry.path()) {
                files.push(entry.into_path());
            }
        }
        Ok(files)
    }
}

/// Where a file-backed leaf gets its files.
#[derive(Clone)]
pub enum FileSource {
    /// One file known up front
    Fixed(Arc<ResolvableArtifact>),
    /// A collection evaluated at visit time
    Dynamic(Arc<dyn FileCollection>),
}

impl fmt::Debug for FileSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(artifact) => f.debug_tuple("Fixed").field(artifact).finish(),
            Self::Dynamic(collection) => f.debug_tuple("Dynamic").field(&collection.display_name()).finish(),
        }
    }
}

/// Leaf of an artifact set made of local files.
#[derive(Debug, Clone)]
pub struct FileBackedArtifacts {
    component: ComponentIdentifier,
    variant: Arc<VariantInfo>,
    source: FileSource,
}

impl FileBackedArtifacts {
    /// One fixed file.
    pub fn fixed(path: impl Into<PathBuf>, component: ComponentIdentifier, attributes: AttributeMap) -> Self {
        let variant = Arc::new(VariantInfo::new(component.to_string(), attributes));
        let artifact = ResolvableArtifact::for_file(component.clone(), variant.clone(), path.into());
        Self {
            component,
            variant,
            source: FileSource::Fixed(Arc::new(artifact)),
        }
    }

    /// A collection evaluated on each visit.
    pub fn dynamic(
        collection: Arc<dyn FileCollection>,
        component: ComponentIdentifier,
        attributes: AttributeMap,
    ) -> Self {
        Self {
            variant: Arc::new(VariantInfo::new(component.to_string(), attributes)),
            component,
            source: FileSource::Dynamic(collection),
        }
    }

    /// Owning component.
    pub fn component(&self) -> &ComponentIdentifier {
        &self.component
    }

    /// Attributes of the files.
    pub fn attributes(&self) -> &AttributeMap {
        &self.variant.attributes
    }

    /// The file source.
    pub fn source(&self) -> &FileSource {
        &self.source
    }

    fn artifact_for(&self, path: PathBuf) -> Arc<ResolvableArtifact> {
        Arc::new(ResolvableArtifact::for_file(self.component.clone(), self.variant.clone(), path))
    }

    pub(crate) fn visit(&self, visitor: &mut dyn ArtifactVisitor) {
        match &self.source {
            FileSource::Fixed(artifact) => visitor.visit_artifact(artifact),
            FileSource::Dynamic(collection) => match visitor.prepare_for_visit(collection.as_ref()) {
                VisitAction::Skip => {}
                VisitAction::Spec => visitor.visit_spec(collection.as_ref()),
                VisitAction::Visit => match collection.files() {
                    Ok(files) => {
                        for file in files {
                            visitor.visit_artifact(&self.artifact_for(file));
                        }
                    }
                    Err(e) => visitor.visit_failure(&e),
                },
            },
        }
    }

    /// Freezes a dynamic collection into fixed leaves.
    pub(crate) fn snapshot(self: &Arc<Self>) -> ResolvedArtifactSet {
        let FileSource::Dynamic(collection) = &self.source else {
            return ResolvedArtifactSet::FileBacked(self.clone());
        };
        match collection.files() {
            Ok(files) => ResolvedArtifactSet::of(files.into_iter().map(|file| {
                ResolvedArtifactSet::FileBacked(Arc::new(Self {
                    component: self.component.clone(),
                    variant: self.variant.clone(),
                    source: FileSource::Fixed(self.artifact_for(file)),
                }))
            })),
            Err(e) => ResolvedArtifactSet::Broken(e),
        }
    }

    pub(crate) fn fixed_artifact(&self) -> Option<&Arc<ResolvableArtifact>> {
        match &self.source {
            FileSource::Fixed(artifact) => Some(artifact),
            FileSource::Dynamic(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_directory_files_filters_and_sorts() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("b.jar"), b"b").unwrap();
        std::fs::write(temp.path().join("a.jar"), b"a").unwrap();
        std::fs::write(temp.path().join("notes.txt"), b"n").unwrap();

        let files = DirectoryFiles::new(temp.path()).with_extension("jar").files().unwrap();
        assert_eq!(files, vec![temp.path().join("a.jar"), temp.path().join("b.jar")]);
        assert_eq!(DirectoryFiles::new(temp.path()).files().unwrap().len(), 3);
        assert!(DirectoryFiles::new(temp.path().join("absent")).files().unwrap().is_empty());
    }
}
