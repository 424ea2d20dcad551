//! The artifact set algebra.

use std::sync::Arc;

use super::artifact::ResolvableArtifact;
use super::files::FileBackedArtifacts;
use super::visitor::ArtifactVisitor;
use crate::core::ResolveError;

/// Two or more non-empty, non-composite sets.
///
/// Only [`ResolvedArtifactSet::of`] builds one, so a composite never nests another
/// composite and never holds an empty child.
#[derive(Debug, Clone)]
pub struct CompositeArtifactSet {
    children: Arc<[ResolvedArtifactSet]>,
}

impl CompositeArtifactSet {
    /// The children, in visit order.
    pub fn children(&self) -> &[ResolvedArtifactSet] {
        &self.children
    }
}

/// A lazily resolved collection of artifacts.
///
/// Sets are immutable and cheap to clone. Visiting walks the tree depth first and
/// reports leaves in a deterministic order regardless of how files were resolved.
#[derive(Debug, Clone, Default)]
pub enum ResolvedArtifactSet {
    /// Nothing
    #[default]
    Empty,
    /// One artifact
    Single(Arc<ResolvableArtifact>),
    /// Several sets visited in order
    Composite(CompositeArtifactSet),
    /// A failure reported in place of artifacts
    Broken(ResolveError),
    /// Local files
    FileBacked(Arc<FileBackedArtifacts>),
}

impl ResolvedArtifactSet {
    /// One artifact.
    pub fn single(artifact: ResolvableArtifact) -> Self {
        Self::Single(Arc::new(artifact))
    }

    /// Combines sets, dropping empty ones and splicing composites in place.
    pub fn of(sets: impl IntoIterator<Item = ResolvedArtifactSet>) -> Self {
        let mut children = Vec::new();
        for set in sets {
            set.flatten_into(&mut children);
        }
        match children.len() {
            0 => Self::Empty,
            1 => children.pop().unwrap_or_default(),
            _ => Self::Composite(CompositeArtifactSet {
                children: children.into(),
            }),
        }
    }

    fn flatten_into(self, children: &mut Vec<ResolvedArtifactSet>) {
        match self {
            Self::Empty => {}
            Self::Composite(composite) => {
                for child in composite.children.iter() {
                    child.clone().flatten_into(children);
                }
            }
            other => children.push(other),
        }
    }

    /// Whether this is the empty set.
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Visits every leaf in order.
    ///
    /// When the visitor requires files, unresolved artifacts are resolved on the
    /// calling thread and failures are reported through
    /// [`ArtifactVisitor::visit_failure`] instead of the artifact.
    pub fn visit(&self, visitor: &mut dyn ArtifactVisitor) {
        match self {
            Self::Empty => {}
            Self::Single(artifact) => visit_artifact(artifact, visitor),
            Self::Composite(composite) => {
                for child in composite.children.iter() {
                    child.visit(visitor);
                }
            }
            Self::Broken(failure) => visitor.visit_failure(failure),
            Self::FileBacked(files) => match files.fixed_artifact() {
                Some(artifact) => visit_artifact(artifact, visitor),
                None => files.visit(visitor),
            },
        }
    }

    /// Same set with dynamic file collections evaluated once and frozen.
    ///
    /// A collection that fails to evaluate becomes a broken leaf.
    #[must_use]
    pub fn snapshot(&self) -> Self {
        match self {
            Self::Composite(composite) => Self::of(composite.children.iter().map(Self::snapshot)),
            Self::FileBacked(files) => files.snapshot(),
            other => other.clone(),
        }
    }

    /// Same set without the artifact leaves `keep` rejects. File-backed and broken
    /// leaves are kept as they are.
    #[must_use]
    pub fn retain(&self, keep: &dyn Fn(&ResolvableArtifact) -> bool) -> Self {
        match self {
            Self::Single(artifact) if !keep(artifact) => Self::Empty,
            Self::Composite(composite) => Self::of(composite.children.iter().map(|c| c.retain(keep))),
            other => other.clone(),
        }
    }

    /// Every artifact leaf known without evaluating dynamic collections, in visit order.
    pub fn artifacts(&self) -> Vec<Arc<ResolvableArtifact>> {
        let mut artifacts = Vec::new();
        self.collect_artifacts(&mut artifacts);
        artifacts
    }

    fn collect_artifacts(&self, out: &mut Vec<Arc<ResolvableArtifact>>) {
        match self {
            Self::Single(artifact) => out.push(artifact.clone()),
            Self::Composite(composite) => {
                for child in composite.children.iter() {
                    child.collect_artifacts(out);
                }
            }
            Self::FileBacked(files) => {
                if let Some(artifact) = files.fixed_artifact() {
                    out.push(artifact.clone());
                }
            }
            Self::Empty | Self::Broken(_) => {}
        }
    }

    /// Names of the build work producing the artifacts, deduplicated, in visit order.
    pub fn build_dependencies(&self) -> Vec<String> {
        let mut dependencies: Vec<String> = Vec::new();
        for artifact in self.artifacts() {
            for dependency in artifact.build_dependencies() {
                if !dependencies.contains(dependency) {
                    dependencies.push(dependency.clone());
                }
            }
        }
        dependencies
    }
}

fn visit_artifact(artifact: &ResolvableArtifact, visitor: &mut dyn ArtifactVisitor) {
    if visitor.require_artifact_files() {
        if let Err(e) = artifact.file() {
            visitor.visit_failure(&e);
            return;
        }
    }
    visitor.visit_artifact(artifact);
}

impl From<ResolvableArtifact> for ResolvedArtifactSet {
    fn from(artifact: ResolvableArtifact) -> Self {
        Self::single(artifact)
    }
}

impl FromIterator<ResolvedArtifactSet> for ResolvedArtifactSet {
    fn from_iter<I: IntoIterator<Item = ResolvedArtifactSet>>(iter: I) -> Self {
        Self::of(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::files::{DirectoryFiles, FileCollection};
    use crate::artifacts::visitor::VisitAction;
    use crate::models::{AttributeMap, ComponentIdentifier};
    use crate::test_utils::{RecordingVisitor, VisitEvent, artifact, failing_artifact};
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn names(set: &ResolvedArtifactSet) -> Vec<String> {
        set.artifacts().iter().map(|a| a.id().name.name.clone()).collect()
    }

    #[test]
    fn test_of_flattens_and_drops_empty() {
        let inner = ResolvedArtifactSet::of([
            ResolvedArtifactSet::single(artifact("b")),
            ResolvedArtifactSet::Empty,
            ResolvedArtifactSet::single(artifact("c")),
        ]);
        let set = ResolvedArtifactSet::of([
            ResolvedArtifactSet::Empty,
            ResolvedArtifactSet::single(artifact("a")),
            inner,
        ]);

        let ResolvedArtifactSet::Composite(composite) = &set else {
            panic!("expected a composite, got {set:?}");
        };
        assert_eq!(composite.children().len(), 3);
        assert!(composite.children().iter().all(|c| matches!(c, ResolvedArtifactSet::Single(_))));
        assert_eq!(names(&set), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_of_collapses_trivial_sets() {
        assert!(ResolvedArtifactSet::of([]).is_empty());
        assert!(ResolvedArtifactSet::of([ResolvedArtifactSet::Empty, ResolvedArtifactSet::Empty]).is_empty());
        let single = ResolvedArtifactSet::of([ResolvedArtifactSet::Empty, artifact("a").into()]);
        assert!(matches!(single, ResolvedArtifactSet::Single(_)));
    }

    #[test]
    fn test_visit_reports_failures_in_place() {
        let set = ResolvedArtifactSet::of([
            artifact("a").into(),
            failing_artifact("b", "connection reset").into(),
            ResolvedArtifactSet::Broken(ResolveError::illegal_state("broken leaf")),
            artifact("c").into(),
        ]);

        let mut visitor = RecordingVisitor::requiring_files();
        set.visit(&mut visitor);

        assert_eq!(visitor.artifact_names(), vec!["a", "c"]);
        assert_eq!(visitor.failures().len(), 2);
        assert!(matches!(&visitor.events()[1], VisitEvent::Failure(msg) if msg.contains("connection reset")));
        assert!(matches!(&visitor.events()[3], VisitEvent::Artifact(name) if name == "c"));
    }

    #[test]
    fn test_visit_without_files_does_not_resolve() {
        let leaf = failing_artifact("b", "offline");
        let set = ResolvedArtifactSet::single(leaf);
        let mut visitor = RecordingVisitor::new();
        set.visit(&mut visitor);

        assert_eq!(visitor.artifact_names(), vec!["b"]);
        assert!(!set.artifacts()[0].is_resolved());
    }

    #[test]
    fn test_dynamic_collection_is_reevaluated_until_snapshot() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a.jar"), b"a").unwrap();
        let collection: Arc<dyn FileCollection> = Arc::new(DirectoryFiles::new(temp.path()).with_extension("jar"));
        let set = ResolvedArtifactSet::FileBacked(Arc::new(FileBackedArtifacts::dynamic(
            collection,
            ComponentIdentifier::Opaque("libs".to_string()),
            AttributeMap::empty(),
        )));

        let frozen = set.snapshot();
        std::fs::write(temp.path().join("b.jar"), b"b").unwrap();

        let mut live = RecordingVisitor::new();
        set.visit(&mut live);
        assert_eq!(live.artifact_names(), vec!["a", "b"]);

        let mut snapshot = RecordingVisitor::new();
        frozen.visit(&mut snapshot);
        assert_eq!(snapshot.artifact_names(), vec!["a"]);
        assert_eq!(names(&frozen), vec!["a"]);
    }

    #[test]
    fn test_prepare_for_visit_can_request_spec() {
        let collection: Arc<dyn FileCollection> = Arc::new(DirectoryFiles::new(PathBuf::from("/nowhere")));
        let set = ResolvedArtifactSet::FileBacked(Arc::new(FileBackedArtifacts::dynamic(
            collection,
            ComponentIdentifier::Opaque("libs".to_string()),
            AttributeMap::empty(),
        )));

        let mut visitor = RecordingVisitor::new().with_collection_action(VisitAction::Spec);
        set.visit(&mut visitor);
        assert_eq!(visitor.events(), &[VisitEvent::Spec("files in /nowhere".to_string())]);

        let mut skipping = RecordingVisitor::new().with_collection_action(VisitAction::Skip);
        set.visit(&mut skipping);
        assert!(skipping.events().is_empty());
    }

    #[test]
    fn test_retain_drops_rejected_leaves() {
        let set = ResolvedArtifactSet::of([
            artifact("a").into(),
            ResolvedArtifactSet::of([artifact("b").into(), artifact("c").into()]),
        ]);
        let kept = set.retain(&|a| a.id().name.name != "b");
        assert_eq!(names(&kept), vec!["a", "c"]);

        let only_b = set.retain(&|a| a.id().name.name == "b");
        assert!(matches!(only_b, ResolvedArtifactSet::Single(_)));
        assert!(set.retain(&|_| false).is_empty());
    }

    #[test]
    fn test_build_dependencies_are_deduplicated() {
        let set = ResolvedArtifactSet::of([
            artifact("a").with_build_dependencies(vec![":lib:jar".to_string()]).into(),
            artifact("b").with_build_dependencies(vec![":lib:jar".to_string(), ":app:jar".to_string()]).into(),
        ]);
        assert_eq!(set.build_dependencies(), vec![":lib:jar", ":app:jar"]);
    }
}
