//! Visitor protocol for artifact sets.

use super::artifact::ResolvableArtifact;
use super::files::FileCollection;
use crate::core::ResolveError;

/// What a visitor wants done with a collection-shaped source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VisitAction {
    /// Evaluate the collection and visit each file.
    #[default]
    Visit,
    /// Hand the collection itself to [`ArtifactVisitor::visit_spec`] without evaluating it.
    Spec,
    /// Ignore the collection.
    Skip,
}

/// Receives the artifacts and failures of a
/// [`ResolvedArtifactSet`](super::ResolvedArtifactSet) in deterministic order.
pub trait ArtifactVisitor {
    /// One artifact. When [`require_artifact_files`](Self::require_artifact_files) is
    /// true the artifact's file has already resolved successfully.
    fn visit_artifact(&mut self, artifact: &ResolvableArtifact);

    /// A failure found in place of an artifact.
    fn visit_failure(&mut self, failure: &ResolveError);

    /// Whether files must be resolved before artifacts are visited.
    fn require_artifact_files(&self) -> bool {
        false
    }

    /// Called before a dynamic file collection is evaluated.
    fn prepare_for_visit(&mut self, _collection: &dyn FileCollection) -> VisitAction {
        VisitAction::Visit
    }

    /// Receives collections for which [`prepare_for_visit`](Self::prepare_for_visit)
    /// answered [`VisitAction::Spec`].
    fn visit_spec(&mut self, _collection: &dyn FileCollection) {}
}
