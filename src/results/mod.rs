//! Aggregation of artifact results over a resolved dependency graph.
//!
//! After graph resolution, the graph is replayed to a
//! [`ResolvedArtifactsGraphVisitor`], which registers one [`ArtifactSet`] per
//! incoming edge of every node (shared per node when the edge changes nothing) and
//! one per local file dependency. The resulting [`VisitedArtifactResults`] is then
//! asked to [`select`](VisitedArtifactResults::select) artifacts for a set of
//! requested attributes, yielding an immutable [`SelectedArtifactResults`].
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use depot::models::AttributeMap;
//! use depot::results::{ComponentFilter, ResolvedArtifactsGraphVisitor, ResolvedGraph, SortOrder};
//! use depot::variants::{ArtifactSelectionSpec, AttributeMatchingSelector, VariantSelector};
//!
//! # fn example(graph: ResolvedGraph) -> Result<(), depot::core::ResolveError> {
//! let mut visitor = ResolvedArtifactsGraphVisitor::new();
//! graph.visit(&mut visitor);
//! let (graph_results, mut artifacts) = visitor.into_results()?;
//!
//! let selector: Arc<dyn VariantSelector> =
//!     Arc::new(AttributeMatchingSelector::new(AttributeMap::of([("usage", "runtime")])));
//! let selected = artifacts.select(
//!     &ComponentFilter::All,
//!     &selector,
//!     ArtifactSelectionSpec::default(),
//!     SortOrder::DependencyFirst,
//! )?;
//! println!("{} failures, {:?}", graph_results.resolution_failures().len(), selected.artifacts());
//! # Ok(())
//! # }
//! ```

pub mod artifacts;
pub mod graph;
pub mod visitor;

pub use artifacts::{
    ArtifactSet, ArtifactSetId, ArtifactSetSource, ComponentFilter, SelectedArtifactResults, SortOrder,
    VisitedArtifactResults,
};
pub use graph::{DependencyGraphVisitor, GraphEdge, GraphNode, NodeId, ResolvedGraph};
pub use visitor::{ResolvedArtifactsGraphVisitor, VisitedGraphResults};
