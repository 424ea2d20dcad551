//! Builds [`VisitedArtifactResults`] while the resolved graph is replayed.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use super::artifacts::{ArtifactSet, ArtifactSetSource, VisitedArtifactResults};
use super::graph::{DependencyGraphVisitor, GraphEdge, GraphNode, NodeId};
use crate::core::ResolveError;
use crate::variants::VariantResolvingArtifactSet;

/// Outcome of graph resolution: the root and the non-fatal failures met on the way.
///
/// Failures are reported next to the artifact results, never instead of them.
#[derive(Debug, Clone)]
pub struct VisitedGraphResults {
    root: NodeId,
    failures: Vec<ResolveError>,
}

impl VisitedGraphResults {
    /// Results for `root` with the given failures.
    pub fn new(root: NodeId, failures: Vec<ResolveError>) -> Self {
        Self {
            root,
            failures,
        }
    }

    /// The root node.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Whether any node failed to resolve.
    pub fn has_resolution_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// The failures, in graph order.
    pub fn resolution_failures(&self) -> &[ResolveError] {
        &self.failures
    }
}

/// Registers one artifact set per incoming edge, sharing a single set per node
/// across edges that leave the node's artifacts untouched.
#[derive(Debug, Default)]
pub struct ResolvedArtifactsGraphVisitor {
    artifacts: VisitedArtifactResults,
    shared: HashMap<NodeId, Arc<ArtifactSet>>,
    edge_sets: Vec<(NodeId, NodeId, Arc<ArtifactSet>)>,
    failures: Vec<ResolveError>,
    root: Option<NodeId>,
    error: Option<ResolveError>,
}

impl ResolvedArtifactsGraphVisitor {
    /// A fresh visitor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Artifact sets per edge as `(from, to, set)`, in visit order.
    pub fn edge_sets(&self) -> &[(NodeId, NodeId, Arc<ArtifactSet>)] {
        &self.edge_sets
    }

    fn add(&mut self, node: NodeId, source: ArtifactSetSource) -> Option<Arc<ArtifactSet>> {
        match self.artifacts.add_artifact_set(node, source) {
            Ok(set) => Some(set),
            Err(e) => {
                warn!("Dropping artifact set for node {}: {}", node, e);
                self.error.get_or_insert(e);
                None
            }
        }
    }

    fn edge_set(&mut self, node: &GraphNode, edge: &GraphEdge) -> Option<Arc<ArtifactSet>> {
        let mut resolving = VariantResolvingArtifactSet::new(node.component.clone(), node.variants.clone())
            .with_dependency_attributes(edge.attributes.clone());
        if let Some(dependency) = &edge.dependency {
            resolving = resolving
                .with_artifact_overrides(dependency.artifacts.clone())
                .with_excludes(dependency.excludes.clone());
        }

        if resolving.modifies_artifacts() {
            return self.add(node.id, ArtifactSetSource::Variants(resolving));
        }
        if let Some(shared) = self.shared.get(&node.id) {
            return Some(shared.clone());
        }
        let set = self.add(node.id, ArtifactSetSource::Variants(resolving))?;
        self.shared.insert(node.id, set.clone());
        Some(set)
    }

    /// The collected results. Fails when the graph was replayed out of order.
    pub fn into_results(self) -> Result<(VisitedGraphResults, VisitedArtifactResults), ResolveError> {
        if let Some(error) = self.error {
            return Err(error);
        }
        let root = self
            .root
            .ok_or_else(|| ResolveError::illegal_state("graph visitor finished without a root"))?;
        if !self.artifacts.is_finished() {
            return Err(ResolveError::illegal_state("graph traversal has not finished"));
        }
        Ok((VisitedGraphResults::new(root, self.failures), self.artifacts))
    }
}

impl DependencyGraphVisitor for ResolvedArtifactsGraphVisitor {
    fn start(&mut self, root: &GraphNode) {
        self.root = Some(root.id);
    }

    fn visit_node(&mut self, node: &GraphNode) {
        if let Some(failure) = &node.failure {
            self.failures.push(failure.clone());
        }
        for files in &node.files {
            self.add(node.id, ArtifactSetSource::Files(files.clone()));
        }
    }

    fn visit_edges(&mut self, node: &GraphNode) {
        if Some(node.id) == self.root {
            return;
        }
        for edge in &node.incoming {
            if let Some(set) = self.edge_set(node, edge) {
                self.edge_sets.push((edge.from, node.id, set));
            }
        }
    }

    fn finish(&mut self, _root: &GraphNode) {
        if let Err(e) = self.artifacts.finish() {
            self.error.get_or_insert(e);
        }
        debug!(
            "Graph visited: {} edge contributions, {} failures",
            self.edge_sets.len(),
            self.failures.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::FileBackedArtifacts;
    use crate::models::{ArtifactName, AttributeMap, ComponentIdentifier, DependencyDescriptor, ModuleComponentIdentifier};
    use crate::results::graph::ResolvedGraph;
    use crate::test_utils::StaticVariantSource;
    use crate::variants::ComponentVariants;

    fn component(module: &str) -> Arc<ComponentVariants> {
        Arc::new(ComponentVariants::new(Arc::new(
            StaticVariantSource::new(ModuleComponentIdentifier::new("org", module, "1.0")).variant(
                "runtime",
                &[("usage", "runtime")],
                &[module],
            ),
        )))
    }

    fn node(id: u64, module: &str) -> GraphNode {
        GraphNode::new(NodeId(id), component(module), vec!["runtime".to_string()])
    }

    #[test]
    fn test_unmodified_edges_share_one_set() {
        let mut overriding = DependencyDescriptor::new(ModuleComponentIdentifier::new("org", "lib", "1.0"));
        overriding.artifacts.push(ArtifactName::jar("lib").with_classifier("tests"));

        let graph = ResolvedGraph::new(node(0, "root"))
            .with_node(node(1, "app").with_edge(GraphEdge::new(NodeId(0))))
            .with_node(node(2, "util").with_edge(GraphEdge::new(NodeId(1))))
            .with_node(
                node(3, "lib")
                    .with_edge(GraphEdge::new(NodeId(1)))
                    .with_edge(GraphEdge::new(NodeId(2)))
                    .with_edge(GraphEdge::new(NodeId(0)).with_dependency(overriding)),
            );

        let mut visitor = ResolvedArtifactsGraphVisitor::new();
        graph.visit(&mut visitor);

        let lib_edges: Vec<_> = visitor.edge_sets().iter().filter(|(_, to, _)| *to == NodeId(3)).collect();
        assert_eq!(lib_edges.len(), 3);
        assert!(Arc::ptr_eq(&lib_edges[0].2, &lib_edges[1].2));
        assert!(!Arc::ptr_eq(&lib_edges[0].2, &lib_edges[2].2));

        let (graph_results, artifacts) = visitor.into_results().unwrap();
        assert_eq!(graph_results.root(), NodeId(0));
        assert_eq!(artifacts.artifacts_for_node(NodeId(3)).unwrap().len(), 2);
        assert!(artifacts.artifacts_for_node(NodeId(0)).unwrap().is_empty());
        assert_eq!(artifacts.len(), 4);
    }

    #[test]
    fn test_forced_attributes_prevent_sharing() {
        let graph = ResolvedGraph::new(node(0, "root")).with_node(
            node(1, "lib")
                .with_edge(GraphEdge::new(NodeId(0)))
                .with_edge(GraphEdge::new(NodeId(0)).with_attributes(AttributeMap::of([("usage", "api")]))),
        );
        let mut visitor = ResolvedArtifactsGraphVisitor::new();
        graph.visit(&mut visitor);
        let (_, artifacts) = visitor.into_results().unwrap();
        assert_eq!(artifacts.artifacts_for_node(NodeId(1)).unwrap().len(), 2);
    }

    #[test]
    fn test_failures_and_files_are_collected() {
        let root = node(0, "root").with_files(FileBackedArtifacts::fixed(
            "/libs/local.jar",
            ComponentIdentifier::Opaque("local files".to_string()),
            AttributeMap::empty(),
        ));
        let broken = node(1, "flaky")
            .with_edge(GraphEdge::new(NodeId(0)))
            .with_failure(ResolveError::ModuleResolutionFailed {
                component: "org:flaky:1.0".to_string(),
                repository: "R1".to_string(),
                reason: "timeout".to_string(),
            });
        let graph = ResolvedGraph::new(root).with_node(broken);

        let mut visitor = ResolvedArtifactsGraphVisitor::new();
        graph.visit(&mut visitor);
        let (graph_results, artifacts) = visitor.into_results().unwrap();

        assert!(graph_results.has_resolution_failures());
        assert_eq!(graph_results.resolution_failures().len(), 1);
        let root_sets = artifacts.artifacts_for_node(NodeId(0)).unwrap();
        assert_eq!(root_sets.len(), 1);
        assert!(matches!(root_sets[0].source(), ArtifactSetSource::Files(_)));
    }
}
