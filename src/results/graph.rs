//! The resolved dependency graph as handed over by graph resolution.
//!
//! Building the graph (conflict resolution, traversal order) happens elsewhere.
//! This module only describes the finished graph and replays it to a
//! [`DependencyGraphVisitor`].

use std::fmt;
use std::sync::Arc;

use crate::artifacts::FileBackedArtifacts;
use crate::core::ResolveError;
use crate::models::{AttributeMap, DependencyDescriptor};
use crate::variants::ComponentVariants;

/// Identifies a node of the resolved graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An edge into a node.
#[derive(Debug, Clone)]
pub struct GraphEdge {
    /// The node declaring the dependency
    pub from: NodeId,
    /// The declared dependency, when the edge comes from a descriptor
    pub dependency: Option<DependencyDescriptor>,
    /// Attributes the dependency forces on the target
    pub attributes: AttributeMap,
}

impl GraphEdge {
    /// A plain edge from `from`.
    pub fn new(from: NodeId) -> Self {
        Self {
            from,
            dependency: None,
            attributes: AttributeMap::empty(),
        }
    }

    /// Same edge, declared by `dependency`.
    #[must_use]
    pub fn with_dependency(mut self, dependency: DependencyDescriptor) -> Self {
        self.dependency = Some(dependency);
        self
    }

    /// Same edge, forcing `attributes`.
    #[must_use]
    pub fn with_attributes(mut self, attributes: AttributeMap) -> Self {
        self.attributes = attributes;
        self
    }
}

/// A selected component variant in the resolved graph.
#[derive(Debug, Clone)]
pub struct GraphNode {
    /// Node identifier
    pub id: NodeId,
    /// The component and its lazily resolved variants
    pub component: Arc<ComponentVariants>,
    /// Variants graph resolution picked for this node
    pub variants: Vec<String>,
    /// Incoming edges, in declaration order
    pub incoming: Vec<GraphEdge>,
    /// Local files declared by this node
    pub files: Vec<Arc<FileBackedArtifacts>>,
    /// Non-fatal failure graph resolution attached to the node
    pub failure: Option<ResolveError>,
}

impl GraphNode {
    /// A node with no edges and no files.
    pub fn new(id: NodeId, component: Arc<ComponentVariants>, variants: Vec<String>) -> Self {
        Self {
            id,
            component,
            variants,
            incoming: Vec::new(),
            files: Vec::new(),
            failure: None,
        }
    }

    /// Same node with an extra incoming edge.
    #[must_use]
    pub fn with_edge(mut self, edge: GraphEdge) -> Self {
        self.incoming.push(edge);
        self
    }

    /// Same node with local files.
    #[must_use]
    pub fn with_files(mut self, files: FileBackedArtifacts) -> Self {
        self.files.push(Arc::new(files));
        self
    }

    /// Same node carrying a resolution failure.
    #[must_use]
    pub fn with_failure(mut self, failure: ResolveError) -> Self {
        self.failure = Some(failure);
        self
    }
}

/// Receives the resolved graph.
pub trait DependencyGraphVisitor {
    /// Called first, with the root node.
    fn start(&mut self, root: &GraphNode);

    /// Called once per node, in graph order.
    fn visit_node(&mut self, node: &GraphNode);

    /// Called once per node after every node was visited, with its incoming edges.
    fn visit_edges(&mut self, node: &GraphNode);

    /// Called last.
    fn finish(&mut self, root: &GraphNode);
}

/// A finished graph: a root and its nodes in traversal order.
#[derive(Debug, Clone)]
pub struct ResolvedGraph {
    root: GraphNode,
    nodes: Vec<GraphNode>,
}

impl ResolvedGraph {
    /// A graph with only a root.
    pub fn new(root: GraphNode) -> Self {
        Self {
            root,
            nodes: Vec::new(),
        }
    }

    /// Appends a node in traversal order.
    #[must_use]
    pub fn with_node(mut self, node: GraphNode) -> Self {
        self.nodes.push(node);
        self
    }

    /// The root node.
    pub fn root(&self) -> &GraphNode {
        &self.root
    }

    /// Non-root nodes, in traversal order.
    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    /// Replays the graph: start, every node, every node's edges, finish.
    pub fn visit(&self, visitor: &mut dyn DependencyGraphVisitor) {
        visitor.start(&self.root);
        for node in std::iter::once(&self.root).chain(&self.nodes) {
            visitor.visit_node(node);
        }
        for node in std::iter::once(&self.root).chain(&self.nodes) {
            visitor.visit_edges(node);
        }
        visitor.finish(&self.root);
    }
}
