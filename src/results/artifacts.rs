//! Artifact sets collected during graph visitation and the selections made from them.
//!
//! [`VisitedArtifactResults`] moves through three states:
//!
//! ```text
//! Collecting --finish()--> Finished --select()--> Selected
//! ```
//!
//! Artifact sets can only be registered while collecting. Per-node and per-id queries
//! are only answered once the traversal has finished; asking earlier is a contract
//! violation and fails with [`ResolveError::IllegalState`]. Selection may be repeated;
//! asking twice with the same filter, selector, spec and order returns the memoised
//! result.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use super::graph::NodeId;
use crate::artifacts::{FileBackedArtifacts, ResolvedArtifactSet};
use crate::core::ResolveError;
use crate::models::ComponentIdentifier;
use crate::variants::{ArtifactSelectionSpec, VariantResolvingArtifactSet, VariantSelector};

/// Identifies an artifact set registered with [`VisitedArtifactResults`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArtifactSetId(pub usize);

/// Where an artifact set's artifacts come from.
#[derive(Debug, Clone)]
pub enum ArtifactSetSource {
    /// Variants of a component, selected per edge
    Variants(VariantResolvingArtifactSet),
    /// Local files declared by a node
    Files(Arc<FileBackedArtifacts>),
}

/// Artifacts contributed to one node, before selection.
#[derive(Debug, Clone)]
pub struct ArtifactSet {
    id: ArtifactSetId,
    node: NodeId,
    source: ArtifactSetSource,
}

impl ArtifactSet {
    /// Identifier of the set.
    pub fn id(&self) -> ArtifactSetId {
        self.id
    }

    /// The node the artifacts belong to.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// The source.
    pub fn source(&self) -> &ArtifactSetSource {
        &self.source
    }

    /// The component owning the artifacts.
    pub fn component(&self) -> &ComponentIdentifier {
        match &self.source {
            ArtifactSetSource::Variants(variants) => variants.component().component(),
            ArtifactSetSource::Files(files) => files.component(),
        }
    }

    /// Selects the artifacts. Local files are not subject to variant selection.
    pub fn select(
        &self,
        selector: &dyn VariantSelector,
        spec: ArtifactSelectionSpec,
    ) -> Result<ResolvedArtifactSet, ResolveError> {
        match &self.source {
            ArtifactSetSource::Variants(variants) => variants.select(selector, spec),
            ArtifactSetSource::Files(files) => Ok(ResolvedArtifactSet::FileBacked(files.clone())),
        }
    }
}

/// Order of the aggregate artifact set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Graph encounter order, consumers before their dependencies
    #[default]
    Default,
    /// Dependencies before their consumers
    DependencyFirst,
}

/// Decides which components take part in a selection.
#[derive(Clone, Default)]
pub enum ComponentFilter {
    /// Every component
    #[default]
    All,
    /// Repository modules only; projects and local files are skipped
    ModulesOnly,
    /// A custom predicate
    Custom {
        /// Name used in diagnostics
        description: String,
        /// The predicate
        predicate: Arc<dyn Fn(&ComponentIdentifier) -> bool + Send + Sync>,
    },
}


impl ComponentFilter {
    /// A custom filter.
    pub fn custom(
        description: impl Into<String>,
        predicate: impl Fn(&ComponentIdentifier) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self::Custom {
            description: description.into(),
            predicate: Arc::new(predicate),
        }
    }

    /// Whether `component` passes.
    pub fn accepts(&self, component: &ComponentIdentifier) -> bool {
        match self {
            Self::All => true,
            Self::ModulesOnly => matches!(component, ComponentIdentifier::Module(_)),
            Self::Custom {
                predicate,
                ..
            } => predicate(component),
        }
    }

    /// Whether both filters are the same filter. Custom filters compare by predicate identity.
    fn same_as(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::All, Self::All) | (Self::ModulesOnly, Self::ModulesOnly) => true,
            (
                Self::Custom {
                    predicate: a,
                    ..
                },
                Self::Custom {
                    predicate: b,
                    ..
                },
            ) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for ComponentFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("All"),
            Self::ModulesOnly => f.write_str("ModulesOnly"),
            Self::Custom {
                description,
                ..
            } => f.debug_tuple("Custom").field(description).finish(),
        }
    }
}

/// Immutable outcome of a selection.
#[derive(Debug, Clone)]
pub struct SelectedArtifactResults {
    by_node: HashMap<NodeId, ResolvedArtifactSet>,
    by_id: HashMap<ArtifactSetId, ResolvedArtifactSet>,
    all: ResolvedArtifactSet,
    order: SortOrder,
}

impl SelectedArtifactResults {
    /// Every selected artifact, in the requested order.
    pub fn artifacts(&self) -> &ResolvedArtifactSet {
        &self.all
    }

    /// The order `artifacts` was built in.
    pub fn sort_order(&self) -> SortOrder {
        self.order
    }

    /// Artifacts selected for one node; empty when the node contributed nothing.
    pub fn artifacts_for_node(&self, node: NodeId) -> ResolvedArtifactSet {
        self.by_node.get(&node).cloned().unwrap_or_default()
    }

    /// Artifacts selected from one artifact set; empty when it was filtered out.
    pub fn artifacts_with_id(&self, id: ArtifactSetId) -> ResolvedArtifactSet {
        self.by_id.get(&id).cloned().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Collecting,
    Finished,
    Selected,
}

/// Arguments of the last selection. Holding the `Arc`s keeps their allocations alive, so
/// pointer identity cannot be reused by a different selector or predicate.
#[derive(Clone)]
struct SelectionKey {
    filter: ComponentFilter,
    selector: Arc<dyn VariantSelector>,
    spec: ArtifactSelectionSpec,
    order: SortOrder,
}

impl SelectionKey {
    fn matches(
        &self,
        filter: &ComponentFilter,
        selector: &Arc<dyn VariantSelector>,
        spec: ArtifactSelectionSpec,
        order: SortOrder,
    ) -> bool {
        self.spec == spec && self.order == order && self.filter.same_as(filter) && Arc::ptr_eq(&self.selector, selector)
    }
}

impl fmt::Debug for SelectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectionKey")
            .field("filter", &self.filter)
            .field("spec", &self.spec)
            .field("order", &self.order)
            .finish_non_exhaustive()
    }
}

/// Artifact sets of a whole graph, keyed by node and by set id.
#[derive(Debug)]
pub struct VisitedArtifactResults {
    state: State,
    sets: Vec<Arc<ArtifactSet>>,
    node_order: Vec<NodeId>,
    by_node: HashMap<NodeId, Vec<ArtifactSetId>>,
    last_selection: Option<(SelectionKey, Arc<SelectedArtifactResults>)>,
}

impl Default for VisitedArtifactResults {
    fn default() -> Self {
        Self::new()
    }
}

impl VisitedArtifactResults {
    /// Empty results, collecting.
    pub fn new() -> Self {
        Self {
            state: State::Collecting,
            sets: Vec::new(),
            node_order: Vec::new(),
            by_node: HashMap::new(),
            last_selection: None,
        }
    }

    /// Registers an artifact set for `node`.
    pub fn add_artifact_set(
        &mut self,
        node: NodeId,
        source: ArtifactSetSource,
    ) -> Result<Arc<ArtifactSet>, ResolveError> {
        if self.state != State::Collecting {
            return Err(ResolveError::illegal_state("cannot add artifact sets after graph traversal finished"));
        }
        let id = ArtifactSetId(self.sets.len());
        let set = Arc::new(ArtifactSet {
            id,
            node,
            source,
        });
        self.sets.push(set.clone());
        self.by_node
            .entry(node)
            .or_insert_with(|| {
                self.node_order.push(node);
                Vec::new()
            })
            .push(id);
        Ok(set)
    }

    /// Ends collection.
    pub fn finish(&mut self) -> Result<(), ResolveError> {
        if self.state != State::Collecting {
            return Err(ResolveError::illegal_state("graph traversal already finished"));
        }
        self.state = State::Finished;
        debug!("Collected {} artifact sets for {} nodes", self.sets.len(), self.node_order.len());
        Ok(())
    }

    /// Whether traversal has finished.
    pub fn is_finished(&self) -> bool {
        self.state != State::Collecting
    }

    fn require_finished(&self, operation: &str) -> Result<(), ResolveError> {
        if self.state == State::Collecting {
            return Err(ResolveError::illegal_state(format!(
                "{operation} called before graph traversal finished"
            )));
        }
        Ok(())
    }

    /// Number of registered artifact sets.
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    /// Whether nothing was registered.
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// The artifact sets of `node`, in registration order.
    pub fn artifacts_for_node(&self, node: NodeId) -> Result<Vec<Arc<ArtifactSet>>, ResolveError> {
        self.require_finished("artifacts_for_node")?;
        Ok(self
            .by_node
            .get(&node)
            .map(|ids| ids.iter().map(|id| self.sets[id.0].clone()).collect())
            .unwrap_or_default())
    }

    /// One artifact set.
    pub fn artifacts_with_id(&self, id: ArtifactSetId) -> Result<Arc<ArtifactSet>, ResolveError> {
        self.require_finished("artifacts_with_id")?;
        self.sets
            .get(id.0)
            .cloned()
            .ok_or_else(|| ResolveError::illegal_state(format!("no artifact set with id {}", id.0)))
    }

    /// Selects artifacts from every registered set.
    ///
    /// Configuration conflicts abort the selection. The aggregate set follows node
    /// encounter order, reversed for [`SortOrder::DependencyFirst`].
    pub fn select(
        &mut self,
        filter: &ComponentFilter,
        selector: &Arc<dyn VariantSelector>,
        spec: ArtifactSelectionSpec,
        order: SortOrder,
    ) -> Result<Arc<SelectedArtifactResults>, ResolveError> {
        self.require_finished("select")?;
        if let Some((last, results)) = &self.last_selection
            && last.matches(filter, selector, spec, order)
        {
            return Ok(results.clone());
        }

        let mut by_id = HashMap::new();
        let mut by_node = HashMap::new();
        let mut node_sets = Vec::with_capacity(self.node_order.len());
        for node in &self.node_order {
            let mut selected = Vec::new();
            for id in self.by_node.get(node).into_iter().flatten() {
                let set = &self.sets[id.0];
                if !filter.accepts(set.component()) {
                    continue;
                }
                let artifacts = set.select(selector.as_ref(), spec)?;
                by_id.insert(*id, artifacts.clone());
                selected.push(artifacts);
            }
            let node_set = ResolvedArtifactSet::of(selected);
            by_node.insert(*node, node_set.clone());
            node_sets.push(node_set);
        }

        if order == SortOrder::DependencyFirst {
            node_sets.reverse();
        }
        let results = Arc::new(SelectedArtifactResults {
            by_node,
            by_id,
            all: ResolvedArtifactSet::of(node_sets),
            order,
        });
        self.state = State::Selected;
        let key = SelectionKey {
            filter: filter.clone(),
            selector: selector.clone(),
            spec,
            order,
        };
        self.last_selection = Some((key, results.clone()));
        Ok(results)
    }
}
