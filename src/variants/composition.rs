//! Variants that include variants of other components.
//!
//! A platform, a relocated module or an aggregating module publishes variants whose
//! artifacts live in other components. [`VariantComposer`] follows those
//! references, building a directed graph of variants, and produces one composite
//! artifact set in depth-first order: a variant's own artifacts first, then each
//! included variant in declaration order. A variant reached twice contributes once.
//!
//! Composition fails fast on configuration errors: a reference cycle yields
//! [`ResolveError::CircularComposition`] and two components providing the same
//! capability yield [`ResolveError::CapabilityConflict`].

use std::collections::HashMap;
use std::sync::Arc;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use tracing::debug;

use crate::artifacts::{ResolvedArtifactSet, VariantInfo};
use crate::core::ResolveError;
use crate::models::VariantReference;

/// A variant as seen by the composer.
#[derive(Debug, Clone)]
pub struct ComposableVariant {
    /// Description of the variant
    pub info: Arc<VariantInfo>,
    /// The variant's own artifacts
    pub artifacts: ResolvedArtifactSet,
    /// Included variants, in declaration order
    pub includes: Vec<VariantReference>,
}

/// Looks variants up by reference.
pub trait VariantCatalog {
    /// The referenced variant; [`ResolveError::VariantNotFound`] when it does not exist.
    fn lookup(&self, reference: &VariantReference) -> Result<ComposableVariant, ResolveError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    Gray,
    Black,
}

fn describe(reference: &VariantReference) -> String {
    format!("{}#{}", reference.component, reference.variant)
}

/// Composes variant artifacts across components.
#[derive(Debug, Default)]
pub struct VariantComposer {
    graph: DiGraph<VariantReference, ()>,
    nodes: HashMap<VariantReference, NodeIndex>,
    variants: HashMap<NodeIndex, ComposableVariant>,
}

impl VariantComposer {
    /// An empty composer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves `root` and everything it includes into one artifact set.
    pub fn compose(
        mut self,
        catalog: &dyn VariantCatalog,
        root: &VariantReference,
    ) -> Result<ResolvedArtifactSet, ResolveError> {
        let root_index = self.load(catalog, root)?;

        let mut colors = HashMap::new();
        let mut stack = Vec::new();
        let mut order = Vec::new();
        self.walk(root_index, &mut colors, &mut stack, &mut order)?;
        self.check_capabilities(root, &order)?;

        debug!("Composed {} from {} variants", describe(root), order.len());
        Ok(ResolvedArtifactSet::of(
            order.iter().filter_map(|index| self.variants.get(index)).map(|v| v.artifacts.clone()),
        ))
    }

    fn node(&mut self, reference: &VariantReference) -> (NodeIndex, bool) {
        if let Some(&index) = self.nodes.get(reference) {
            return (index, false);
        }
        let index = self.graph.add_node(reference.clone());
        self.nodes.insert(reference.clone(), index);
        (index, true)
    }

    /// Adds every variant reachable from `root` to the graph.
    fn load(&mut self, catalog: &dyn VariantCatalog, root: &VariantReference) -> Result<NodeIndex, ResolveError> {
        let (root_index, _) = self.node(root);
        let mut pending = vec![(root_index, root.clone())];
        while let Some((index, reference)) = pending.pop() {
            let variant = catalog.lookup(&reference)?;
            for include in &variant.includes {
                let (target, added) = self.node(include);
                self.graph.add_edge(index, target, ());
                if added {
                    pending.push((target, include.clone()));
                }
            }
            self.variants.insert(index, variant);
        }
        Ok(root_index)
    }

    fn walk(
        &self,
        index: NodeIndex,
        colors: &mut HashMap<NodeIndex, Color>,
        stack: &mut Vec<NodeIndex>,
        order: &mut Vec<NodeIndex>,
    ) -> Result<(), ResolveError> {
        colors.insert(index, Color::Gray);
        stack.push(index);
        order.push(index);

        let mut edges: Vec<_> = self.graph.edges(index).map(|e| (e.id(), e.target())).collect();
        edges.sort_by_key(|(id, _)| id.index());

        for (_, target) in edges {
            match colors.get(&target) {
                Some(Color::Black) => {}
                Some(Color::Gray) => {
                    let start = stack.iter().position(|&n| n == target).unwrap_or(0);
                    let chain: Vec<String> = stack[start..]
                        .iter()
                        .chain(std::iter::once(&target))
                        .map(|&n| describe(&self.graph[n]))
                        .collect();
                    return Err(ResolveError::CircularComposition {
                        chain: chain.join(" -> "),
                    });
                }
                None => self.walk(target, colors, stack, order)?,
            }
        }

        stack.pop();
        colors.insert(index, Color::Black);
        Ok(())
    }

    fn check_capabilities(&self, root: &VariantReference, order: &[NodeIndex]) -> Result<(), ResolveError> {
        let mut providers: Vec<(&VariantReference, &VariantInfo)> = Vec::new();
        for &index in order {
            let (Some(variant), reference) = (self.variants.get(&index), &self.graph[index]) else {
                continue;
            };
            for capability in &variant.info.capabilities {
                let clash = providers.iter().find(|(other, info)| {
                    other.component != reference.component
                        && info.capabilities.iter().any(|c| c.same_as(capability))
                });
                if let Some((_, other)) = clash {
                    return Err(ResolveError::CapabilityConflict {
                        capability: format!("{}:{}", capability.group, capability.name),
                        component: root.component.to_string(),
                        variants: vec![other.display_name.clone(), variant.info.display_name.clone()],
                    });
                }
            }
            providers.push((reference, &variant.info));
        }
        Ok(())
    }
}
