//! Graph visiting, artifact selection and parallel file resolution end to end.

use std::sync::Arc;

use anyhow::Result;
use depot::artifacts::{FileBackedArtifacts, ParallelResolveDriver, TokioOperationQueue};
use depot::cache::policy::CachePolicy;
use depot::cache::{CacheLayout, ResolutionCaches};
use depot::models::{ArtifactIdentifier, ArtifactName, AttributeMap, ComponentIdentifier, ModuleComponentIdentifier};
use depot::results::{ComponentFilter, GraphEdge, GraphNode, NodeId, ResolvedArtifactsGraphVisitor, ResolvedGraph, SortOrder};
use depot::test_utils::{
    DescriptorBuilder, FakeRepository, ManualClock, RecordingVisitor, VisitEvent, init_test_logging,
};
use depot::variants::{
    ArtifactSelectionSpec, AttributeMatchingSelector, DefaultAttributeSchema, ModuleVariantResolver, VariantSelector,
};
use tempfile::TempDir;

fn module(name: &str) -> ModuleComponentIdentifier {
    ModuleComponentIdentifier::new("org", name, "1.0")
}

fn setup(temp: &TempDir) -> Result<(Arc<FakeRepository>, ModuleVariantResolver)> {
    init_test_logging(None);
    let repository = Arc::new(FakeRepository::new("R1", temp.path().join("repo")));
    let caches = ResolutionCaches::open(
        CacheLayout::new(temp.path().join("cache")),
        Arc::new(ManualClock::new(1_700_000_000_000)),
        None,
    )?;
    let caching = Arc::new(caches.caching_repository(repository.clone(), CachePolicy::default()));
    Ok((repository, ModuleVariantResolver::new(caching, Arc::new(DefaultAttributeSchema::new()))))
}

fn publish(repository: &FakeRepository, name: &str) {
    repository.publish(DescriptorBuilder::new("org", name, "1.0").variant("runtime", &[("usage", "runtime")], &[name]).build());
    repository.publish_file(&ArtifactIdentifier::new(module(name), ArtifactName::jar(name)), name.as_bytes());
}

/// app -> lib -> util, with a local file on the root.
fn graph(resolver: &ModuleVariantResolver) -> ResolvedGraph {
    let runtime = || vec!["runtime".to_string()];
    let root = GraphNode::new(NodeId(0), resolver.component(&module("app")), runtime()).with_files(
        FileBackedArtifacts::fixed(
            "/libs/local.jar",
            ComponentIdentifier::Opaque("local files".to_string()),
            AttributeMap::empty(),
        ),
    );
    ResolvedGraph::new(root)
        .with_node(
            GraphNode::new(NodeId(1), resolver.component(&module("lib")), runtime()).with_edge(GraphEdge::new(NodeId(0))),
        )
        .with_node(
            GraphNode::new(NodeId(2), resolver.component(&module("util")), runtime())
                .with_edge(GraphEdge::new(NodeId(1))),
        )
}

fn runtime_selector() -> Arc<dyn VariantSelector> {
    Arc::new(AttributeMatchingSelector::new(AttributeMap::of([("usage", "runtime")])))
}

#[tokio::test]
async fn test_dependency_first_pipeline_resolves_module_files() -> Result<()> {
    let temp = TempDir::new()?;
    let (repository, resolver) = setup(&temp)?;
    for name in ["app", "lib", "util"] {
        publish(&repository, name);
    }

    let mut visitor = ResolvedArtifactsGraphVisitor::new();
    graph(&resolver).visit(&mut visitor);
    let (graph_results, mut artifacts) = visitor.into_results()?;
    assert!(!graph_results.has_resolution_failures());
    assert_eq!(graph_results.root(), NodeId(0));

    let selector = runtime_selector();
    let selected = artifacts.select(
        &ComponentFilter::ModulesOnly,
        &selector,
        ArtifactSelectionSpec::graph_variants(),
        SortOrder::DependencyFirst,
    )?;
    let again = artifacts.select(
        &ComponentFilter::ModulesOnly,
        &selector,
        ArtifactSelectionSpec::graph_variants(),
        SortOrder::DependencyFirst,
    )?;
    assert!(Arc::ptr_eq(&selected, &again));

    let driver = ParallelResolveDriver::new(TokioOperationQueue::new(4));
    let mut recorder = RecordingVisitor::requiring_files();
    driver.visit(selected.artifacts(), &mut recorder).await;

    assert_eq!(recorder.artifact_names(), vec!["util", "lib"]);
    assert!(recorder.failures().is_empty());
    assert_eq!(repository.artifact_requests(), 2);
    for artifact in selected.artifacts().artifacts() {
        let file = artifact.resolved_file().expect("file should be prepared");
        assert!(file.starts_with(repository.root()));
    }
    Ok(())
}

#[tokio::test]
async fn test_missing_module_is_reported_in_place() -> Result<()> {
    let temp = TempDir::new()?;
    let (repository, resolver) = setup(&temp)?;
    publish(&repository, "app");
    publish(&repository, "lib");

    let mut visitor = ResolvedArtifactsGraphVisitor::new();
    graph(&resolver).visit(&mut visitor);
    let (_, mut artifacts) = visitor.into_results()?;
    let selected = artifacts.select(
        &ComponentFilter::ModulesOnly,
        &runtime_selector(),
        ArtifactSelectionSpec::graph_variants(),
        SortOrder::DependencyFirst,
    )?;

    let driver = ParallelResolveDriver::new(TokioOperationQueue::new(4));
    let mut recorder = RecordingVisitor::requiring_files();
    driver.visit(selected.artifacts(), &mut recorder).await;

    assert_eq!(recorder.events().len(), 2);
    assert!(matches!(&recorder.events()[0], VisitEvent::Failure(message) if message.contains("org:util:1.0")));
    assert_eq!(recorder.events()[1], VisitEvent::Artifact("lib".to_string()));
    assert_eq!(selected.artifacts_for_node(NodeId(1)).artifacts().len(), 1);
    Ok(())
}
