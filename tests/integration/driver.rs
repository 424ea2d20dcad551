//! Ordered visiting of artifacts whose files come from a repository.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use depot::artifacts::{ParallelResolveDriver, ResolvedArtifactSet, TokioOperationQueue};
use depot::cache::policy::CachePolicy;
use depot::cache::{CacheLayout, ResolutionCaches};
use depot::models::{ArtifactIdentifier, ArtifactName, AttributeMap, ModuleComponentIdentifier};
use depot::test_utils::{DescriptorBuilder, FakeRepository, ManualClock, RecordingVisitor, VisitEvent, delayed_artifact};
use depot::variants::{
    ArtifactSelectionSpec, AttributeMatchingSelector, DefaultAttributeSchema, ModuleVariantResolver,
    VariantResolvingArtifactSet,
};
use tempfile::TempDir;

struct Leaves {
    _temp: TempDir,
    repository: Arc<FakeRepository>,
    set: ResolvedArtifactSet,
}

/// Three single-artifact modules `a1`, `a2`, `a3`; the file of `a2` is never published.
fn leaves() -> Result<Leaves> {
    let temp = TempDir::new()?;
    let repository = Arc::new(FakeRepository::new("R1", temp.path().join("repo")));
    let caches = ResolutionCaches::open(CacheLayout::new(temp.path().join("cache")), Arc::new(ManualClock::new(0)), None)?;
    let resolver = ModuleVariantResolver::new(
        Arc::new(caches.caching_repository(repository.clone(), CachePolicy::default())),
        Arc::new(DefaultAttributeSchema::new()),
    );
    let selector = AttributeMatchingSelector::new(AttributeMap::of([("usage", "runtime")]));

    let mut children = Vec::new();
    for name in ["a1", "a2", "a3"] {
        let id = ModuleComponentIdentifier::new("org", name, "1.0");
        repository.publish(DescriptorBuilder::new("org", name, "1.0").variant("runtime", &[("usage", "runtime")], &[name]).build());
        if name != "a2" {
            repository.publish_file(&ArtifactIdentifier::new(id.clone(), ArtifactName::jar(name)), b"jar");
        }
        let edge = VariantResolvingArtifactSet::new(resolver.component(&id), vec!["runtime".to_string()]);
        children.push(edge.select(&selector, ArtifactSelectionSpec::graph_variants())?);
    }

    Ok(Leaves {
        _temp: temp,
        repository,
        set: ResolvedArtifactSet::of(children),
    })
}

#[tokio::test]
async fn test_failed_leaf_is_reported_between_its_neighbours() -> Result<()> {
    let leaves = leaves()?;
    let driver = ParallelResolveDriver::new(TokioOperationQueue::new(3));
    let mut visitor = RecordingVisitor::requiring_files();
    driver.visit(&leaves.set, &mut visitor).await;

    let events = visitor.events();
    assert_eq!(events.len(), 3);
    assert_eq!(events[0], VisitEvent::Artifact("a1".to_string()));
    assert!(matches!(&events[1], VisitEvent::Failure(message) if message.contains("a2")));
    assert_eq!(events[2], VisitEvent::Artifact("a3".to_string()));
    Ok(())
}

#[tokio::test]
async fn test_second_visit_does_not_refetch() -> Result<()> {
    let leaves = leaves()?;
    let driver = ParallelResolveDriver::new(TokioOperationQueue::new(3));

    let mut first = RecordingVisitor::requiring_files();
    driver.visit(&leaves.set, &mut first).await;
    let requests = leaves.repository.artifact_requests();
    assert_eq!(requests, 3);

    let mut second = RecordingVisitor::requiring_files();
    driver.visit(&leaves.set, &mut second).await;
    assert_eq!(second.events(), first.events());
    assert_eq!(leaves.repository.artifact_requests(), requests);
    Ok(())
}

#[tokio::test]
async fn test_slow_leaves_resolve_concurrently_in_order() {
    let set = ResolvedArtifactSet::of(
        (0..6).map(|i| delayed_artifact(&format!("slow{i}"), Duration::from_millis(200)).into()),
    );
    let driver = ParallelResolveDriver::new(TokioOperationQueue::new(6));
    let mut visitor = RecordingVisitor::requiring_files();

    let started = std::time::Instant::now();
    driver.visit(&set, &mut visitor).await;

    let expected: Vec<String> = (0..6).map(|i| format!("slow{i}")).collect();
    assert_eq!(visitor.artifact_names(), expected);
    assert!(started.elapsed() < Duration::from_millis(1000));
}
