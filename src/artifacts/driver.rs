//! Parallel preparation of artifact files before a visit.
//!
//! Visiting a [`ResolvedArtifactSet`] with a file-requiring visitor resolves every
//! artifact one after another on the calling thread. [`ParallelResolveDriver`]
//! splits the work instead:
//!
//! 1. the set is snapshotted so dynamic file collections are evaluated exactly once;
//! 2. artifacts flagged as cheap are resolved inline, every other unresolved
//!    artifact becomes a [`PrepareOperation`] submitted to a [`PrepareBatch`];
//! 3. the batch runs on an [`OperationQueue`] and is awaited as a whole;
//! 4. the snapshot is visited in its usual order, so results arrive in the same
//!    order whatever order the queue finished in.
//!
//! A failing artifact never aborts the batch. Its failure is memoised on the
//! artifact and surfaces through [`ArtifactVisitor::visit_failure`] at its position.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use super::artifact::ResolvableArtifact;
use super::files::FileCollection;
use super::set::ResolvedArtifactSet;
use super::visitor::{ArtifactVisitor, VisitAction};
use crate::constants::default_max_parallel;
use crate::core::ResolveError;

/// Resolves one artifact's file in the background.
#[derive(Debug, Clone)]
pub struct PrepareOperation {
    artifact: Arc<ResolvableArtifact>,
}

impl PrepareOperation {
    /// Prepares `artifact`.
    pub fn new(artifact: Arc<ResolvableArtifact>) -> Self {
        Self {
            artifact,
        }
    }

    /// The artifact being prepared.
    pub fn artifact(&self) -> &Arc<ResolvableArtifact> {
        &self.artifact
    }

    /// Runs the resolver; the outcome stays on the artifact.
    pub fn run(&self) {
        if let Err(e) = self.artifact.file() {
            debug!("Preparing {} failed: {}", self.artifact.id(), e);
        }
    }
}

/// Operations submitted together and awaited as a unit.
#[derive(Debug, Default)]
pub struct PrepareBatch {
    operations: Vec<PrepareOperation>,
}

impl PrepareBatch {
    /// An empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an operation.
    pub fn submit(&mut self, operation: PrepareOperation) {
        self.operations.push(operation);
    }

    /// Number of submitted operations.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Whether nothing was submitted.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// The submitted operations, in submission order.
    pub fn into_operations(self) -> Vec<PrepareOperation> {
        self.operations
    }
}

/// Runs batches of prepare operations.
pub trait OperationQueue: Send + Sync {
    /// Runs every operation of `batch` and completes once all of them have finished.
    fn run_and_await(&self, batch: PrepareBatch) -> impl Future<Output = ()> + Send;
}

/// Runs operations on tokio's blocking pool with bounded parallelism.
#[derive(Debug, Clone, Copy)]
pub struct TokioOperationQueue {
    max_parallel: usize,
}

impl TokioOperationQueue {
    /// A queue running at most `max_parallel` operations at once.
    pub fn new(max_parallel: usize) -> Self {
        Self {
            max_parallel: max_parallel.max(1),
        }
    }

    /// The parallelism bound.
    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }
}

impl Default for TokioOperationQueue {
    fn default() -> Self {
        Self::new(default_max_parallel())
    }
}

impl OperationQueue for TokioOperationQueue {
    async fn run_and_await(&self, batch: PrepareBatch) {
        stream::iter(batch.into_operations())
            .map(|operation| async move {
                let id = operation.artifact().id().to_string();
                if let Err(e) = tokio::task::spawn_blocking(move || operation.run()).await {
                    warn!("Prepare task for {} did not complete: {}", id, e);
                }
            })
            .buffer_unordered(self.max_parallel)
            .collect::<Vec<()>>()
            .await;
    }
}

/// Runs operations one by one on the calling task.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineOperationQueue;

impl OperationQueue for InlineOperationQueue {
    async fn run_and_await(&self, batch: PrepareBatch) {
        for operation in batch.into_operations() {
            operation.run();
        }
    }
}

/// Prepares files in parallel, then visits in order.
#[derive(Debug, Clone, Default)]
pub struct ParallelResolveDriver<Q: OperationQueue> {
    queue: Q,
}

impl<Q: OperationQueue> ParallelResolveDriver<Q> {
    /// A driver submitting work to `queue`.
    pub fn new(queue: Q) -> Self {
        Self {
            queue,
        }
    }

    /// The queue.
    pub fn queue(&self) -> &Q {
        &self.queue
    }

    /// Visits `set`, preparing files first when the visitor needs them.
    pub async fn visit<V>(&self, set: &ResolvedArtifactSet, visitor: &mut V)
    where
        V: ArtifactVisitor + ?Sized,
    {
        let snapshot = set.snapshot();
        if visitor.require_artifact_files() {
            let batch = Self::plan(&snapshot);
            if !batch.is_empty() {
                debug!("Preparing {} artifact files", batch.len());
                self.queue.run_and_await(batch).await;
            }
        }
        visit_dyn(&snapshot, visitor);
    }

    fn plan(set: &ResolvedArtifactSet) -> PrepareBatch {
        let mut batch = PrepareBatch::new();
        let mut seen = HashSet::new();
        for artifact in set.artifacts() {
            if artifact.is_resolved() || !seen.insert(Arc::as_ptr(&artifact)) {
                continue;
            }
            if artifact.is_resolve_synchronously() {
                PrepareOperation::new(artifact).run();
            } else {
                batch.submit(PrepareOperation::new(artifact));
            }
        }
        batch
    }
}

fn visit_dyn<V: ArtifactVisitor + ?Sized>(set: &ResolvedArtifactSet, visitor: &mut V) {
    let mut adapter = Forward(visitor);
    set.visit(&mut adapter);
}

/// Lets an unsized visitor be passed where `&mut dyn ArtifactVisitor` is expected.
struct Forward<'a, V: ?Sized>(&'a mut V);

impl<V: ArtifactVisitor + ?Sized> ArtifactVisitor for Forward<'_, V> {
    fn visit_artifact(&mut self, artifact: &ResolvableArtifact) {
        self.0.visit_artifact(artifact);
    }

    fn visit_failure(&mut self, failure: &ResolveError) {
        self.0.visit_failure(failure);
    }

    fn require_artifact_files(&self) -> bool {
        self.0.require_artifact_files()
    }

    fn prepare_for_visit(&mut self, collection: &dyn FileCollection) -> VisitAction {
        self.0.prepare_for_visit(collection)
    }

    fn visit_spec(&mut self, collection: &dyn FileCollection) {
        self.0.visit_spec(collection);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{RecordingVisitor, VisitEvent, artifact, failing_artifact};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_parallel_visit_keeps_set_order() {
        let leaves: Vec<ResolvedArtifactSet> = (0..8)
            .map(|i| {
                let delay = Duration::from_millis(5 * (8 - i));
                crate::test_utils::delayed_artifact(&format!("a{i}"), delay).into()
            })
            .collect();
        let set = ResolvedArtifactSet::of(leaves);

        let driver = ParallelResolveDriver::new(TokioOperationQueue::new(4));
        let mut visitor = RecordingVisitor::requiring_files();
        driver.visit(&set, &mut visitor).await;

        let expected: Vec<String> = (0..8).map(|i| format!("a{i}")).collect();
        assert_eq!(visitor.artifact_names(), expected);
        assert!(set.artifacts().iter().all(|a| a.is_resolved()));
    }

    #[tokio::test]
    async fn test_failure_does_not_abort_batch() {
        let set = ResolvedArtifactSet::of([
            artifact("first").into(),
            failing_artifact("second", "checksum mismatch").into(),
            artifact("third").into(),
        ]);

        let driver = ParallelResolveDriver::new(TokioOperationQueue::new(2));
        let mut visitor = RecordingVisitor::requiring_files();
        driver.visit(&set, &mut visitor).await;

        assert_eq!(visitor.events().len(), 3);
        assert_eq!(visitor.events()[0], VisitEvent::Artifact("first".to_string()));
        assert!(matches!(&visitor.events()[1], VisitEvent::Failure(msg) if msg.contains("checksum mismatch")));
        assert_eq!(visitor.events()[2], VisitEvent::Artifact("third".to_string()));
    }

    #[tokio::test]
    async fn test_shared_artifact_is_prepared_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let shared = Arc::new(crate::test_utils::artifact_with_resolver("shared", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(std::path::PathBuf::from("/repo/shared.jar"))
        }));
        let set = ResolvedArtifactSet::of([
            ResolvedArtifactSet::Single(shared.clone()),
            ResolvedArtifactSet::Single(shared),
        ]);

        let driver = ParallelResolveDriver::new(TokioOperationQueue::new(4));
        let mut visitor = RecordingVisitor::requiring_files();
        driver.visit(&set, &mut visitor).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(visitor.artifact_names(), vec!["shared", "shared"]);
    }

    #[tokio::test]
    async fn test_visitor_not_requiring_files_skips_preparation() {
        let set: ResolvedArtifactSet = artifact("lazy").into();
        let driver = ParallelResolveDriver::new(InlineOperationQueue);
        let mut visitor = RecordingVisitor::new();
        driver.visit(&set, &mut visitor).await;

        assert_eq!(visitor.artifact_names(), vec!["lazy"]);
        assert!(!set.artifacts()[0].is_resolved());
    }
}
