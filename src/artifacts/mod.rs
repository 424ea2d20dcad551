//! Resolved artifact sets.
//!
//! Resolution produces, for every selected component variant, a tree of artifacts
//! whose files may not have been fetched yet. This module provides that tree and the
//! machinery to walk it:
//!
//! - [`ResolvableArtifact`]: one artifact with a lazily computed, memoised file
//! - [`ResolvedArtifactSet`]: the immutable tree (empty, single, composite, broken,
//!   file-backed) with deterministic visit order
//! - [`ArtifactVisitor`]: receives artifacts and failures in order
//! - [`FileBackedArtifacts`] and [`FileCollection`]: local files, fixed or evaluated
//!   on demand
//! - [`ParallelResolveDriver`]: fetches files concurrently before an ordered visit
//!
//! # Example
//!
//! ```rust,no_run
//! use depot::artifacts::{ParallelResolveDriver, ResolvedArtifactSet, TokioOperationQueue};
//! # async fn example(set: ResolvedArtifactSet, visitor: &mut dyn depot::artifacts::ArtifactVisitor) {
//! let driver = ParallelResolveDriver::new(TokioOperationQueue::new(8));
//! driver.visit(&set, visitor).await;
//! # }
//! ```

pub mod artifact;
pub mod driver;
pub mod files;
pub mod set;
pub mod visitor;

pub use artifact::{FileResolver, ResolvableArtifact, VariantInfo};
pub use driver::{
    InlineOperationQueue, OperationQueue, ParallelResolveDriver, PrepareBatch, PrepareOperation,
    TokioOperationQueue,
};
pub use files::{DirectoryFiles, FileBackedArtifacts, FileCollection, FileSource};
pub use set::{CompositeArtifactSet, ResolvedArtifactSet};
pub use visitor::{ArtifactVisitor, VisitAction};
