//! depot: dependency resolution caching and artifact-set engine.
//!
//! depot decides which variants and artifacts of a resolved dependency graph satisfy
//! a request, caches module metadata and artifact lookups across builds, and fetches
//! the files behind each artifact in parallel while reporting them in a fixed order.
//!
//! # Architecture
//!
//! - [`cache`]: persistent, versioned caches for module metadata, artifact listings
//!   and artifact files, and the caching repository decorator
//! - [`artifacts`]: the [`ResolvedArtifactSet`](artifacts::ResolvedArtifactSet)
//!   algebra, the visitor protocol and the parallel resolution driver
//! - [`variants`]: attribute matching, variant selection and composition
//! - [`results`]: aggregation of artifact sets over a resolved graph
//! - [`models`]: identifiers, descriptors and attributes
//! - [`config`], [`cli`]: user configuration and the maintenance binary
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

pub mod artifacts;
pub mod cache;
pub mod cli;
pub mod config;
pub mod constants;
pub mod core;
pub mod models;
pub mod results;
pub mod utils;
pub mod variants;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
