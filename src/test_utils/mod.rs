//! Test utilities for depot
//!
//! This module provides fakes and fixtures for exercising the resolution caches and
//! the artifact pipeline without a network or a real build.
//!
//! # Contents
//!
//! - [`ManualClock`]: a [`Clock`](crate::cache::Clock) moved by hand
//! - [`FakeRepository`]: an in-memory [`ModuleComponentRepository`](crate::cache::repository::ModuleComponentRepository)
//!   with request counters and failure injection
//! - [`RecordingVisitor`]: an artifact visitor that records every callback
//! - [`StaticVariantSource`]: a component with fixed variants
//! - [`DescriptorBuilder`]: module descriptors in one expression
//!
//! # Example
//!
//! ```rust,no_run
//! use depot::test_utils::{RecordingVisitor, artifact};
//! use depot::artifacts::ResolvedArtifactSet;
//!
//! let set = ResolvedArtifactSet::of([artifact("a").into(), artifact("b").into()]);
//! let mut visitor = RecordingVisitor::requiring_files();
//! set.visit(&mut visitor);
//! assert_eq!(visitor.artifact_names(), vec!["a", "b"]);
//! ```

pub mod artifacts;
pub mod fixtures;

pub use artifacts::{
    RecordingVisitor, StaticVariantSource, VisitEvent, artifact, artifact_with_resolver, delayed_artifact,
    failing_artifact,
};
pub use fixtures::{DescriptorBuilder, FakeRepository, ManualClock};

use std::sync::Once;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Global flag to ensure logging is only initialized once in tests
static INIT_LOGGING: Once = Once::new();

/// Initialize logging for tests.
///
/// Only the first call has an effect. With `None`, logging is enabled only when
/// `RUST_LOG` is set.
///
/// ```rust,no_run
/// use tracing::Level;
///
/// depot::test_utils::init_test_logging(Some(Level::DEBUG));
/// ```
///
/// To enable logging in tests via environment variable:
/// ```bash
/// RUST_LOG=depot=debug cargo test
/// ```
pub fn init_test_logging(level: Option<Level>) {
    INIT_LOGGING.call_once(|| {
        let filter = if let Some(level) = level {
            EnvFilter::new(level.to_string())
        } else if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            return;
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(false)
            .with_ansi(true)
            .try_init();
    });
}
