//! Global constants used throughout the depot codebase.
//!
//! This module contains cache expiry defaults, parallelism parameters, and the
//! names that make up the on-disk cache layout. Defining them centrally keeps the
//! layout discoverable from one place.

use std::time::Duration;

/// Version of the on-disk cache layout.
///
/// Bumped whenever the binary format of an index or a descriptor file changes.
/// Caches written with another layout version live in a sibling directory and are
/// never read.
pub const CACHE_LAYOUT_VERSION: u32 = 3;

/// Default time a "module is missing" answer stays valid (24 hours).
pub const DEFAULT_MISSING_MODULE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Default time a changing module's metadata stays valid (24 hours).
pub const DEFAULT_CHANGING_MODULE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Default time an artifacts listing stays valid when its descriptor is unchanged (24 hours).
pub const DEFAULT_ARTIFACTS_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Default time an "artifact is missing" answer stays valid (24 hours).
pub const DEFAULT_MISSING_ARTIFACT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Minimum number of parallel prepare operations regardless of CPU count.
///
/// Prepare work is dominated by network and nested-build latency rather than CPU,
/// so even single-core machines benefit from several in-flight downloads.
pub const MIN_PARALLELISM: usize = 10;

/// Multiplier applied to CPU core count for default parallelism.
pub const PARALLELISM_CORE_MULTIPLIER: usize = 2;

/// Default CPU core count when detection fails.
pub const FALLBACK_CORE_COUNT: usize = 4;

/// Name of the index holding module metadata entries.
pub const METADATA_STORE: &str = "metadata";

/// Name of the index holding artifact listings.
pub const ARTIFACTS_STORE: &str = "artifacts";

/// Name of the index holding resolved artifact files.
pub const ARTIFACT_FILES_STORE: &str = "artifact-files";

/// File extension of an index store on disk (`<store>.bin`).
pub const INDEX_EXTENSION: &str = "bin";

/// Subdirectory holding serialized module descriptors.
pub const DESCRIPTORS_DIR: &str = "descriptors";

/// File name of a serialized descriptor inside its coordinate directory.
pub const DESCRIPTOR_FILE: &str = "descriptor.bin";

/// Subdirectory holding cross-process lock files.
pub const LOCKS_DIR: &str = ".locks";

/// Default parallelism for prepare operations.
///
/// `max(MIN_PARALLELISM, cores × PARALLELISM_CORE_MULTIPLIER)`.
pub fn default_max_parallel() -> usize {
    let cores = std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(FALLBACK_CORE_COUNT);
    std::cmp::max(MIN_PARALLELISM, cores * PARALLELISM_CORE_MULTIPLIER)
}
