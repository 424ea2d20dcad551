//! Integration test suite for depot
//!
//! End-to-end tests that drive the public API against real on-disk caches and the
//! `depot` binary against temporary cache directories.
//!
//! # Running Integration Tests
//!
//! ```bash
//! cargo test --test integration
//! ```
//!
//! # Test Organization
//!
//! - **cache_round_trip**: metadata, listing and artifact caches across reopen
//! - **pipeline**: graph visiting, selection and parallel resolution together
//! - **driver**: ordered visiting of repository-backed artifacts
//! - **cli**: the `depot cache` and `depot config` commands

mod cache_round_trip;
mod cli;
mod driver;
mod pipeline;
