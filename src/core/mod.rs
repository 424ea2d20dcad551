//! Core types for depot
//!
//! This module holds the error type shared by every layer of the engine together
//! with the user-facing error reporting used by the binary. See [`error`] for the
//! propagation policy: expected conditions are values, per-artifact failures are
//! deferred onto artifact set leaves, and configuration conflicts abort selection.

pub mod error;

pub use error::{ErrorContext, ResolveError, user_friendly_error};
