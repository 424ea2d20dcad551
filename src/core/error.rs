//! Error handling for depot
//!
//! This module provides the error type shared by every layer of the resolution engine
//! and the user-facing reporting used by the `depot` binary. The error system follows
//! the propagation policy of the engine:
//!
//! 1. **Expected conditions are values, not errors**: a cache miss or a module that the
//!    repository reports as absent is modelled as `Option`/result enums by the caches
//!    and repositories, never as a [`ResolveError`].
//! 2. **Per-artifact failures are deferred**: they are captured as a [`ResolveError`]
//!    stored on the artifact set leaf and delivered through the visitor's failure
//!    channel. This is why [`ResolveError`] implements [`Clone`].
//! 3. **Configuration conflicts are fatal**: capability conflicts, duplicate variants
//!    and circular variant composition abort selection synchronously.
//! 4. **Contract violations fail fast** with [`ResolveError::IllegalState`].
//!
//! # Error Categories
//!
//! - **Artifacts**: [`ResolveError::ArtifactNotFound`], [`ResolveError::ArtifactResolutionFailed`]
//! - **Modules**: [`ResolveError::ModuleResolutionFailed`]
//! - **Selection**: [`ResolveError::NoMatchingVariant`], [`ResolveError::AmbiguousVariants`],
//!   [`ResolveError::CapabilityConflict`], [`ResolveError::DuplicateVariant`],
//!   [`ResolveError::CircularComposition`], [`ResolveError::VariantNotFound`]
//! - **Caches**: [`ResolveError::CorruptCacheEntry`], [`ResolveError::Decode`]
//! - **Contracts**: [`ResolveError::IllegalState`]
//!
//! # Examples
//!
//! ```rust,no_run
//! use depot::core::{ErrorContext, ResolveError, user_friendly_error};
//!
//! let error = ResolveError::CircularComposition {
//!     chain: "a:b:1 -> c:d:1 -> a:b:1".to_string(),
//! };
//!
//! let ctx = user_friendly_error(anyhow::Error::from(error));
//! ctx.display();
//! ```

use colored::Colorize;
use std::fmt;
use thiserror::Error;

/// The error type for resolution, caching and selection failures.
///
/// Variants carry display-ready strings rather than the typed identifiers so that
/// a failure can be stored on an artifact set leaf, cloned and re-delivered across
/// visits without tying the error to the lifetime of the model types.
#[derive(Error, Debug)]
pub enum ResolveError {
    /// The repository looked for the artifact and could not find it.
    #[error("Could not find {artifact}")]
    ArtifactNotFound {
        /// Display name of the artifact
        artifact: String,
        /// Locations that were searched, in search order
        attempted: Vec<String>,
    },

    /// Resolving the artifact's backing file failed for a reason other than absence.
    #[error("Could not resolve {artifact}: {reason}")]
    ArtifactResolutionFailed {
        /// Display name of the artifact
        artifact: String,
        /// Underlying failure description
        reason: String,
    },

    /// The module descriptor could not be fetched from a repository.
    #[error("Could not resolve module {component} from repository '{repository}': {reason}")]
    ModuleResolutionFailed {
        /// Requested component coordinates
        component: String,
        /// Repository identifier
        repository: String,
        /// Underlying failure description
        reason: String,
    },

    /// None of a component's variants match the requested attributes.
    #[error("No matching variant of {component} was found for attributes {requested}")]
    NoMatchingVariant {
        /// Component display name
        component: String,
        /// Requested attributes
        requested: String,
        /// Names of the variants that were considered
        available: Vec<String>,
    },

    /// More than one variant matches and the schema cannot choose between them.
    #[error("Cannot choose between the following variants of {component}: {}", candidates.join(", "))]
    AmbiguousVariants {
        /// Component display name
        component: String,
        /// Requested attributes
        requested: String,
        /// Names of the remaining candidate variants
        candidates: Vec<String>,
    },

    /// Two candidate variants declare the same capability.
    #[error("Capability {capability} is provided by conflicting variants of {component}: {}", variants.join(", "))]
    CapabilityConflict {
        /// Capability coordinates
        capability: String,
        /// Component display name
        component: String,
        /// Variants declaring the capability
        variants: Vec<String>,
    },

    /// A component declares the same variant name twice.
    #[error("Variant '{variant}' is declared more than once by {component}")]
    DuplicateVariant {
        /// Component display name
        component: String,
        /// Duplicated variant name
        variant: String,
    },

    /// Variant composition loops back onto itself.
    #[error("Circular variant composition detected: {chain}")]
    CircularComposition {
        /// The cycle, rendered as `a -> b -> a`
        chain: String,
    },

    /// A composed variant references a variant that does not exist.
    #[error("Variant '{variant}' of {component} does not exist")]
    VariantNotFound {
        /// Component display name
        component: String,
        /// Missing variant name
        variant: String,
    },

    /// An operation was invoked in a state that does not allow it.
    #[error("Illegal state: {message}")]
    IllegalState {
        /// Description of the violated contract
        message: String,
    },

    /// A persistent cache holds data that cannot be interpreted.
    #[error("Corrupt entry in cache store '{store}': {reason}")]
    CorruptCacheEntry {
        /// Name of the store
        store: String,
        /// What was wrong with the entry
        reason: String,
    },

    /// Binary data could not be decoded.
    #[error("Failed to decode {what}: {reason}")]
    Decode {
        /// What was being decoded
        what: String,
        /// Why decoding stopped
        reason: String,
    },

    /// A component or artifact coordinate string could not be parsed.
    #[error("Invalid identifier '{value}': {reason}")]
    InvalidIdentifier {
        /// The rejected input
        value: String,
        /// Why it was rejected
        reason: String,
    },

    /// Configuration is invalid.
    #[error("Configuration error: {message}")]
    ConfigError {
        /// Description of the configuration problem
        message: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// Other error
    #[error("{message}")]
    Other {
        /// Generic error message
        message: String,
    },
}

impl ResolveError {
    /// Shorthand for [`ResolveError::IllegalState`].
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState {
            message: message.into(),
        }
    }

    /// Whether the error reports the absence of an artifact rather than a failure to fetch it.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ArtifactNotFound { .. })
    }

    /// Whether the error is a selection conflict that must abort the whole resolution.
    pub fn is_fatal_conflict(&self) -> bool {
        matches!(
            self,
            Self::CapabilityConflict { .. }
                | Self::DuplicateVariant { .. }
                | Self::CircularComposition { .. }
        )
    }
}

impl Clone for ResolveError {
    fn clone(&self) -> Self {
        match self {
            Self::ArtifactNotFound {
                artifact,
                attempted,
            } => Self::ArtifactNotFound {
                artifact: artifact.clone(),
                attempted: attempted.clone(),
            },
            Self::ArtifactResolutionFailed {
                artifact,
                reason,
            } => Self::ArtifactResolutionFailed {
                artifact: artifact.clone(),
                reason: reason.clone(),
            },
            Self::ModuleResolutionFailed {
                component,
                repository,
                reason,
            } => Self::ModuleResolutionFailed {
                component: component.clone(),
                repository: repository.clone(),
                reason: reason.clone(),
            },
            Self::NoMatchingVariant {
                component,
                requested,
                available,
            } => Self::NoMatchingVariant {
                component: component.clone(),
                requested: requested.clone(),
                available: available.clone(),
            },
            Self::AmbiguousVariants {
                component,
                requested,
                candidates,
            } => Self::AmbiguousVariants {
                component: component.clone(),
                requested: requested.clone(),
                candidates: candidates.clone(),
            },
            Self::CapabilityConflict {
                capability,
                component,
                variants,
            } => Self::CapabilityConflict {
                capability: capability.clone(),
                component: component.clone(),
                variants: variants.clone(),
            },
            Self::DuplicateVariant {
                component,
                variant,
            } => Self::DuplicateVariant {
                component: component.clone(),
                variant: variant.clone(),
            },
            Self::CircularComposition {
                chain,
            } => Self::CircularComposition {
                chain: chain.clone(),
            },
            Self::VariantNotFound {
                component,
                variant,
            } => Self::VariantNotFound {
                component: component.clone(),
                variant: variant.clone(),
            },
            Self::IllegalState {
                message,
            } => Self::IllegalState {
                message: message.clone(),
            },
            Self::CorruptCacheEntry {
                store,
                reason,
            } => Self::CorruptCacheEntry {
                store: store.clone(),
                reason: reason.clone(),
            },
            Self::Decode {
                what,
                reason,
            } => Self::Decode {
                what: what.clone(),
                reason: reason.clone(),
            },
            Self::InvalidIdentifier {
                value,
                reason,
            } => Self::InvalidIdentifier {
                value: value.clone(),
                reason: reason.clone(),
            },
            Self::ConfigError {
                message,
            } => Self::ConfigError {
                message: message.clone(),
            },
            // For errors that don't implement Clone, convert to Other
            Self::IoError(e) => Self::Other {
                message: format!("IO error: {e}"),
            },
            Self::TomlError(e) => Self::Other {
                message: format!("TOML parsing error: {e}"),
            },
            Self::Other {
                message,
            } => Self::Other {
                message: message.clone(),
            },
        }
    }
}

/// Error context wrapper that provides user-friendly error information
///
/// `ErrorContext` wraps a [`ResolveError`] and adds an optional suggestion and
/// details. The `depot` binary renders every failure through it.
///
/// When displayed, errors show:
/// 1. **Error**: The main error message in red
/// 2. **Details**: Additional context about the error in yellow (optional)
/// 3. **Suggestion**: Actionable steps to resolve the issue in green (optional)
#[derive(Debug)]
pub struct ErrorContext {
    /// The underlying error
    pub error: ResolveError,
    /// Optional suggestion for resolving the error
    pub suggestion: Option<String>,
    /// Optional additional details about the error
    pub details: Option<String>,
}

impl ErrorContext {
    /// Create a new error context with no suggestion or details.
    #[must_use]
    pub const fn new(error: ResolveError) -> Self {
        Self {
            error,
            suggestion: None,
            details: None,
        }
    }

    /// Add a suggestion for resolving the error
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Add additional details explaining the error
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Display the error context to stderr with terminal colors
    pub fn display(&self) {
        eprintln!("{}: {}", "error".red().bold(), self.error);

        if let Some(details) = &self.details {
            eprintln!("{}: {}", "details".yellow(), details);
        }

        if let Some(suggestion) = &self.suggestion {
            eprintln!("{}: {}", "suggestion".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;

        if let Some(details) = &self.details {
            write!(f, "\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}

impl std::error::Error for ErrorContext {}

/// Convert any error to a user-friendly [`ErrorContext`] with actionable suggestions
///
/// Recognizes [`ResolveError`], [`std::io::Error`] and [`toml::de::Error`]; any other
/// error is rendered together with its cause chain.
#[must_use]
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    if let Some(resolve_error) = error.downcast_ref::<ResolveError>() {
        return create_error_context(resolve_error.clone());
    }

    if let Some(io_error) = error.downcast_ref::<std::io::Error>() {
        match io_error.kind() {
            std::io::ErrorKind::PermissionDenied => {
                return ErrorContext::new(ResolveError::Other {
                    message: format!("Permission denied: {io_error}"),
                })
                .with_suggestion("Check the ownership and permissions of the cache directory")
                .with_details(
                    "depot needs read and write access to its cache directory and lock files",
                );
            }
            std::io::ErrorKind::NotFound => {
                return ErrorContext::new(ResolveError::Other {
                    message: format!("File not found: {io_error}"),
                })
                .with_suggestion("Check that the path exists or pass --cache-dir explicitly");
            }
            _ => {}
        }
    }

    if let Some(toml_error) = error.downcast_ref::<toml::de::Error>() {
        return ErrorContext::new(ResolveError::ConfigError {
            message: toml_error.to_string(),
        })
        .with_suggestion("Check the TOML syntax of your depot configuration file")
        .with_details("Run 'depot config path' to see which file was loaded");
    }

    let mut message = error.to_string();
    let chain: Vec<String> = error.chain().skip(1).map(std::string::ToString::to_string).collect();

    if !chain.is_empty() {
        message.push_str("\n\nCaused by:");
        for (i, cause) in chain.iter().enumerate() {
            message.push_str(&format!("\n  {}: {}", i + 1, cause));
        }
    }

    ErrorContext::new(ResolveError::Other {
        message,
    })
}

fn create_error_context(error: ResolveError) -> ErrorContext {
    match &error {
        ResolveError::ArtifactNotFound {
            attempted,
            ..
        } => {
            let details = if attempted.is_empty() {
                "No locations were searched".to_string()
            } else {
                format!("Searched in the following locations:\n  {}", attempted.join("\n  "))
            };
            ErrorContext::new(error)
                .with_details(details)
                .with_suggestion("Check the artifact coordinates and the repositories declared for this build")
        }
        ResolveError::NoMatchingVariant {
            available,
            ..
        } => {
            let details = format!("Available variants: {}", available.join(", "));
            ErrorContext::new(error)
                .with_details(details)
                .with_suggestion("Adjust the requested attributes or enable lenient selection")
        }
        ResolveError::AmbiguousVariants {
            ..
        } => ErrorContext::new(error).with_suggestion(
            "Request additional attributes or register a preferred value in the attribute schema",
        ),
        ResolveError::CapabilityConflict {
            ..
        } => ErrorContext::new(error)
            .with_details("Two variants that provide the same capability cannot both be selected")
            .with_suggestion("Request attributes that only one of the conflicting variants provides"),
        ResolveError::CircularComposition {
            ..
        } => ErrorContext::new(error)
            .with_suggestion("Remove one of the variant references that forms the cycle"),
        ResolveError::CorruptCacheEntry {
            ..
        } => ErrorContext::new(error)
            .with_suggestion("Run 'depot cache gc' or 'depot cache clean --all' to rebuild the cache"),
        ResolveError::IllegalState {
            ..
        } => ErrorContext::new(error)
            .with_details("This is an internal error: an operation was invoked in the wrong order"),
        _ => ErrorContext::new(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_preserves_structured_variants() {
        let error = ResolveError::ArtifactNotFound {
            artifact: "lib.jar (com.x:y:1.0)".to_string(),
            attempted: vec!["https://repo/lib.jar".to_string()],
        };
        let cloned = error.clone();
        assert_eq!(error.to_string(), cloned.to_string());
        assert!(cloned.is_not_found());
    }

    #[test]
    fn test_clone_degrades_io_error() {
        let error = ResolveError::from(std::io::Error::other("disk on fire"));
        let cloned = error.clone();
        assert!(matches!(cloned, ResolveError::Other { .. }));
        assert!(cloned.to_string().contains("disk on fire"));
    }

    #[test]
    fn test_fatal_conflict_classification() {
        assert!(
            ResolveError::CircularComposition {
                chain: "a -> a".to_string()
            }
            .is_fatal_conflict()
        );
        assert!(
            !ResolveError::NoMatchingVariant {
                component: "c".to_string(),
                requested: "{}".to_string(),
                available: vec![],
            }
            .is_fatal_conflict()
        );
    }

    #[test]
    fn test_user_friendly_error_lists_attempted_locations() {
        let error = ResolveError::ArtifactNotFound {
            artifact: "a.jar".to_string(),
            attempted: vec!["loc-1".to_string(), "loc-2".to_string()],
        };
        let ctx = user_friendly_error(anyhow::Error::from(error));
        let details = ctx.details.unwrap_or_default();
        assert!(details.contains("loc-1"));
        assert!(details.contains("loc-2"));
    }

    #[test]
    fn test_user_friendly_error_keeps_chain() {
        let error = anyhow::anyhow!("root cause").context("while cleaning cache");
        let ctx = user_friendly_error(error);
        let rendered = ctx.to_string();
        assert!(rendered.contains("while cleaning cache"));
        assert!(rendered.contains("root cause"));
    }
}
