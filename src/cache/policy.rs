//! Expiry rules for cached resolution results.
//!
//! A [`CachePolicy`] answers one question per kind of cached value: given how old
//! the entry is (and, for artifacts, whether the module is changing and whether the
//! entry was computed against the current descriptor), may it be used as is, or must
//! the repository be asked again?
//!
//! Two rules override every time-to-live:
//!
//! - an entry computed against a different descriptor hash is always re-checked
//! - in offline mode nothing else ever expires

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::{
    DEFAULT_ARTIFACTS_TTL, DEFAULT_CHANGING_MODULE_TTL, DEFAULT_MISSING_ARTIFACT_TTL,
    DEFAULT_MISSING_MODULE_TTL,
};

/// Outcome of an expiry check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expiry {
    /// The cached value must be re-checked against the repository.
    pub must_check: bool,
    /// Remaining validity; `None` when the value never expires.
    pub keep_for: Option<Duration>,
}

impl Expiry {
    const NEVER: Self = Self {
        must_check: false,
        keep_for: None,
    };

    const NOW: Self = Self {
        must_check: true,
        keep_for: Some(Duration::ZERO),
    };

    fn after(ttl: Duration, age: Duration) -> Self {
        let remaining = ttl.saturating_sub(age);
        Self {
            must_check: remaining.is_zero(),
            keep_for: Some(remaining),
        }
    }
}

/// Time-to-live settings for the resolution caches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePolicy {
    /// How long "module not found" stays valid.
    pub missing_module_ttl: Duration,
    /// How long metadata of a changing module stays valid.
    pub changing_module_ttl: Duration,
    /// How long metadata of a regular module stays valid; `None` = forever.
    pub module_ttl: Option<Duration>,
    /// How long an artifact listing of a changing module stays valid.
    pub artifacts_ttl: Duration,
    /// How long "artifact not found" stays valid.
    pub missing_artifact_ttl: Duration,
    /// Never expire anything except stale descriptor hashes.
    pub offline: bool,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            missing_module_ttl: DEFAULT_MISSING_MODULE_TTL,
            changing_module_ttl: DEFAULT_CHANGING_MODULE_TTL,
            module_ttl: None,
            artifacts_ttl: DEFAULT_ARTIFACTS_TTL,
            missing_artifact_ttl: DEFAULT_MISSING_ARTIFACT_TTL,
            offline: false,
        }
    }
}

impl CachePolicy {
    /// A policy that re-checks everything (all TTLs zero).
    pub fn refresh_all() -> Self {
        Self {
            missing_module_ttl: Duration::ZERO,
            changing_module_ttl: Duration::ZERO,
            module_ttl: Some(Duration::ZERO),
            artifacts_ttl: Duration::ZERO,
            missing_artifact_ttl: Duration::ZERO,
            offline: false,
        }
    }

    fn ttl(&self, ttl: Duration, age: Duration) -> Expiry {
        if self.offline {
            Expiry::NEVER
        } else {
            Expiry::after(ttl, age)
        }
    }

    /// Expiry of a cached "module is missing" answer.
    pub fn missing_module_expiry(&self, age: Duration) -> Expiry {
        self.ttl(self.missing_module_ttl, age)
    }

    /// Expiry of cached metadata for a changing module.
    pub fn changing_module_expiry(&self, age: Duration) -> Expiry {
        self.ttl(self.changing_module_ttl, age)
    }

    /// Expiry of cached metadata for a regular module.
    pub fn module_expiry(&self, age: Duration) -> Expiry {
        match self.module_ttl {
            Some(ttl) => self.ttl(ttl, age),
            None => Expiry::NEVER,
        }
    }

    /// Expiry of a cached artifact listing.
    pub fn module_artifacts_expiry(&self, age: Duration, changing: bool, hash_matches: bool) -> Expiry {
        if !hash_matches {
            return Expiry::NOW;
        }
        if changing {
            self.ttl(self.artifacts_ttl, age)
        } else {
            Expiry::NEVER
        }
    }

    /// Expiry of a cached artifact file or "artifact is missing" answer.
    pub fn artifact_expiry(
        &self,
        age: Duration,
        changing: bool,
        hash_matches: bool,
        missing: bool,
    ) -> Expiry {
        if !hash_matches {
            return Expiry::NOW;
        }
        if missing {
            self.ttl(self.missing_artifact_ttl, age)
        } else if changing {
            self.ttl(self.changing_module_ttl, age)
        } else {
            Expiry::NEVER
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn test_missing_module_expires_after_ttl() {
        let policy = CachePolicy::default();
        assert!(!policy.missing_module_expiry(HOUR).must_check);
        assert!(policy.missing_module_expiry(25 * HOUR).must_check);
        assert_eq!(policy.missing_module_expiry(HOUR).keep_for, Some(23 * HOUR));
    }

    #[test]
    fn test_regular_modules_never_expire_by_default() {
        let policy = CachePolicy::default();
        assert_eq!(policy.module_expiry(1000 * HOUR), Expiry::NEVER);
    }

    #[test]
    fn test_hash_mismatch_always_rechecks() {
        let policy = CachePolicy {
            offline: true,
            ..CachePolicy::default()
        };
        assert!(policy.module_artifacts_expiry(Duration::ZERO, false, false).must_check);
        assert!(policy.artifact_expiry(Duration::ZERO, false, false, false).must_check);
        assert!(!policy.module_artifacts_expiry(1000 * HOUR, true, true).must_check);
    }

    #[test]
    fn test_refresh_all() {
        let policy = CachePolicy::refresh_all();
        assert!(policy.changing_module_expiry(Duration::ZERO).must_check);
        assert!(policy.module_expiry(Duration::ZERO).must_check);
        assert!(policy.artifact_expiry(Duration::ZERO, false, true, true).must_check);
    }
}
