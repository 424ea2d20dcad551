//! Attribute matching rules.
//!
//! An [`AttributeSchema`] answers two questions during variant selection: whether a
//! candidate's value for an attribute is compatible with the requested value, and
//! which of several compatible candidates should win.
//!
//! [`DefaultAttributeSchema`] treats equal values as compatible, plus any extra
//! `requested -> candidate` pairs registered per attribute. A candidate that lacks a
//! requested attribute is compatible. Disambiguation runs these passes, stopping as
//! soon as a single candidate remains:
//!
//! 1. candidates whose value equals the requested value beat merely compatible ones;
//! 2. for attributes with declared preferences, the candidate carrying the most
//!    preferred value wins;
//! 3. the candidate with the fewest attributes nobody asked for wins.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::models::AttributeMap;

/// Compatibility and disambiguation rules for attributes.
pub trait AttributeSchema: Send + Sync {
    /// Whether `candidate` satisfies `requested` for `attribute`.
    fn is_compatible(&self, attribute: &str, requested: &str, candidate: &str) -> bool;

    /// Narrows compatible candidates down; returns indices into `candidates`.
    ///
    /// An empty answer is never valid when `candidates` is non-empty.
    fn disambiguate(&self, requested: &AttributeMap, candidates: &[&AttributeMap]) -> Vec<usize>;

    /// Whether every requested attribute the candidate carries is compatible.
    fn matches(&self, requested: &AttributeMap, candidate: &AttributeMap) -> bool {
        requested.iter().all(|(name, wanted)| {
            candidate.get(name).is_none_or(|actual| self.is_compatible(name, wanted, actual))
        })
    }
}

/// Equality-based schema with optional compatibility rules and preferences.
#[derive(Debug, Clone, Default)]
pub struct DefaultAttributeSchema {
    compatible: HashMap<String, HashSet<(String, String)>>,
    preferences: BTreeMap<String, Vec<String>>,
}

impl DefaultAttributeSchema {
    /// A schema where only equal values are compatible.
    pub fn new() -> Self {
        Self::default()
    }

    /// Also accept `candidate` when `requested` is asked for `attribute`.
    #[must_use]
    pub fn with_compatible(
        mut self,
        attribute: impl Into<String>,
        requested: impl Into<String>,
        candidate: impl Into<String>,
    ) -> Self {
        self.compatible
            .entry(attribute.into())
            .or_default()
            .insert((requested.into(), candidate.into()));
        self
    }

    /// Prefer values of `attribute` in the given order during disambiguation.
    #[must_use]
    pub fn with_preference<I, S>(mut self, attribute: impl Into<String>, preferred: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.preferences.insert(attribute.into(), preferred.into_iter().map(Into::into).collect());
        self
    }
}

/// Keeps the subset of `remaining` for which `score` is best (lowest), unless no
/// candidate scores at all.
fn keep_best(remaining: Vec<usize>, score: impl Fn(usize) -> Option<usize>) -> Vec<usize> {
    let best = remaining.iter().filter_map(|&i| score(i)).min();
    match best {
        Some(best) => remaining.into_iter().filter(|&i| score(i) == Some(best)).collect(),
        None => remaining,
    }
}

impl AttributeSchema for DefaultAttributeSchema {
    fn is_compatible(&self, attribute: &str, requested: &str, candidate: &str) -> bool {
        requested == candidate
            || self.compatible.get(attribute).is_some_and(|rules| {
                rules.contains(&(requested.to_string(), candidate.to_string()))
            })
    }

    fn disambiguate(&self, requested: &AttributeMap, candidates: &[&AttributeMap]) -> Vec<usize> {
        let mut remaining: Vec<usize> = (0..candidates.len()).collect();

        for (name, wanted) in requested.iter() {
            if remaining.len() <= 1 {
                return remaining;
            }
            remaining = keep_best(remaining, |i| (candidates[i].get(name) == Some(wanted)).then_some(0));
        }

        for (name, preferred) in &self.preferences {
            if remaining.len() <= 1 {
                return remaining;
            }
            remaining = keep_best(remaining, |i| {
                let value = candidates[i].get(name)?;
                preferred.iter().position(|p| p == value)
            });
        }

        if remaining.len() > 1 {
            remaining = keep_best(remaining, |i| {
                Some(candidates[i].names().filter(|n| !requested.contains(n)).count())
            });
        }
        remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_attribute_is_compatible() {
        let schema = DefaultAttributeSchema::new();
        let requested = AttributeMap::of([("usage", "runtime")]);
        assert!(schema.matches(&requested, &AttributeMap::empty()));
        assert!(schema.matches(&requested, &AttributeMap::of([("usage", "runtime")])));
        assert!(!schema.matches(&requested, &AttributeMap::of([("usage", "api")])));
    }

    #[test]
    fn test_compatibility_rules() {
        let schema = DefaultAttributeSchema::new().with_compatible("usage", "runtime", "api");
        let requested = AttributeMap::of([("usage", "runtime")]);
        assert!(schema.matches(&requested, &AttributeMap::of([("usage", "api")])));
        assert!(!schema.matches(&AttributeMap::of([("usage", "api")]), &AttributeMap::of([("usage", "runtime")])));
    }

    #[test]
    fn test_exact_match_beats_compatible() {
        let schema = DefaultAttributeSchema::new().with_compatible("usage", "runtime", "api");
        let requested = AttributeMap::of([("usage", "runtime")]);
        let api = AttributeMap::of([("usage", "api")]);
        let runtime = AttributeMap::of([("usage", "runtime")]);
        assert_eq!(schema.disambiguate(&requested, &[&api, &runtime]), vec![1]);
    }

    #[test]
    fn test_preferences_then_fewest_extra_attributes() {
        let schema = DefaultAttributeSchema::new().with_preference("format", ["jar", "classes"]);
        let requested = AttributeMap::of([("usage", "runtime")]);
        let classes = AttributeMap::of([("usage", "runtime"), ("format", "classes")]);
        let jar = AttributeMap::of([("usage", "runtime"), ("format", "jar")]);
        assert_eq!(schema.disambiguate(&requested, &[&classes, &jar]), vec![1]);

        let plain = AttributeMap::of([("usage", "runtime")]);
        let tagged = AttributeMap::of([("usage", "runtime"), ("flavor", "debug")]);
        assert_eq!(DefaultAttributeSchema::new().disambiguate(&requested, &[&tagged, &plain]), vec![1]);
    }

    #[test]
    fn test_undecidable_candidates_remain() {
        let schema = DefaultAttributeSchema::new();
        let requested = AttributeMap::of([("usage", "runtime")]);
        let a = AttributeMap::of([("usage", "runtime"), ("os", "linux")]);
        let b = AttributeMap::of([("usage", "runtime"), ("os", "macos")]);
        assert_eq!(schema.disambiguate(&requested, &[&a, &b]), vec![0, 1]);
    }
}
