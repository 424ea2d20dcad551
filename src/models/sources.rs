//! Descriptor hashes and module sources.
//!
//! Module sources are opaque tags attached to resolved metadata that tell later stages
//! where the metadata came from: which repository served it and which descriptor hash
//! it was computed from. Caches use the descriptor hash to detect staleness.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::core::ResolveError;

/// SHA-256 content hash of a serialized module descriptor.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DescriptorHash([u8; 32]);

impl DescriptorHash {
    /// Hash raw descriptor bytes.
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hasher.finalize().into())
    }

    /// Wrap an existing digest.
    pub const fn from_digest(digest: [u8; 32]) -> Self {
        Self(digest)
    }

    /// Parse a lowercase or uppercase hex string of 64 characters.
    pub fn from_hex(value: &str) -> Result<Self, ResolveError> {
        let bytes = hex::decode(value).map_err(|e| ResolveError::Decode {
            what: "descriptor hash".to_string(),
            reason: e.to_string(),
        })?;
        let digest: [u8; 32] = bytes.try_into().map_err(|_| ResolveError::Decode {
            what: "descriptor hash".to_string(),
            reason: "expected 32 bytes".to_string(),
        })?;
        Ok(Self(digest))
    }

    /// The raw digest.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex rendering.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for DescriptorHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for DescriptorHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DescriptorHash({})", &self.to_hex()[..12])
    }
}

impl Serialize for DescriptorHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for DescriptorHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Self::from_hex(&value).map_err(serde::de::Error::custom)
    }
}

/// One opaque source tag attached to resolved module metadata.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModuleSource {
    /// The descriptor hash the metadata was computed from.
    DescriptorHash {
        /// Hash of the serialized descriptor
        hash: DescriptorHash,
        /// Whether the module may change without a version change (snapshots)
        changing: bool,
    },
    /// The repository that served the metadata.
    Repository {
        /// Repository identifier
        repository_id: String,
    },
    /// A source contributed by a repository implementation; the core never interprets it.
    Opaque {
        /// Identifies which repository implementation understands `data`
        tag: String,
        /// Implementation-defined payload
        data: Vec<u8>,
    },
}

/// Ordered list of [`ModuleSource`]s.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleSources(Vec<ModuleSource>);

impl ModuleSources {
    /// No sources.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sources from a list, preserving order.
    pub fn from_vec(sources: Vec<ModuleSource>) -> Self {
        Self(sources)
    }

    /// A copy with `source` appended.
    #[must_use]
    pub fn with(&self, source: ModuleSource) -> Self {
        let mut sources = self.0.clone();
        sources.push(source);
        Self(sources)
    }

    /// Iterate the sources in order.
    pub fn iter(&self) -> impl Iterator<Item = &ModuleSource> {
        self.0.iter()
    }

    /// Number of sources.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no sources.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The first descriptor hash source, with its changing flag.
    pub fn descriptor_hash(&self) -> Option<(DescriptorHash, bool)> {
        self.0.iter().find_map(|source| match source {
            ModuleSource::DescriptorHash {
                hash,
                changing,
            } => Some((*hash, *changing)),
            _ => None,
        })
    }

    /// A copy in which every descriptor hash source is marked as changing.
    #[must_use]
    pub fn make_changing(&self) -> Self {
        Self(
            self.0
                .iter()
                .map(|source| match source {
                    ModuleSource::DescriptorHash {
                        hash,
                        ..
                    } => ModuleSource::DescriptorHash {
                        hash: *hash,
                        changing: true,
                    },
                    other => other.clone(),
                })
                .collect(),
        )
    }

    /// The sources as a slice.
    pub fn as_slice(&self) -> &[ModuleSource] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_round_trip() {
        let hash = DescriptorHash::of_bytes(b"descriptor");
        let parsed = DescriptorHash::from_hex(&hash.to_hex()).unwrap();
        assert_eq!(hash, parsed);
    }

    #[test]
    fn test_from_hex_rejects_short_digest() {
        assert!(DescriptorHash::from_hex("abcd").is_err());
        assert!(DescriptorHash::from_hex("not hex").is_err());
    }

    #[test]
    fn test_descriptor_hash_lookup_and_make_changing() {
        let hash = DescriptorHash::of_bytes(b"d");
        let sources = ModuleSources::new()
            .with(ModuleSource::Repository {
                repository_id: "R1".to_string(),
            })
            .with(ModuleSource::DescriptorHash {
                hash,
                changing: false,
            });

        assert_eq!(sources.descriptor_hash(), Some((hash, false)));
        assert_eq!(sources.make_changing().descriptor_hash(), Some((hash, true)));
        assert_eq!(sources.len(), 2);
    }
}
