//! Compact binary encoding for cache entries and module descriptors.
//!
//! [`Encoder`] and [`Decoder`] implement the primitive layout shared by every
//! persistent store:
//!
//! - small non-negative integers and lengths are unsigned LEB128 varints
//! - timestamps are fixed 8-byte big-endian `i64`
//! - strings are a varint byte length followed by UTF-8 bytes
//! - nullable strings are a boolean marker followed by the string when present
//! - booleans are a single `0`/`1` byte
//!
//! [`ModuleDescriptorSerializer`] builds the descriptor format on top of it. Encoding
//! is deterministic, so `decode(encode(d)) == d` and re-encoding the decoded value
//! yields identical bytes. The descriptor hash is the SHA-256 of those bytes.

use crate::core::ResolveError;
use crate::models::{
    ArtifactName, AttributeMap, Capability, Configuration, ConfigurationArtifact, DependencyDescriptor,
    DescriptorHash, ExcludeRule, ModuleComponentIdentifier, ModuleDescriptor, ModuleSource,
    ModuleSources, VariantDescriptor, VariantReference,
};
use std::collections::BTreeMap;

/// Format version written at the start of every serialized descriptor.
pub const DESCRIPTOR_FORMAT_VERSION: u8 = 1;

/// Appends primitive values to a byte buffer.
#[derive(Debug, Default)]
pub struct Encoder {
    buffer: Vec<u8>,
}

impl Encoder {
    /// An empty encoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Write one raw byte.
    pub fn write_byte(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Write an unsigned varint.
    pub fn write_varint(&mut self, mut value: u64) {
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                self.buffer.push(byte);
                return;
            }
            self.buffer.push(byte | 0x80);
        }
    }

    /// Write a length or count.
    pub fn write_small_int(&mut self, value: usize) {
        self.write_varint(value as u64);
    }

    /// Write a fixed-width signed 64-bit value.
    pub fn write_i64(&mut self, value: i64) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    /// Write a boolean.
    pub fn write_bool(&mut self, value: bool) {
        self.buffer.push(u8::from(value));
    }

    /// Write a length-prefixed string.
    pub fn write_string(&mut self, value: &str) {
        self.write_small_int(value.len());
        self.buffer.extend_from_slice(value.as_bytes());
    }

    /// Write a string that may be absent.
    pub fn write_nullable_string(&mut self, value: Option<&str>) {
        match value {
            Some(value) => {
                self.write_bool(true);
                self.write_string(value);
            }
            None => self.write_bool(false),
        }
    }

    /// Write length-prefixed raw bytes.
    pub fn write_bytes(&mut self, value: &[u8]) {
        self.write_small_int(value.len());
        self.buffer.extend_from_slice(value);
    }

    /// Write bytes whose length the reader knows.
    pub fn write_fixed(&mut self, value: &[u8]) {
        self.buffer.extend_from_slice(value);
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Consume the encoder and return the buffer.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}

/// Reads primitive values written by [`Encoder`].
#[derive(Debug)]
pub struct Decoder<'a> {
    bytes: &'a [u8],
    position: usize,
    what: &'static str,
}

impl<'a> Decoder<'a> {
    /// Decode `bytes`; `what` names the payload in error messages.
    pub fn new(bytes: &'a [u8], what: &'static str) -> Self {
        Self {
            bytes,
            position: 0,
            what,
        }
    }

    fn error(&self, reason: impl Into<String>) -> ResolveError {
        ResolveError::Decode {
            what: self.what.to_string(),
            reason: format!("{} at offset {}", reason.into(), self.position),
        }
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8], ResolveError> {
        let end = self
            .position
            .checked_add(count)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| self.error(format!("unexpected end of data reading {count} bytes")))?;
        let slice = &self.bytes[self.position..end];
        self.position = end;
        Ok(slice)
    }

    /// Read one raw byte.
    pub fn read_byte(&mut self) -> Result<u8, ResolveError> {
        Ok(self.take(1)?[0])
    }

    /// Read an unsigned varint.
    pub fn read_varint(&mut self) -> Result<u64, ResolveError> {
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = self.read_byte()?;
            if shift >= 64 {
                return Err(self.error("varint too long"));
            }
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    /// Read a length or count.
    pub fn read_small_int(&mut self) -> Result<usize, ResolveError> {
        let value = self.read_varint()?;
        let value = usize::try_from(value).map_err(|_| self.error("count overflows usize"))?;
        // A count can never exceed the bytes that remain.
        if value > self.remaining() {
            return Err(self.error(format!("count {value} exceeds remaining data")));
        }
        Ok(value)
    }

    /// Read a fixed-width signed 64-bit value.
    pub fn read_i64(&mut self) -> Result<i64, ResolveError> {
        let bytes: [u8; 8] = self.read_fixed()?;
        Ok(i64::from_be_bytes(bytes))
    }

    /// Read a boolean.
    pub fn read_bool(&mut self) -> Result<bool, ResolveError> {
        match self.read_byte()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(self.error(format!("invalid boolean {other}"))),
        }
    }

    /// Read a length-prefixed string.
    pub fn read_string(&mut self) -> Result<String, ResolveError> {
        let len = self.read_small_int()?;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|e| self.error(format!("invalid UTF-8: {e}")))
    }

    /// Read a string that may be absent.
    pub fn read_nullable_string(&mut self) -> Result<Option<String>, ResolveError> {
        if self.read_bool()? {
            Ok(Some(self.read_string()?))
        } else {
            Ok(None)
        }
    }

    /// Read length-prefixed raw bytes.
    pub fn read_bytes(&mut self) -> Result<Vec<u8>, ResolveError> {
        let len = self.read_small_int()?;
        Ok(self.take(len)?.to_vec())
    }

    /// Read exactly `N` bytes.
    pub fn read_fixed<const N: usize>(&mut self) -> Result<[u8; N], ResolveError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.position
    }

    /// Whether all input has been consumed.
    pub fn is_at_end(&self) -> bool {
        self.position == self.bytes.len()
    }

    /// Fail unless all input has been consumed.
    pub fn finish(&self) -> Result<(), ResolveError> {
        if self.is_at_end() {
            Ok(())
        } else {
            Err(self.error(format!("{} trailing bytes", self.remaining())))
        }
    }
}

/// Encodes and decodes values of one type for a persistent store.
pub trait Codec<T>: Send + Sync {
    /// Append `value` to `encoder`.
    fn encode(&self, value: &T, encoder: &mut Encoder);

    /// Read one value.
    fn decode(&self, decoder: &mut Decoder<'_>) -> Result<T, ResolveError>;

    /// Encode a single value into a fresh buffer.
    fn to_bytes(&self, value: &T) -> Vec<u8> {
        let mut encoder = Encoder::new();
        self.encode(value, &mut encoder);
        encoder.into_bytes()
    }

    /// Decode a buffer holding exactly one value.
    fn from_bytes(&self, bytes: &[u8], what: &'static str) -> Result<T, ResolveError> {
        let mut decoder = Decoder::new(bytes, what);
        let value = self.decode(&mut decoder)?;
        decoder.finish()?;
        Ok(value)
    }
}

/// Codec for plain strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringCodec;

impl Codec<String> for StringCodec {
    fn encode(&self, value: &String, encoder: &mut Encoder) {
        encoder.write_string(value);
    }

    fn decode(&self, decoder: &mut Decoder<'_>) -> Result<String, ResolveError> {
        decoder.read_string()
    }
}

pub(crate) fn write_component_id(encoder: &mut Encoder, id: &ModuleComponentIdentifier) {
    encoder.write_string(&id.group);
    encoder.write_string(&id.module);
    encoder.write_string(&id.version);
}

pub(crate) fn read_component_id(
    decoder: &mut Decoder<'_>,
) -> Result<ModuleComponentIdentifier, ResolveError> {
    Ok(ModuleComponentIdentifier {
        group: decoder.read_string()?,
        module: decoder.read_string()?,
        version: decoder.read_string()?,
    })
}

pub(crate) fn write_artifact_name(encoder: &mut Encoder, name: &ArtifactName) {
    encoder.write_string(&name.name);
    encoder.write_string(&name.artifact_type);
    encoder.write_nullable_string(name.extension.as_deref());
    encoder.write_nullable_string(name.classifier.as_deref());
}

pub(crate) fn read_artifact_name(decoder: &mut Decoder<'_>) -> Result<ArtifactName, ResolveError> {
    Ok(ArtifactName {
        name: decoder.read_string()?,
        artifact_type: decoder.read_string()?,
        extension: decoder.read_nullable_string()?,
        classifier: decoder.read_nullable_string()?,
    })
}

pub(crate) fn write_descriptor_hash(encoder: &mut Encoder, hash: &DescriptorHash) {
    encoder.write_fixed(hash.as_bytes());
}

pub(crate) fn read_descriptor_hash(decoder: &mut Decoder<'_>) -> Result<DescriptorHash, ResolveError> {
    Ok(DescriptorHash::from_digest(decoder.read_fixed()?))
}

const SOURCE_DESCRIPTOR_HASH: u8 = 0;
const SOURCE_REPOSITORY: u8 = 1;
const SOURCE_OPAQUE: u8 = 2;

pub(crate) fn write_module_sources(encoder: &mut Encoder, sources: &ModuleSources) {
    encoder.write_small_int(sources.len());
    for source in sources.iter() {
        match source {
            ModuleSource::DescriptorHash {
                hash,
                changing,
            } => {
                encoder.write_byte(SOURCE_DESCRIPTOR_HASH);
                write_descriptor_hash(encoder, hash);
                encoder.write_bool(*changing);
            }
            ModuleSource::Repository {
                repository_id,
            } => {
                encoder.write_byte(SOURCE_REPOSITORY);
                encoder.write_string(repository_id);
            }
            ModuleSource::Opaque {
                tag,
                data,
            } => {
                encoder.write_byte(SOURCE_OPAQUE);
                encoder.write_string(tag);
                encoder.write_bytes(data);
            }
        }
    }
}

pub(crate) fn read_module_sources(decoder: &mut Decoder<'_>) -> Result<ModuleSources, ResolveError> {
    let count = decoder.read_small_int()?;
    let mut sources = Vec::with_capacity(count);
    for _ in 0..count {
        let source = match decoder.read_byte()? {
            SOURCE_DESCRIPTOR_HASH => ModuleSource::DescriptorHash {
                hash: read_descriptor_hash(decoder)?,
                changing: decoder.read_bool()?,
            },
            SOURCE_REPOSITORY => ModuleSource::Repository {
                repository_id: decoder.read_string()?,
            },
            SOURCE_OPAQUE => ModuleSource::Opaque {
                tag: decoder.read_string()?,
                data: decoder.read_bytes()?,
            },
            other => {
                return Err(ResolveError::Decode {
                    what: "module sources".to_string(),
                    reason: format!("unknown source tag {other}"),
                });
            }
        };
        sources.push(source);
    }
    Ok(ModuleSources::from_vec(sources))
}

fn write_strings(encoder: &mut Encoder, values: &[String]) {
    encoder.write_small_int(values.len());
    for value in values {
        encoder.write_string(value);
    }
}

fn read_strings(decoder: &mut Decoder<'_>) -> Result<Vec<String>, ResolveError> {
    let count = decoder.read_small_int()?;
    (0..count).map(|_| decoder.read_string()).collect()
}

fn write_attributes(encoder: &mut Encoder, attributes: &AttributeMap) {
    encoder.write_small_int(attributes.len());
    for (name, value) in attributes.iter() {
        encoder.write_string(name);
        encoder.write_string(value);
    }
}

fn read_attributes(decoder: &mut Decoder<'_>) -> Result<AttributeMap, ResolveError> {
    let count = decoder.read_small_int()?;
    let mut pairs = Vec::with_capacity(count);
    for _ in 0..count {
        pairs.push((decoder.read_string()?, decoder.read_string()?));
    }
    Ok(AttributeMap::of(pairs))
}

const DEPENDENCY_INLINE: u8 = 0;
const DEPENDENCY_BACK_REFERENCE: u8 = 1;

/// Serializes [`ModuleDescriptor`]s for the descriptor file store.
///
/// Layout, in order: format version, module id, status, changing flag, extra info,
/// configurations, artifacts, dependencies, excludes, variants.
///
/// Dependencies repeated verbatim within one descriptor (common for descriptors that
/// declare the same dependency in several scopes) are written once and referenced
/// by index afterwards.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModuleDescriptorSerializer;

impl ModuleDescriptorSerializer {
    /// Encode a descriptor to bytes.
    pub fn serialize(descriptor: &ModuleDescriptor) -> Vec<u8> {
        let mut encoder = Encoder::new();
        Self.encode(descriptor, &mut encoder);
        encoder.into_bytes()
    }

    /// Decode a descriptor, rejecting trailing data.
    pub fn deserialize(bytes: &[u8]) -> Result<ModuleDescriptor, ResolveError> {
        Self.from_bytes(bytes, "module descriptor")
    }

    /// SHA-256 of the encoded descriptor.
    pub fn hash(descriptor: &ModuleDescriptor) -> DescriptorHash {
        DescriptorHash::of_bytes(&Self::serialize(descriptor))
    }

    fn write_configuration(encoder: &mut Encoder, configuration: &Configuration) {
        encoder.write_string(&configuration.name);
        encoder.write_bool(configuration.transitive);
        encoder.write_bool(configuration.visible);
        write_strings(encoder, &configuration.extends_from);
    }

    fn read_configuration(decoder: &mut Decoder<'_>) -> Result<Configuration, ResolveError> {
        Ok(Configuration {
            name: decoder.read_string()?,
            transitive: decoder.read_bool()?,
            visible: decoder.read_bool()?,
            extends_from: read_strings(decoder)?,
        })
    }

    fn write_exclude(encoder: &mut Encoder, rule: &ExcludeRule) {
        encoder.write_nullable_string(rule.group.as_deref());
        encoder.write_nullable_string(rule.module.as_deref());
        encoder.write_nullable_string(rule.artifact.as_deref());
        encoder.write_nullable_string(rule.artifact_type.as_deref());
        encoder.write_nullable_string(rule.extension.as_deref());
        write_strings(encoder, &rule.configurations);
    }

    fn read_exclude(decoder: &mut Decoder<'_>) -> Result<ExcludeRule, ResolveError> {
        Ok(ExcludeRule {
            group: decoder.read_nullable_string()?,
            module: decoder.read_nullable_string()?,
            artifact: decoder.read_nullable_string()?,
            artifact_type: decoder.read_nullable_string()?,
            extension: decoder.read_nullable_string()?,
            configurations: read_strings(decoder)?,
        })
    }

    fn write_excludes(encoder: &mut Encoder, rules: &[ExcludeRule]) {
        encoder.write_small_int(rules.len());
        for rule in rules {
            Self::write_exclude(encoder, rule);
        }
    }

    fn read_excludes(decoder: &mut Decoder<'_>) -> Result<Vec<ExcludeRule>, ResolveError> {
        let count = decoder.read_small_int()?;
        (0..count).map(|_| Self::read_exclude(decoder)).collect()
    }

    fn write_dependency(encoder: &mut Encoder, dependency: &DependencyDescriptor) {
        write_component_id(encoder, &dependency.target);
        encoder.write_small_int(dependency.configuration_mappings.len());
        for (from, to) in &dependency.configuration_mappings {
            encoder.write_string(from);
            write_strings(encoder, to);
        }
        encoder.write_bool(dependency.changing);
        encoder.write_bool(dependency.transitive);
        encoder.write_bool(dependency.optional);
        encoder.write_small_int(dependency.artifacts.len());
        for artifact in &dependency.artifacts {
            write_artifact_name(encoder, artifact);
        }
        Self::write_excludes(encoder, &dependency.excludes);
        encoder.write_nullable_string(dependency.reason.as_deref());
    }

    fn read_dependency(decoder: &mut Decoder<'_>) -> Result<DependencyDescriptor, ResolveError> {
        let target = read_component_id(decoder)?;
        let mapping_count = decoder.read_small_int()?;
        let mut configuration_mappings = BTreeMap::new();
        for _ in 0..mapping_count {
            let from = decoder.read_string()?;
            configuration_mappings.insert(from, read_strings(decoder)?);
        }
        let changing = decoder.read_bool()?;
        let transitive = decoder.read_bool()?;
        let optional = decoder.read_bool()?;
        let artifact_count = decoder.read_small_int()?;
        let artifacts =
            (0..artifact_count).map(|_| read_artifact_name(decoder)).collect::<Result<_, _>>()?;
        Ok(DependencyDescriptor {
            target,
            configuration_mappings,
            changing,
            transitive,
            optional,
            artifacts,
            excludes: Self::read_excludes(decoder)?,
            reason: decoder.read_nullable_string()?,
        })
    }

    fn write_variant(encoder: &mut Encoder, variant: &VariantDescriptor) {
        encoder.write_string(&variant.name);
        write_attributes(encoder, &variant.attributes);
        encoder.write_small_int(variant.capabilities.len());
        for capability in &variant.capabilities {
            encoder.write_string(&capability.group);
            encoder.write_string(&capability.name);
            encoder.write_string(&capability.version);
        }
        encoder.write_small_int(variant.files.len());
        for file in &variant.files {
            write_artifact_name(encoder, file);
        }
        encoder.write_small_int(variant.includes.len());
        for include in &variant.includes {
            write_component_id(encoder, &include.component);
            encoder.write_string(&include.variant);
        }
    }

    fn read_variant(decoder: &mut Decoder<'_>) -> Result<VariantDescriptor, ResolveError> {
        let name = decoder.read_string()?;
        let attributes = read_attributes(decoder)?;
        let capability_count = decoder.read_small_int()?;
        let mut capabilities = Vec::with_capacity(capability_count);
        for _ in 0..capability_count {
            capabilities.push(Capability {
                group: decoder.read_string()?,
                name: decoder.read_string()?,
                version: decoder.read_string()?,
            });
        }
        let file_count = decoder.read_small_int()?;
        let files = (0..file_count).map(|_| read_artifact_name(decoder)).collect::<Result<_, _>>()?;
        let include_count = decoder.read_small_int()?;
        let mut includes = Vec::with_capacity(include_count);
        for _ in 0..include_count {
            includes.push(VariantReference {
                component: read_component_id(decoder)?,
                variant: decoder.read_string()?,
            });
        }
        Ok(VariantDescriptor {
            name,
            attributes,
            capabilities,
            files,
            includes,
        })
    }
}

impl Codec<ModuleDescriptor> for ModuleDescriptorSerializer {
    fn encode(&self, descriptor: &ModuleDescriptor, encoder: &mut Encoder) {
        encoder.write_byte(DESCRIPTOR_FORMAT_VERSION);
        write_component_id(encoder, &descriptor.id);
        encoder.write_string(&descriptor.status);
        encoder.write_bool(descriptor.changing);

        encoder.write_small_int(descriptor.extra_info.len());
        for (key, value) in &descriptor.extra_info {
            encoder.write_string(key);
            encoder.write_string(value);
        }

        encoder.write_small_int(descriptor.configurations.len());
        for configuration in &descriptor.configurations {
            Self::write_configuration(encoder, configuration);
        }

        encoder.write_small_int(descriptor.artifacts.len());
        for artifact in &descriptor.artifacts {
            write_artifact_name(encoder, &artifact.name);
            write_strings(encoder, &artifact.configurations);
        }

        encoder.write_small_int(descriptor.dependencies.len());
        for (index, dependency) in descriptor.dependencies.iter().enumerate() {
            match descriptor.dependencies[..index].iter().position(|d| d == dependency) {
                Some(previous) => {
                    encoder.write_byte(DEPENDENCY_BACK_REFERENCE);
                    encoder.write_small_int(previous);
                }
                None => {
                    encoder.write_byte(DEPENDENCY_INLINE);
                    Self::write_dependency(encoder, dependency);
                }
            }
        }

        Self::write_excludes(encoder, &descriptor.excludes);

        encoder.write_small_int(descriptor.variants.len());
        for variant in &descriptor.variants {
            Self::write_variant(encoder, variant);
        }
    }

    fn decode(&self, decoder: &mut Decoder<'_>) -> Result<ModuleDescriptor, ResolveError> {
        let version = decoder.read_byte()?;
        if version != DESCRIPTOR_FORMAT_VERSION {
            return Err(ResolveError::Decode {
                what: "module descriptor".to_string(),
                reason: format!(
                    "unsupported format version {version} (expected {DESCRIPTOR_FORMAT_VERSION})"
                ),
            });
        }

        let id = read_component_id(decoder)?;
        let status = decoder.read_string()?;
        let changing = decoder.read_bool()?;

        let extra_count = decoder.read_small_int()?;
        let mut extra_info = BTreeMap::new();
        for _ in 0..extra_count {
            let key = decoder.read_string()?;
            extra_info.insert(key, decoder.read_string()?);
        }

        let configuration_count = decoder.read_small_int()?;
        let configurations = (0..configuration_count)
            .map(|_| Self::read_configuration(decoder))
            .collect::<Result<_, _>>()?;

        let artifact_count = decoder.read_small_int()?;
        let mut artifacts = Vec::with_capacity(artifact_count);
        for _ in 0..artifact_count {
            artifacts.push(ConfigurationArtifact {
                name: read_artifact_name(decoder)?,
                configurations: read_strings(decoder)?,
            });
        }

        let dependency_count = decoder.read_small_int()?;
        let mut dependencies: Vec<DependencyDescriptor> = Vec::with_capacity(dependency_count);
        for _ in 0..dependency_count {
            let dependency = match decoder.read_byte()? {
                DEPENDENCY_INLINE => Self::read_dependency(decoder)?,
                DEPENDENCY_BACK_REFERENCE => {
                    let index = decoder.read_varint()?;
                    usize::try_from(index)
                        .ok()
                        .and_then(|index| dependencies.get(index))
                        .cloned().ok_or_else(|| ResolveError::Decode {
                        what: "module descriptor".to_string(),
                        reason: format!("dependency back-reference {index} out of range"),
                    })?
                }
                other => {
                    return Err(ResolveError::Decode {
                        what: "module descriptor".to_string(),
                        reason: format!("unknown dependency marker {other}"),
                    });
                }
            };
            dependencies.push(dependency);
        }

        let excludes = Self::read_excludes(decoder)?;

        let variant_count = decoder.read_small_int()?;
        let variants =
            (0..variant_count).map(|_| Self::read_variant(decoder)).collect::<Result<_, _>>()?;

        Ok(ModuleDescriptor {
            id,
            status,
            changing,
            extra_info,
            configurations,
            artifacts,
            dependencies,
            excludes,
            variants,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rich_descriptor() -> ModuleDescriptor {
        let mut descriptor =
            ModuleDescriptor::new(ModuleComponentIdentifier::new("com.x", "y", "1.0"));
        descriptor.changing = true;
        descriptor.extra_info.insert("description".to_string(), "A library".to_string());
        descriptor.configurations = vec![
            Configuration::new("compile"),
            Configuration::new("runtime").extending(["compile"]),
        ];
        descriptor.artifacts = vec![ConfigurationArtifact {
            name: ArtifactName::jar("y").with_classifier("sources"),
            configurations: vec!["compile".to_string()],
        }];
        let mut dependency =
            DependencyDescriptor::new(ModuleComponentIdentifier::new("org", "dep", "2.0"));
        dependency.excludes.push(ExcludeRule::module("org", "*"));
        dependency.reason = Some("needed".to_string());
        descriptor.dependencies = vec![
            dependency.clone(),
            DependencyDescriptor::new(ModuleComponentIdentifier::new("org", "other", "3.0")),
            dependency,
        ];
        descriptor.excludes.push(ExcludeRule::artifact_type("javadoc"));
        let mut variant = VariantDescriptor::new("api", AttributeMap::of([("usage", "api")]));
        variant.capabilities.push(Capability::new("com.x", "y", "1.0"));
        variant.files.push(ArtifactName::new("y", "jar", None));
        variant.includes.push(VariantReference {
            component: ModuleComponentIdentifier::new("com.x", "platform", "1.0"),
            variant: "api".to_string(),
        });
        descriptor.variants.push(variant);
        descriptor
    }

    #[test]
    fn test_varint_boundaries() {
        let mut encoder = Encoder::new();
        for value in [0u64, 127, 128, 16_383, 16_384, u64::MAX] {
            encoder.write_varint(value);
        }
        let bytes = encoder.into_bytes();
        let mut decoder = Decoder::new(&bytes, "test");
        for value in [0u64, 127, 128, 16_383, 16_384, u64::MAX] {
            assert_eq!(decoder.read_varint().unwrap(), value);
        }
        assert!(decoder.is_at_end());
    }

    #[test]
    fn test_descriptor_round_trip_is_byte_identical() {
        let descriptor = rich_descriptor();
        let bytes = ModuleDescriptorSerializer::serialize(&descriptor);
        let decoded = ModuleDescriptorSerializer::deserialize(&bytes).unwrap();

        assert_eq!(decoded, descriptor);
        assert_eq!(ModuleDescriptorSerializer::serialize(&decoded), bytes);
    }

    #[test]
    fn test_repeated_dependencies_are_written_once() {
        let descriptor = rich_descriptor();
        let mut without_repeat = descriptor.clone();
        without_repeat.dependencies.pop();

        let with_len = ModuleDescriptorSerializer::serialize(&descriptor).len();
        let without_len = ModuleDescriptorSerializer::serialize(&without_repeat).len();
        // Marker byte plus a one-byte index.
        assert_eq!(with_len - without_len, 2);
    }

    #[test]
    fn test_hash_changes_with_content() {
        let descriptor = rich_descriptor();
        let mut changed = descriptor.clone();
        changed.status = "integration".to_string();

        assert_eq!(
            ModuleDescriptorSerializer::hash(&descriptor),
            ModuleDescriptorSerializer::hash(&descriptor.clone())
        );
        assert_ne!(
            ModuleDescriptorSerializer::hash(&descriptor),
            ModuleDescriptorSerializer::hash(&changed)
        );
    }

    #[test]
    fn test_truncated_input_is_a_decode_error() {
        let bytes = ModuleDescriptorSerializer::serialize(&rich_descriptor());
        let error = ModuleDescriptorSerializer::deserialize(&bytes[..bytes.len() / 2]).unwrap_err();
        assert!(matches!(error, ResolveError::Decode { .. }));
    }

    #[test]
    fn test_unknown_format_version_is_rejected() {
        let mut bytes = ModuleDescriptorSerializer::serialize(&rich_descriptor());
        bytes[0] = 99;
        assert!(ModuleDescriptorSerializer::deserialize(&bytes).is_err());
    }

    #[test]
    fn test_module_sources_round_trip() {
        let sources = ModuleSources::new()
            .with(ModuleSource::Repository {
                repository_id: "R1".to_string(),
            })
            .with(ModuleSource::DescriptorHash {
                hash: DescriptorHash::of_bytes(b"x"),
                changing: true,
            })
            .with(ModuleSource::Opaque {
                tag: "maven-snapshot".to_string(),
                data: vec![1, 2, 3],
            });
        let mut encoder = Encoder::new();
        write_module_sources(&mut encoder, &sources);
        let bytes = encoder.into_bytes();
        let mut decoder = Decoder::new(&bytes, "sources");
        assert_eq!(read_module_sources(&mut decoder).unwrap(), sources);
        decoder.finish().unwrap();
    }
}
