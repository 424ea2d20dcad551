//! Metadata, listing and artifact caches against a real cache directory.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use depot::cache::artifact_files::{CacheScopeId, SharedArtifactCaches};
use depot::cache::codec::ModuleDescriptorSerializer;
use depot::cache::policy::CachePolicy;
use depot::cache::repository::{CachingModuleRepository, ComponentMetadataResult};
use depot::cache::{CacheLayout, ResolutionCaches};
use depot::constants::DEFAULT_MISSING_MODULE_TTL;
use depot::models::{ArtifactIdentifier, ArtifactName, ComponentKey, ModuleComponentIdentifier, ModuleDescriptor};
use depot::test_utils::{DescriptorBuilder, FakeRepository, ManualClock, init_test_logging};
use tempfile::TempDir;

const START: i64 = 1_700_000_000_000;
const HOUR: Duration = Duration::from_secs(3600);

struct Fixture {
    temp: TempDir,
    clock: Arc<ManualClock>,
    repository: Arc<FakeRepository>,
}

impl Fixture {
    fn new() -> Self {
        init_test_logging(None);
        let temp = TempDir::new().unwrap();
        let repository = Arc::new(FakeRepository::new("R1", temp.path().join("repo")));
        Self {
            clock: Arc::new(ManualClock::new(START)),
            repository,
            temp,
        }
    }

    fn open(&self) -> ResolutionCaches {
        ResolutionCaches::open(CacheLayout::new(self.temp.path().join("cache")), self.clock.clone(), None).unwrap()
    }

    fn caching(&self, caches: &ResolutionCaches, policy: CachePolicy) -> CachingModuleRepository {
        caches.caching_repository(self.repository.clone(), policy)
    }
}

fn xy() -> ModuleComponentIdentifier {
    ModuleComponentIdentifier::new("com.x", "y", "1.0")
}

fn xy_descriptor() -> ModuleDescriptor {
    DescriptorBuilder::new("com.x", "y", "1.0")
        .artifact("y", &["runtime"])
        .variant("runtime", &[("usage", "runtime")], &["y"])
        .build()
}

#[test]
fn test_miss_then_fetch_stores_descriptor_with_hash() -> Result<()> {
    let fixture = Fixture::new();
    let caches = fixture.open();
    let key = ComponentKey::new("R1", xy());

    assert!(caches.cached_metadata(&key)?.is_none());

    fixture.repository.publish(xy_descriptor());
    let result = fixture.caching(&caches, CachePolicy::default()).resolve_component_metadata(&xy())?;
    assert!(result.is_authoritative());
    let metadata = result.metadata().expect("module should resolve");

    let cached = caches.cached_metadata(&key)?.expect("metadata should be cached");
    assert!(!cached.is_missing());
    assert_eq!(cached.age(), Duration::ZERO);
    assert_eq!(cached.descriptor_hash(), Some(ModuleDescriptorSerializer::hash(&xy_descriptor())));
    assert_eq!(cached.descriptor_hash(), Some(metadata.descriptor_hash));
    assert_eq!(cached.descriptor().map(|d| d.as_ref()), Some(&xy_descriptor()));
    assert_eq!(cached.module_sources().descriptor_hash().map(|(hash, _)| hash), Some(metadata.descriptor_hash));
    Ok(())
}

#[test]
fn test_metadata_survives_reopen() -> Result<()> {
    let fixture = Fixture::new();
    fixture.repository.publish(xy_descriptor());
    {
        let caches = fixture.open();
        fixture.caching(&caches, CachePolicy::default()).resolve_component_metadata(&xy())?;
    }
    assert_eq!(fixture.repository.metadata_requests(), 1);

    fixture.clock.advance(HOUR);
    let caches = fixture.open();
    let result = fixture.caching(&caches, CachePolicy::default()).resolve_component_metadata(&xy())?;

    assert!(!result.is_authoritative());
    assert_eq!(result.metadata().map(|m| m.descriptor.as_ref()), Some(&xy_descriptor()));
    assert_eq!(fixture.repository.metadata_requests(), 1);
    let cached = caches.cached_metadata(&ComponentKey::new("R1", xy()))?.expect("metadata should be cached");
    assert_eq!(cached.age(), HOUR);
    Ok(())
}

#[test]
fn test_missing_module_is_remembered_until_ttl() -> Result<()> {
    let fixture = Fixture::new();
    let caches = fixture.open();
    let caching = fixture.caching(&caches, CachePolicy::default());

    let first = caching.resolve_component_metadata(&xy())?;
    assert!(matches!(first, ComponentMetadataResult::Missing { authoritative: true }));

    fixture.clock.advance(HOUR);
    let second = caching.resolve_component_metadata(&xy())?;
    assert!(matches!(second, ComponentMetadataResult::Missing { authoritative: false }));
    assert_eq!(fixture.repository.metadata_requests(), 1);

    fixture.repository.publish(xy_descriptor());
    fixture.clock.advance(DEFAULT_MISSING_MODULE_TTL);
    let third = caching.resolve_component_metadata(&xy())?;
    assert!(third.metadata().is_some());
    assert_eq!(fixture.repository.metadata_requests(), 2);
    Ok(())
}

#[test]
fn test_listing_is_refetched_when_descriptor_changes() -> Result<()> {
    let fixture = Fixture::new();
    let caches = fixture.open();
    fixture.repository.publish(xy_descriptor());

    let caching = fixture.caching(&caches, CachePolicy::default());
    let metadata = caching.resolve_component_metadata(&xy())?.metadata().cloned().expect("module should resolve");
    let listed = caching.resolve_artifacts_with_type(&metadata, "jar")?;
    assert_eq!(listed.len(), 1);
    caching.resolve_artifacts_with_type(&metadata, "jar")?;
    assert_eq!(fixture.repository.listing_requests(), 1);

    fixture.repository.publish(
        DescriptorBuilder::new("com.x", "y", "1.0").artifact("y", &["runtime"]).artifact("y-extra", &["runtime"]).build(),
    );
    let refreshing = fixture.caching(&caches, CachePolicy::refresh_all());
    let changed = refreshing.resolve_component_metadata(&xy())?.metadata().cloned().expect("module should resolve");
    assert_ne!(changed.descriptor_hash, metadata.descriptor_hash);

    let relisted = caching.resolve_artifacts_with_type(&changed, "jar")?;
    assert_eq!(fixture.repository.listing_requests(), 2);
    let names: Vec<&str> = relisted.iter().map(|a| a.name.name.as_str()).collect();
    assert_eq!(names, vec!["y", "y-extra"]);
    Ok(())
}

#[test]
fn test_artifact_file_outcome_survives_reopen() -> Result<()> {
    let fixture = Fixture::new();
    fixture.repository.publish(xy_descriptor());
    let jar = ArtifactIdentifier::new(xy(), ArtifactName::jar("y"));
    let published = fixture.repository.publish_file(&jar, b"jar");

    {
        let caches = fixture.open();
        let caching = fixture.caching(&caches, CachePolicy::default());
        let metadata = caching.resolve_component_metadata(&xy())?.metadata().cloned().expect("module should resolve");
        assert_eq!(caching.artifact_file(&jar, &metadata.sources)?, published);
    }

    let caches = fixture.open();
    let caching = fixture.caching(&caches, CachePolicy::default());
    let metadata = caching.resolve_component_metadata(&xy())?.metadata().cloned().expect("module should resolve");
    assert_eq!(caching.artifact_file(&jar, &metadata.sources)?, published);
    assert_eq!(fixture.repository.artifact_requests(), 1);
    Ok(())
}

#[test]
fn test_shared_scope_serves_other_cache_directories() -> Result<()> {
    let temp = TempDir::new()?;
    let clock = Arc::new(ManualClock::new(START));
    let repository = Arc::new(FakeRepository::new("R1", temp.path().join("repo")));
    repository.publish(xy_descriptor());
    let jar = ArtifactIdentifier::new(xy(), ArtifactName::jar("y"));
    let published = repository.publish_file(&jar, b"jar");

    let shared = SharedArtifactCaches::new();
    let scope = CacheScopeId::new("build-1");
    let first = ResolutionCaches::open(CacheLayout::new(temp.path().join("a")), clock.clone(), Some((&shared, &scope)))?;
    let second = ResolutionCaches::open(CacheLayout::new(temp.path().join("b")), clock, Some((&shared, &scope)))?;

    for caches in [&first, &second] {
        let caching = caches.caching_repository(repository.clone(), CachePolicy::default());
        let metadata = caching.resolve_component_metadata(&xy())?.metadata().cloned().expect("module should resolve");
        assert_eq!(caching.artifact_file(&jar, &metadata.sources)?, published);
    }

    assert_eq!(repository.metadata_requests(), 2);
    assert_eq!(repository.artifact_requests(), 1);
    Ok(())
}

#[test]
fn test_clean_by_age_then_everything() -> Result<()> {
    let fixture = Fixture::new();
    let caches = fixture.open();
    fixture.repository.publish(xy_descriptor());
    let caching = fixture.caching(&caches, CachePolicy::default());
    caching.resolve_component_metadata(&xy())?;

    fixture.clock.advance(HOUR * 48);
    caching.resolve_component_metadata(&ModuleComponentIdentifier::new("com.x", "gone", "1.0"))?;

    let stats = caches.stats();
    assert_eq!(stats.modules, 1);
    assert_eq!(stats.missing_modules, 1);
    assert_eq!(stats.descriptor_files, 1);

    let report = caches.clean(Some(HOUR * 24))?;
    assert_eq!(report.metadata_entries, 1);
    let stats = caches.stats();
    assert_eq!(stats.modules, 0);
    assert_eq!(stats.missing_modules, 1);

    let report = caches.clean(None)?;
    assert_eq!(report.metadata_entries, 1);
    assert_eq!(caches.stats().descriptor_files, 0);
    Ok(())
}

#[test]
fn test_gc_drops_entries_whose_descriptor_vanished() -> Result<()> {
    let fixture = Fixture::new();
    fixture.repository.publish(xy_descriptor());
    let caches = fixture.open();
    fixture.caching(&caches, CachePolicy::default()).resolve_component_metadata(&xy())?;

    std::fs::remove_dir_all(caches.layout().descriptors_dir())?;
    let report = caches.gc()?;
    assert_eq!(report.dangling_entries, 1);
    assert!(caches.inspect(&ComponentKey::new("R1", xy())).is_none());
    Ok(())
}
