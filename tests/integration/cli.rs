//! The `depot` binary against temporary cache and configuration directories.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn depot(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("depot").unwrap();
    cmd.env("HOME", home.path())
        .env_remove("DEPOT_CONFIG")
        .env_remove("DEPOT_CACHE_DIR")
        .env_remove("RUST_LOG")
        .env("NO_COLOR", "1")
        .arg("--quiet");
    cmd
}

#[test]
fn test_cache_info_json_on_empty_cache() {
    let temp = TempDir::new().unwrap();
    let cache_dir = temp.path().join("cache");

    depot(&temp)
        .args(["cache", "info", "--json", "--cache-dir"])
        .arg(&cache_dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"modules\": 0"))
        .stdout(predicate::str::contains("\"missing_modules\": 0"));

    assert!(cache_dir.exists());
}

#[test]
fn test_cache_info_human_readable() {
    let temp = TempDir::new().unwrap();
    depot(&temp)
        .args(["cache", "info", "--cache-dir"])
        .arg(temp.path().join("cache"))
        .assert()
        .success()
        .stdout(predicate::str::contains("Resolution cache"))
        .stdout(predicate::str::contains("Artifact listings"));
}

#[test]
fn test_cache_gc_and_clean() {
    let temp = TempDir::new().unwrap();
    let cache_dir = temp.path().join("cache");
    std::fs::create_dir_all(cache_dir.join("modules-1")).unwrap();

    depot(&temp)
        .args(["cache", "gc", "--cache-dir"])
        .arg(&cache_dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("Old cache layouts:       1"));
    assert!(!cache_dir.join("modules-1").exists());

    depot(&temp)
        .args(["cache", "clean", "--all", "--cache-dir"])
        .arg(&cache_dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed 0 cache entries"));

    depot(&temp)
        .args(["cache", "clean", "--older-than-days", "7", "--cache-dir"])
        .arg(&cache_dir)
        .assert()
        .success();
}

#[test]
fn test_clean_flags_conflict() {
    let temp = TempDir::new().unwrap();
    depot(&temp)
        .args(["cache", "clean", "--all", "--older-than-days", "3", "--cache-dir"])
        .arg(temp.path().join("cache"))
        .assert()
        .failure();
}

#[test]
fn test_inspect_unknown_component() {
    let temp = TempDir::new().unwrap();
    depot(&temp)
        .args(["cache", "inspect", "com.x:y:1.0", "--repo", "central", "--cache-dir"])
        .arg(temp.path().join("cache"))
        .assert()
        .success()
        .stdout(predicate::str::contains("No cache entry for"));
}

#[test]
fn test_inspect_rejects_malformed_coordinates() {
    let temp = TempDir::new().unwrap();
    depot(&temp)
        .args(["cache", "inspect", "not-coordinates", "--repo", "central", "--cache-dir"])
        .arg(temp.path().join("cache"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn test_config_path_follows_flag() {
    let temp = TempDir::new().unwrap();
    let config = temp.path().join("custom.toml");
    depot(&temp)
        .arg("--config")
        .arg(&config)
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("custom.toml"));
}

#[test]
fn test_config_path_follows_environment() {
    let temp = TempDir::new().unwrap();
    let config = temp.path().join("from-env.toml");
    depot(&temp)
        .env("DEPOT_CONFIG", &config)
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("from-env.toml"));
}

#[test]
fn test_config_init_refuses_to_overwrite_without_force() {
    let temp = TempDir::new().unwrap();
    let config = temp.path().join("depot.toml");

    depot(&temp).arg("--config").arg(&config).args(["config", "init"]).assert().success();
    assert!(config.exists());

    depot(&temp)
        .arg("--config")
        .arg(&config)
        .args(["config", "init"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    depot(&temp).arg("--config").arg(&config).args(["config", "init", "--force"]).assert().success();
}

#[test]
fn test_config_show_uses_configured_cache_dir() {
    let temp = TempDir::new().unwrap();
    let config = temp.path().join("depot.toml");
    let cache_dir = temp.path().join("configured-cache");
    std::fs::write(&config, format!("cache_dir = {:?}\nmax_parallel = 3\n", cache_dir.display().to_string())).unwrap();

    depot(&temp)
        .arg("--config")
        .arg(&config)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("configured-cache"))
        .stdout(predicate::str::contains("Max parallel: 3"));
}

#[test]
fn test_malformed_config_is_reported() {
    let temp = TempDir::new().unwrap();
    let config = temp.path().join("depot.toml");
    std::fs::write(&config, "max_parallel = \"many\"\n").unwrap();

    depot(&temp)
        .arg("--config")
        .arg(&config)
        .args(["cache", "info", "--cache-dir"])
        .arg(temp.path().join("cache"))
        .assert()
        .failure();
}
