//! End-to-end CLI tests for the packsync binary.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const VALID: &str = r#"
interval_minutes = 30
cache_root = "/var/cache/packsync"
metadata_backend = "sqlite"
fixed_capacity_mbps = 20.0

[[tenants]]
name = "acme"
auth_url = "https://auth.example.com/login"
file_list_url = "https://files.example.com/download"
files = ["water.mmpk", "parcels.vtpk"]
username = "sync"
password = "hunter2"
"#;

fn write_config(contents: &str) -> (TempDir, std::path::PathBuf) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, contents).unwrap();
    (dir, path)
}

/// Test that --help displays usage information and exits with code 0.
#[test]
fn test_binary_help_displays_usage() {
    let mut cmd = Command::cargo_bin("packsync").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("check-config"))
        .stdout(predicate::str::contains("once"));
}

/// Test that --version displays version and exits with code 0.
#[test]
fn test_binary_version_displays_version() {
    let mut cmd = Command::cargo_bin("packsync").unwrap();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("packsync"));
}

/// Test that a missing subcommand causes non-zero exit.
#[test]
fn test_binary_without_subcommand_returns_error() {
    let mut cmd = Command::cargo_bin("packsync").unwrap();
    cmd.assert().failure().stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_check_config_prints_summary() {
    let (_dir, path) = write_config(VALID);
    let mut cmd = Command::cargo_bin("packsync").unwrap();
    cmd.arg("check-config")
        .arg("--config")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("config ok"))
        .stdout(predicate::str::contains("metadata_backend: sqlite"))
        .stdout(predicate::str::contains("acme (2 files, static discovery)"))
        .stdout(predicate::str::contains("hunter2").not());
}

#[test]
fn test_check_config_rejects_invalid_value() {
    let (_dir, path) = write_config(&VALID.replace("interval_minutes = 30", "interval_minutes = 0"));
    let mut cmd = Command::cargo_bin("packsync").unwrap();
    cmd.args(["-q", "check-config", "-c"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("interval_minutes"));
}

#[test]
fn test_check_config_rejects_unknown_key() {
    let (_dir, path) = write_config(&format!("{VALID}\nretries = 3\n"));
    let mut cmd = Command::cargo_bin("packsync").unwrap();
    cmd.args(["check-config", "-c"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("retries"));
}

#[test]
fn test_missing_config_file_is_error() {
    let dir = TempDir::new().unwrap();
    let mut cmd = Command::cargo_bin("packsync").unwrap();
    cmd.args(["check-config", "-c"])
        .arg(dir.path().join("absent.toml"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read config file"));
}

#[test]
fn test_default_config_path_uses_xdg() {
    let dir = TempDir::new().unwrap();
    let config_dir = dir.path().join("packsync");
    std::fs::create_dir_all(&config_dir).unwrap();
    std::fs::write(config_dir.join("config.toml"), VALID).unwrap();

    let mut cmd = Command::cargo_bin("packsync").unwrap();
    cmd.arg("check-config")
        .env("XDG_CONFIG_HOME", dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("tenants: 1"));
}
