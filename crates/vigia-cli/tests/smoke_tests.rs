//! Smoke tests for the vigia CLI
//!
//! These run the built binary end to end.

#![allow(deprecated)] // Command::cargo_bin
#![allow(clippy::expect_used, clippy::unwrap_used)]

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Command for the vigia binary with a clean `VIGIA_*` environment
fn vigia() -> Command {
    let mut cmd = Command::cargo_bin("vigia").expect("vigia binary should exist");
    for var in [
        "VIGIA_CONFIG",
        "VIGIA_BASE_URL",
        "VIGIA_TIMEOUT_MS",
        "VIGIA_INTERVAL_MS",
        "VIGIA_PROBE_MS",
        "VIGIA_NAVIGATION_MS",
        "VIGIA_HEADLESS",
        "VIGIA_LOG_FORMAT",
        "VIGIA_SSO_SECRET",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

// ============================================================================
// Basic CLI Tests
// ============================================================================

#[test]
fn test_version_flag() {
    vigia()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_help_lists_subcommands() {
    vigia()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("config"))
        .stdout(predicate::str::contains("doubles"))
        .stdout(predicate::str::contains("probe"));
}

#[test]
fn test_no_args_fails() {
    vigia().assert().failure();
}

#[test]
fn test_unknown_subcommand_fails() {
    vigia().arg("record").assert().failure();
}

// ============================================================================
// Config
// ============================================================================

#[test]
fn test_config_defaults_as_yaml() {
    vigia()
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("base_url: http://localhost:3000"))
        .stdout(predicate::str::contains("timeout_ms: 5000"));
}

#[test]
fn test_config_env_override_as_json() {
    let output = vigia()
        .args(["config", "--format", "json"])
        .env("VIGIA_TIMEOUT_MS", "1234")
        .output()
        .unwrap();
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["wait"]["timeout_ms"], 1234);
}

#[test]
fn test_config_from_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("vigia.yaml");
    fs::write(&path, "base_url: http://forum.test\nbrowser:\n  headless: false\n").unwrap();
    vigia()
        .args(["config", "--file"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("http://forum.test"))
        .stdout(predicate::str::contains("headless: false"));
}

#[test]
fn test_config_rejects_bad_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("vigia.yaml");
    fs::write(&path, "wait:\n  interval_ms: 0\n").unwrap();
    vigia()
        .args(["config", "--file"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error:"));
}

#[test]
fn test_config_rejects_bad_env() {
    vigia()
        .arg("config")
        .env("VIGIA_TIMEOUT_MS", "soon")
        .assert()
        .failure()
        .stderr(predicate::str::contains("VIGIA_TIMEOUT_MS"));
}

// ============================================================================
// Doubles
// ============================================================================

#[test]
fn test_doubles_once_prints_endpoints() {
    vigia()
        .args(["doubles", "--once", "--username", "bob", "--email", "bob@example.com"])
        .assert()
        .success()
        .stderr(predicate::str::contains("/session/sso_provider"))
        .stderr(predicate::str::contains("/authorize"))
        .stderr(predicate::str::contains("vigia-client"));
}

#[test]
fn test_doubles_rejects_bad_email() {
    vigia()
        .args(["doubles", "--once", "--email", "nobody"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--email"));
}

// ============================================================================
// Probe
// ============================================================================

#[test]
fn test_probe_rejects_relative_path() {
    vigia()
        .args(["probe", "latest"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("must start with '/'"));
}

#[cfg(not(feature = "browser"))]
#[test]
fn test_probe_needs_browser_feature() {
    vigia()
        .args(["probe", "/latest"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--features browser"));
}
