//! CLI integration tests for the recliner command-line interface.
//!
//! These tests do not require a running server. Commands that need one are
//! pointed at a closed local port and only their failure path is checked.

use assert_cmd::Command;
use predicates::prelude::*;

/// Address nothing listens on.
const UNREACHABLE: &str = "http://127.0.0.1:1";

/// Get a command for the recliner binary, isolated from the user's config.
fn recliner() -> Command {
    let mut cmd = Command::cargo_bin("recliner").unwrap();
    cmd.env_remove("RECLINER_URL")
        .env_remove("RECLINER_CONFIG")
        .env("RUST_LOG", "off");
    cmd
}

// ─────────────────────────────────────────────────────────────────────────────
// Help and Version Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_help_displays() {
    recliner()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("recliner"));
}

#[test]
fn test_version_displays() {
    recliner()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("recliner"));
}

#[test]
fn test_help_lists_subcommands() {
    recliner()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("watch"))
        .stdout(predicate::str::contains("get"))
        .stdout(predicate::str::contains("login"));
}

#[test]
fn test_watch_help_lists_flags() {
    recliner()
        .args(["watch", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--since"))
        .stdout(predicate::str::contains("--include-docs"))
        .stdout(predicate::str::contains("--heartbeat"))
        .stdout(predicate::str::contains("--limit"))
        .stdout(predicate::str::contains("--ignore"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Argument Validation Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_missing_subcommand_fails() {
    recliner().assert().failure();
}

#[test]
fn test_watch_requires_database() {
    recliner()
        .arg("watch")
        .assert()
        .failure()
        .stderr(predicate::str::contains("DATABASE"));
}

#[test]
fn test_watch_rejects_unknown_ignore_rule() {
    recliner()
        .args(["watch", "notes", "--ignore", "remove:doc"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown ignore rule"));
}

#[test]
fn test_watch_rejects_unknown_mode() {
    recliner()
        .args(["watch", "notes", "--mode", "eventsource"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown feed mode"));
}

#[test]
fn test_watch_rejects_non_numeric_limit() {
    recliner()
        .args(["watch", "notes", "--limit", "many"])
        .assert()
        .failure();
}

#[test]
fn test_get_requires_path() {
    recliner().arg("get").assert().failure();
}

// ─────────────────────────────────────────────────────────────────────────────
// Connection Failure Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_get_unreachable_server_fails() {
    recliner()
        .args(["--server", UNREACHABLE, "get", "/_all_dbs"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("communication error"));
}

#[test]
fn test_server_from_env() {
    recliner()
        .env("RECLINER_URL", UNREACHABLE)
        .args(["get", "/"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("127.0.0.1:1"));
}

#[test]
fn test_watch_unreachable_server_fails() {
    recliner()
        .args(["--server", UNREACHABLE, "watch", "notes", "--since", "now"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("_changes?feed=continuous"));
}

#[test]
fn test_invalid_server_url_rejected() {
    recliner()
        .args(["--server", "ftp://couch.local", "get", "/"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unsupported scheme"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Config File Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_invalid_config_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[server]\nauth = \"kerberos\"\n").unwrap();

    recliner()
        .arg("--config")
        .arg(&path)
        .args(["get", "/"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load config"));
}

#[test]
fn test_config_file_server_used() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, format!("[server]\nurl = \"{}\"\n", UNREACHABLE)).unwrap();

    recliner()
        .arg("--config")
        .arg(&path)
        .args(["get", "/"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("127.0.0.1:1"));
}

#[test]
fn test_login_requires_username() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, format!("[server]\nurl = \"{}\"\n", UNREACHABLE)).unwrap();

    recliner()
        .arg("--config")
        .arg(&path)
        .arg("login")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no username configured"));
}
