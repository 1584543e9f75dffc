//! Binary smoke tests.

mod common;

use assert_cmd::Command;
use predicates::prelude::*;

fn ird() -> Command {
    let mut cmd = Command::cargo_bin("ird").expect("binary built");
    cmd.env_remove("IRD_SOCKET")
        .env_remove("IRD_CONFIG")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_version_prints_build_info() {
    ird()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("ird "))
        .stdout(predicate::str::contains("rustc:"));
}

#[test]
fn test_check_reports_remotes() {
    let dir = tempfile::tempdir().unwrap();
    let config = common::write_config(&dir);
    ird()
        .arg("check")
        .arg("--config")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("tv (2 buttons)"))
        .stdout(predicate::str::contains("OK: 2 remote(s)"));
}

#[test]
fn test_check_json_output() {
    let dir = tempfile::tempdir().unwrap();
    let config = common::write_config(&dir);
    ird()
        .args(["check", "--format", "json", "--config"])
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"name\": \"tv\""))
        .stdout(predicate::str::contains("\"VOLUME_DOWN\""));
}

#[test]
fn test_check_rejects_bad_config_with_line_number() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.conf");
    std::fs::write(&path, "begin remote\n  name tv\n  bitz 8\nend remote\n").unwrap();
    ird()
        .arg("check")
        .arg("--config")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "Configuration parse error at line 3",
        ))
        .stderr(predicate::str::contains("Hint:"));
}

#[test]
fn test_check_missing_config_suggests_flag() {
    ird()
        .args(["check", "--config", "/nonexistent/ird.conf"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Configuration file not found"));
}

#[test]
fn test_list_without_daemon_fails_cleanly() {
    ird()
        .args(["list", "--socket", "/nonexistent/ird.sock"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot connect"));
}

#[test]
fn test_completions_generate() {
    ird()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ird"));
}
