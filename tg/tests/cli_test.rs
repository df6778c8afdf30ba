//! End-to-end tests for the `tg` binary

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// `tg` isolated from any config in the working directory or home
fn tg(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("tg").expect("tg binary is built");
    cmd.current_dir(dir.path())
        .env("HOME", dir.path())
        .env("XDG_CONFIG_HOME", dir.path().join(".config"))
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG");
    cmd
}

fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).expect("write fixture");
    path
}

const ORDERED_JOB: &str = r#"
group:
  n: 3
tasks:
  - name: slow
    command: sleep 0.3; echo first
  - name: medium
    command: sleep 0.1; echo second
  - name: fast
    command: echo "$1"
    args: [third]
"#;

// =============================================================================
// run
// =============================================================================

#[test]
fn test_run_prints_outputs_in_order() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "job.yml", ORDERED_JOB);

    tg(&dir)
        .args(["run", "job.yml"])
        .assert()
        .success()
        .stdout(predicate::str::is_match(r"(?s)\[slow\] first.*\[medium\] second.*\[fast\] third").unwrap());
}

#[test]
fn test_run_json_output() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "job.yml", ORDERED_JOB);

    let output = tg(&dir).args(["run", "job.yml", "--format", "json"]).output().unwrap();
    assert!(output.status.success());

    let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let outputs: Vec<&str> = parsed
        .as_array()
        .unwrap()
        .iter()
        .map(|entry| entry["output"].as_str().unwrap())
        .collect();
    assert_eq!(outputs, vec!["first", "second", "third"]);
    assert_eq!(parsed[0]["name"], "slow");
}

#[test]
fn test_run_failing_command_exits_non_zero() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "job.yml",
        "tasks:\n  - command: echo ok\n  - name: broken\n    command: exit 7\n",
    );

    tg(&dir)
        .args(["run", "job.yml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("broken: exit code 7"));
}

#[test]
fn test_run_rejects_invalid_every_flag() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "job.yml", "tasks:\n  - command: echo ok\n");

    tg(&dir)
        .args(["run", "job.yml", "--every", "soonish"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid every"));
}

#[test]
fn test_run_missing_job_file() {
    let dir = TempDir::new().unwrap();

    tg(&dir)
        .args(["run", "nope.yml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load job"));
}

#[test]
fn test_run_empty_job() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "job.yml", "tasks: []\n");

    tg(&dir)
        .args(["run", "job.yml", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[]"));
}

// =============================================================================
// validate and config
// =============================================================================

#[test]
fn test_validate_reports_effective_options() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), ".taskgroup.yml", "group:\n  n: 4\n  every: 50ms\n");
    write(dir.path(), "job.yml", "group:\n  burst: 2\ntasks:\n  - command: echo a\n  - command: echo b\n");

    tg(&dir)
        .args(["validate", "job.yml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("tasks: 2"))
        .stdout(predicate::str::contains("n: 4"))
        .stdout(predicate::str::contains("every: 50ms"))
        .stdout(predicate::str::contains("burst: 2"));
}

#[test]
fn test_validate_job_overrides_config() {
    let dir = TempDir::new().unwrap();
    let config = write(dir.path(), "custom.yml", "group:\n  n: 4\n");
    write(dir.path(), "job.yml", "group:\n  n: 1\ntasks:\n  - command: echo a\n");

    tg(&dir)
        .arg("--config")
        .arg(&config)
        .args(["validate", "job.yml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("n: 1"));
}

#[test]
fn test_validate_rejects_bad_job() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "job.yml", "group:\n  every: 0s\ntasks:\n  - command: echo a\n");

    tg(&dir)
        .args(["validate", "job.yml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid group options"));
}

#[test]
fn test_explicit_missing_config_fails() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "job.yml", "tasks:\n  - command: echo a\n");

    tg(&dir)
        .args(["--config", "missing.yml", "validate", "job.yml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load configuration"));
}
