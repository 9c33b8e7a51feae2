#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use tempfile::TempDir;

fn shep(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("shep").unwrap();
    cmd.current_dir(dir.path())
        .env("SHEP_ROOT", dir.path())
        .env_remove("RUST_LOG");
    cmd
}

/// Initialized project wired to the deterministic executor.
fn init_mock_project(dir: &TempDir) {
    shep(dir).arg("init").assert().success();
    std::fs::write(
        dir.path().join(".shep/config.yaml"),
        "executor:\n  backend: mock\n",
    )
    .unwrap();
}

fn json_of(cmd: &mut Command) -> Value {
    let out = cmd.arg("--json").assert().success().get_output().stdout.clone();
    serde_json::from_slice(&out).expect("stdout is JSON")
}

fn run_id(v: &Value) -> String {
    v["run_id"].as_str().expect("run_id present").to_string()
}

// ---------------------------------------------------------------------------
// shep init
// ---------------------------------------------------------------------------

#[test]
fn init_creates_state_dir() {
    let dir = TempDir::new().unwrap();
    shep(&dir).arg("init").assert().success();

    assert!(dir.path().join(".shep").is_dir());
    assert!(dir.path().join(".shep/logs").is_dir());
    assert!(dir.path().join(".shep/config.yaml").exists());
    assert!(dir.path().join(".shep/shep.db").exists());

    let ignore = std::fs::read_to_string(dir.path().join(".gitignore")).unwrap();
    assert!(ignore.contains(".shep/logs/"));
}

#[test]
fn init_is_idempotent() {
    let dir = TempDir::new().unwrap();
    shep(&dir).arg("init").assert().success();
    shep(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("exists"));

    let ignore = std::fs::read_to_string(dir.path().join(".gitignore")).unwrap();
    assert_eq!(ignore.matches(".shep/logs/").count(), 1);
}

#[test]
fn commands_require_init() {
    let dir = TempDir::new().unwrap();
    shep(&dir)
        .arg("status")
        .assert()
        .failure()
        .stderr(predicate::str::contains("not initialized"));
    shep(&dir)
        .args(["run", "auth"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not initialized"));
}

// ---------------------------------------------------------------------------
// shep run
// ---------------------------------------------------------------------------

#[test]
fn run_rejects_bad_feature_id() {
    let dir = TempDir::new().unwrap();
    init_mock_project(&dir);
    shep(&dir)
        .args(["run", "Bad_ID", "--foreground"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid feature id"));
}

#[test]
fn run_without_gates_completes_in_foreground() {
    let dir = TempDir::new().unwrap();
    init_mock_project(&dir);

    let started = json_of(shep(&dir).args(["run", "feat-x", "--no-gates", "--foreground"]));
    assert_eq!(started["status"], "completed");
    let id = run_id(&started);

    let detail = json_of(shep(&dir).args(["status", id.as_str(), "--steps"]));
    assert_eq!(detail["status"], "completed");
    assert_eq!(detail["feature_id"], "feat-x");
    let phases: Vec<&str> = detail["phases"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["phase"].as_str().unwrap())
        .collect();
    assert!(phases.contains(&"analyze"));
    assert!(phases.contains(&"implement"));
    assert!(!detail["steps"].as_array().unwrap().is_empty());
}

#[test]
fn status_lists_runs() {
    let dir = TempDir::new().unwrap();
    init_mock_project(&dir);
    shep(&dir)
        .args(["status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No runs yet"));

    shep(&dir)
        .args(["run", "feat-a", "--no-gates", "--foreground"])
        .assert()
        .success()
        .stdout(predicate::str::contains("completed"));
    shep(&dir)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("feat-a"));
}

#[test]
fn status_of_unknown_run_fails() {
    let dir = TempDir::new().unwrap();
    init_mock_project(&dir);
    shep(&dir)
        .args(["status", "no-such-run"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

// ---------------------------------------------------------------------------
// Approval gates
// ---------------------------------------------------------------------------

#[test]
fn gates_pause_and_approve_continues() {
    let dir = TempDir::new().unwrap();
    init_mock_project(&dir);

    let started = json_of(shep(&dir).args(["run", "auth", "--foreground"]));
    assert_eq!(started["status"], "waiting_approval");
    assert_eq!(started["waiting_at"], "requirements");
    let id = run_id(&started);

    let approved = json_of(shep(&dir).args(["approve", id.as_str(), "--foreground"]));
    assert_eq!(approved["status"], "waiting_approval");
    assert_eq!(approved["waiting_at"], "plan");
}

#[test]
fn reject_redoes_the_phase() {
    let dir = TempDir::new().unwrap();
    init_mock_project(&dir);

    let id = run_id(&json_of(shep(&dir).args(["run", "auth", "--foreground"])));
    let rejected = json_of(shep(&dir).args([
        "reject",
        id.as_str(),
        "--feedback",
        "cover password reset",
        "--foreground",
    ]));
    assert_eq!(rejected["status"], "waiting_approval");
    assert_eq!(rejected["waiting_at"], "requirements");
}

#[test]
fn reject_needs_feedback() {
    let dir = TempDir::new().unwrap();
    init_mock_project(&dir);
    let id = run_id(&json_of(shep(&dir).args(["run", "auth", "--foreground"])));
    shep(&dir)
        .args(["reject", id.as_str(), "--feedback", "  "])
        .assert()
        .failure()
        .stderr(predicate::str::contains("must not be empty"));
}

#[test]
fn approve_requires_a_waiting_run() {
    let dir = TempDir::new().unwrap();
    init_mock_project(&dir);
    let id = run_id(&json_of(
        shep(&dir).args(["run", "done", "--no-gates", "--foreground"]),
    ));
    shep(&dir)
        .args(["approve", id.as_str(), "--foreground"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("completed"));
}

#[test]
fn worker_command_is_hidden() {
    let dir = TempDir::new().unwrap();
    shep(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("approve").and(predicate::str::contains("worker").not()));
}
