//! Binary tests of `deploy` against the local provider

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const CONFIG: &str = r#"
services:
  - name: web
    cluster: prod
    count: 2
    autoscalinggroup_name: prod-asg
    containers:
      - name: web
        image: registry.local/web:1.0.0
        ports:
          - container_port: 8000
    config:
      - DB_HOST=db.internal

tasks:
  - name: nightly-report
    service: web
    containers:
      - name: report
        image: registry.local/report:2.1
"#;

const STATE: &str = r#"{
  "capacity_groups": [
    { "name": "prod-asg", "min_size": 1, "max_size": 4, "desired_capacity": 1 }
  ]
}"#;

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("deployfish.yml"), CONFIG).unwrap();
        std::fs::write(dir.path().join("state.json"), STATE).unwrap();
        Self { dir }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn deploy(&self) -> Command {
        let mut cmd = Command::cargo_bin("deploy").unwrap();
        cmd.current_dir(self.dir.path())
            .env_clear()
            .env("NO_COLOR", "1")
            .env("RUST_LOG", "warn")
            .arg("--config")
            .arg(self.path("config.toml"))
            .arg("--state-file")
            .arg(self.path("state.json"))
            .args(["--poll-interval", "0"]);
        cmd
    }

    fn state(&self) -> serde_json::Value {
        read_json(&self.path("state.json"))
    }

    fn create(&self) {
        self.deploy()
            .args(["create", "web", "--update-configs"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created web in cluster prod"));
    }
}

fn read_json(path: &Path) -> serde_json::Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

#[test]
fn create_then_info_reads_persisted_state() {
    let ws = Workspace::new();
    ws.create();

    ws.deploy()
        .args(["info", "web"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Service: web"))
        .stdout(predicate::str::contains("2 running / 2 desired"))
        .stdout(predicate::str::contains("registry.local/web:1.0.0"));

    ws.deploy()
        .args(["version", "web"])
        .assert()
        .success()
        .stdout("1.0.0\n");

    let state = ws.state();
    assert_eq!(state["capacity_groups"][0]["desired_capacity"], 2);
}

#[test]
fn dry_run_prints_plan_and_changes_nothing() {
    let ws = Workspace::new();

    ws.deploy()
        .args(["create", "web", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Plan: create web in cluster prod"))
        .stdout(predicate::str::contains("Dry run"));

    assert_eq!(ws.state()["services"], serde_json::json!([]));
}

#[test]
fn create_on_existing_service_exits_with_failure() {
    let ws = Workspace::new();
    ws.create();

    ws.deploy()
        .args(["create", "web"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn negative_scale_is_rejected() {
    let ws = Workspace::new();
    ws.create();

    ws.deploy()
        .args(["scale", "web", "-1"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Invalid task count -1"));
}

#[test]
fn scale_past_capacity_group_needs_force() {
    let ws = Workspace::new();
    ws.create();

    ws.deploy()
        .args(["scale", "web", "5"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("prod-asg"));

    ws.deploy()
        .args(["scale", "web", "5", "--force-asg"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Scaled web"));

    assert_eq!(ws.state()["capacity_groups"][0]["desired_capacity"], 5);
}

#[test]
fn mismatched_delete_confirmation_keeps_service() {
    let ws = Workspace::new();
    ws.create();

    ws.deploy()
        .args(["delete", "web"])
        .write_stdin("api\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Not deleting service"));

    ws.deploy().args(["info", "web"]).assert().success();
}

#[test]
fn confirmed_delete_removes_service() {
    let ws = Workspace::new();
    ws.create();

    ws.deploy()
        .args(["delete", "web"])
        .write_stdin("web\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Deleted web"));

    ws.deploy()
        .args(["info", "web"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"web\" service is not in cluster prod yet"));
}

#[test]
fn delete_confirmation_must_match_exactly() {
    let ws = Workspace::new();
    ws.create();

    ws.deploy()
        .args(["delete", "web"])
        .write_stdin(" web \n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Not deleting service"));

    ws.deploy()
        .args(["version", "web"])
        .assert()
        .success()
        .stdout("1.0.0\n");
}

#[test]
fn info_before_create_reports_absent_service() {
    let ws = Workspace::new();

    ws.deploy()
        .args(["info", "web"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"web\" service is not in cluster prod yet"));

    let output = ws
        .deploy()
        .args(["-o", "json", "info", "web"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let info: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(info["live"]["exists"], false);
}

#[test]
fn dry_run_scale_past_capacity_group_fails() {
    let ws = Workspace::new();
    ws.create();

    ws.deploy()
        .args(["scale", "web", "5", "--dry-run"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("prod-asg"));

    assert_eq!(ws.state()["capacity_groups"][0]["desired_capacity"], 2);
}

#[test]
fn json_output_summarizes_operation() {
    let ws = Workspace::new();

    let output = ws
        .deploy()
        .args(["-o", "json", "create", "web"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["status"], "completed");
    assert_eq!(summary["service"], "web");
    assert!(!summary["applied"].as_array().unwrap().is_empty());
}

#[test]
fn run_task_reports_started_task() {
    let ws = Workspace::new();
    ws.create();

    ws.deploy()
        .args(["run-task", "web", "manage.py", "check", "--deploy"])
        .assert()
        .success()
        .stdout(predicate::str::is_match(r"Task [0-9a-f-]{36} started").unwrap());
}

#[test]
fn related_tasks_lists_bound_tasks() {
    let ws = Workspace::new();

    ws.deploy()
        .args(["related-tasks", "web"])
        .assert()
        .success()
        .stdout(predicate::str::contains("nightly-report"))
        .stdout(predicate::str::contains("registry.local/report:2.1"));
}

#[test]
fn unknown_service_is_a_config_error() {
    let ws = Workspace::new();

    ws.deploy()
        .args(["info", "api"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("not defined"));
}

#[test]
fn entrypoint_dry_run_shows_parameters() {
    let ws = Workspace::new();
    ws.create();

    ws.deploy()
        .env("DEPLOYFISH_SERVICE_NAME", "web")
        .env("DEPLOYFISH_CLUSTER_NAME", "prod")
        .args(["entrypoint", "--dry-run", "gunicorn", "app:wsgi"])
        .assert()
        .success()
        .stdout(predicate::str::contains("DB_HOST=db.internal"))
        .stdout(predicate::str::contains("Would run: gunicorn app:wsgi"));
}

#[test]
fn entrypoint_does_not_need_config_file() {
    let ws = Workspace::new();
    std::fs::remove_file(ws.path("deployfish.yml")).unwrap();

    ws.deploy()
        .args(["entrypoint", "--dry-run", "true"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Would run: true"));
}

#[cfg(unix)]
#[test]
fn entrypoint_exports_parameters_and_mirrors_exit_status() {
    let ws = Workspace::new();
    ws.create();

    ws.deploy()
        .env("PATH", std::env::var("PATH").unwrap_or_default())
        .env("DEPLOYFISH_SERVICE_NAME", "web")
        .env("DEPLOYFISH_CLUSTER_NAME", "prod")
        .args(["entrypoint", "sh", "-c", "test \"$DB_HOST\" = db.internal && exit 3"])
        .assert()
        .code(3);
}
