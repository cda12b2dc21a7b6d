//! E2E CLI tests for the planning workflow:
//! - `sprintlog project create` initializing the store
//! - task creation, status changes, board and deletion
//! - sprint planning, start, status and completion feeding velocity
//! - commit magic words linking commits and closing tasks
//! - `sprintlog rebuild` reproducing the same projections
//!
//! Each test runs the binary as a subprocess in an isolated temp directory.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::path::Path;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Test Harness
// ---------------------------------------------------------------------------

/// Build a Command targeting the sprintlog binary, rooted in `dir` with an
/// isolated home and no inherited sprintlog settings.
fn sl_cmd(dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("sprintlog"));
    cmd.current_dir(dir);
    cmd.env("HOME", dir);
    cmd.env("XDG_CONFIG_HOME", dir.join(".config"));
    cmd.env("SPRINTLOG_LOG", "error");
    cmd.env("SPRINTLOG_ACTOR", "e2e");
    for var in [
        "SPRINTLOG_PROJECT",
        "SPRINTLOG_DB_PATH",
        "SPRINTLOG_FORMAT",
        "GITHUB_TOKEN",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

/// Run with `--json`, assert success, return parsed stdout.
fn run_json(dir: &Path, args: &[&str]) -> Value {
    let output = sl_cmd(dir)
        .args(args)
        .arg("--json")
        .output()
        .expect("command should not crash");
    assert!(
        output.status.success(),
        "{args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("--json should produce valid JSON")
}

fn create_project(dir: &Path, name: &str) -> String {
    let json = run_json(dir, &["project", "create", name]);
    json["project_id"]
        .as_str()
        .expect("project_id field")
        .to_string()
}

/// Create a task, return its seq.
fn create_task(dir: &Path, title: &str, extra: &[&str]) -> i64 {
    let mut args = vec!["task", "create", title];
    args.extend_from_slice(extra);
    let json = run_json(dir, &args);
    json["seq"].as_i64().expect("seq field")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn project_create_initializes_the_store() {
    let dir = TempDir::new().expect("tempdir");
    let id = create_project(dir.path(), "Webshop");
    assert!(dir.path().join(".sprintlog").join("pm.db").exists());

    let list = run_json(dir.path(), &["project", "list"]);
    let projects = list.as_array().expect("array");
    assert_eq!(projects.len(), 1);
    assert_eq!(projects[0]["project_id"], id.as_str());
    assert_eq!(projects[0]["name"], "Webshop");
}

#[test]
fn task_lifecycle_and_numbering() {
    let dir = TempDir::new().expect("tempdir");
    create_project(dir.path(), "Webshop");

    let first = create_task(
        dir.path(),
        "Checkout times out",
        &["--type", "bug", "--priority", "high", "--points", "3", "--labels", "payments,backend"],
    );
    let second = create_task(dir.path(), "Payment page", &[]);
    assert_eq!((first, second), (1, 2));

    let shown = run_json(dir.path(), &["task", "show", "#1"]);
    assert_eq!(shown["task_type"], "bug");
    assert_eq!(shown["priority"], "high");
    assert_eq!(shown["status"], "todo");
    assert_eq!(shown["labels"], serde_json::json!(["payments", "backend"]));

    let moved = run_json(dir.path(), &["task", "status", "1", "in-progress"]);
    assert_eq!(moved["status"], "in_progress");
    assert!(moved["started_at_us"].is_i64());

    let board = run_json(dir.path(), &["task", "board"]);
    assert_eq!(board["in_progress"].as_array().map(Vec::len), Some(1));
    assert_eq!(board["todo"].as_array().map(Vec::len), Some(1));

    run_json(dir.path(), &["task", "delete", "2"]);
    let third = create_task(dir.path(), "Receipt email", &[]);
    assert_eq!(third, 3, "deleted numbers are never reused");

    let listed = run_json(dir.path(), &["task", "list"]);
    let seqs: Vec<i64> = listed
        .as_array()
        .expect("array")
        .iter()
        .filter_map(|t| t["seq"].as_i64())
        .collect();
    assert_eq!(seqs.len(), 2);
    assert!(!seqs.contains(&2));
}

#[test]
fn task_update_and_links() {
    let dir = TempDir::new().expect("tempdir");
    create_project(dir.path(), "Webshop");
    create_task(dir.path(), "Epic: checkout v2", &["--type", "epic"]);
    create_task(dir.path(), "Card form", &[]);

    let updated = run_json(
        dir.path(),
        &[
            "task", "update", "2", "--parent", "1", "--assignee", "ana", "--points", "5",
        ],
    );
    assert_eq!(updated["assignee"], "ana");
    assert_eq!(updated["estimate_points"], 5);
    assert!(updated["parent_id"].is_string());

    run_json(dir.path(), &["task", "link", "2", "--commit", "9fceb02d0ae598e95dc970b74767f19372d61af8"]);
    let linked = run_json(dir.path(), &["task", "link", "2", "--issue", "118"]);
    assert_eq!(linked["linked_issues"], serde_json::json!([118]));
    assert_eq!(linked["linked_commits"].as_array().map(Vec::len), Some(1));

    let branch = run_json(dir.path(), &["task", "branch", "2", "--type", "feature"]);
    assert_eq!(branch["branch"], "2-feature-card-form");
}

#[test]
fn sprint_commit_and_velocity_flow() {
    let dir = TempDir::new().expect("tempdir");
    create_project(dir.path(), "Webshop");
    create_task(dir.path(), "Checkout times out", &["--points", "3"]);
    create_task(dir.path(), "Payment page", &["--points", "5"]);

    let sprint = run_json(
        dir.path(),
        &[
            "sprint", "create", "Sprint 1", "--start", "2026-03-02", "--end", "2026-03-13",
        ],
    );
    assert_eq!(sprint["status"], "planning");

    let added = run_json(dir.path(), &["sprint", "add", "Sprint 1", "1", "2"]);
    assert_eq!(added.as_array().map(Vec::len), Some(2));
    let started = run_json(dir.path(), &["sprint", "start"]);
    assert_eq!(started["status"], "active");

    let report = run_json(
        dir.path(),
        &[
            "commit",
            "process",
            "abc1234def5678",
            "--message",
            "fix(checkout): retry gateway\n\nfixes #1, refs #9",
        ],
    );
    assert_eq!(report["unmatched"], serde_json::json!([9]));
    let kinds: Vec<&str> = report["actions"]
        .as_array()
        .expect("actions")
        .iter()
        .filter_map(|a| a["kind"].as_str())
        .collect();
    assert_eq!(kinds, vec!["link_commit", "status_change"]);

    let task = run_json(dir.path(), &["task", "show", "1"]);
    assert_eq!(task["status"], "done");
    assert!(task["completed_at_us"].is_i64());

    let status = run_json(dir.path(), &["sprint", "status"]);
    assert_eq!(status["total_points"], 8);
    assert_eq!(status["completed_points"], 3);
    assert_eq!(status["progress_pct"], 38);

    let burndown = run_json(dir.path(), &["report", "burndown"]);
    let points = burndown["points"].as_array().expect("points");
    assert_eq!(points.len(), 12);
    assert_eq!(points[0]["date"], "2026-03-02");
    assert_eq!(points[0]["ideal_points"], 8);
    assert_eq!(points[11]["ideal_points"], 0);

    let completed = run_json(dir.path(), &["sprint", "complete", "Sprint 1"]);
    assert_eq!(completed["sprint"]["status"], "completed");
    assert_eq!(completed["sprint"]["velocity_completed"], 3);

    let velocity = run_json(dir.path(), &["report", "velocity"]);
    assert_eq!(velocity["average"], 3.0);
    assert_eq!(velocity["std_dev"], 0.0);
    assert_eq!(velocity["trend"].as_array().map(Vec::len), Some(1));
}

#[test]
fn commit_dry_run_writes_nothing() {
    let dir = TempDir::new().expect("tempdir");
    create_project(dir.path(), "Webshop");
    create_task(dir.path(), "Flaky test", &[]);

    let report = run_json(
        dir.path(),
        &["commit", "process", "feedface", "-m", "wip #1", "--dry-run"],
    );
    assert_eq!(report["dry_run"], true);
    assert!(
        report["actions"]
            .as_array()
            .expect("actions")
            .iter()
            .all(|a| a["applied"] == false)
    );

    let task = run_json(dir.path(), &["task", "show", "1"]);
    assert_eq!(task["status"], "todo");
    assert_eq!(task["linked_commits"], serde_json::json!([]));
}

#[test]
fn rebuild_reproduces_projections() {
    let dir = TempDir::new().expect("tempdir");
    create_project(dir.path(), "Webshop");
    create_task(dir.path(), "One", &["--points", "2"]);
    create_task(dir.path(), "Two", &[]);
    run_json(dir.path(), &["task", "status", "2", "done"]);
    let before = run_json(dir.path(), &["task", "list"]);

    let report = run_json(dir.path(), &["rebuild"]);
    assert_eq!(report["projects"], 1);
    assert_eq!(report["tasks"], 2);

    let after = run_json(dir.path(), &["task", "list"]);
    assert_eq!(before, after);
}

#[test]
fn text_output_is_tab_separated() {
    let dir = TempDir::new().expect("tempdir");
    create_project(dir.path(), "Webshop");
    create_task(dir.path(), "Checkout times out", &["--points", "3"]);

    sl_cmd(dir.path())
        .args(["task", "list"])
        .env("SPRINTLOG_FORMAT", "text")
        .assert()
        .success()
        .stdout(predicate::str::contains("#1\ttodo\tmedium\t3\tCheckout times out"));
}
