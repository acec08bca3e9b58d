use std::fs;
use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::str::contains;
use serde_json::json;
use tempfile::TempDir;

fn accord_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("accord"));
    cmd.env("HOME", home).env("USERPROFILE", home);
    cmd
}

fn init_entity(home: &TempDir, root_a: &Path, root_b: &Path) {
    accord_cmd(home.path())
        .args([
            "init",
            "user",
            "--dir",
            &format!("a={}", root_a.display()),
            "--dir",
            &format!("b={}", root_b.display()),
        ])
        .assert()
        .success()
        .stdout(contains("registered entity 'user'"));
}

fn write_record(root: &Path, id: &str, value: &serde_json::Value) {
    fs::write(
        root.join(format!("{id}.json")),
        serde_json::to_string_pretty(value).expect("serialize"),
    )
    .expect("write record");
}

#[test]
fn init_requires_at_least_one_source() {
    let home = TempDir::new().expect("home");
    accord_cmd(home.path())
        .args(["init", "user"])
        .assert()
        .failure()
        .stderr(contains("--dir"));
}

#[test]
fn create_then_conflict_shows_up_in_status() {
    let home = TempDir::new().expect("home");
    let root_a = TempDir::new().expect("root a");
    let root_b = TempDir::new().expect("root b");
    init_entity(&home, root_a.path(), root_b.path());

    // Create: record appears in A, gets broadcast to B.
    write_record(root_a.path(), "u-1", &json!({"name": "Hubert"}));
    accord_cmd(home.path())
        .args(["notify", "user", "a", "u-1"])
        .assert()
        .success()
        .stdout(contains("created"));
    assert_eq!(fs::read_dir(root_b.path()).expect("read dir").count(), 1);

    accord_cmd(home.path())
        .args(["status"])
        .assert()
        .success()
        .stdout(contains("no pending conflicts"));

    // Conflict: both sides edit the same field to different values.
    write_record(root_a.path(), "u-1", &json!({"name": "X"}));
    write_record(root_b.path(), "1", &json!({"name": "Y"}));
    accord_cmd(home.path())
        .args(["notify", "user", "a", "u-1"])
        .assert()
        .success()
        .stdout(contains("conflicting fragment"));

    accord_cmd(home.path())
        .args(["status"])
        .assert()
        .success()
        .stdout(contains("unresolved conflicts"));
}

#[test]
fn unknown_entity_is_ignored_not_fatal() {
    let home = TempDir::new().expect("home");
    let root_a = TempDir::new().expect("root a");
    let root_b = TempDir::new().expect("root b");
    init_entity(&home, root_a.path(), root_b.path());

    accord_cmd(home.path())
        .args(["notify", "ghost", "a", "1"])
        .assert()
        .success()
        .stdout(contains("ignored"));
}
