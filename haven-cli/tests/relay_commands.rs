#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

fn havenctl(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("havenctl"));
    cmd.env("HOME", home)
        .env("USERPROFILE", home)
        .env("NO_COLOR", "1")
        .env("RUST_LOG", "warn");
    cmd
}

/// Write an executable `/bin/sh` worker into `dir`.
fn worker(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("fake-haven.sh");
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write worker");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod");
    path
}

fn data_dir(home: &TempDir) -> PathBuf {
    home.path().join("haven_relay")
}

#[test]
fn import_runs_worker_once_and_reports_completion() {
    let home = TempDir::new().expect("home");
    let bin = TempDir::new().expect("bin");
    let script = worker(
        bin.path(),
        r#"echo "$@" > args.txt
echo "Imported 5 notes"
exit 0"#,
    );

    havenctl(home.path())
        .args(["relay", "run", "--import", "--worker"])
        .arg(&script)
        .assert()
        .success()
        .stdout(contains("Imported 5 notes"))
        .stdout(contains("Relay process terminated with code: 0"))
        .stdout(contains("Import Complete"));

    let data = data_dir(&home);
    let args = fs::read_to_string(data.join("args.txt")).expect("worker ran in data dir");
    assert_eq!(args.trim(), "--import");
    assert!(data.join(".env").exists());
    assert!(data.join("relays_import.json").exists());
    assert!(data.join("relays_blastr.json").exists());
}

#[test]
fn failed_import_exits_nonzero() {
    let home = TempDir::new().expect("home");
    let bin = TempDir::new().expect("bin");
    let script = worker(bin.path(), "echo 'ERROR: upstream unreachable'\nexit 3");

    havenctl(home.path())
        .args(["relay", "run", "--import", "--worker"])
        .arg(&script)
        .assert()
        .failure()
        .stdout(contains("ERROR: upstream unreachable"))
        .stderr(contains("Import Failed (code 3)"));
}

#[test]
fn serve_that_dies_is_an_error() {
    let home = TempDir::new().expect("home");
    let bin = TempDir::new().expect("bin");
    let script = worker(bin.path(), "echo 'Starting eventstore'\nexit 1");

    havenctl(home.path())
        .args(["relay", "run", "--worker"])
        .arg(&script)
        .assert()
        .failure()
        .stdout(contains("Starting eventstore"))
        .stdout(contains("Relay process terminated with code: 1"))
        .stderr(contains("relay exited unexpectedly"));
}

#[test]
fn lock_error_suggests_clear_locks() {
    let home = TempDir::new().expect("home");
    let bin = TempDir::new().expect("bin");
    let script = worker(
        bin.path(),
        "echo 'ERROR: Cannot acquire directory lock on \"db/inbox\"'\nexit 1",
    );

    havenctl(home.path())
        .args(["relay", "run", "--worker"])
        .arg(&script)
        .assert()
        .failure()
        .stdout(contains("havenctl relay clear-locks"));
}

#[test]
fn clear_locks_removes_partition_locks() {
    let home = TempDir::new().expect("home");
    let inbox = data_dir(&home).join("db").join("inbox");
    fs::create_dir_all(&inbox).expect("db dir");
    fs::write(inbox.join("LOCK"), "").expect("lock");

    havenctl(home.path())
        .args([
            "relay",
            "clear-locks",
            "--worker-name",
            "haven-test-no-such-worker",
        ])
        .assert()
        .success()
        .stdout(contains("Deleted lock file: LOCK in inbox"))
        .stdout(contains("Database locks cleared"));

    assert!(!inbox.join("LOCK").exists());
}
