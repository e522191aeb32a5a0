use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

fn havenctl(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("havenctl"));
    cmd.env("HOME", home)
        .env("USERPROFILE", home)
        .env("NO_COLOR", "1");
    cmd
}

#[test]
fn path_points_under_home() {
    let home = TempDir::new().expect("home");
    havenctl(home.path())
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(contains(".haven"))
        .stdout(contains("config.yaml"));
}

#[test]
fn init_writes_once_unless_forced() {
    let home = TempDir::new().expect("home");
    havenctl(home.path())
        .args(["config", "init", "--owner", "npub1owner"])
        .assert()
        .success()
        .stdout(contains("Wrote"));
    assert!(home.path().join(".haven/config.yaml").exists());

    havenctl(home.path())
        .args(["config", "init"])
        .assert()
        .failure()
        .stderr(contains("--force"));

    havenctl(home.path())
        .args(["config", "init", "--force", "--relay-url", "wss://me.example.com"])
        .assert()
        .success();

    let assert = havenctl(home.path())
        .args(["config", "show", "--json"])
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).expect("utf8");
    let config: serde_json::Value = serde_json::from_str(&stdout).expect("json");
    assert_eq!(config["relay_url"], "wss://me.example.com");
    assert_eq!(config["owner_npub"], "", "--force starts from defaults");
    assert_eq!(config["relay_port"], 3355);
}

#[test]
fn show_without_file_uses_defaults() {
    let home = TempDir::new().expect("home");
    havenctl(home.path())
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(contains("import_start_date"))
        .stdout(contains("2023-01-01"))
        .stdout(contains("wss://relay.damus.io"))
        .stdout(contains("(unset)"));
}

#[test]
fn malformed_config_is_reported() {
    let home = TempDir::new().expect("home");
    let dir = home.path().join(".haven");
    std::fs::create_dir_all(&dir).expect("dir");
    std::fs::write(dir.join("config.yaml"), "relay_port: [not a port\n").expect("write");

    havenctl(home.path())
        .args(["config", "show"])
        .assert()
        .failure()
        .stderr(contains("failed to load config"));
}
