//! Integration tests for CLI commands.
//!
//! These tests verify that CLI commands work correctly without
//! requiring a running daemon or a message bus.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;
use tempfile::NamedTempFile;

/// Get a Command for the devicemgrd binary
fn devicemgrd() -> Command {
    Command::cargo_bin("devicemgrd").unwrap()
}

fn config_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

const TWO_PROFILES: &str = r#"
[[devices]]
name = "mouse0"

[[devices.profiles]]
active = true

[[devices.profiles.resolutions]]
dpi = 800

[[devices.profiles.buttons]]
action = "button1"

[[devices.profiles]]
default = true
"#;

#[test]
fn test_help_command() {
    devicemgrd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("D-Bus"))
        .stdout(predicate::str::contains("start"))
        .stdout(predicate::str::contains("stop"))
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("paths"));
}

#[test]
fn test_version_command() {
    devicemgrd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("devicemgrd"));
}

#[test]
fn test_paths_lists_tree_in_order() {
    let file = config_file(TWO_PROFILES);
    devicemgrd()
        .arg("--config")
        .arg(file.path())
        .arg("paths")
        .assert()
        .success()
        .stdout(predicate::eq(
            "/org/example/devicemgr1/device/mouse0\n\
             /org/example/devicemgr1/profile/mouse0/0\n\
             /org/example/devicemgr1/resolution/mouse0/0/0\n\
             /org/example/devicemgr1/button/mouse0/0/0\n\
             /org/example/devicemgr1/profile/mouse0/1\n",
        ));
}

#[test]
fn test_paths_escapes_device_names() {
    let file = config_file(
        r#"
[bus]
root = "/root"

[[devices]]
name = "G Pro/2"
"#,
    );
    devicemgrd()
        .arg("--config")
        .arg(file.path())
        .arg("paths")
        .assert()
        .success()
        .stdout(predicate::str::contains("/root/device/G_20Pro_2f2"));
}

#[test]
fn test_config_show() {
    let file = config_file(TWO_PROFILES);
    devicemgrd()
        .args(["config", "--show", "--config"])
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("mouse0"))
        .stdout(predicate::str::contains("org.example.devicemgr1"));
}

#[test]
fn test_invalid_config_rejected() {
    let file = config_file("[bus]\nroot = \"/trailing/\"\n");
    devicemgrd()
        .arg("--config")
        .arg(file.path())
        .arg("paths")
        .assert()
        .failure()
        .stderr(predicate::str::contains("bus root"));
}

#[test]
fn test_missing_config_file() {
    let dir = tempfile::tempdir().unwrap();
    devicemgrd()
        .arg("--config")
        .arg(dir.path().join("absent.toml"))
        .arg("paths")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read config file"));
}

#[test]
fn test_status_no_daemon() {
    // When no daemon is running, status should indicate that
    let file = config_file("");
    devicemgrd()
        .arg("--config")
        .arg(file.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("not running"));
}

#[test]
fn test_stop_no_daemon() {
    // Stopping when no daemon is running returns error
    devicemgrd()
        .arg("stop")
        .assert()
        .failure()
        .stderr(predicate::str::contains("not running"));
}
