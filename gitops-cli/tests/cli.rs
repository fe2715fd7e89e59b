use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

const CONFIG_ENV: &[&str] = &[
    "GITOPS_CONFIG",
    "CRON",
    "REMOTE",
    "REPOSITORY_PATH",
    "SSH_PRIV_KEY_FILE",
    "WORKDIR",
    "COMPOSE_COMMAND",
    "DEPLOY_TIMEOUT",
    "LOG_FORMAT",
    "GITOPS_SOCKET",
];

fn gitops_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("gitops"));
    cmd.env("HOME", home).env("USERPROFILE", home);
    for var in CONFIG_ENV {
        cmd.env_remove(var);
    }
    cmd
}

#[test]
fn invalid_schedule_fails_at_startup() {
    let home = TempDir::new().expect("home");

    gitops_cmd(home.path())
        .env("CRON", "every minute please")
        .arg("start")
        .assert()
        .failure()
        .stderr(contains("invalid schedule 'every minute please'"));
}

#[test]
fn schedule_that_never_fires_again_fails_at_startup() {
    let home = TempDir::new().expect("home");
    let socket = home.path().join("gitops.sock");

    gitops_cmd(home.path())
        .env("CRON", "0 0 0 1 1 * 2020")
        .env("GITOPS_SOCKET", &socket)
        .arg("start")
        .assert()
        .failure()
        .stderr(contains("schedule '0 0 0 1 1 * 2020' has no upcoming fire time"));
    assert!(!socket.exists());
}

#[test]
fn unknown_config_key_is_rejected() {
    let home = TempDir::new().expect("home");
    let file = home.path().join("gitops.yaml");
    std::fs::write(&file, "shedule: \"* * * * *\"\n").expect("write config");

    gitops_cmd(home.path())
        .args(["once", "--config"])
        .arg(&file)
        .assert()
        .failure()
        .stderr(contains("failed to load config"));
}

#[test]
fn once_against_missing_repository_aborts() {
    let home = TempDir::new().expect("home");
    let missing = home.path().join("no-such-repo");

    gitops_cmd(home.path())
        .arg("once")
        .arg("--repository-path")
        .arg(&missing)
        .env("COMPOSE_COMMAND", "false")
        .assert()
        .failure()
        .stderr(contains("update aborted, nothing deployed"));
}

#[test]
fn status_without_daemon_reports_not_running() {
    let home = TempDir::new().expect("home");

    gitops_cmd(home.path())
        .arg("status")
        .assert()
        .success()
        .stdout(contains("\"running\": false"))
        .stdout(contains(".gitops/daemon.sock"));
}

#[test]
fn stop_without_daemon_is_not_an_error() {
    let home = TempDir::new().expect("home");

    gitops_cmd(home.path())
        .arg("stop")
        .assert()
        .success()
        .stdout(contains("daemon is not running"));
}

#[test]
fn trigger_without_daemon_fails() {
    let home = TempDir::new().expect("home");

    gitops_cmd(home.path())
        .arg("trigger")
        .assert()
        .failure()
        .stderr(contains("daemon is not running"));
}
