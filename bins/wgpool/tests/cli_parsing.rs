//! CLI argument parsing tests for the wgpool command.
//!
//! These tests verify that command-line arguments are correctly parsed
//! without requiring WireGuard tools or root privileges.

use assert_cmd::Command;
use predicates::prelude::*;

fn wgpool_cmd() -> Command {
    Command::new(env!("CARGO_BIN_EXE_wgpool"))
}

mod global_flags {
    use super::*;

    #[test]
    fn test_help() {
        wgpool_cmd()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("WireGuard peer pool manager"));
    }

    #[test]
    fn test_version() {
        wgpool_cmd()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("wgpool"));
    }

    #[test]
    fn test_invalid_subcommand() {
        wgpool_cmd()
            .arg("invalid_command")
            .assert()
            .failure()
            .stderr(predicate::str::contains("error"));
    }

    #[test]
    fn test_missing_subcommand() {
        wgpool_cmd().assert().failure();
    }

    #[test]
    fn test_invalid_strategy() {
        wgpool_cmd()
            .args(["--strategy", "sometimes", "list"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("full-reload"));
    }

    #[test]
    fn test_missing_config_file() {
        wgpool_cmd()
            .args(["--config", "/nonexistent/wgpool.yaml", "list"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Error"));
    }
}

mod peer_commands {
    use super::*;

    #[test]
    fn test_add_requires_name() {
        wgpool_cmd()
            .arg("add")
            .assert()
            .failure()
            .stderr(predicate::str::contains("<NAME>"));
    }

    #[test]
    fn test_list_help() {
        wgpool_cmd()
            .args(["list", "--help"])
            .assert()
            .success()
            .stdout(predicate::str::contains("--json"));
    }

    #[test]
    fn test_remove_alias() {
        wgpool_cmd().args(["rm", "--help"]).assert().success();
    }

    #[test]
    fn test_list_without_document() {
        let dir = tempfile::tempdir().unwrap();
        wgpool_cmd()
            .arg("--config-dir")
            .arg(dir.path())
            .arg("list")
            .assert()
            .failure()
            .stderr(predicate::str::contains("run init first"));
    }

    #[test]
    fn test_invalid_peer_name() {
        let dir = tempfile::tempdir().unwrap();
        wgpool_cmd()
            .arg("--config-dir")
            .arg(dir.path())
            .args(["add", "../escape"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("invalid peer name"));
    }
}
