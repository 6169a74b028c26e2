//! Root behavior: help, version and completion generation.

use predicates::prelude::*;
use tempfile::TempDir;

mod common;

#[test]
fn the_bare_root_prints_help_and_exits_cleanly() {
    let home = TempDir::new().unwrap();
    common::mixer(home.path())
        .assert()
        .success()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn version_is_reported() {
    let home = TempDir::new().unwrap();
    common::mixer(home.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn completion_scripts_are_generated() {
    let home = TempDir::new().unwrap();
    common::mixer(home.path())
        .arg("completion")
        .arg("bash")
        .assert()
        .success()
        .stdout(predicate::str::contains("mixer"));
}

#[test]
fn hidden_builtins_stay_out_of_help() {
    let home = TempDir::new().unwrap();
    common::mixer(home.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("__exec").not())
        .stdout(predicate::str::contains("__daemon").not());
}
