//! Dynamic command mounting and dispatch.

use std::fs;

use predicates::prelude::*;
use tempfile::TempDir;

mod common;

fn configure_command_path(home: &TempDir, source: &std::path::Path) {
    common::mixer(home.path())
        .arg("config")
        .arg("--set")
        .arg(format!("command.path={}", source.display()))
        .assert()
        .success();
}

#[test]
fn a_configured_source_contributes_commands() {
    let home = TempDir::new().unwrap();
    let source = home.path().join("commands");
    fs::create_dir_all(&source).unwrap();
    fs::write(
        source.join("x.yaml"),
        "name: x\ndesc: says hello\nenter:\n  command:\n    \"*\": echo dynamic-ran\n",
    )
    .unwrap();
    configure_command_path(&home, &source);

    common::mixer(home.path())
        .arg("x")
        .assert()
        .success()
        .stdout(predicate::str::contains("dynamic-ran"));
}

#[test]
fn nested_trees_become_nested_subcommands() {
    let home = TempDir::new().unwrap();
    let source = home.path().join("commands");
    fs::create_dir_all(source.join("go")).unwrap();
    fs::write(
        source.join("go/build.yaml"),
        "name: build\nenter:\n  command:\n    \"*\": echo built\n",
    )
    .unwrap();
    configure_command_path(&home, &source);

    common::mixer(home.path())
        .arg("go")
        .arg("build")
        .assert()
        .success()
        .stdout(predicate::str::contains("built"));
}

#[test]
fn arguments_are_forwarded_verbatim() {
    let home = TempDir::new().unwrap();
    let source = home.path().join("commands");
    fs::create_dir_all(&source).unwrap();
    fs::write(
        source.join("echoer.yaml"),
        "name: echoer\nenter:\n  command:\n    \"*\": echo\n",
    )
    .unwrap();
    configure_command_path(&home, &source);

    common::mixer(home.path())
        .arg("echoer")
        .arg("--flag")
        .arg("a b")
        .assert()
        .success()
        .stdout(predicate::str::contains("--flag a b"));
}

#[test]
fn unknown_commands_exit_cleanly() {
    let home = TempDir::new().unwrap();
    common::mixer(home.path()).arg("nosuch").assert().success();
}

#[test]
fn a_dynamic_command_never_shadows_a_native_leaf() {
    let home = TempDir::new().unwrap();
    let source = home.path().join("commands");
    fs::create_dir_all(&source).unwrap();
    fs::write(
        source.join("config.yaml"),
        "name: config\nenter:\n  command:\n    \"*\": echo shadowed\n",
    )
    .unwrap();
    configure_command_path(&home, &source);

    common::mixer(home.path())
        .arg("config")
        .arg("--list")
        .assert()
        .success()
        .stdout(predicate::str::contains("shadowed").not());
}
