//! The hidden `__exec` re-entry: manifest execution end to end.

use std::fs;

use predicates::prelude::*;
use tempfile::TempDir;

mod common;

#[test]
fn the_entry_command_sees_the_version_and_arguments() {
    let home = TempDir::new().unwrap();
    let manifest = home.path().join("demo.yaml");
    fs::write(
        &manifest,
        "name: demo\nversion: 1.2.3\nenter:\n  command:\n    \"*\": echo {{.Version}}\n",
    )
    .unwrap();

    common::mixer(home.path())
        .arg("__exec")
        .arg(&manifest)
        .arg("hi")
        .assert()
        .success()
        .stdout(predicate::str::contains("1.2.3 hi"));
}

#[test]
fn the_plugin_exit_code_is_propagated() {
    let home = TempDir::new().unwrap();
    let manifest = home.path().join("demo.yaml");
    fs::write(
        &manifest,
        "name: demo\nenter:\n  command:\n    \"*\": exit 7\n",
    )
    .unwrap();

    common::mixer(home.path())
        .arg("__exec")
        .arg(&manifest)
        .assert()
        .code(7);
}

#[test]
fn escaping_dependency_references_are_rejected() {
    let home = TempDir::new().unwrap();
    let manifest = home.path().join("demo.yaml");
    fs::write(
        &manifest,
        "name: demo\ndep:\n  plugins:\n    - file: ../dep.yml\n",
    )
    .unwrap();

    common::mixer(home.path())
        .arg("__exec")
        .arg(&manifest)
        .assert()
        .code(81)
        .stderr(predicate::str::contains("../dep.yml"));

    // The rejected load never created a workspace.
    assert!(!home.path().join(".mixer/plugin/local").exists());
}

#[test]
fn an_unchanged_manifest_loads_once() {
    let home = TempDir::new().unwrap();
    let marker = home.path().join("marker");
    let manifest = home.path().join("demo.yaml");
    fs::write(
        &manifest,
        format!(
            "name: demo\npre_load:\n  \"*\": echo loaded >> {}\nenter:\n  command:\n    \"*\": \"true\"\n",
            marker.display()
        ),
    )
    .unwrap();

    for _ in 0..2 {
        common::mixer(home.path())
            .arg("__exec")
            .arg(&manifest)
            .assert()
            .success();
    }
    let content = fs::read_to_string(&marker).unwrap();
    assert_eq!(content, "loaded\n");
}

#[test]
fn dependency_shims_land_in_the_parent_bin() {
    let home = TempDir::new().unwrap();
    fs::write(home.path().join("dep.yaml"), "name: dep\n").unwrap();
    let manifest = home.path().join("demo.yaml");
    fs::write(
        &manifest,
        "name: demo\ndep:\n  plugins:\n    - file: dep.yaml\nenter:\n  command:\n    \"*\": \"true\"\n",
    )
    .unwrap();

    common::mixer(home.path())
        .arg("__exec")
        .arg(&manifest)
        .assert()
        .success();

    let plugin_root = home.path().join(".mixer/plugin/local");
    let source_key = fs::read_dir(&plugin_root)
        .unwrap()
        .next()
        .unwrap()
        .unwrap()
        .path();
    let shim = source_key.join("demo/.bin/dep");
    assert!(shim.exists());
    let content = fs::read_to_string(shim).unwrap();
    assert!(content.contains("mixer __exec"));
}
