//! Shared helpers for binary tests.

use std::path::Path;

use assert_cmd::Command;

/// A `mixer` invocation isolated to `home`: its workspace lands under
/// `home/.mixer`, the daemon sentinel keeps background workers from being
/// spawned, and ambient source overrides are cleared.
pub fn mixer(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("mixer").expect("binary built");
    cmd.env("HOME", home)
        .env("_T_DAEMON_FLAG", "true")
        .env("NO_COLOR", "1")
        .env_remove("CC_SOURCE_REPO")
        .current_dir(home);
    cmd
}
