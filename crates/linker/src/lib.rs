//! Thin executable shims.
//!
//! [`create`] writes a tiny script at `bin_dir/<name>` that dispatches to a
//! target command with the caller's arguments forwarded. On Windows both a
//! `<name>.cmd` batch file and an extensionless POSIX-shell twin are
//! written so MSYS2 terminals can invoke the shim too.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

/// Shim creation options.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkOptions {
    /// Rewrite an existing shim instead of keeping it.
    pub override_always: bool,
}

impl LinkOptions {
    pub fn override_always() -> Self {
        Self {
            override_always: true,
        }
    }
}

/// Creates a shim named `name` under `bin_dir` dispatching to `command`,
/// returning the shim path. An existing shim is kept unless
/// `opts.override_always` is set.
pub fn create(name: &str, bin_dir: impl AsRef<Path>, command: &str, opts: LinkOptions) -> Result<PathBuf> {
    let bin_dir = bin_dir.as_ref();
    fs::create_dir_all(bin_dir)
        .with_context(|| format!("failed to create {}", bin_dir.display()))?;
    debug!(name, command, bin = %bin_dir.display(), "linking command");
    #[cfg(not(windows))]
    {
        link_unix_like(name, bin_dir, command, opts)
    }
    #[cfg(windows)]
    {
        let path = link_win32(name, bin_dir, command, opts)?;
        link_msys2(name, bin_dir, command, opts)?;
        Ok(path)
    }
}

fn shell_template(command: &str) -> String {
    format!("#!/bin/sh\n\n{command} \"$@\"")
}

#[cfg(not(windows))]
fn link_unix_like(name: &str, bin_dir: &Path, command: &str, opts: LinkOptions) -> Result<PathBuf> {
    use std::os::unix::fs::PermissionsExt;

    let bin_file = bin_dir.join(name);
    if !opts.override_always && bin_file.exists() {
        return Ok(bin_file);
    }
    fs::write(&bin_file, shell_template(command))
        .with_context(|| format!("failed to link {}", bin_file.display()))?;
    fs::set_permissions(&bin_file, fs::Permissions::from_mode(0o744))
        .with_context(|| format!("failed to mark {} executable", bin_file.display()))?;
    Ok(bin_file)
}

#[cfg(windows)]
fn cmd_template(command: &str) -> String {
    format!("@echo off\n\n{command} %*")
}

#[cfg(windows)]
fn link_win32(name: &str, bin_dir: &Path, command: &str, opts: LinkOptions) -> Result<PathBuf> {
    let cmd_file = bin_dir.join(format!("{name}.cmd"));
    if !opts.override_always && cmd_file.exists() {
        return Ok(cmd_file);
    }
    fs::write(&cmd_file, cmd_template(command))
        .with_context(|| format!("failed to link {}", cmd_file.display()))?;
    Ok(cmd_file)
}

// The extensionless twin serves MSYS2 terminals such as git bash.
#[cfg(windows)]
fn link_msys2(name: &str, bin_dir: &Path, command: &str, opts: LinkOptions) -> Result<()> {
    let file = bin_dir.join(name);
    if !opts.override_always && file.exists() {
        return Ok(());
    }
    let tokens = shlex::split(command)
        .ok_or_else(|| anyhow::anyhow!("unparsable command: {command}"))?;
    let first = tokens
        .first()
        .ok_or_else(|| anyhow::anyhow!("command is empty"))?;
    let command = if Path::new(first).exists() {
        command.replacen(first.as_str(), &to_unix_like_path(first), 1)
    } else {
        command.to_string()
    };
    fs::write(&file, shell_template(&command))
        .with_context(|| format!("failed to link {}", file.display()))?;
    Ok(())
}

/// Converts a Windows path to its MSYS2 form:
/// `C:\x\y.exe` becomes `/c/x/y.exe`.
pub fn to_unix_like_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    let mut chars = path.chars();
    match (chars.next(), chars.next(), chars.next()) {
        (Some(drive), Some(':'), Some('/')) if drive.is_ascii_alphabetic() => {
            format!("/{}{}", drive.to_ascii_lowercase(), &path[2..])
        }
        _ => path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[cfg(unix)]
    #[test]
    fn creates_an_executable_shim() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let path = create("tool", tmp.path(), "echo", LinkOptions::default()).unwrap();
        assert_eq!(path, tmp.path().join("tool"));
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "#!/bin/sh\n\necho \"$@\"");
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o744);
    }

    #[test]
    fn existing_shims_are_kept_by_default() {
        let tmp = TempDir::new().unwrap();
        let first = create("tool", tmp.path(), "echo one", LinkOptions::default()).unwrap();
        create("tool", tmp.path(), "echo two", LinkOptions::default()).unwrap();
        let content = fs::read_to_string(&first).unwrap();
        assert!(content.contains("echo one"));
    }

    #[test]
    fn override_always_rewrites() {
        let tmp = TempDir::new().unwrap();
        let first = create("tool", tmp.path(), "echo one", LinkOptions::default()).unwrap();
        create("tool", tmp.path(), "echo two", LinkOptions::override_always()).unwrap();
        let content = fs::read_to_string(&first).unwrap();
        assert!(content.contains("echo two"));
    }

    #[test]
    fn windows_paths_convert_to_msys2_form() {
        assert_eq!(
            to_unix_like_path(r"C:\Users\dev\tool.exe"),
            "/c/Users/dev/tool.exe"
        );
        assert_eq!(to_unix_like_path("relative/path"), "relative/path");
    }

    #[cfg(unix)]
    #[test]
    fn shims_dispatch_with_forwarded_arguments() {
        let tmp = TempDir::new().unwrap();
        let shim = create("say", tmp.path(), "echo prefix", LinkOptions::default()).unwrap();
        let output = std::process::Command::new(&shim)
            .arg("hello")
            .output()
            .unwrap();
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "prefix hello");
    }
}
