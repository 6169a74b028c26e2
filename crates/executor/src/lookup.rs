//! PATH lookup returning every executable match, not just the first.

use std::path::{Path, PathBuf};

use anyhow::Result;
use errs::ErrorKind;

/// Finds every executable path for `file` on `PATH`.
///
/// A `file` containing a path separator is checked directly. Duplicate
/// directories are collapsed; an empty PATH element means the current
/// directory, following shell semantics. Yields [`ErrorKind::PathLookup`]
/// for an unusable direct path and [`ErrorKind::NotFound`] when nothing on
/// `PATH` matches.
pub fn look_paths(file: &str) -> Result<Vec<PathBuf>> {
    if file.contains(std::path::MAIN_SEPARATOR) || file.contains('/') {
        let path = Path::new(file);
        if is_executable(path) {
            return Ok(vec![path.to_path_buf()]);
        }
        return Err(errs::new_error(
            ErrorKind::PathLookup,
            format!("{file} is not an executable file"),
        ));
    }
    let mut seen = std::collections::HashSet::new();
    let mut found = Vec::new();
    let path_env = std::env::var_os("PATH").unwrap_or_default();
    for dir in std::env::split_paths(&path_env) {
        let dir = if dir.as_os_str().is_empty() {
            PathBuf::from(".")
        } else {
            dir
        };
        for candidate in candidates(&dir, file) {
            if is_executable(&candidate) && seen.insert(candidate.clone()) {
                found.push(candidate);
            }
        }
    }
    if found.is_empty() {
        return Err(errs::new_error(
            ErrorKind::NotFound,
            format!("executable file {file} not found in PATH"),
        ));
    }
    Ok(found)
}

#[cfg(not(windows))]
fn candidates(dir: &Path, file: &str) -> Vec<PathBuf> {
    vec![dir.join(file)]
}

#[cfg(windows)]
fn candidates(dir: &Path, file: &str) -> Vec<PathBuf> {
    let exts = std::env::var("PATHEXT").unwrap_or_else(|_| ".COM;.EXE;.BAT;.CMD".to_string());
    let mut paths = vec![dir.join(file)];
    for ext in exts.split(';').filter(|e| !e.is_empty()) {
        paths.push(dir.join(format!("{file}{}", ext.to_lowercase())));
        paths.push(dir.join(format!("{file}{ext}")));
    }
    paths
}

#[cfg(not(windows))]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    match std::fs::metadata(path) {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

#[cfg(windows)]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
