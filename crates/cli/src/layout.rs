//! Workspace layout: every on-disk location the tool uses, derived from a
//! single root.

use std::path::{Path, PathBuf};

/// Optional layout overrides. A relative override joins under the root, an
/// absolute one wins as is.
#[derive(Debug, Clone, Default)]
pub struct LayoutOverrides {
    pub bin_path: Option<PathBuf>,
    pub log_path: Option<PathBuf>,
    pub daemon_path: Option<PathBuf>,
    pub repo_root_path: Option<PathBuf>,
    pub plugin_root_path: Option<PathBuf>,
    pub resource_root_path: Option<PathBuf>,
    pub config_file: Option<PathBuf>,
}

/// Resolved workspace layout.
#[derive(Debug, Clone)]
pub struct WorkspaceLayout {
    pub root_path: PathBuf,
    pub bin_path: PathBuf,
    pub log_path: PathBuf,
    pub daemon_path: PathBuf,
    pub repo_root_path: PathBuf,
    pub plugin_root_path: PathBuf,
    pub resource_root_path: PathBuf,
    pub config_file: PathBuf,
}

impl WorkspaceLayout {
    /// Fills the layout from `root` and `overrides`.
    pub fn build(root: PathBuf, overrides: LayoutOverrides) -> Self {
        Self {
            bin_path: resolve(&root, overrides.bin_path, "bin"),
            log_path: resolve(&root, overrides.log_path, "log"),
            daemon_path: resolve(&root, overrides.daemon_path, "daemon"),
            repo_root_path: resolve(&root, overrides.repo_root_path, "repo"),
            plugin_root_path: resolve(&root, overrides.plugin_root_path, "plugin"),
            resource_root_path: resolve(&root, overrides.resource_root_path, "resource"),
            config_file: resolve(&root, overrides.config_file, "config"),
            root_path: root,
        }
    }
}

fn resolve(root: &Path, value: Option<PathBuf>, default: &str) -> PathBuf {
    match value {
        None => root.join(default),
        Some(path) if path.is_absolute() => path,
        Some(path) => root.join(path),
    }
}
