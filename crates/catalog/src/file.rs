//! Filesystem-backed command search.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use engine::Resolver;
use errs::ErrorKind;
use serde::Deserialize;
use tracing::debug;

use crate::node::{compose_full_name, Node};
use crate::Searcher;

const NODE_SET_DESC: &str = "command set, use -h for details";

/// Searches a directory tree for plugin manifests.
///
/// Dot-entries are skipped; a directory becomes a node set whose
/// description comes from an optional `.info` file; a file becomes a leaf
/// when the engine recognizes it, and is skipped silently when it does
/// not.
pub struct FileSearcher {
    root_dir: PathBuf,
    command_dir: String,
    resolver: Resolver,
}

#[derive(Debug, Default, Deserialize)]
struct DirInfo {
    #[serde(default)]
    desc: String,
}

impl FileSearcher {
    pub fn new(
        root_dir: impl Into<PathBuf>,
        command_dir: impl Into<String>,
        resolver: Resolver,
    ) -> Self {
        Self {
            root_dir: root_dir.into(),
            command_dir: command_dir.into(),
            resolver,
        }
    }

    fn collect_dir(&self, dir: &Path, prefix: &str) -> Result<Vec<Node>> {
        let mut entries: Vec<fs::DirEntry> = fs::read_dir(dir)
            .and_then(|it| it.collect())
            .map_err(|e| {
                errs::with_kind(
                    ErrorKind::WalkFail,
                    anyhow::Error::new(e).context(format!("walk {} failed", dir.display())),
                )
            })?;
        entries.sort_by_key(fs::DirEntry::file_name);

        let mut nodes = Vec::new();
        for entry in entries {
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if file_name.starts_with('.') {
                continue;
            }
            let path = entry.path();
            if path.is_dir() {
                let full_name = compose_full_name(prefix, &file_name);
                let children = self.collect_dir(&path, &full_name)?;
                nodes.push(Node {
                    name: file_name,
                    full_name,
                    desc: dir_desc(&path),
                    dir: dir.to_path_buf(),
                    abs_path: path,
                    children,
                    plugin: None,
                    is_leaf: false,
                    repo_url: None,
                });
                continue;
            }
            match self.resolver.resolve_path(&path) {
                Ok(plugin) => {
                    let name = plugin.name();
                    nodes.push(Node {
                        full_name: compose_full_name(prefix, &name),
                        desc: plugin.desc(),
                        dir: dir.to_path_buf(),
                        abs_path: path,
                        children: Vec::new(),
                        plugin: Some(plugin),
                        is_leaf: true,
                        repo_url: None,
                        name,
                    });
                }
                // Not every file in a command tree is a plugin; anything
                // the engine does not recognize is skipped, not an error.
                Err(e) if errs::kind_of(&e) == Some(ErrorKind::UnsupportedPlugin) => {
                    debug!(file = %path.display(), "skipping non-plugin file");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(nodes)
    }
}

impl Searcher for FileSearcher {
    fn list(&self) -> Result<Vec<Node>> {
        let base = if self.command_dir.is_empty() {
            self.root_dir.clone()
        } else {
            self.root_dir.join(&self.command_dir)
        };
        if !base.is_dir() {
            return Ok(Vec::new());
        }
        self.collect_dir(&base, "")
    }
}

fn dir_desc(dir: &Path) -> String {
    let info_path = dir.join(".info");
    let Ok(data) = fs::read(&info_path) else {
        return NODE_SET_DESC.to_string();
    };
    match serde_yaml::from_slice::<DirInfo>(&data) {
        Ok(info) if !info.desc.is_empty() => info.desc,
        _ => NODE_SET_DESC.to_string(),
    }
}
