//! Archive unpacking keyed by filename extension.

use std::fs::File;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use flate2::read::GzDecoder;
use tracing::debug;

/// Unpacks `filename` into `to_path`.
///
/// Unless `retain_top_folder` is set, one leading path component is
/// stripped from every entry so `tool-1.2.3/bin/tool` lands at `bin/tool`.
/// Unknown extensions yield an "unsupported archiver" error.
pub fn unpack(filename: impl AsRef<Path>, to_path: impl AsRef<Path>, retain_top_folder: bool) -> Result<()> {
    let filename = filename.as_ref();
    let to_path = to_path.as_ref();
    debug!(archive = %filename.display(), to = %to_path.display(), "unpacking");
    let name = filename
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        let file = File::open(filename)
            .with_context(|| format!("failed to open {}", filename.display()))?;
        return untar(GzDecoder::new(file), to_path, retain_top_folder);
    }
    if name.ends_with(".tar") {
        let file = File::open(filename)
            .with_context(|| format!("failed to open {}", filename.display()))?;
        return untar(file, to_path, retain_top_folder);
    }
    Err(anyhow!("unsupported archiver: {}", filename.display()))
}

fn untar(reader: impl Read, to_path: &Path, retain_top_folder: bool) -> Result<()> {
    std::fs::create_dir_all(to_path)
        .with_context(|| format!("failed to create {}", to_path.display()))?;
    let mut archive = tar::Archive::new(reader);
    for entry in archive.entries().context("failed to read archive")? {
        let mut entry = entry.context("failed to read archive entry")?;
        let path = entry.path().context("archive entry has no path")?;
        let Some(target) = entry_target(&path, retain_top_folder) else {
            continue;
        };
        entry
            .unpack(to_path.join(&target))
            .with_context(|| format!("failed to unpack {}", target.display()))?;
    }
    Ok(())
}

fn entry_target(path: &Path, retain_top_folder: bool) -> Option<PathBuf> {
    let components: Vec<Component> = path
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect();
    let kept: Vec<&Component> = if retain_top_folder {
        components.iter().collect()
    } else {
        components.iter().skip(1).collect()
    };
    if kept.is_empty() {
        return None;
    }
    Some(kept.iter().map(|c| c.as_os_str()).collect())
}
