//! Streaming downloads.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::debug;

/// Downloads `url` to `to_path`.
///
/// When `to_path` is a directory the filename is derived from the URL's
/// last path segment with any query string stripped; a URL with no usable
/// segment gets a generated name. The file is created executable so
/// downloaded tools run without a follow-up chmod. Returns the final path.
pub fn download(url: &str, to_path: impl AsRef<Path>) -> Result<PathBuf> {
    let filename = find_filename(url, to_path.as_ref());
    fetch(url, &filename).with_context(|| format!("download {url} failed"))?;
    Ok(filename)
}

fn fetch(url: &str, filename: &Path) -> Result<()> {
    debug!(url, to = %filename.display(), "downloading");
    if let Some(parent) = filename.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let client = reqwest::blocking::Client::builder()
        .danger_accept_invalid_certs(true)
        .connect_timeout(Duration::from_secs(15))
        .build()
        .context("failed to build http client")?;
    let response = client.get(url).send()?.error_for_status()?;
    let total = response.content_length().unwrap_or(0);

    let mut options = OpenOptions::new();
    options.create(true).truncate(true).write(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o755);
    }
    let file = options
        .open(filename)
        .with_context(|| format!("failed to create {}", filename.display()))?;

    let bar = progress_bar(total);
    let mut reader = bar.wrap_read(response);
    let mut writer = io::BufWriter::new(file);
    io::copy(&mut reader, &mut writer)?;
    bar.finish_and_clear();
    Ok(())
}

fn progress_bar(total: u64) -> ProgressBar {
    if total == 0 {
        let bar = ProgressBar::new_spinner();
        bar.set_message("downloading");
        return bar;
    }
    let bar = ProgressBar::new(total);
    bar.set_style(
        ProgressStyle::with_template(
            "{msg} [{bar:30}] {bytes}/{total_bytes} ({bytes_per_sec})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> "),
    );
    bar.set_message("downloading");
    bar
}

// The target file keeps the name the server gave the resource; a URL with
// no path segment falls back to a generated one.
fn find_filename(url: &str, to_path: &Path) -> PathBuf {
    if !to_path.is_dir() {
        return to_path.to_path_buf();
    }
    let name = match url.rsplit_once('/') {
        Some((_, last)) if !last.is_empty() => {
            let last = last.split_once('?').map(|(n, _)| n).unwrap_or(last);
            if last.is_empty() {
                generated_name()
            } else {
                last.to_string()
            }
        }
        _ => generated_name(),
    };
    to_path.join(name)
}

fn generated_name() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn filename_comes_from_the_last_url_segment() {
        let tmp = TempDir::new().unwrap();
        let path = find_filename("http://host/dir/tool.tgz", tmp.path());
        assert_eq!(path, tmp.path().join("tool.tgz"));
    }

    #[test]
    fn query_strings_are_stripped() {
        let tmp = TempDir::new().unwrap();
        let path = find_filename("http://host/tool.tgz?token=abc&x=1", tmp.path());
        assert_eq!(path, tmp.path().join("tool.tgz"));
    }

    #[test]
    fn file_targets_are_used_verbatim() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("explicit-name");
        let path = find_filename("http://host/tool.tgz", &target);
        assert_eq!(path, target);
    }

    #[test]
    fn segmentless_urls_get_a_generated_name() {
        let tmp = TempDir::new().unwrap();
        let path = find_filename("http://host/", tmp.path());
        let name = path.file_name().unwrap().to_string_lossy();
        assert_eq!(name.len(), 36);
    }
}
