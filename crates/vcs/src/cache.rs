//! Clone-or-pull repository cache.
//!
//! Every repository URL maps to one stable directory under the stash root
//! keyed by its normalized https form, so ssh and https spellings of the
//! same repository share a clone.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::repo::GitRepo;
use crate::url::to_http;
use crate::ORIGIN;

#[derive(Debug, Clone, Default)]
pub struct RepoCache {
    pub stash_dir: PathBuf,
    pub auto_update: bool,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl RepoCache {
    pub fn new(stash_dir: impl Into<PathBuf>) -> Self {
        Self {
            stash_dir: stash_dir.into(),
            ..Self::default()
        }
    }

    /// The local directory `url` maps to: the stash root joined with the
    /// path segments of the normalized https form, scheme and `.git`
    /// stripped.
    pub fn dir(&self, url: &str) -> PathBuf {
        let http = to_http(url, true).unwrap_or_else(|_| url.to_string());
        let trimmed = http.strip_suffix(".git").unwrap_or(&http);
        let trimmed = trimmed.strip_prefix("https://").unwrap_or(trimmed);
        let mut dir = self.stash_dir.clone();
        for segment in trimmed.split('/').filter(|s| !s.is_empty()) {
            dir.push(segment);
        }
        dir
    }

    /// Guarantees a clone of `url` at [`RepoCache::dir`].
    ///
    /// An existing clone is left alone unless auto-update is on, in which
    /// case it is force-pulled; a failed pull removes the directory and
    /// falls through to a fresh clone.
    pub fn enable(&self, url: &str) -> Result<PathBuf> {
        let dir = self.dir(url);
        let mut repo = GitRepo::open_at(&dir)?;
        if let (Some(user), Some(password)) = (&self.user, &self.password) {
            repo.auth(user.clone(), password.clone());
        }
        if repo.is_repository() && !self.auto_update {
            return Ok(dir);
        }
        if repo.is_repository() {
            match repo.pull_force(ORIGIN, None) {
                Ok(()) => return Ok(dir),
                Err(e) => {
                    warn!(url, error = %e, "pull failed, falling back to a fresh clone");
                    fs::remove_dir_all(&dir)
                        .with_context(|| format!("failed to remove {}", dir.display()))?;
                    repo = GitRepo::open_at(&dir)?;
                }
            }
        }
        debug!(url, dir = %dir.display(), "cloning into cache");
        repo.clone_from(url)?;
        Ok(dir)
    }
}
