//! Repository operations over git2.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use errs::ErrorKind;
use git2::build::RepoBuilder;
use git2::{
    CertificateCheckStatus, Delta, FetchOptions, Oid, RemoteCallbacks, Repository, ResetType, Sort,
};
use tracing::debug;

/// What happened to a file between two commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Deleted,
    Modified,
    Renamed,
    Other,
}

/// One changed file in a diff.
#[derive(Debug, Clone)]
pub struct FileChange {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

/// A handle over a path that may or may not be a git repository yet.
///
/// Opening a path that is not a repository is not an error; it means
/// "not yet a repository" and [`GitRepo::is_repository`] reports false.
pub struct GitRepo {
    path: PathBuf,
    user: Option<String>,
    password: Option<String>,
    repo: Option<Repository>,
}

impl GitRepo {
    /// Opens the repository containing `path`, walking up with dot-git
    /// detection. A file path is resolved from its parent directory.
    pub fn discover(path: impl AsRef<Path>) -> Result<Self> {
        let start = path.as_ref();
        let start = if start.is_file() {
            start.parent().unwrap_or(start)
        } else {
            start
        };
        Self::open_with(start, |p| Repository::discover(p))
    }

    /// Opens the repository rooted exactly at `path`, without discovery.
    pub fn open_at(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path.as_ref(), |p| Repository::open(p))
    }

    fn open_with(
        path: &Path,
        open: impl FnOnce(&Path) -> std::result::Result<Repository, git2::Error>,
    ) -> Result<Self> {
        let repo = match open(path) {
            Ok(repo) => Some(repo),
            Err(e) if e.code() == git2::ErrorCode::NotFound => None,
            Err(e) => {
                return Err(errs::with_kind(
                    ErrorKind::RepoOpen,
                    anyhow::Error::new(e).context(format!(
                        "failed to open repository at {}",
                        path.display()
                    )),
                ))
            }
        };
        Ok(Self {
            path: path.to_path_buf(),
            user: None,
            password: None,
            repo,
        })
    }

    /// Configures basic-auth credentials for clone and fetch.
    pub fn auth(&mut self, user: impl Into<String>, password: impl Into<String>) {
        let user = user.into();
        let password = password.into();
        if user.is_empty() && password.is_empty() {
            return;
        }
        self.user = Some(user);
        self.password = Some(password);
    }

    pub fn is_repository(&self) -> bool {
        self.repo.is_some()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn repository(&self) -> Result<&Repository> {
        self.repo.as_ref().ok_or_else(|| {
            errs::new_error(
                ErrorKind::RepoOpen,
                format!("{} is not a git repository", self.path.display()),
            )
        })
    }

    fn fetch_options(&self) -> FetchOptions<'_> {
        let mut callbacks = RemoteCallbacks::new();
        if let (Some(user), Some(password)) = (self.user.clone(), self.password.clone()) {
            callbacks.credentials(move |_url, _username, _allowed| {
                git2::Cred::userpass_plaintext(&user, &password)
            });
        }
        // Mirrors the lenient TLS posture of the original client.
        callbacks.certificate_check(|_cert, _host| Ok(CertificateCheckStatus::CertificateOk));
        let mut options = FetchOptions::new();
        options.remote_callbacks(callbacks);
        options
    }

    /// Clones `url` into this handle's path.
    pub fn clone_from(&mut self, url: &str) -> Result<()> {
        debug!(url, path = %self.path.display(), "cloning repository");
        let repo = RepoBuilder::new()
            .fetch_options(self.fetch_options())
            .clone(url, &self.path)
            .map_err(|e| {
                errs::with_kind(
                    ErrorKind::RepoClone,
                    anyhow::Error::new(e).context(format!("failed to clone {url}")),
                )
            })?;
        self.repo = Some(repo);
        Ok(())
    }

    /// Force-synchronizes the worktree with `remote`: fetch, then hard
    /// reset to the fetched head. Already-up-to-date is success.
    pub fn pull_force(&self, remote: &str, branch: Option<&str>) -> Result<()> {
        self.pull_inner(remote, branch).map_err(|e| {
            errs::with_kind(
                ErrorKind::RepoPull,
                e.context(format!("failed to pull {remote}")),
            )
        })
    }

    fn pull_inner(&self, remote: &str, branch: Option<&str>) -> Result<()> {
        let repo = self.repository()?;
        let mut remote = repo.find_remote(remote)?;
        let refspecs: Vec<String> = branch.map(|b| vec![b.to_string()]).unwrap_or_default();
        let refspecs: Vec<&str> = refspecs.iter().map(String::as_str).collect();
        remote.fetch(&refspecs, Some(&mut self.fetch_options()), None)?;
        let fetched = repo.find_reference("FETCH_HEAD")?.peel_to_commit()?;
        repo.reset(fetched.as_object(), ResetType::Hard, None)?;
        Ok(())
    }

    /// Checks out `rev` (a branch, tag or commit id) with a hard reset.
    pub fn checkout(&self, rev: &str) -> Result<()> {
        let repo = self.repository()?;
        let object = repo
            .revparse_single(rev)
            .or_else(|_| repo.revparse_single(&format!("origin/{rev}")))
            .with_context(|| format!("revision {rev} not found"))?;
        repo.reset(&object, ResetType::Hard, None)
            .with_context(|| format!("failed to check out {rev}"))?;
        Ok(())
    }

    /// The current head commit id, if the repository has one.
    pub fn head(&self) -> Option<String> {
        let repo = self.repo.as_ref()?;
        let head = repo.head().ok()?;
        head.peel_to_commit().ok().map(|c| c.id().to_string())
    }

    /// Changed files between two commit ids.
    pub fn diff(&self, from: &str, to: &str) -> Result<Vec<FileChange>> {
        let repo = self.repository()?;
        let from_tree = repo
            .find_commit(Oid::from_str(from)?)
            .with_context(|| format!("commit {from} not found"))?
            .tree()?;
        let to_tree = repo
            .find_commit(Oid::from_str(to)?)
            .with_context(|| format!("commit {to} not found"))?
            .tree()?;
        let diff = repo.diff_tree_to_tree(Some(&from_tree), Some(&to_tree), None)?;
        let changes = diff
            .deltas()
            .filter_map(|delta| {
                let path = delta.new_file().path().or_else(|| delta.old_file().path())?;
                Some(FileChange {
                    path: path.to_path_buf(),
                    kind: match delta.status() {
                        Delta::Added => ChangeKind::Added,
                        Delta::Deleted => ChangeKind::Deleted,
                        Delta::Modified => ChangeKind::Modified,
                        Delta::Renamed => ChangeKind::Renamed,
                        _ => ChangeKind::Other,
                    },
                })
            })
            .collect();
        Ok(changes)
    }

    /// Changed files between `from` and the current head. An unreadable
    /// head yields an empty set.
    pub fn diff_head(&self, from: &str) -> Result<Vec<FileChange>> {
        match self.head() {
            Some(head) => self.diff(from, &head),
            None => Ok(Vec::new()),
        }
    }

    /// The id of the commit that last touched `path`, following first-parent
    /// history. Signals [`ErrorKind::NotFound`] when the file has none.
    pub fn last_change(&self, path: impl AsRef<Path>) -> Result<String> {
        let repo = self.repository()?;
        let path = path.as_ref();
        let rel = if path.is_absolute() {
            path.strip_prefix(self.root_path())
                .map_err(|_| {
                    errs::new_error(
                        ErrorKind::FileOp,
                        format!(
                            "{} is outside the repository at {}",
                            path.display(),
                            self.root_path().display()
                        ),
                    )
                })?
                .to_path_buf()
        } else {
            path.to_path_buf()
        };
        let mut walk = repo.revwalk()?;
        walk.push_head()?;
        walk.set_sorting(Sort::TIME)?;
        for oid in walk {
            let oid = oid?;
            let commit = repo.find_commit(oid)?;
            let entry = commit.tree()?.get_path(&rel).ok().map(|e| e.id());
            if commit.parent_count() == 0 {
                if entry.is_some() {
                    return Ok(oid.to_string());
                }
                continue;
            }
            let parent_entry = commit.parent(0)?.tree()?.get_path(&rel).ok().map(|e| e.id());
            if entry != parent_entry {
                return Ok(oid.to_string());
            }
        }
        Err(errs::new_error(
            ErrorKind::NotFound,
            format!("{} has no history", rel.display()),
        ))
    }

    /// The URL of `remote`.
    pub fn remote_url(&self, remote: &str) -> Result<String> {
        let repo = self.repository()?;
        let remote = repo
            .find_remote(remote)
            .with_context(|| format!("remote {remote} not found"))?;
        remote
            .url()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("remote has no url"))
    }

    /// The URLs of every configured remote.
    pub fn remote_urls(&self) -> Result<Vec<String>> {
        let repo = self.repository()?;
        let names = repo.remotes()?;
        let mut urls = Vec::new();
        for name in names.iter().flatten() {
            if let Some(url) = repo.find_remote(name)?.url() {
                urls.push(url.to_string());
            }
        }
        Ok(urls)
    }

    /// The worktree root, falling back to the handle's path when the
    /// repository is bare or absent.
    pub fn root_path(&self) -> PathBuf {
        self.repo
            .as_ref()
            .and_then(Repository::workdir)
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.path.clone())
    }
}
