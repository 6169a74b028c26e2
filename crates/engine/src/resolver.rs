//! Manifest resolution: from a path (or a repository file) to a typed
//! plugin with its derived workspace coordinates.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use errs::ErrorKind;
use executor::Executor;
use sha2::{Digest, Sha256};
use tracing::debug;
use vcs::{to_http, GitRepo, RepoCache, ORIGIN};

use crate::plugin::{check_real_file, read_load_record, MixedPlugin, PluginContext};
use crate::schema::PluginSchema;

const BIN_DIR: &str = ".bin";
const RESOURCE_DIR: &str = ".resource";
const LOAD_FILE: &str = ".load_info";

/// Resolves manifest files into [`MixedPlugin`] values.
#[derive(Debug, Clone)]
pub struct Resolver {
    /// Program name dependent shims re-enter with.
    pub app_name: String,
    pub app_version: String,
    /// Root under which plugin workspaces are keyed.
    pub plugin_root: PathBuf,
    /// The application's global bin directory.
    pub app_bin_path: PathBuf,
    pub cache: RepoCache,
    pub executor: Executor,
}

impl Resolver {
    /// Resolves the manifest at `path`.
    ///
    /// The workspace is keyed by the normalized https form of the
    /// enclosing repository's origin remote; a manifest outside any
    /// repository still resolves, keyed by a stable digest of its
    /// directory.
    pub fn resolve_path(&self, path: impl AsRef<Path>) -> Result<MixedPlugin> {
        let path = path.as_ref();
        let data = fs::read(path).map_err(|e| {
            errs::with_kind(
                ErrorKind::FileOp,
                anyhow::Error::new(e).context(format!("read {} failed", path.display())),
            )
        })?;
        let schema = PluginSchema::parse(&data, path)?;
        let sum = hex::encode(Sha256::digest(&data));
        let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let repo = GitRepo::discover(&path)?;
        let (workspace, command_source_path) = self.derive_workspace(&path, &repo);
        debug!(
            manifest = %path.display(),
            workspace = %workspace.display(),
            "resolved plugin"
        );
        let ctx = PluginContext {
            bin_path: workspace.join(BIN_DIR),
            resource_path: workspace.join(RESOURCE_DIR),
            load_file: workspace.join(LOAD_FILE),
            path,
            sum,
            workspace,
            command_source_path,
        };
        let load_record = read_load_record(&ctx.load_file)?;
        Ok(MixedPlugin::new(ctx, schema, load_record, self.clone()))
    }

    /// Resolves a manifest inside another repository: materializes the
    /// given ref of the repository through the cache, then resolves the
    /// named file within it.
    pub fn resolve_repo_file(
        &self,
        url: &str,
        reference: &str,
        file: &str,
    ) -> Result<MixedPlugin> {
        check_real_file(file)?;
        let dir = self.cache.enable(url)?;
        if !reference.is_empty() {
            let mut repo = GitRepo::open_at(&dir)?;
            if let (Some(user), Some(password)) = (&self.cache.user, &self.cache.password) {
                repo.auth(user.clone(), password.clone());
            }
            repo.checkout(reference)?;
        }
        self.resolve_path(dir.join(file))
    }

    // Workspace and command-source derivation. The source key mirrors the
    // repository's normalized https path under the plugin root; every
    // manifest then gets its own directory under that key, so siblings of
    // one repo share a parent.
    fn derive_workspace(&self, path: &Path, repo: &GitRepo) -> (PathBuf, PathBuf) {
        let source = if repo.is_repository() {
            repo.root_path()
        } else {
            path.parent().unwrap_or(Path::new(".")).to_path_buf()
        };
        let source = source.canonicalize().unwrap_or(source);
        let base = self
            .source_key(repo)
            .unwrap_or_else(|| self.local_key(&source));
        let rel = path
            .strip_prefix(&source)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| {
                path.file_name()
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("manifest"))
            });
        (base.join(rel.with_extension("")), source)
    }

    fn source_key(&self, repo: &GitRepo) -> Option<PathBuf> {
        if !repo.is_repository() {
            return None;
        }
        let url = repo.remote_url(ORIGIN).ok()?;
        let http = to_http(&url, true).ok()?;
        let trimmed = http.strip_suffix(".git").unwrap_or(&http);
        let trimmed = trimmed.strip_prefix("https://").unwrap_or(trimmed);
        let mut key = self.plugin_root.clone();
        for segment in trimmed.split('/').filter(|s| !s.is_empty()) {
            key.push(segment);
        }
        Some(key)
    }

    // No usable git context: key by a stable digest of the manifest's
    // directory so locally-rooted plugins stay loadable.
    fn local_key(&self, source: &Path) -> PathBuf {
        let digest = hex::encode(Sha256::digest(source.display().to_string().as_bytes()));
        let stem = source
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "root".to_string());
        self.plugin_root
            .join("local")
            .join(format!("{stem}-{}", &digest[..8]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn resolver(plugin_root: &Path) -> Resolver {
        Resolver {
            app_name: "mixer".to_string(),
            app_version: "1.0.0".to_string(),
            plugin_root: plugin_root.to_path_buf(),
            app_bin_path: plugin_root.join("bin"),
            cache: RepoCache::new(plugin_root.join("repo")),
            executor: Executor::new(),
        }
    }

    #[test]
    fn resolves_a_local_manifest_without_git_context() {
        let tmp = TempDir::new().unwrap();
        let manifest = tmp.path().join("demo.yaml");
        fs::write(&manifest, "name: demo\nversion: 0.1.0\n").unwrap();

        let root = TempDir::new().unwrap();
        let resolver = resolver(root.path());
        let plugin = resolver.resolve_path(&manifest).unwrap();

        assert_eq!(plugin.name(), "demo");
        assert_eq!(plugin.version(), "0.1.0");
        assert!(!plugin.is_loaded());
        let ctx = plugin.context();
        assert_eq!(ctx.sum.len(), 64);
        assert!(ctx.workspace.starts_with(root.path().join("local")));
        assert!(ctx.workspace.ends_with("demo"));
        assert_eq!(ctx.bin_path, ctx.workspace.join(".bin"));
        assert_eq!(ctx.resource_path, ctx.workspace.join(".resource"));
        assert_eq!(ctx.load_file, ctx.workspace.join(".load_info"));
        assert_eq!(
            ctx.command_source_path.canonicalize().unwrap(),
            tmp.path().canonicalize().unwrap()
        );
    }

    #[test]
    fn local_workspaces_are_stable_across_resolutions() {
        let tmp = TempDir::new().unwrap();
        let manifest = tmp.path().join("demo.yaml");
        fs::write(&manifest, "name: demo\n").unwrap();

        let root = TempDir::new().unwrap();
        let resolver = resolver(root.path());
        let first = resolver.resolve_path(&manifest).unwrap();
        let second = resolver.resolve_path(&manifest).unwrap();
        assert_eq!(first.context().workspace, second.context().workspace);
    }

    #[test]
    fn repository_manifests_key_the_workspace_by_origin() {
        let tmp = TempDir::new().unwrap();
        let repo = git2::Repository::init(tmp.path()).unwrap();
        repo.remote("origin", "git@github.com:modern-devops/plugins.git")
            .unwrap();
        let cmd_dir = tmp.path().join("cmd");
        fs::create_dir_all(&cmd_dir).unwrap();
        let manifest = cmd_dir.join("demo.yaml");
        fs::write(&manifest, "name: demo\n").unwrap();

        let root = TempDir::new().unwrap();
        let resolver = resolver(root.path());
        let plugin = resolver.resolve_path(&manifest).unwrap();

        let ctx = plugin.context();
        assert_eq!(
            ctx.workspace,
            root.path().join("github.com/modern-devops/plugins/cmd/demo")
        );
        assert_eq!(
            ctx.command_source_path.canonicalize().unwrap(),
            tmp.path().canonicalize().unwrap()
        );
    }

    #[test]
    fn sibling_manifests_share_a_parent_workspace() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.yaml"), "name: a\n").unwrap();
        fs::write(tmp.path().join("b.yaml"), "name: b\n").unwrap();

        let root = TempDir::new().unwrap();
        let resolver = resolver(root.path());
        let a = resolver.resolve_path(tmp.path().join("a.yaml")).unwrap();
        let b = resolver.resolve_path(tmp.path().join("b.yaml")).unwrap();
        assert_ne!(a.context().workspace, b.context().workspace);
        assert_eq!(
            a.context().workspace.parent(),
            b.context().workspace.parent()
        );
    }

    #[test]
    fn nameless_manifests_take_the_file_stem() {
        let tmp = TempDir::new().unwrap();
        let manifest = tmp.path().join("fmt.yml");
        fs::write(&manifest, "desc: formats things\n").unwrap();

        let root = TempDir::new().unwrap();
        let plugin = resolver(root.path()).resolve_path(&manifest).unwrap();
        assert_eq!(plugin.name(), "fmt");
        assert_eq!(plugin.version(), "latest");
        assert_eq!(plugin.desc(), "formats things");
    }

    #[test]
    fn repo_file_references_must_stay_in_tree() {
        let root = TempDir::new().unwrap();
        let resolver = resolver(root.path());
        let err = resolver
            .resolve_repo_file("https://github.com/g/r.git", "", "../escape.yml")
            .unwrap_err();
        assert_eq!(errs::kind_of(&err), Some(ErrorKind::PluginLoad));
    }
}
