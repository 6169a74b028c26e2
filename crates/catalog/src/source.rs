//! Source loaders: functions producing searchers from runtime context.

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use engine::Resolver;
use tracing::debug;
use vcs::{is_git_url, to_http, GitRepo, RepoCache};

use crate::file::FileSearcher;
use crate::repo::RepoSearcher;
use crate::Searcher;

/// Environment override naming a command source repository.
pub const ENV_SOURCE_REPO: &str = "CC_SOURCE_REPO";

/// Runtime context the source loaders draw from.
#[derive(Clone)]
pub struct Sources {
    /// The invoking project's root directory.
    pub workspace: PathBuf,
    pub app_name: String,
    /// Catalog repository name looked up while walking group paths.
    pub group_name: String,
    pub command_dir: String,
    pub resolver: Resolver,
    pub cache: RepoCache,
}

impl Sources {
    fn repo_searcher(&self, url: impl Into<String>) -> Box<dyn Searcher> {
        Box::new(RepoSearcher::new(
            url,
            self.cache.clone(),
            self.command_dir.clone(),
            self.resolver.clone(),
        ))
    }

    /// Honors the environment override when it names a valid git URL.
    pub fn env_source(&self) -> Result<Vec<Box<dyn Searcher>>> {
        let Ok(source) = std::env::var(ENV_SOURCE_REPO) else {
            return Ok(Vec::new());
        };
        if source.is_empty() {
            return Ok(Vec::new());
        }
        if !is_git_url(&source) {
            return Err(anyhow!("invalid repository url: {source}"));
        }
        Ok(vec![self.repo_searcher(source)])
    }

    /// The project-local command tree at `<workspace>/.<app>/<command_dir>`.
    pub fn project_source(&self) -> Result<Vec<Box<dyn Searcher>>> {
        let dir = self.workspace.join(format!(".{}", self.app_name));
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        Ok(vec![Box::new(FileSearcher::new(
            dir,
            self.command_dir.clone(),
            self.resolver.clone(),
        )) as Box<dyn Searcher>])
    }

    /// For every remote of the enclosing repository, the group catalog
    /// repositories walking up the path hierarchy.
    pub fn project_group_source(&self) -> Result<Vec<Box<dyn Searcher>>> {
        let repo = GitRepo::discover(&self.workspace)?;
        if !repo.is_repository() {
            return Ok(Vec::new());
        }
        let mut searchers: Vec<Box<dyn Searcher>> = Vec::new();
        for remote in repo.remote_urls()? {
            for group in group_urls(&remote, &self.group_name) {
                debug!(group, "adding group catalog source");
                searchers.push(self.repo_searcher(group));
            }
        }
        Ok(searchers)
    }

    /// Honors persistent configuration: a command repository wins over a
    /// local command path.
    pub fn config_source(
        &self,
        command_repo: &str,
        command_path: &str,
    ) -> Result<Vec<Box<dyn Searcher>>> {
        if !command_repo.is_empty() {
            return Ok(vec![self.repo_searcher(command_repo.to_string())]);
        }
        if !command_path.is_empty() {
            return Ok(vec![Box::new(FileSearcher::new(
                command_path.to_string(),
                String::new(),
                self.resolver.clone(),
            )) as Box<dyn Searcher>]);
        }
        Ok(Vec::new())
    }

    /// A single explicit repository source.
    pub fn repository_source(&self, url: &str) -> Result<Vec<Box<dyn Searcher>>> {
        Ok(vec![self.repo_searcher(url.to_string())])
    }
}

// Walks up the path hierarchy of `repo`, yielding the group catalog
// repository at every level: for host/a/b/tool.git and group name `mixer`,
// host/a/mixer.git then host/a/b/mixer.git.
fn group_urls(repo: &str, group_name: &str) -> Vec<String> {
    if !is_git_url(repo) {
        return Vec::new();
    }
    let Ok(http) = to_http(repo, true) else {
        return Vec::new();
    };
    let trimmed = http.strip_suffix(".git").unwrap_or(&http);
    let Some(rest) = trimmed.strip_prefix("https://") else {
        return Vec::new();
    };
    let mut segments = rest.split('/').filter(|s| !s.is_empty());
    let Some(host) = segments.next() else {
        return Vec::new();
    };
    let groups: Vec<&str> = segments.collect();
    if groups.len() < 2 {
        return Vec::new();
    }
    let mut urls = Vec::new();
    let mut prefix = String::new();
    for group in &groups[..groups.len() - 1] {
        prefix.push_str(group);
        prefix.push('/');
        urls.push(format!("https://{host}/{prefix}{group_name}.git"));
    }
    urls
}

#[cfg(test)]
mod tests {
    use super::*;
    use executor::Executor;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn sources(workspace: &Path, root: &Path) -> Sources {
        let cache = RepoCache::new(root.join("repo"));
        Sources {
            workspace: workspace.to_path_buf(),
            app_name: "mixer".to_string(),
            group_name: "mixer".to_string(),
            command_dir: "cmd".to_string(),
            resolver: Resolver {
                app_name: "mixer".to_string(),
                app_version: "1.0.0".to_string(),
                plugin_root: root.join("plugin"),
                app_bin_path: root.join("bin"),
                cache: cache.clone(),
                executor: Executor::new(),
            },
            cache,
        }
    }

    #[test]
    fn group_urls_walk_up_the_hierarchy() {
        let urls = group_urls("https://github.com/corp/team/tool.git", "mixer");
        assert_eq!(
            urls,
            vec![
                "https://github.com/corp/mixer.git",
                "https://github.com/corp/team/mixer.git",
            ]
        );
    }

    #[test]
    fn group_urls_need_a_group_segment() {
        assert!(group_urls("https://github.com/tool.git", "mixer").is_empty());
        assert!(group_urls("not-a-url", "mixer").is_empty());
        // A repo directly under one group yields that group's catalog.
        assert_eq!(
            group_urls("git@github.com:corp/tool.git", "mixer"),
            vec!["https://github.com/corp/mixer.git"]
        );
    }

    #[test]
    fn project_source_requires_the_dot_directory() {
        let workspace = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        let sources = sources(workspace.path(), root.path());
        assert!(sources.project_source().unwrap().is_empty());

        fs::create_dir_all(workspace.path().join(".mixer/cmd")).unwrap();
        fs::write(
            workspace.path().join(".mixer/cmd/x.yaml"),
            "name: x\ndesc: x\n",
        )
        .unwrap();
        let searchers = sources.project_source().unwrap();
        assert_eq!(searchers.len(), 1);
        let nodes = searchers[0].list().unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].name, "x");
    }

    #[test]
    fn config_source_prefers_the_repo() {
        let workspace = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        let sources = sources(workspace.path(), root.path());

        assert!(sources.config_source("", "").unwrap().is_empty());
        assert_eq!(
            sources
                .config_source("https://github.com/g/r.git", "/elsewhere")
                .unwrap()
                .len(),
            1
        );

        // A bare path source lists the directory itself.
        let cmd_dir = workspace.path().join("commands");
        fs::create_dir_all(&cmd_dir).unwrap();
        fs::write(cmd_dir.join("y.yml"), "name: y\n").unwrap();
        let searchers = sources
            .config_source("", cmd_dir.to_str().unwrap())
            .unwrap();
        let nodes = searchers[0].list().unwrap();
        assert_eq!(nodes[0].name, "y");
    }

    #[test]
    fn project_group_source_walks_the_remote_hierarchy() {
        let workspace = TempDir::new().unwrap();
        let repo = git2::Repository::init(workspace.path()).unwrap();
        repo.remote("origin", "https://github.com/corp/team/tool.git")
            .unwrap();
        let root = TempDir::new().unwrap();

        let sources = sources(workspace.path(), root.path());
        let searchers = sources.project_group_source().unwrap();
        assert_eq!(searchers.len(), 2);

        // Outside any repository there is nothing to walk.
        let bare = TempDir::new().unwrap();
        let sources = self::sources(bare.path(), root.path());
        assert!(sources.project_group_source().unwrap().is_empty());
    }

    #[test]
    fn env_source_rejects_non_git_urls() {
        let workspace = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        let sources = sources(workspace.path(), root.path());

        std::env::set_var(ENV_SOURCE_REPO, "not-a-repo");
        let result = sources.env_source();
        std::env::remove_var(ENV_SOURCE_REPO);
        assert!(result.is_err());
    }
}
