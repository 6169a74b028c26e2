//! Repository-backed command search.

use anyhow::Result;
use engine::Resolver;
use vcs::RepoCache;

use crate::file::FileSearcher;
use crate::node::Node;
use crate::Searcher;

/// Searches the command tree of a remote repository: the repository is
/// materialized through the cache first, then searched like a local tree.
pub struct RepoSearcher {
    repo_url: String,
    cache: RepoCache,
    command_dir: String,
    resolver: Resolver,
}

impl RepoSearcher {
    pub fn new(
        repo_url: impl Into<String>,
        cache: RepoCache,
        command_dir: impl Into<String>,
        resolver: Resolver,
    ) -> Self {
        Self {
            repo_url: repo_url.into(),
            cache,
            command_dir: command_dir.into(),
            resolver,
        }
    }

    // Attributes nodes to their source repository. A node set with no
    // children is stamped like a leaf; longstanding behavior, kept as is.
    fn fill_nodes(&self, nodes: &mut [Node]) {
        for node in nodes {
            if node.is_leaf || node.children.is_empty() {
                node.repo_url = Some(self.repo_url.clone());
            }
            self.fill_nodes(&mut node.children);
        }
    }
}

impl Searcher for RepoSearcher {
    fn list(&self) -> Result<Vec<Node>> {
        let dir = self.cache.enable(&self.repo_url)?;
        let searcher = FileSearcher::new(dir, self.command_dir.clone(), self.resolver.clone());
        let mut nodes = searcher.list()?;
        self.fill_nodes(&mut nodes);
        Ok(nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use executor::Executor;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn resolver(root: &Path, cache: RepoCache) -> Resolver {
        Resolver {
            app_name: "mixer".to_string(),
            app_version: "1.0.0".to_string(),
            plugin_root: root.join("plugin"),
            app_bin_path: root.join("bin"),
            cache,
            executor: Executor::new(),
        }
    }

    fn upstream_with_commands() -> TempDir {
        let upstream = TempDir::new().unwrap();
        let repo = git2::Repository::init(upstream.path()).unwrap();
        fs::create_dir_all(upstream.path().join("cmd/go")).unwrap();
        fs::write(upstream.path().join("cmd/fmt.yaml"), "desc: fmt\n").unwrap();
        fs::write(upstream.path().join("cmd/go/build.yaml"), "desc: build\n").unwrap();
        let mut index = repo.index().unwrap();
        index
            .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
            .unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = git2::Signature::now("tester", "tester@example.com").unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "seed commands", &tree, &[])
            .unwrap();
        upstream
    }

    #[test]
    fn lists_the_clone_and_stamps_repo_urls() {
        let upstream = upstream_with_commands();
        let root = TempDir::new().unwrap();
        let cache = RepoCache::new(root.path().join("repo"));
        let url = upstream.path().to_str().unwrap().to_string();

        let searcher = RepoSearcher::new(
            url.clone(),
            cache.clone(),
            "cmd",
            resolver(root.path(), cache),
        );
        let nodes = searcher.list().unwrap();

        let fmt = nodes.iter().find(|n| n.name == "fmt").unwrap();
        assert_eq!(fmt.repo_url.as_deref(), Some(url.as_str()));

        // A node set with children is not stamped, but its leaves are.
        let go = nodes.iter().find(|n| n.name == "go").unwrap();
        assert!(go.repo_url.is_none());
        assert_eq!(go.children[0].repo_url.as_deref(), Some(url.as_str()));
    }
}
