//! The dynamic command catalog.
//!
//! Turns filesystem trees and mirrored repository trees into [`Node`]
//! trees the CLI can mount, composing several sources with first-wins
//! deduplication by full name.

use std::collections::HashSet;

use anyhow::Result;

mod file;
mod node;
mod repo;
mod source;

pub use file::FileSearcher;
pub use node::Node;
pub use repo::RepoSearcher;
pub use source::{Sources, ENV_SOURCE_REPO};

/// A strategy producing command nodes from one source.
pub trait Searcher {
    fn list(&self) -> Result<Vec<Node>>;
}

/// A function producing searchers from runtime context.
pub type SourceLoader<'a> = Box<dyn Fn() -> Result<Vec<Box<dyn Searcher>>> + 'a>;

/// Composes source loaders into one node list. Duplicate full names are
/// resolved first-wins across loaders.
pub struct Catalog<'a> {
    loaders: Vec<SourceLoader<'a>>,
}

impl<'a> Catalog<'a> {
    pub fn new(loaders: Vec<SourceLoader<'a>>) -> Self {
        Self { loaders }
    }

    pub fn list(&self) -> Result<Vec<Node>> {
        let mut seen = HashSet::new();
        let mut nodes = Vec::new();
        for loader in &self.loaders {
            for searcher in loader()? {
                for node in searcher.list()? {
                    if seen.insert(node.full_name.clone()) {
                        nodes.push(node);
                    }
                }
            }
        }
        Ok(nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn leaf(full_name: &str, desc: &str) -> Node {
        Node {
            name: full_name.rsplit('.').next().unwrap_or(full_name).to_string(),
            full_name: full_name.to_string(),
            desc: desc.to_string(),
            dir: PathBuf::new(),
            abs_path: PathBuf::new(),
            children: Vec::new(),
            plugin: None,
            is_leaf: true,
            repo_url: None,
        }
    }

    struct Fixed(Vec<(String, String)>);

    impl Searcher for Fixed {
        fn list(&self) -> Result<Vec<Node>> {
            Ok(self
                .0
                .iter()
                .map(|(name, desc)| leaf(name, desc))
                .collect())
        }
    }

    #[test]
    fn duplicate_full_names_resolve_first_wins() {
        let first: SourceLoader = Box::new(|| {
            Ok(vec![Box::new(Fixed(vec![
                ("fmt".to_string(), "from first".to_string()),
                ("lint".to_string(), "lint".to_string()),
            ])) as Box<dyn Searcher>])
        });
        let second: SourceLoader = Box::new(|| {
            Ok(vec![Box::new(Fixed(vec![
                ("fmt".to_string(), "from second".to_string()),
                ("test".to_string(), "test".to_string()),
            ])) as Box<dyn Searcher>])
        });

        let catalog = Catalog::new(vec![first, second]);
        let nodes = catalog.list().unwrap();
        assert_eq!(nodes.len(), 3);
        let fmt = nodes.iter().find(|n| n.full_name == "fmt").unwrap();
        assert_eq!(fmt.desc, "from first");
    }

    #[test]
    fn loader_errors_propagate() {
        let bad: SourceLoader = Box::new(|| anyhow::bail!("broken source"));
        let catalog = Catalog::new(vec![bad]);
        assert!(catalog.list().is_err());
    }
}
