//! Command tree nodes.

use std::path::PathBuf;

use engine::MixedPlugin;

/// One entry in the dynamic command tree. Leaves carry a resolved plugin;
/// interior nodes aggregate children.
///
/// Nodes own their children; the dot-joined `full_name` is fixed at
/// construction instead of chasing parent pointers.
pub struct Node {
    pub name: String,
    /// Dot-joined chain of names from the root ancestor down to this node.
    pub full_name: String,
    pub desc: String,
    /// Directory containing the node's file or folder.
    pub dir: PathBuf,
    pub abs_path: PathBuf,
    pub children: Vec<Node>,
    pub plugin: Option<MixedPlugin>,
    pub is_leaf: bool,
    /// The repository this node was sourced from, when remote.
    pub repo_url: Option<String>,
}

impl Node {
    /// Flattens the subtree into its leaves, depth first.
    pub fn into_leaves(self) -> Vec<Node> {
        if self.is_leaf {
            return vec![self];
        }
        self.children
            .into_iter()
            .flat_map(Node::into_leaves)
            .collect()
    }
}

/// Joins a parent prefix with a node name into a full name.
pub(crate) fn compose_full_name(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        return name.to_string();
    }
    format!("{prefix}.{name}")
}
