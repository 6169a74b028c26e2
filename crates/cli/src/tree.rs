//! Native/dynamic command-tree merging.
//!
//! Built-in commands are indexed flatly by dot-joined full name. A dynamic
//! node whose full name matches a native leaf is suppressed; one matching
//! a subcommand-bearing native mounts its children under it; everything
//! else mounts at its own full name.

use std::collections::HashMap;

use catalog::Node;
use clap::{Arg, ArgMatches, Command};

/// Flat index of native commands: full name → has subcommands.
#[derive(Debug, Default)]
pub struct NativeIndex {
    map: HashMap<String, bool>,
}

impl NativeIndex {
    pub fn from_command(root: &Command) -> Self {
        let mut map = HashMap::new();
        for sub in root.get_subcommands() {
            index_command(sub, "", &mut map);
        }
        Self { map }
    }

    pub fn contains(&self, full_name: &str) -> bool {
        self.map.contains_key(full_name)
    }

    pub fn has_subcommands(&self, full_name: &str) -> Option<bool> {
        self.map.get(full_name).copied()
    }
}

fn index_command(cmd: &Command, prefix: &str, map: &mut HashMap<String, bool>) {
    let full = if prefix.is_empty() {
        cmd.get_name().to_string()
    } else {
        format!("{prefix}.{}", cmd.get_name())
    };
    map.insert(full.clone(), cmd.has_subcommands());
    for sub in cmd.get_subcommands() {
        index_command(sub, &full, map);
    }
}

/// Dynamic leaves registered during mounting, looked up by full name at
/// dispatch time.
#[derive(Default)]
pub struct DynamicCommands {
    leaves: HashMap<String, Node>,
}

impl DynamicCommands {
    pub fn take_leaf(&mut self, full_name: &str) -> Option<Node> {
        self.leaves.remove(full_name)
    }

    pub fn contains(&self, full_name: &str) -> bool {
        self.leaves.contains_key(full_name)
    }

    pub fn leaf_names(&self) -> Vec<&str> {
        self.leaves.keys().map(String::as_str).collect()
    }
}

/// Mounts `nodes` into `root` per the merge rules and registers their
/// leaves for dispatch.
pub fn mount(mut root: Command, nodes: Vec<Node>, index: &NativeIndex) -> (Command, DynamicCommands) {
    let mut dynamics = DynamicCommands::default();
    for node in nodes {
        match index.has_subcommands(&node.full_name) {
            // The native is a leaf: it wins, the dynamic is suppressed.
            Some(false) => continue,
            // The native is a command set: the dynamic's children join it.
            Some(true) => {
                let children: Vec<Command> = node.children.iter().map(to_command).collect();
                let name = node.name.clone();
                root = root.mut_subcommand(name, move |cmd| cmd.subcommands(children));
                for child in node.children {
                    register_leaves(child, &mut dynamics);
                }
            }
            None => {
                root = root.subcommand(to_command(&node));
                register_leaves(node, &mut dynamics);
            }
        }
    }
    (root, dynamics)
}

fn register_leaves(node: Node, dynamics: &mut DynamicCommands) {
    if node.is_leaf {
        dynamics.leaves.insert(node.full_name.clone(), node);
        return;
    }
    for child in node.children {
        register_leaves(child, dynamics);
    }
}

fn to_command(node: &Node) -> Command {
    if node.is_leaf {
        // Flag parsing belongs to the plugin: everything after the name is
        // forwarded verbatim, --help included.
        return Command::new(node.name.clone())
            .about(node.desc.clone())
            .disable_help_flag(true)
            .arg(
                Arg::new("args")
                    .value_name("ARGS")
                    .num_args(0..)
                    .trailing_var_arg(true)
                    .allow_hyphen_values(true),
            );
    }
    let mut cmd = Command::new(node.name.clone()).about(node.desc.clone());
    for child in &node.children {
        cmd = cmd.subcommand(to_command(child));
    }
    cmd
}

/// Walks the matched subcommand chain down to the selected leaf.
pub fn subcommand_chain(matches: &ArgMatches) -> (Vec<String>, &ArgMatches) {
    let mut path = Vec::new();
    let mut current = matches;
    while let Some((name, sub)) = current.subcommand() {
        path.push(name.to_string());
        current = sub;
    }
    (path, current)
}

/// The forwarded arguments of a dynamic leaf invocation.
pub fn forwarded_args(matches: &ArgMatches) -> Vec<String> {
    matches
        .get_many::<String>("args")
        .map(|values| values.cloned().collect())
        .unwrap_or_default()
}
