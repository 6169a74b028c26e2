//! The application shell: workspace layout, persistent configuration, the
//! native command tree, dynamic mounting and dispatch.

use std::fs;
use std::path::PathBuf;

use anyhow::Result;
use catalog::{Catalog, Node, SourceLoader, Sources};
use daemon::{StartOutcome, Supervisor};
use engine::{ExecOpts, LoadOpts, Resolver};
use errs::ErrorKind;
use executor::Executor;
use tracing::debug;
use vcs::{GitRepo, RepoCache};

mod commands;
pub mod config;
pub mod layout;
pub mod mirror;
pub mod output;
pub mod tree;

pub use config::{Configurator, PersistentConfig};
pub use layout::{LayoutOverrides, WorkspaceLayout};
pub use mirror::MirrorOptions;

/// Static identity and wiring of the application.
pub struct AppOptions {
    pub name: String,
    pub desc: String,
    pub version: String,
    /// Catalog repository name looked up when walking group hierarchies.
    pub group_name: String,
    /// Directory inside command sources holding the command tree.
    pub command_dir: String,
    /// Directory inside command sources holding installable commands.
    pub install_dir: String,
    /// Where published builds of the application itself live; empty
    /// disables self-update.
    pub mirror: MirrorOptions,
    pub layout: LayoutOverrides,
    pub default_config: PersistentConfig,
}

impl AppOptions {
    pub fn mixer() -> Self {
        Self {
            name: "mixer".to_string(),
            desc: "A mixed command-line tool that composes its commands from plugin sources"
                .to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            group_name: "mixer".to_string(),
            command_dir: "cmd".to_string(),
            install_dir: "install".to_string(),
            mirror: MirrorOptions::default(),
            layout: LayoutOverrides::default(),
            default_config: PersistentConfig::default(),
        }
    }
}

/// One assembled application instance.
pub struct App {
    pub(crate) options: AppOptions,
    pub(crate) layout: WorkspaceLayout,
    pub(crate) configurator: Configurator,
    pub(crate) executor: Executor,
}

impl App {
    pub fn new(options: AppOptions) -> Result<Self> {
        let home = dirs::home_dir().ok_or_else(|| {
            errs::new_error(
                ErrorKind::RuntimeNotReady,
                "the user home directory could not be resolved",
            )
        })?;
        let root = home.join(format!(".{}", options.name));
        fs::create_dir_all(&root).map_err(|e| {
            errs::with_kind(
                ErrorKind::RuntimeNotReady,
                anyhow::Error::new(e)
                    .context(format!("create workspace [{}] failed", root.display())),
            )
        })?;
        let layout = WorkspaceLayout::build(root, options.layout.clone());
        let configurator =
            Configurator::new(layout.config_file.clone(), options.default_config.clone())
                .map_err(|e| errs::with_kind(ErrorKind::RuntimeNotReady, e))?;
        Ok(Self {
            options,
            layout,
            configurator,
            executor: Executor::new(),
        })
    }

    pub fn layout(&self) -> &WorkspaceLayout {
        &self.layout
    }

    /// Resolves and dispatches one invocation.
    pub fn run(&self, argv: &[String]) -> Result<()> {
        let root = commands::root_command(&self.options);
        let index = tree::NativeIndex::from_command(&root);
        let first = argv.get(1).map(String::as_str).unwrap_or("");
        let hidden = commands::is_hidden_builtin(first);

        // Every visible invocation best-effort refires the daemon, so a
        // worker lost to reboots comes back; internal re-entries do not.
        if !hidden {
            self.fire_daemon();
        }

        // Dynamic commands only mount when the invocation may need them:
        // the bare root, a subcommand-bearing native, or an unknown name.
        let load_dynamic = if hidden {
            false
        } else if first.is_empty() || first.starts_with('-') {
            true
        } else {
            index.has_subcommands(first).unwrap_or(true)
        };
        let (root, mut dynamics) = if load_dynamic {
            let nodes = self.list_nodes(false)?;
            tree::mount(root, nodes, &index)
        } else {
            (root, tree::DynamicCommands::default())
        };

        let matches = match root.clone().try_get_matches_from(argv) {
            Ok(matches) => matches,
            Err(e) => return handle_clap_error(e),
        };
        let (path, leaf_matches) = tree::subcommand_chain(&matches);
        if path.is_empty() {
            let mut help = root;
            let _ = help.print_help();
            return Ok(());
        }
        let full_name = path.join(".");
        if let Some(node) = dynamics.take_leaf(&full_name) {
            return self.exec_node(node, tree::forwarded_args(leaf_matches));
        }
        match path[0].as_str() {
            commands::CONFIG_CMD => self.handle_config(leaf_matches),
            commands::INSTALL_CMD => self.handle_install(leaf_matches),
            commands::UPDATE_CMD => self.handle_update(leaf_matches),
            commands::COMPLETION_CMD => self.handle_completion(leaf_matches),
            engine::EXEC_SUBCOMMAND => self.handle_exec(leaf_matches),
            commands::DAEMON_CMD => self.handle_daemon(),
            commands::COMPLETE_CMD => self.handle_complete(leaf_matches),
            _ => {
                // A command set was named without one of its leaves.
                let mut help = subtree(&root, &path);
                let _ = help.print_help();
                Ok(())
            }
        }
    }

    fn exec_node(&self, node: Node, args: Vec<String>) -> Result<()> {
        let mut plugin = match node.plugin {
            Some(plugin) => plugin,
            None => self.resolver(false).resolve_path(&node.abs_path)?,
        };
        plugin.load(LoadOpts::default())?;
        plugin.execute(&ExecOpts {
            args,
            envs: Vec::new(),
        })
    }

    pub(crate) fn resolver(&self, update: bool) -> Resolver {
        Resolver {
            app_name: self.options.name.clone(),
            app_version: self.options.version.clone(),
            plugin_root: self.layout.plugin_root_path.clone(),
            app_bin_path: self.layout.bin_path.clone(),
            cache: self.repo_cache(update),
            executor: self.executor,
        }
    }

    fn repo_cache(&self, update: bool) -> RepoCache {
        let config = self.configurator.load();
        RepoCache {
            stash_dir: self.layout.repo_root_path.clone(),
            auto_update: update || config.update.always,
            user: (!config.repo.user.is_empty()).then(|| config.repo.user.clone()),
            password: (!config.repo.password.is_empty()).then(|| config.repo.password.clone()),
        }
    }

    fn sources_in(&self, command_dir: &str, update: bool) -> Sources {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let workspace = GitRepo::discover(&cwd)
            .map(|repo| repo.root_path())
            .unwrap_or(cwd);
        Sources {
            workspace,
            app_name: self.options.name.clone(),
            group_name: self.options.group_name.clone(),
            command_dir: command_dir.to_string(),
            resolver: self.resolver(update),
            cache: self.repo_cache(update),
        }
    }

    pub(crate) fn list_nodes(&self, update: bool) -> Result<Vec<Node>> {
        self.list_nodes_in(&self.options.command_dir, update)
    }

    pub(crate) fn list_nodes_in(&self, command_dir: &str, update: bool) -> Result<Vec<Node>> {
        let config = self.configurator.load();
        let env_sources = self.sources_in(command_dir, update);
        let project_sources = env_sources.clone();
        let config_sources = env_sources.clone();
        let (repo, path) = (config.command.repo, config.command.path);
        let loaders: Vec<SourceLoader> = vec![
            Box::new(move || env_sources.env_source()),
            Box::new(move || project_sources.project_source()),
            Box::new(move || config_sources.config_source(&repo, &path)),
        ];
        Catalog::new(loaders).list()
    }

    pub(crate) fn daemon_supervisor(&self) -> Supervisor {
        Supervisor {
            name: format!("{}.daemon", self.options.name),
            version: self.options.version.clone(),
            args: vec![commands::DAEMON_CMD.to_string()],
            work_dir: self.layout.root_path.clone(),
            daemon_dir: self.layout.daemon_path.clone(),
            singleton: true,
            executor: self.executor,
        }
    }

    // Daemon startup never gets in the user's way: failures are logged
    // and forgotten.
    fn fire_daemon(&self) {
        match self.daemon_supervisor().start() {
            Ok(StartOutcome::Spawned(record)) => debug!(pid = record.pid, "daemon spawned"),
            Ok(StartOutcome::AlreadyRunning(record)) => {
                debug!(pid = record.pid, "daemon already running")
            }
            Ok(StartOutcome::Worker(guard)) => drop(guard),
            Err(e) => debug!(error = format!("{e:#}"), "daemon start skipped"),
        }
    }
}

fn subtree(root: &clap::Command, path: &[String]) -> clap::Command {
    let mut current = root;
    for name in path {
        match current.find_subcommand(name) {
            Some(sub) => current = sub,
            None => break,
        }
    }
    current.clone()
}

fn handle_clap_error(e: clap::Error) -> Result<()> {
    use clap::error::ErrorKind as ClapErrorKind;
    match e.kind() {
        ClapErrorKind::DisplayHelp
        | ClapErrorKind::DisplayVersion
        | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
            let _ = e.print();
            Ok(())
        }
        // An unknown command is not an error: a source that was not
        // mounted in this invocation may well provide it.
        ClapErrorKind::InvalidSubcommand => {
            debug!("unknown command, exiting quietly");
            Ok(())
        }
        _ => {
            let _ = e.print();
            Err(errs::new_error(
                ErrorKind::ParamInvalid,
                "invalid command line parameters",
            ))
        }
    }
}
