//! Built-in command definitions and their handlers.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use catalog::Node;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use daemon::{StartOutcome, WorkerGuard};
use engine::{ExecOpts, LoadOpts, UpdateOpts, EXEC_SUBCOMMAND};
use errs::ErrorKind;
use linker::LinkOptions;
use tracing::{debug, info, warn};

use crate::output::{print_info, print_status, print_success};
use crate::{App, AppOptions};

pub const CONFIG_CMD: &str = "config";
pub const INSTALL_CMD: &str = "install";
pub const UPDATE_CMD: &str = "update";
pub const COMPLETION_CMD: &str = "completion";
pub const DAEMON_CMD: &str = "__daemon";
pub const COMPLETE_CMD: &str = "__complete";

const DAEMON_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);

/// Set on reload so the fresh build never chases another update.
const UPDATE_SELF_ENV: &str = "MIXER_UPDATE_SELF";

/// Whether `name` addresses a hidden built-in. Hidden built-ins skip the
/// daemon supervisor so internal re-entries never restart workers.
pub fn is_hidden_builtin(name: &str) -> bool {
    matches!(name, EXEC_SUBCOMMAND | DAEMON_CMD | COMPLETE_CMD)
}

fn sha256_file(path: &Path) -> Result<String> {
    use sha2::{Digest, Sha256};
    let data = std::fs::read(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(hex::encode(Sha256::digest(data)))
}

#[cfg(unix)]
fn grant_execute(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .with_context(|| format!("failed to mark {} executable", path.display()))
}

#[cfg(not(unix))]
fn grant_execute(_path: &Path) -> Result<()> {
    Ok(())
}

// Every staged build but the current one is disposable.
fn clear_stale_builds(resource_root: &Path, keep: &str) {
    let Ok(entries) = std::fs::read_dir(resource_root) else {
        return;
    };
    for entry in entries.flatten() {
        if entry.file_name().to_string_lossy() != keep {
            let _ = std::fs::remove_dir_all(entry.path());
        }
    }
}

/// The native command tree.
pub fn root_command(options: &AppOptions) -> Command {
    Command::new(options.name.clone())
        .about(options.desc.clone())
        .version(options.version.clone())
        .arg_required_else_help(true)
        .subcommand(
            Command::new(CONFIG_CMD)
                .about("Read and write the persistent configuration")
                .arg(
                    Arg::new("list")
                        .long("list")
                        .action(ArgAction::SetTrue)
                        .help("List entries that have been set"),
                )
                .arg(
                    Arg::new("get")
                        .long("get")
                        .action(ArgAction::Append)
                        .value_name("KEY")
                        .help("Read an entry, addressed as section.key"),
                )
                .arg(
                    Arg::new("set")
                        .long("set")
                        .action(ArgAction::Append)
                        .value_name("KEY=VALUE")
                        .help("Write an entry; an empty value unsets it"),
                ),
        )
        .subcommand(
            Command::new(INSTALL_CMD)
                .about("Install a command into the workspace bin directory")
                .arg(
                    Arg::new("list")
                        .long("list")
                        .action(ArgAction::SetTrue)
                        .help("List installable commands"),
                )
                .arg(Arg::new("name").value_name("NAME").num_args(0..)),
        )
        .subcommand(
            Command::new(UPDATE_CMD)
                .about("Update command sources and loaded plugins")
                .arg(
                    Arg::new("all")
                        .long("all")
                        .action(ArgAction::SetTrue)
                        .help("Rebuild every plugin now instead of marking them stale"),
                ),
        )
        .subcommand(
            Command::new(COMPLETION_CMD)
                .about("Generate a shell completion script")
                .arg(
                    Arg::new("shell")
                        .value_name("SHELL")
                        .required(true)
                        .value_parser(value_parser!(clap_complete::Shell)),
                ),
        )
        .subcommand(
            Command::new(EXEC_SUBCOMMAND)
                .about("Execute a plugin manifest file")
                .hide(true)
                .disable_help_flag(true)
                .arg(Arg::new("manifest").value_name("MANIFEST"))
                .arg(
                    Arg::new("args")
                        .value_name("ARGS")
                        .num_args(0..)
                        .trailing_var_arg(true)
                        .allow_hyphen_values(true),
                ),
        )
        .subcommand(
            Command::new(DAEMON_CMD)
                .about("Run the background update worker")
                .hide(true),
        )
        .subcommand(
            Command::new(COMPLETE_CMD)
                .about("Resolve dynamic completion candidates")
                .hide(true)
                .disable_help_flag(true)
                .arg(
                    Arg::new("args")
                        .value_name("ARGS")
                        .num_args(0..)
                        .trailing_var_arg(true)
                        .allow_hyphen_values(true),
                ),
        )
}

impl App {
    pub(crate) fn handle_config(&self, matches: &ArgMatches) -> Result<()> {
        if matches.get_flag("list") {
            for item in self.configurator.list_used()? {
                println!("{}={}", item.key, item.value);
            }
            return Ok(());
        }
        let getters: Vec<&String> = matches
            .get_many::<String>("get")
            .map(|v| v.collect())
            .unwrap_or_default();
        if !getters.is_empty() {
            let value_only = getters.len() == 1;
            for getter in getters {
                let value = self
                    .configurator
                    .get(getter)
                    .map_err(|e| errs::with_kind(ErrorKind::ParamInvalid, e))?;
                if value_only {
                    println!("{value}");
                } else {
                    println!("{getter}={value}");
                }
            }
            return Ok(());
        }
        let setters: Vec<&String> = matches
            .get_many::<String>("set")
            .map(|v| v.collect())
            .unwrap_or_default();
        if !setters.is_empty() {
            for setter in setters {
                let (key, value) = setter.split_once('=').ok_or_else(|| {
                    errs::new_error(
                        ErrorKind::ParamInvalid,
                        format!("expected KEY=VALUE, got: {setter}"),
                    )
                })?;
                self.configurator
                    .set(key, value)
                    .with_context(|| format!("set config {setter} failed"))
                    .map_err(|e| errs::ensure_kind(ErrorKind::ParamInvalid, e))?;
            }
            return Ok(());
        }
        // No selector: show what can be configured.
        for item in self.configurator.list_usable() {
            println!("{}={}\t# {}", item.key, item.value, item.comment);
        }
        Ok(())
    }

    pub(crate) fn handle_install(&self, matches: &ArgMatches) -> Result<()> {
        let commands = self.installable_list()?;
        if matches.get_flag("list") {
            if commands.is_empty() {
                print_info("INFO", "no command is installable from the current sources");
                return Ok(());
            }
            print_status(
                "TIP",
                &format!(
                    "install with: {} install <name>",
                    self.options.name
                ),
            );
            for (i, node) in commands.iter().enumerate() {
                let plugin = node.plugin.as_ref().expect("leaf carries a plugin");
                print_status(
                    "ITEM",
                    &format!(
                        "{}. name: {}, version: {}, manifest: {}",
                        i + 1,
                        plugin.name(),
                        plugin.version(),
                        node.abs_path.display()
                    ),
                );
            }
            return Ok(());
        }
        let names: Vec<&String> = matches
            .get_many::<String>("name")
            .map(|v| v.collect())
            .unwrap_or_default();
        if names.is_empty() {
            print_info("WARN", "provide the name of a command to install");
            return Ok(());
        }
        for name in names {
            self.install_command(&commands, name)?;
        }
        Ok(())
    }

    fn install_command(&self, commands: &[Node], name: &str) -> Result<()> {
        let Some(node) = commands
            .iter()
            .find(|node| node.plugin.as_ref().is_some_and(|p| p.name() == name))
        else {
            print_info("WARN", &format!("[{name}] not found, check the name"));
            return Ok(());
        };
        print_status("INSTALL", &format!("installing {name}..."));
        let resolver = self.resolver(false);
        let mut plugin = resolver.resolve_path(&node.abs_path)?;
        plugin.load(LoadOpts::default())?;
        let command = format!(
            "{} {EXEC_SUBCOMMAND} \"{}\"",
            self.options.name,
            plugin.context().path.display()
        );
        let shim = linker::create(
            name,
            &self.layout.bin_path,
            &command,
            LinkOptions::override_always(),
        )?;
        print_success("OK", &format!("{name} installed at {}", shim.display()));
        Ok(())
    }

    fn installable_list(&self) -> Result<Vec<Node>> {
        let nodes = self.list_nodes_in(&self.options.install_dir, false)?;
        Ok(nodes
            .into_iter()
            .flat_map(Node::into_leaves)
            .filter(|node| node.plugin.is_some())
            .collect())
    }

    pub(crate) fn handle_update(&self, matches: &ArgMatches) -> Result<()> {
        // The application updates itself first; when a newer build lands,
        // the rest of the update runs under it.
        match self.self_update() {
            Ok(Some(exec_path)) => {
                print_success("OK", "a new build is installed, handing over to it");
                return self.reload(&exec_path);
            }
            Ok(None) => {}
            Err(e) => print_info("WARN", &format!("self-update skipped: {e:#}")),
        }
        let all = matches.get_flag("all");
        print_status("UPDATE", "refreshing command sources...");
        let nodes = self.list_nodes(true)?;
        let mut updated = 0usize;
        for node in nodes {
            for mut leaf in node.into_leaves() {
                let Some(plugin) = leaf.plugin.as_mut() else {
                    continue;
                };
                plugin
                    .update(UpdateOpts { lazy: !all })
                    .with_context(|| format!("update command {} failed", leaf.full_name))?;
                updated += 1;
            }
        }
        print_success("OK", &format!("{updated} command(s) up to date"));
        Ok(())
    }

    pub(crate) fn handle_completion(&self, matches: &ArgMatches) -> Result<()> {
        let shell = *matches
            .get_one::<clap_complete::Shell>("shell")
            .expect("shell is required");
        let mut root = root_command(&self.options);
        let name = self.options.name.clone();
        clap_complete::generate(shell, &mut root, name, &mut std::io::stdout());
        Ok(())
    }

    pub(crate) fn handle_exec(&self, matches: &ArgMatches) -> Result<()> {
        let Some(manifest) = matches.get_one::<String>("manifest") else {
            print_info("WARN", "provide a plugin manifest file to execute");
            return Ok(());
        };
        let args = crate::tree::forwarded_args(matches);
        let resolver = self.resolver(false);
        let mut plugin = resolver.resolve_path(Path::new(manifest))?;
        plugin.load(LoadOpts::default())?;
        plugin.execute(&ExecOpts {
            args,
            envs: Vec::new(),
        })
    }

    /// The worker entry: acquires the singleton slot directly and runs the
    /// periodic update job. No supervisor re-exec happens here.
    pub(crate) fn handle_daemon(&self) -> Result<()> {
        match self.daemon_supervisor().acquire()? {
            StartOutcome::AlreadyRunning(record) => {
                info!(pid = record.pid, "a worker of this version is already running");
                Ok(())
            }
            StartOutcome::Worker(guard) => self.daemon_loop(guard),
            StartOutcome::Spawned(_) => Ok(()),
        }
    }

    fn daemon_loop(&self, guard: WorkerGuard) -> Result<()> {
        info!(
            pid = guard.record().pid,
            version = %guard.record().version,
            "daemon worker started"
        );
        loop {
            if let Err(e) = self.daemon_tick() {
                warn!(error = format!("{e:#}"), "periodic update failed");
            }
            std::thread::sleep(DAEMON_INTERVAL);
        }
    }

    fn daemon_tick(&self) -> Result<()> {
        if !self.configurator.load().update.always {
            debug!("automatic updates are disabled, skipping this tick");
            return Ok(());
        }
        // The worker only stages a new build; the version-change takeover
        // replaces this process on the next spawn.
        if let Err(e) = self.self_update() {
            debug!(error = format!("{e:#}"), "self-update unavailable");
        }
        info!("refreshing command sources");
        let nodes = self.list_nodes(true)?;
        for node in nodes {
            for mut leaf in node.into_leaves() {
                if let Some(plugin) = leaf.plugin.as_mut() {
                    plugin.update(UpdateOpts { lazy: true })?;
                }
            }
        }
        Ok(())
    }

    // Replaces the running binary with the mirror's latest build: verify
    // the advertised checksum, stage the file under a sha-keyed resource
    // directory and relink the workspace bin entry.
    fn self_update(&self) -> Result<Option<PathBuf>> {
        if !self.options.mirror.is_configured() {
            return Ok(None);
        }
        if std::env::var(UPDATE_SELF_ENV).map(|v| v == "false").unwrap_or(false) {
            return Ok(None);
        }
        let info = crate::mirror::latest(&self.options.mirror)?;
        let exe = std::env::current_exe().context("failed to resolve the current executable")?;
        if sha256_file(&exe)? == info.sha256 {
            debug!("already running the newest build");
            return Ok(None);
        }
        print_status(
            "UPDATE",
            &format!(
                "found a build created {} ({}), downloading...",
                info.created_date, info.size
            ),
        );
        let staging = std::env::temp_dir().join(format!("{}-update-{}", self.options.name, uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&staging)
            .with_context(|| format!("failed to create {}", staging.display()))?;
        let downloaded = fetcher::download(&info.url, &staging)?;
        let sum = sha256_file(&downloaded)?;
        if sum != info.sha256 {
            let _ = std::fs::remove_dir_all(&staging);
            return Err(anyhow::anyhow!(
                "checksum mismatch for {}: got {sum}, want {}",
                info.name,
                info.sha256
            ));
        }
        let target_dir = self.layout.resource_root_path.join(&info.sha256);
        std::fs::create_dir_all(&target_dir)
            .with_context(|| format!("failed to create {}", target_dir.display()))?;
        let target = target_dir.join(&info.name);
        std::fs::copy(&downloaded, &target)
            .with_context(|| format!("failed to stage {}", target.display()))?;
        let _ = std::fs::remove_dir_all(&staging);
        grant_execute(&target)?;
        linker::create(
            &self.options.name,
            &self.layout.bin_path,
            &target.display().to_string(),
            LinkOptions::override_always(),
        )?;
        clear_stale_builds(&self.layout.resource_root_path, &info.sha256);
        Ok(Some(target))
    }

    // Finishes the invocation under the new build, guarding against a
    // second self-update.
    fn reload(&self, exec_path: &Path) -> Result<()> {
        let mut env: Vec<(String, String)> = std::env::vars()
            .filter(|(key, _)| key != UPDATE_SELF_ENV)
            .collect();
        env.push((UPDATE_SELF_ENV.to_string(), "false".to_string()));
        self.executor.run_params_inherit(executor::Params {
            name: exec_path.display().to_string(),
            args: std::env::args().skip(1).collect(),
            env,
            ..executor::Params::default()
        })
    }

    /// Dynamic completion: descends the node tree along the typed words
    /// and prints the candidates at that level, tab-separated from their
    /// descriptions.
    pub(crate) fn handle_complete(&self, matches: &ArgMatches) -> Result<()> {
        let words = crate::tree::forwarded_args(matches);
        let Ok(nodes) = self.list_nodes(false) else {
            return Ok(());
        };
        let mut current = &nodes;
        let mut partial = "";
        for (i, word) in words.iter().enumerate() {
            match current
                .iter()
                .find(|node| !node.is_leaf && node.name == *word)
            {
                Some(node) => current = &node.children,
                None => {
                    if i == words.len() - 1 {
                        partial = word.as_str();
                        break;
                    }
                    return Ok(());
                }
            }
        }
        for node in current {
            if node.name.starts_with(partial) {
                println!("{}\t{}", node.name, node.desc);
            }
        }
        Ok(())
    }
}
