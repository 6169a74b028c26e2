//! The manifest-backed plugin: idempotent loading and execution.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use errs::ErrorKind;
use executor::{quote_commands, Params};
use linker::LinkOptions;
use serde::{Deserialize, Serialize};
use tracing::debug;
use vcs::GitRepo;

use crate::platform;
use crate::resolver::Resolver;
use crate::schema::{
    DependentPlugin, PlatformMap, PluginSchema, ResourceArchive, ResourceMirror, ResourceRepo,
};
use crate::template;
use crate::EXEC_SUBCOMMAND;

/// Proxy settings are stripped from plugin environments so plugin
/// networking cannot be hijacked by user proxies.
const UNSET_ENVS: &[&str] = &["http_proxy", "https_proxy", "all_proxy", "no_proxy"];

/// Coordinates derived for a resolved manifest.
#[derive(Debug, Clone)]
pub struct PluginContext {
    /// Absolute manifest path.
    pub path: PathBuf,
    /// SHA-256 of the manifest bytes.
    pub sum: String,
    /// Per-plugin directory under the plugin root.
    pub workspace: PathBuf,
    /// Repository root (or directory) containing the manifest.
    pub command_source_path: PathBuf,
    pub bin_path: PathBuf,
    pub resource_path: PathBuf,
    pub load_file: PathBuf,
}

/// Marker persisted at the workspace's load file. A matching sum certifies
/// that every declared resource and dependency shim is on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadRecord {
    pub sum: String,
    pub load_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct ExecOpts {
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOpts {
    pub update: bool,
    /// Defer transitive loads: dependencies are linked but not loaded.
    pub lazy: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct UpdateOpts {
    pub lazy: bool,
}

impl Default for UpdateOpts {
    fn default() -> Self {
        Self { lazy: true }
    }
}

/// A plugin backed by a YAML/JSON manifest.
pub struct MixedPlugin {
    ctx: PluginContext,
    schema: PluginSchema,
    load_record: Option<LoadRecord>,
    resolver: Resolver,
}

impl MixedPlugin {
    pub(crate) fn new(
        ctx: PluginContext,
        schema: PluginSchema,
        load_record: Option<LoadRecord>,
        resolver: Resolver,
    ) -> Self {
        Self {
            ctx,
            schema,
            load_record,
            resolver,
        }
    }

    pub fn name(&self) -> String {
        if !self.schema.name.is_empty() {
            return self.schema.name.clone();
        }
        self.ctx
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn desc(&self) -> String {
        self.schema.desc.clone()
    }

    pub fn version(&self) -> String {
        if !self.schema.version.is_empty() {
            return self.schema.version.clone();
        }
        "latest".to_string()
    }

    pub fn context(&self) -> &PluginContext {
        &self.ctx
    }

    pub fn schema(&self) -> &PluginSchema {
        &self.schema
    }

    /// Whether the on-disk load record certifies the current manifest.
    pub fn is_loaded(&self) -> bool {
        self.load_record
            .as_ref()
            .map(|record| record.sum == self.ctx.sum)
            .unwrap_or(false)
    }

    /// Loads the plugin workspace: pre_load, dependencies, resources,
    /// post_load, then the load record. Content-addressed and idempotent:
    /// a record matching the manifest sum short-circuits the whole thing.
    pub fn load(&mut self, opts: LoadOpts) -> Result<()> {
        self.load_inner(opts)
            .map_err(|e| errs::ensure_kind(ErrorKind::PluginLoad, e))
    }

    fn load_inner(&mut self, opts: LoadOpts) -> Result<()> {
        if self.is_loaded() {
            debug!(plugin = %self.name(), "already loaded, skipping");
            return Ok(());
        }
        let dependents = self
            .schema
            .dependency
            .as_ref()
            .map(|d| d.plugins.clone())
            .unwrap_or_default();
        // Validate references up front: a rejected manifest must not touch
        // the workspace.
        for dp in &dependents {
            check_dependent_plugin(dp)?;
        }
        debug!(plugin = %self.name(), workspace = %self.ctx.workspace.display(), "loading");
        if self.ctx.workspace.exists() {
            fs::remove_dir_all(&self.ctx.workspace).map_err(|e| {
                errs::with_kind(
                    ErrorKind::FileOp,
                    anyhow::Error::new(e).context(format!(
                        "remove plugin workspace [{}] failed",
                        self.ctx.workspace.display()
                    )),
                )
            })?;
        }
        fs::create_dir_all(&self.ctx.workspace).map_err(|e| {
            errs::with_kind(
                ErrorKind::FileOp,
                anyhow::Error::new(e).context(format!(
                    "create plugin workspace [{}] failed",
                    self.ctx.workspace.display()
                )),
            )
        })?;
        self.exec_map(&self.schema.pre_load, &[], &[])
            .context("the plugin cannot be preloaded")?;
        self.load_dependencies(&dependents, opts)?;
        self.load_resources()?;
        self.exec_map(&self.schema.post_load, &[], &[])
            .context("the plugin cannot be postloaded")?;
        self.write_load_record()
    }

    /// Runs the plugin: pre_run, the entry command with quoted args
    /// appended, post_run. A non-zero entry aborts post_run and surfaces
    /// the child's exit code.
    pub fn execute(&self, opts: &ExecOpts) -> Result<()> {
        self.execute_inner(opts)
            .map_err(|e| errs::ensure_kind(ErrorKind::PluginExec, e))
    }

    fn execute_inner(&self, opts: &ExecOpts) -> Result<()> {
        let envs = self.invocation_env(&opts.envs);
        self.exec_map(&self.schema.pre_run, &[], &envs)
            .context("the plugin cannot be pre-run")?;
        if let Some(enter) = &self.schema.enter {
            self.exec_map(&enter.command, &opts.args, &envs)?;
        }
        self.exec_map(&self.schema.post_run, &[], &envs)
            .context("the plugin cannot be post-run")?;
        Ok(())
    }

    /// Marks the plugin stale so the next load rebuilds; a non-lazy update
    /// rebuilds immediately.
    pub fn update(&mut self, opts: UpdateOpts) -> Result<()> {
        if self.ctx.load_file.exists() {
            fs::remove_file(&self.ctx.load_file).map_err(|e| {
                errs::with_kind(
                    ErrorKind::FileOp,
                    anyhow::Error::new(e).context(format!(
                        "remove load record [{}] failed",
                        self.ctx.load_file.display()
                    )),
                )
            })?;
        }
        self.load_record = None;
        if opts.lazy {
            return Ok(());
        }
        self.load(LoadOpts {
            update: true,
            lazy: false,
        })
    }

    fn exec_map(&self, map: &PlatformMap, args: &[String], envs: &[(String, String)]) -> Result<()> {
        let Some(command) = platform::select(map) else {
            return Ok(());
        };
        let mut command = template::render(&self.ctx, &self.version(), command);
        if !args.is_empty() {
            command.push(' ');
            command.push_str(&quote_commands(args));
        }
        debug!(plugin = %self.name(), %command, "running manifest command");
        self.resolver.executor.run_params_inherit(Params {
            shell: command,
            env: envs.to_vec(),
            ..Params::default()
        })
    }

    fn load_dependencies(&mut self, dependents: &[DependentPlugin], opts: LoadOpts) -> Result<()> {
        for dp in dependents {
            self.load_dependent_plugin(dp, opts)
                .with_context(|| format!("load dependent plugin {} failed", dp.name()))?;
        }
        Ok(())
    }

    fn load_dependent_plugin(&mut self, dp: &DependentPlugin, opts: LoadOpts) -> Result<()> {
        let mut dependent = self.resolve_dependent_plugin(dp)?;
        // Unless lazily loading, the dependency materializes right now.
        if !opts.lazy {
            dependent.load(opts)?;
        }
        let command = format!(
            "{} {EXEC_SUBCOMMAND} \"{}\"",
            self.resolver.app_name,
            dependent.context().path.display()
        );
        linker::create(
            &dp.name(),
            &self.ctx.bin_path,
            &command,
            LinkOptions::override_always(),
        )?;
        Ok(())
    }

    fn resolve_dependent_plugin(&self, dp: &DependentPlugin) -> Result<MixedPlugin> {
        if !dp.file.is_empty() {
            // In-tree references always live under the command source path.
            return self
                .resolver
                .resolve_path(self.ctx.command_source_path.join(&dp.file));
        }
        let repo_file = dp.repo_file.as_ref().expect("validated reference");
        self.resolver
            .resolve_repo_file(&repo_file.url, &repo_file.reference, &repo_file.file)
    }

    fn load_resources(&self) -> Result<()> {
        let Some(resource) = &self.schema.resource else {
            return Ok(());
        };
        for mirror in &resource.mirrors {
            self.load_resource_mirror(mirror)
                .context("load mirror resource failed")?;
        }
        for archive in &resource.archives {
            self.load_resource_archive(archive)
                .context("load archive resource failed")?;
        }
        for repo in &resource.repos {
            self.load_resource_repo(repo)
                .context("load repository resource failed")?;
        }
        Ok(())
    }

    fn load_resource_mirror(&self, mirror: &ResourceMirror) -> Result<()> {
        let url = self.select_resource_url(&mirror.url)?;
        let to = self.resource_target(&mirror.path);
        fs::create_dir_all(&to)
            .with_context(|| format!("failed to create {}", to.display()))?;
        fetcher::download(&url, &to)?;
        Ok(())
    }

    fn load_resource_archive(&self, archive: &ResourceArchive) -> Result<()> {
        let url = self.select_resource_url(&archive.url)?;
        let tmp = tempfile::tempdir().context("failed to create a staging directory")?;
        let downloaded = fetcher::download(&url, tmp.path())?;
        let to = self.resource_target(&archive.path);
        fetcher::unpack(&downloaded, &to, archive.retain_top_folder)
    }

    fn load_resource_repo(&self, repo: &ResourceRepo) -> Result<()> {
        let url = self.select_resource_url(&repo.url)?;
        let to = self.resource_target(&repo.path);
        let mut handle = GitRepo::open_at(&to)?;
        if let (Some(user), Some(password)) =
            (&self.resolver.cache.user, &self.resolver.cache.password)
        {
            handle.auth(user.clone(), password.clone());
        }
        handle.clone_from(&url)?;
        if !repo.reference.is_empty() {
            handle.checkout(&repo.reference)?;
        }
        Ok(())
    }

    fn resource_target(&self, path: &str) -> PathBuf {
        if path.is_empty() {
            return self.ctx.resource_path.clone();
        }
        self.ctx.resource_path.join(path)
    }

    fn select_resource_url(&self, map: &PlatformMap) -> Result<String> {
        let Some(url) = platform::select(map) else {
            return Err(errs::new_error(
                ErrorKind::PluginLoad,
                format!(
                    "no resource is valid for the current system: {}.{}",
                    platform::host_os(),
                    platform::host_arch()
                ),
            ));
        };
        Ok(template::render(&self.ctx, &self.version(), url))
    }

    fn write_load_record(&mut self) -> Result<()> {
        let record = LoadRecord {
            sum: self.ctx.sum.clone(),
            load_time: Utc::now(),
        };
        let data = serde_json::to_vec(&record).context("marshal load record failed")?;
        fs::write(&self.ctx.load_file, data).map_err(|e| {
            errs::with_kind(
                ErrorKind::FileOp,
                anyhow::Error::new(e).context(format!(
                    "write load record to {} failed",
                    self.ctx.load_file.display()
                )),
            )
        })?;
        self.load_record = Some(record);
        Ok(())
    }

    /// The environment the plugin's commands run with: the parent
    /// environment minus proxy settings, PATH prefixed with the tool and
    /// plugin bin directories, the invocation description keys, then the
    /// caller's overrides.
    fn invocation_env(&self, overrides: &[(String, String)]) -> Vec<(String, String)> {
        let mut envs: Vec<(String, String)> = std::env::vars()
            .filter(|(key, _)| !UNSET_ENVS.contains(&key.as_str()))
            .collect();

        let mut bin_dirs = Vec::new();
        if let Ok(exe) = std::env::current_exe() {
            if let Some(dir) = exe.parent() {
                bin_dirs.push(dir.to_path_buf());
            }
        }
        bin_dirs.push(self.ctx.bin_path.clone());
        bin_dirs.push(self.resolver.app_bin_path.clone());
        let current = envs
            .iter()
            .find(|(key, _)| key == "PATH")
            .map(|(_, value)| value.clone())
            .unwrap_or_default();
        set_env(&mut envs, "PATH", &prepend_paths(&bin_dirs, &current));

        let prefix = env_prefix(&self.resolver.app_name);
        set_env(&mut envs, &format!("{prefix}_VERSION"), &self.resolver.app_version);
        set_env(&mut envs, &format!("{prefix}_PLUGIN_NAME"), &self.name());
        set_env(
            &mut envs,
            &format!("{prefix}_PLUGIN_WORKSPACE"),
            &self.ctx.workspace.display().to_string(),
        );
        set_env(
            &mut envs,
            &format!("{prefix}_COMMAND_SOURCE_PATH"),
            &self.ctx.command_source_path.display().to_string(),
        );
        for (key, value) in overrides {
            set_env(&mut envs, key, value);
        }
        envs
    }
}

pub(crate) fn check_dependent_plugin(dp: &DependentPlugin) -> Result<()> {
    let repo_ok = dp
        .repo_file
        .as_ref()
        .map(|r| !r.url.is_empty() && !r.file.is_empty())
        .unwrap_or(false);
    if dp.file.is_empty() && !repo_ok {
        return Err(errs::new_error(
            ErrorKind::PluginLoad,
            "one of <plugins.file> and <plugins.repo_file.{url, file}> must be set",
        ));
    }
    check_real_file(dp.filepath())
}

pub(crate) fn check_real_file(file: &str) -> Result<()> {
    if Path::new(file).is_absolute() {
        return Err(errs::new_error(
            ErrorKind::PluginLoad,
            format!("absolute path {file} is not allowed"),
        ));
    }
    if file.starts_with("..") {
        return Err(errs::new_error(
            ErrorKind::PluginLoad,
            format!("path {file} outside the command source path is not allowed"),
        ));
    }
    Ok(())
}

pub(crate) fn read_load_record(load_file: &Path) -> Result<Option<LoadRecord>> {
    if !load_file.exists() {
        return Ok(None);
    }
    let data = fs::read(load_file)
        .with_context(|| format!("read load record {} failed", load_file.display()))?;
    let record = serde_json::from_slice(&data)
        .with_context(|| format!("unmarshal load record {} failed", load_file.display()))?;
    Ok(Some(record))
}

fn set_env(envs: &mut Vec<(String, String)>, key: &str, value: &str) {
    if let Some(entry) = envs.iter_mut().find(|(k, _)| k == key) {
        entry.1 = value.to_string();
        return;
    }
    envs.push((key.to_string(), value.to_string()));
}

fn env_prefix(app_name: &str) -> String {
    app_name.to_uppercase().replace('-', "_")
}

// Prefixed directories win over the inherited PATH; duplicates collapse.
fn prepend_paths(dirs: &[PathBuf], current: &str) -> String {
    let separator = if cfg!(windows) { ';' } else { ':' };
    let mut seen = std::collections::HashSet::new();
    let mut parts = Vec::new();
    for dir in dirs {
        let dir = dir.display().to_string();
        if !dir.is_empty() && seen.insert(dir.clone()) {
            parts.push(dir);
        }
    }
    for part in current.split(separator) {
        if !part.is_empty() && seen.insert(part.to_string()) {
            parts.push(part.to_string());
        }
    }
    parts.join(&separator.to_string())
}
