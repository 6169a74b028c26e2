//! The plugin engine.
//!
//! Resolves a manifest file to a typed plugin, materializes its
//! dependencies and external resources idempotently into a per-plugin
//! workspace, and executes the OS/arch-specific entry command with a
//! controlled environment.

mod platform;
mod plugin;
mod resolver;
mod schema;
mod template;

pub use platform::{host_arch, host_os, select};
pub use plugin::{ExecOpts, LoadOpts, LoadRecord, MixedPlugin, PluginContext, UpdateOpts};
pub use resolver::Resolver;
pub use schema::{
    Dependency, DependentPlugin, Enter, PlatformMap, PluginSchema, RepoFile, ResourceArchive,
    ResourceMirror, ResourceRepo, ResourceSet,
};

/// Hidden subcommand dependent-plugin shims re-enter the application with.
pub const EXEC_SUBCOMMAND: &str = "__exec";
