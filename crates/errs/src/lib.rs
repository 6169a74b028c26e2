//! Error kinds and process exit codes shared across the workspace.
//!
//! Failures are classified into a small set of stable kinds so the binary
//! can map any error chain to a deterministic exit code. A plugin's own
//! exit status always wins over the kind table.

use std::fmt;

use thiserror::Error;

/// Stable failure categories, each with an associated process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ErrorKind {
    #[error("child process timed out")]
    ExecTimeout,
    #[error("executable file not found in PATH")]
    PathLookup,
    #[error("invalid command line parameters")]
    ParamInvalid,
    #[error("runtime configuration is not ready")]
    RuntimeNotReady,
    #[error("file operation failed")]
    FileOp,
    #[error("failed to open repository")]
    RepoOpen,
    #[error("failed to clone repository")]
    RepoClone,
    #[error("failed to pull repository")]
    RepoPull,
    #[error("directory walk failed")]
    WalkFail,
    #[error("plugin load failed")]
    PluginLoad,
    #[error("plugin environment is not ready")]
    PluginEnvNotReady,
    #[error("plugin execution failed")]
    PluginExec,
    #[error("plugin argument parsing failed")]
    PluginArgsParse,
    #[error("no shell terminal available")]
    ShellTerminalMissing,
    #[error("unsupported plugin protocol")]
    UnsupportedPlugin,
    #[error("not found")]
    NotFound,
}

impl ErrorKind {
    /// Process exit code for this kind. Kinds with no reserved slot map to
    /// the generic failure code.
    pub fn code(self) -> i32 {
        match self {
            ErrorKind::ParamInvalid => 63,
            ErrorKind::RuntimeNotReady => 64,
            ErrorKind::FileOp => 65,
            ErrorKind::RepoOpen => 70,
            ErrorKind::RepoClone => 71,
            ErrorKind::RepoPull => 72,
            ErrorKind::WalkFail => 80,
            ErrorKind::PluginLoad => 81,
            ErrorKind::PluginEnvNotReady => 82,
            ErrorKind::PluginExec => 83,
            ErrorKind::PluginArgsParse => 84,
            ErrorKind::ShellTerminalMissing => 85,
            ErrorKind::ExecTimeout
            | ErrorKind::PathLookup
            | ErrorKind::UnsupportedPlugin
            | ErrorKind::NotFound => 1,
        }
    }
}

/// An error annotated with an [`ErrorKind`], attachable to an `anyhow` chain.
#[derive(Debug)]
pub struct ProcessError {
    kind: ErrorKind,
    source: anyhow::Error,
}

impl ProcessError {
    pub fn new(kind: ErrorKind, source: anyhow::Error) -> Self {
        Self { kind, source }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind.code(), self.source)
    }
}

impl std::error::Error for ProcessError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// Marks the exit status of a child process. When present in an error chain
/// it takes precedence over every kind code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("child process exited with code {0}")]
pub struct ChildExit(pub i32);

/// Wraps `err` with a kind, keeping the original chain intact.
pub fn with_kind(kind: ErrorKind, err: anyhow::Error) -> anyhow::Error {
    anyhow::Error::new(ProcessError::new(kind, err))
}

/// Shorthand for a kinded error built from a message.
pub fn new_error(kind: ErrorKind, msg: impl fmt::Display) -> anyhow::Error {
    with_kind(kind, anyhow::anyhow!("{msg}"))
}

/// Attaches `kind` only when the chain carries neither a kind nor a child
/// exit status, so a more specific classification is never shadowed.
pub fn ensure_kind(kind: ErrorKind, err: anyhow::Error) -> anyhow::Error {
    let has_child = err
        .chain()
        .any(|cause| cause.downcast_ref::<ChildExit>().is_some());
    if has_child || kind_of(&err).is_some() {
        return err;
    }
    with_kind(kind, err)
}

/// The outermost [`ErrorKind`] attached to the chain, if any.
pub fn kind_of(err: &anyhow::Error) -> Option<ErrorKind> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<ProcessError>())
        .map(ProcessError::kind)
}

/// Resolves the process exit code for an error chain: a child's own exit
/// status first, then the outermost kind, then the generic failure code.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(child) = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<ChildExit>())
    {
        return child.0;
    }
    kind_of(err).map(ErrorKind::code).unwrap_or(1)
}
