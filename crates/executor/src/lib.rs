//! Subprocess execution primitives.
//!
//! Three operation families, capture ([`Executor::run`]), inherit
//! ([`Executor::run_inherit`]) and detached-async ([`Executor::run_async`]),
//! crossed with three invocation styles: program + argv, a single shell
//! statement, and explicit [`Params`]. A child's non-zero exit surfaces as
//! an [`errs::ChildExit`] in the error chain so the binary can propagate
//! the original exit code.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use errs::ErrorKind;
use tracing::debug;

mod lookup;
mod quote;

pub use lookup::look_paths;
pub use quote::quote_commands;

/// Captured output of a finished child process.
#[derive(Debug, Default)]
pub struct Output {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Full parameter set for a child process.
///
/// An empty `name` selects the shell form: `shell` is handed to `bash -c`
/// (falling back to `sh -c`) on POSIX, `cmd /C` on Windows. A non-empty
/// `env` replaces the child environment wholesale; `stdin` bytes are piped
/// in; `stdout`/`stderr` overrides win over the family default.
#[derive(Debug)]
pub struct Params {
    pub name: String,
    pub args: Vec<String>,
    pub shell: String,
    pub pwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub stdin: Option<Vec<u8>>,
    pub stdout: Option<Stdio>,
    pub stderr: Option<Stdio>,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            name: String::new(),
            args: Vec::new(),
            shell: String::new(),
            pwd: None,
            env: Vec::new(),
            stdin: None,
            stdout: None,
            stderr: None,
        }
    }
}

/// Local subprocess executor.
#[derive(Debug, Default, Clone, Copy)]
pub struct Executor;

impl Executor {
    pub fn new() -> Self {
        Self
    }

    /// Runs `name` with `args`, capturing stdout and stderr.
    pub fn run(&self, name: &str, args: &[String]) -> Result<Output> {
        self.run_params(Params {
            name: name.to_string(),
            args: args.to_vec(),
            ..Params::default()
        })
    }

    /// Runs `name` with `args`, streaming to the current stdio.
    pub fn run_inherit(&self, name: &str, args: &[String]) -> Result<()> {
        self.run_params_inherit(Params {
            name: name.to_string(),
            args: args.to_vec(),
            ..Params::default()
        })
    }

    /// Starts `name` with `args` detached from the current session and
    /// returns the child pid. The child outlives the caller.
    pub fn run_async(&self, name: &str, args: &[String]) -> Result<u32> {
        self.run_params_async(Params {
            name: name.to_string(),
            args: args.to_vec(),
            ..Params::default()
        })
    }

    /// Runs a shell statement, capturing stdout and stderr.
    pub fn run_shell(&self, shell: &str) -> Result<Output> {
        self.run_params(Params {
            shell: shell.to_string(),
            ..Params::default()
        })
    }

    /// Runs a shell statement, streaming to the current stdio.
    pub fn run_shell_inherit(&self, shell: &str) -> Result<()> {
        self.run_params_inherit(Params {
            shell: shell.to_string(),
            ..Params::default()
        })
    }

    /// Starts a shell statement detached and returns the child pid.
    pub fn run_shell_async(&self, shell: &str) -> Result<u32> {
        self.run_params_async(Params {
            shell: shell.to_string(),
            ..Params::default()
        })
    }

    /// Runs with explicit [`Params`], capturing stdout and stderr unless
    /// overridden.
    pub fn run_params(&self, params: Params) -> Result<Output> {
        let mut params = handle_params(params)?;
        let has_stdout = params.stdout.is_some();
        let has_stderr = params.stderr.is_some();
        let stdin = params.stdin.clone();
        let mut cmd = build_command(&mut params);
        if !has_stdout {
            cmd.stdout(Stdio::piped());
        }
        if !has_stderr {
            cmd.stderr(Stdio::piped());
        }
        if stdin.is_some() {
            cmd.stdin(Stdio::piped());
        }
        debug!(program = %params.name, "running child process");
        let mut child = cmd
            .spawn()
            .with_context(|| format!("start process [{}] failed", params.name))?;
        feed_stdin(&mut child, stdin.as_deref())?;
        let output = child
            .wait_with_output()
            .with_context(|| format!("wait for process [{}] failed", params.name))?;
        if !output.status.success() {
            let code = exit_code(output.status);
            let detail = String::from_utf8_lossy(&output.stderr);
            let detail = detail.trim();
            let err = anyhow::Error::new(errs::ChildExit(code));
            return Err(if detail.is_empty() {
                err
            } else {
                err.context(format!("child process failed: {detail}"))
            });
        }
        Ok(Output {
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    /// Runs with explicit [`Params`], streaming to the current stdio unless
    /// overridden.
    pub fn run_params_inherit(&self, params: Params) -> Result<()> {
        let mut params = handle_params(params)?;
        let stdin = params.stdin.clone();
        let mut cmd = build_command(&mut params);
        if stdin.is_some() {
            cmd.stdin(Stdio::piped());
        }
        debug!(program = %params.name, "running child process with inherited stdio");
        let mut child = cmd
            .spawn()
            .with_context(|| format!("start process [{}] failed", params.name))?;
        feed_stdin(&mut child, stdin.as_deref())?;
        let status = child
            .wait()
            .with_context(|| format!("wait for process [{}] failed", params.name))?;
        check_status(status)
    }

    /// Starts with explicit [`Params`] detached from the current session
    /// and returns the child pid.
    pub fn run_params_async(&self, params: Params) -> Result<u32> {
        let mut params = handle_params(params)?;
        let stdin = params.stdin.clone();
        let mut cmd = build_command(&mut params);
        if stdin.is_some() {
            cmd.stdin(Stdio::piped());
        }
        detach(&mut cmd);
        debug!(program = %params.name, "starting detached child process");
        let mut child = cmd
            .spawn()
            .with_context(|| format!("start process [{}] failed", params.name))?;
        feed_stdin(&mut child, stdin.as_deref())?;
        Ok(child.id())
    }

    /// Same as [`Executor::run_params`] bounded by `timeout`. An overrun
    /// yields [`ErrorKind::ExecTimeout`]; the child is left to the runaway
    /// thread, matching the synchronous time-limit semantics of the
    /// original.
    pub fn run_params_timeout(&self, params: Params, timeout: Duration) -> Result<Output> {
        if timeout.is_zero() {
            return self.run_params(params);
        }
        let (tx, rx) = mpsc::channel();
        let this = *self;
        thread::spawn(move || {
            let _ = tx.send(this.run_params(params));
        });
        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(_) => Err(errs::new_error(
                ErrorKind::ExecTimeout,
                "child process timed out",
            )),
        }
    }
}

/// Resolves the platform shell and its statement flag: `bash -c`, with a
/// fallback to `sh -c`; `cmd /C` on Windows. A missing bash is not an
/// error, a missing sh is.
pub fn select_shell() -> Result<(PathBuf, &'static str)> {
    #[cfg(windows)]
    {
        let cmd = which::which("cmd").map_err(|e| {
            errs::with_kind(ErrorKind::ShellTerminalMissing, anyhow::Error::new(e))
        })?;
        Ok((cmd, "/C"))
    }
    #[cfg(not(windows))]
    {
        if let Ok(bash) = which::which("bash") {
            return Ok((bash, "-c"));
        }
        let sh = which::which("sh").map_err(|e| {
            errs::with_kind(ErrorKind::ShellTerminalMissing, anyhow::Error::new(e))
        })?;
        Ok((sh, "-c"))
    }
}

fn handle_params(mut params: Params) -> Result<Params> {
    if !params.name.is_empty() {
        return Ok(params);
    }
    let (shell, flag) = select_shell()?;
    let statement = std::mem::take(&mut params.shell);
    params.name = shell.to_string_lossy().into_owned();
    params.args = vec![flag.to_string(), statement];
    Ok(params)
}

fn build_command(params: &mut Params) -> Command {
    let mut cmd = Command::new(&params.name);
    cmd.args(&params.args);
    if let Some(pwd) = &params.pwd {
        cmd.current_dir(pwd);
    }
    if !params.env.is_empty() {
        cmd.env_clear();
        cmd.envs(params.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    }
    if let Some(stdout) = params.stdout.take() {
        cmd.stdout(stdout);
    }
    if let Some(stderr) = params.stderr.take() {
        cmd.stderr(stderr);
    }
    cmd
}

fn feed_stdin(child: &mut std::process::Child, stdin: Option<&[u8]>) -> Result<()> {
    if let (Some(bytes), Some(mut pipe)) = (stdin, child.stdin.take()) {
        pipe.write_all(bytes).context("write child stdin failed")?;
    }
    Ok(())
}

fn check_status(status: ExitStatus) -> Result<()> {
    if status.success() {
        return Ok(());
    }
    Err(anyhow::Error::new(errs::ChildExit(exit_code(status))))
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|s| 128 + s))
        .unwrap_or(1)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(1)
}

#[cfg(unix)]
fn detach(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    // New session so the child survives the caller's terminal.
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(windows)]
fn detach(cmd: &mut Command) {
    use std::os::windows::process::CommandExt;
    const DETACHED_PROCESS: u32 = 0x0000_0008;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    cmd.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP | CREATE_NO_WINDOW);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_captures_stdout() {
        let out = Executor::new()
            .run("echo", &["hello".to_string()])
            .unwrap();
        assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "hello");
    }

    #[test]
    fn run_shell_supports_compound_statements() {
        let out = Executor::new().run_shell("echo a && echo b").unwrap();
        let text = String::from_utf8_lossy(&out.stdout);
        assert_eq!(text.lines().collect::<Vec<_>>(), ["a", "b"]);
    }

    #[test]
    fn nonzero_exit_surfaces_the_child_code() {
        let err = Executor::new().run_shell("exit 7").unwrap_err();
        assert_eq!(errs::exit_code(&err), 7);
    }

    #[test]
    fn env_replacement_is_wholesale() {
        let out = Executor::new()
            .run_params(Params {
                shell: "echo $MIXER_TEST_MARKER${HOME:+-inherited}".to_string(),
                env: vec![
                    ("MIXER_TEST_MARKER".to_string(), "isolated".to_string()),
                    ("PATH".to_string(), std::env::var("PATH").unwrap_or_default()),
                ],
                ..Params::default()
            })
            .unwrap();
        assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "isolated");
    }

    #[test]
    fn stdin_bytes_are_piped() {
        let out = Executor::new()
            .run_params(Params {
                name: "cat".to_string(),
                stdin: Some(b"from-stdin".to_vec()),
                ..Params::default()
            })
            .unwrap();
        assert_eq!(String::from_utf8_lossy(&out.stdout), "from-stdin");
    }

    #[test]
    fn pwd_changes_the_child_directory() {
        let tmp = tempfile::TempDir::new().unwrap();
        let out = Executor::new()
            .run_params(Params {
                name: "pwd".to_string(),
                pwd: Some(tmp.path().to_path_buf()),
                ..Params::default()
            })
            .unwrap();
        let printed = String::from_utf8_lossy(&out.stdout);
        let printed = std::path::Path::new(printed.trim());
        assert_eq!(
            printed.canonicalize().unwrap(),
            tmp.path().canonicalize().unwrap()
        );
    }

    #[test]
    fn async_children_report_a_pid() {
        let pid = Executor::new().run_shell_async("sleep 0.1").unwrap();
        assert!(pid > 0);
    }

    #[test]
    fn timeout_kills_long_runs() {
        let err = Executor::new()
            .run_params_timeout(
                Params {
                    shell: "sleep 5".to_string(),
                    ..Params::default()
                },
                Duration::from_millis(100),
            )
            .unwrap_err();
        assert_eq!(errs::kind_of(&err), Some(ErrorKind::ExecTimeout));
    }

    #[test]
    fn shell_selection_prefers_bash() {
        let (shell, flag) = select_shell().unwrap();
        assert!(shell.ends_with("bash") || shell.ends_with("sh"));
        assert_eq!(flag, "-c");
    }
}
