//! Background-process supervision.
//!
//! Guarantees at most one background worker per (name, version) pair. The
//! parent path re-execs the current program detached with a sentinel
//! environment variable and the worker's stdio bound to its log file; the
//! sentinel-bearing child acquires a lock file, persists a process record
//! and runs the job. A version change terminates the old worker first.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use executor::{Executor, Params};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, Signal, System};
use tracing::{debug, warn};

pub mod exit;

/// Sentinel set only in supervised children. Must not leak outwards.
pub const DAEMON_FLAG: &str = "_T_DAEMON_FLAG";
const DAEMON_VALUE: &str = "true";

const INFO_EXT: &str = "info";
const LOCK_EXT: &str = "lock";
const LOG_EXT: &str = "log";

const KILL_TIMEOUT: Duration = Duration::from_secs(10);

/// Persisted description of a supervised process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub name: String,
    pub version: String,
    pub args: Vec<String>,
    pub work_dir: PathBuf,
    pub exec_path: PathBuf,
    pub pid: u32,
    pub singleton: bool,
}

/// What `start` resolved to.
pub enum StartOutcome {
    /// A detached worker was spawned; the caller continues as normal.
    Spawned(ProcessRecord),
    /// A live worker already holds the slot; the caller should wind down.
    AlreadyRunning(ProcessRecord),
    /// This process is the worker. Hold the guard for the job's lifetime.
    Worker(WorkerGuard),
}

/// Holds the worker's lock for its lifetime; dropping releases and
/// removes the lock file.
pub struct WorkerGuard {
    record: ProcessRecord,
    lock: Option<File>,
    lock_file: PathBuf,
}

impl WorkerGuard {
    pub fn record(&self) -> &ProcessRecord {
        &self.record
    }
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        if let Some(lock) = self.lock.take() {
            let _ = FileExt::unlock(&lock);
            let _ = fs::remove_file(&self.lock_file);
        }
    }
}

/// Supervises one background process per (name, version).
#[derive(Debug, Clone)]
pub struct Supervisor {
    pub name: String,
    pub version: String,
    /// Arguments for the re-exec'd worker.
    pub args: Vec<String>,
    pub work_dir: PathBuf,
    pub daemon_dir: PathBuf,
    pub singleton: bool,
    pub executor: Executor,
}

impl Supervisor {
    /// Whether the current process is a supervised child.
    pub fn is_daemon() -> bool {
        std::env::var(DAEMON_FLAG).map(|v| v == DAEMON_VALUE).unwrap_or(false)
    }

    /// Parent side: spawns the detached worker (a child calls
    /// [`Supervisor::acquire`] through this too, defensively).
    pub fn start(&self) -> Result<StartOutcome> {
        if Self::is_daemon() {
            return self.acquire();
        }
        self.spawn_detached().map(StartOutcome::Spawned)
    }

    /// Worker side: lock acquisition, takeover and record persistence.
    pub fn acquire(&self) -> Result<StartOutcome> {
        fs::create_dir_all(&self.daemon_dir)
            .with_context(|| format!("failed to create {}", self.daemon_dir.display()))?;
        let record = self.record_for(std::process::id());
        if !self.singleton {
            self.write_record(&record)?;
            return Ok(StartOutcome::Worker(WorkerGuard {
                record,
                lock: None,
                lock_file: self.lock_file(),
            }));
        }
        let lock_file = self.lock_file();
        debug!(lock = %lock_file.display(), "acquiring daemon lock");
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_file)
            .with_context(|| format!("failed to open {}", lock_file.display()))?;
        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(e) if is_contention(&e) => return self.handle_lock_fail(),
            Err(e) => {
                return Err(anyhow::Error::new(e)
                    .context(format!("failed to lock {}", lock_file.display())))
            }
        }
        // Exit signals release the lock file too; normal exits go through
        // the guard's Drop.
        let cleanup_path = lock_file.clone();
        exit::listen(move || {
            let _ = fs::remove_file(&cleanup_path);
        });
        self.handle_takeover(&record)?;
        self.write_record(&record)?;
        Ok(StartOutcome::Worker(WorkerGuard {
            record,
            lock: Some(file),
            lock_file,
        }))
    }

    // The lock failed: a live holder whose executable matches its record
    // means "already running"; anything else is an orphaned lock.
    fn handle_lock_fail(&self) -> Result<StartOutcome> {
        let lock_file = self.lock_file();
        let existing = self.read_record().map_err(|e| {
            warn!(error = %e, "lock is held but its record is unreadable");
            anyhow!("unknown process locked {}", lock_file.display())
        })?;
        if is_running(&existing.exec_path, existing.pid) {
            debug!(pid = existing.pid, "daemon already running");
            return Ok(StartOutcome::AlreadyRunning(existing));
        }
        Err(anyhow!("unknown process locked {}", lock_file.display()))
    }

    // Version takeover: a live worker recorded under another version is
    // terminated before this one proceeds.
    fn handle_takeover(&self, record: &ProcessRecord) -> Result<()> {
        let Ok(existing) = self.read_record() else {
            return Ok(());
        };
        if !is_running(&existing.exec_path, existing.pid) {
            return Ok(());
        }
        if existing.version == record.version {
            debug!(pid = existing.pid, "a worker of the same version was recorded");
            return Ok(());
        }
        debug!(
            pid = existing.pid,
            old = existing.version,
            new = record.version,
            "terminating the outdated worker"
        );
        kill_with_timeout(existing.pid, KILL_TIMEOUT);
        Ok(())
    }

    fn spawn_detached(&self) -> Result<ProcessRecord> {
        fs::create_dir_all(&self.daemon_dir)
            .with_context(|| format!("failed to create {}", self.daemon_dir.display()))?;
        let exec_path =
            std::env::current_exe().context("failed to resolve the current executable")?;
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_file())
            .with_context(|| format!("failed to open {}", self.log_file().display()))?;
        let mut env: Vec<(String, String)> = std::env::vars().collect();
        env.retain(|(key, _)| key != DAEMON_FLAG);
        env.push((DAEMON_FLAG.to_string(), DAEMON_VALUE.to_string()));
        let pid = self.executor.run_params_async(Params {
            name: exec_path.display().to_string(),
            args: self.args.clone(),
            pwd: Some(self.work_dir.clone()),
            env,
            stdout: Some(Stdio::from(log.try_clone().context("failed to clone the log handle")?)),
            stderr: Some(Stdio::from(log)),
            ..Params::default()
        })?;
        debug!(pid, name = %self.name, "spawned detached worker");
        Ok(self.record_with(pid, exec_path))
    }

    fn record_for(&self, pid: u32) -> ProcessRecord {
        let exec_path = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("unknown"));
        self.record_with(pid, exec_path)
    }

    fn record_with(&self, pid: u32, exec_path: PathBuf) -> ProcessRecord {
        ProcessRecord {
            name: self.name.clone(),
            version: self.version.clone(),
            args: self.args.clone(),
            work_dir: self.work_dir.clone(),
            exec_path,
            pid,
            singleton: self.singleton,
        }
    }

    fn write_record(&self, record: &ProcessRecord) -> Result<()> {
        let data = serde_json::to_vec(record).context("marshal process record failed")?;
        fs::write(self.info_file(), data)
            .with_context(|| format!("failed to write {}", self.info_file().display()))
    }

    fn read_record(&self) -> Result<ProcessRecord> {
        let data = fs::read(self.info_file())
            .with_context(|| format!("failed to read {}", self.info_file().display()))?;
        serde_json::from_slice(&data).context("unmarshal process record failed")
    }

    pub fn info_file(&self) -> PathBuf {
        self.daemon_dir.join(format!("{}.{INFO_EXT}", self.name))
    }

    // The version rides in the lock name so outdated workers never shadow
    // newer ones.
    pub fn lock_file(&self) -> PathBuf {
        if self.version.is_empty() {
            return self.daemon_dir.join(format!("{}.{LOCK_EXT}", self.name));
        }
        self.daemon_dir
            .join(format!("{}.{}.{LOCK_EXT}", self.name, self.version))
    }

    pub fn log_file(&self) -> PathBuf {
        self.daemon_dir.join(format!("{}.{LOG_EXT}", self.name))
    }
}

fn is_contention(e: &std::io::Error) -> bool {
    e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

// Pids recycle, so liveness pairs the pid with the recorded executable
// name before trusting it.
fn is_running(exec_path: &Path, pid: u32) -> bool {
    let sys = System::new_all();
    let Some(process) = sys.process(Pid::from_u32(pid)) else {
        return false;
    };
    let name = process.name().to_string_lossy().into_owned();
    exec_path.to_string_lossy().ends_with(&name)
}

fn kill_with_timeout(pid: u32, timeout: Duration) {
    let sys = System::new_all();
    let Some(process) = sys.process(Pid::from_u32(pid)) else {
        return;
    };
    if process.kill_with(Signal::Term).is_none() {
        process.kill();
    }
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        let sys = System::new_all();
        match sys.process(Pid::from_u32(pid)) {
            Some(_) => std::thread::sleep(Duration::from_millis(200)),
            None => return,
        }
    }
    if let Some(process) = System::new_all().process(Pid::from_u32(pid)) {
        process.kill();
    }
}
