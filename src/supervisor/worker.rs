//! Worker processes and how they are launched.

use crate::errors::{ErrorKind, RuntimeError, RuntimeResult};
use async_trait::async_trait;
use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use tokio::process::{Child, Command};

/// Environment variable marking a process as a supervised worker.
pub const WORKER_ROLE_ENV: &str = "GITHUB_RUNTIME_ROLE";

/// Environment variable carrying the worker's slot number.
pub const WORKER_SLOT_ENV: &str = "GITHUB_RUNTIME_WORKER_SLOT";

/// Lifecycle of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Launch requested, process not yet running.
    Starting,
    /// Process is running.
    Online,
    /// Process has exited.
    Exited,
}

/// The supervisor's record of one worker slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerHandle {
    /// Stable slot index, `0..workers`.
    pub slot: usize,
    /// OS process id once known.
    pub pid: Option<u32>,
    /// Current state.
    pub state: WorkerState,
    /// How many times this slot has been respawned.
    pub restarts: u64,
}

impl WorkerHandle {
    pub(crate) fn starting(slot: usize, restarts: u64) -> Self {
        Self {
            slot,
            pid: None,
            state: WorkerState::Starting,
            restarts,
        }
    }
}

/// How a worker process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExitInfo {
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,
    /// Terminating signal, if any.
    pub signal: Option<i32>,
}

impl ExitInfo {
    /// A normal exit with `code`.
    pub fn code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    /// Termination by `signal`.
    pub fn signal(signal: i32) -> Self {
        Self {
            code: None,
            signal: Some(signal),
        }
    }
}

impl From<ExitStatus> for ExitInfo {
    fn from(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

impl fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |v: Option<i32>| v.map_or_else(|| "none".to_string(), |v| v.to_string());
        write!(f, "code: {}, and signal: {}", show(self.code), show(self.signal))
    }
}

/// A running worker.
#[async_trait]
pub trait WorkerProcess: Send {
    /// OS process id.
    fn pid(&self) -> Option<u32>;

    /// Waits for the process to exit.
    async fn wait(&mut self) -> RuntimeResult<ExitInfo>;

    /// Forcibly terminates the process.
    async fn kill(&mut self) -> RuntimeResult<()>;
}

/// Starts worker processes.
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    /// Launches the worker for `slot`.
    async fn launch(&self, slot: usize) -> RuntimeResult<Box<dyn WorkerProcess>>;
}

/// Launches workers as child OS processes.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ProcessLauncher {
    /// Launches `program` with `args`.
    pub fn new<I, S>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Re-executes the current binary with the current arguments.
    pub fn current_exe() -> RuntimeResult<Self> {
        let program = std::env::current_exe().map_err(|e| {
            RuntimeError::new(ErrorKind::SpawnFailed, "Cannot locate the current executable")
                .with_cause(e)
        })?;
        Ok(Self::new(program, std::env::args_os().skip(1)))
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn launch(&self, slot: usize) -> RuntimeResult<Box<dyn WorkerProcess>> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .env(WORKER_ROLE_ENV, "worker")
            .env(WORKER_SLOT_ENV, slot.to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                RuntimeError::new(
                    ErrorKind::SpawnFailed,
                    format!("Failed to launch worker {} ({})", slot, self.program.display()),
                )
                .with_cause(e)
            })?;

        Ok(Box::new(ChildProcess { child }))
    }
}

/// A worker backed by a tokio child process.
struct ChildProcess {
    child: Child,
}

#[async_trait]
impl WorkerProcess for ChildProcess {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(&mut self) -> RuntimeResult<ExitInfo> {
        self.child.wait().await.map(ExitInfo::from).map_err(|e| {
            RuntimeError::new(ErrorKind::Unknown, "Failed to wait for worker").with_cause(e)
        })
    }

    async fn kill(&mut self) -> RuntimeResult<()> {
        self.child.kill().await.map_err(|e| {
            RuntimeError::new(ErrorKind::Unknown, "Failed to kill worker").with_cause(e)
        })
    }
}
