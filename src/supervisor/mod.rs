//! Worker process supervision.
//!
//! The primary process launches a fixed number of workers and replaces any
//! that exit, according to a [`RestartPolicy`]. There is no terminal state: the
//! loop runs until [`SupervisorHandle::shutdown`] is called or the primary is
//! killed.
//!
//! ```text
//! Starting --launch ok--> Online --process exit--> Exited --policy--> Starting
//! ```
//!
//! Log lines are only emitted when more than one worker is configured.

mod policy;
mod role;
mod worker;

pub use policy::{AlwaysRestart, MaxRestarts, RestartAction, RestartPolicy};
pub use role::{run_cluster, ProcessRole};
pub use worker::{
    ExitInfo, ProcessLauncher, WorkerHandle, WorkerLauncher, WorkerProcess, WorkerState,
    WORKER_ROLE_ENV, WORKER_SLOT_ENV,
};

use crate::config::RuntimeConfig;
use crate::errors::RuntimeResult;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch, RwLock};
use tracing::{error, info, warn};

/// Lifecycle notifications published by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    /// A worker process was launched.
    Forked {
        /// Worker slot.
        slot: usize,
        /// Process id.
        pid: Option<u32>,
    },
    /// A worker is running.
    Online {
        /// Worker slot.
        slot: usize,
        /// Process id.
        pid: Option<u32>,
    },
    /// A worker exited.
    Exited {
        /// Worker slot.
        slot: usize,
        /// Process id.
        pid: Option<u32>,
        /// Exit code and signal.
        exit: ExitInfo,
    },
    /// The slot's worker will be replaced.
    Respawning {
        /// Worker slot.
        slot: usize,
    },
    /// The policy left the slot empty.
    Retired {
        /// Worker slot.
        slot: usize,
    },
}

type ExitHandler = Box<dyn Fn(&WorkerHandle, &ExitInfo) + Send + Sync>;

/// Messages delivered to the supervision loop.
enum Report {
    /// A worker's monitor saw its process end.
    Exited {
        slot: usize,
        result: RuntimeResult<ExitInfo>,
    },
    /// A failed respawn is due for another attempt.
    Relaunch { slot: usize, restarts: u64 },
}

/// Delay before retrying a worker launch that failed after startup.
pub const DEFAULT_RELAUNCH_DELAY: Duration = Duration::from_secs(1);

type WorkerTable = Arc<RwLock<BTreeMap<usize, WorkerHandle>>>;

/// Cloneable control handle for a running supervisor.
#[derive(Clone)]
pub struct SupervisorHandle {
    table: WorkerTable,
    shutdown: Arc<watch::Sender<bool>>,
    events: broadcast::Sender<SupervisorEvent>,
}

impl SupervisorHandle {
    /// Snapshot of the worker table, ordered by slot.
    pub async fn workers(&self) -> Vec<WorkerHandle> {
        self.table.read().await.values().cloned().collect()
    }

    /// Number of workers currently online.
    pub async fn online(&self) -> usize {
        self.table
            .read()
            .await
            .values()
            .filter(|w| w.state == WorkerState::Online)
            .count()
    }

    /// Subscribes to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.events.subscribe()
    }

    /// Kills all workers and stops the supervision loop.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}

/// Keeps a fixed-size pool of worker processes alive.
pub struct Supervisor {
    workers: usize,
    launcher: Arc<dyn WorkerLauncher>,
    policy: Arc<dyn RestartPolicy>,
    exit_handlers: Vec<ExitHandler>,
    table: WorkerTable,
    events: broadcast::Sender<SupervisorEvent>,
    shutdown: Arc<watch::Sender<bool>>,
    relaunch_delay: Duration,
    reports_tx: mpsc::UnboundedSender<Report>,
    reports_rx: mpsc::UnboundedReceiver<Report>,
    live: usize,
}

impl Supervisor {
    /// Creates a supervisor for `workers` processes.
    pub fn new(workers: usize, launcher: Arc<dyn WorkerLauncher>) -> Self {
        let (events, _) = broadcast::channel(256);
        let (shutdown, _) = watch::channel(false);
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();

        Self {
            workers: workers.max(1),
            launcher,
            policy: Arc::new(AlwaysRestart),
            exit_handlers: Vec::new(),
            table: Arc::new(RwLock::new(BTreeMap::new())),
            events,
            shutdown: Arc::new(shutdown),
            relaunch_delay: DEFAULT_RELAUNCH_DELAY,
            reports_tx,
            reports_rx,
            live: 0,
        }
    }

    /// Creates a supervisor sized by [`RuntimeConfig::worker_count`].
    pub fn from_config(config: &RuntimeConfig, launcher: Arc<dyn WorkerLauncher>) -> Self {
        Self::new(config.worker_count(), launcher)
    }

    /// Replaces the restart policy.
    pub fn with_policy(mut self, policy: Arc<dyn RestartPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Sets how long to wait before retrying a respawn whose launch failed.
    pub fn with_relaunch_delay(mut self, delay: Duration) -> Self {
        self.relaunch_delay = delay;
        self
    }

    /// Registers a callback invoked for every worker exit.
    pub fn on_exit<F>(mut self, handler: F) -> Self
    where
        F: Fn(&WorkerHandle, &ExitInfo) + Send + Sync + 'static,
    {
        self.exit_handlers.push(Box::new(handler));
        self
    }

    /// Configured number of workers.
    pub fn worker_count(&self) -> usize {
        self.workers
    }

    /// Returns a control handle.
    pub fn handle(&self) -> SupervisorHandle {
        SupervisorHandle {
            table: self.table.clone(),
            shutdown: self.shutdown.clone(),
            events: self.events.clone(),
        }
    }

    /// Subscribes to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.events.subscribe()
    }

    /// Kills all workers and stops the supervision loop.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    fn verbose(&self) -> bool {
        self.workers > 1
    }

    fn emit(&self, event: SupervisorEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Launches every worker slot.
    pub async fn spawn(&mut self) -> RuntimeResult<()> {
        if self.verbose() {
            info!(workers = self.workers, "Primary setting up {} workers...", self.workers);
        }
        for slot in 0..self.workers {
            self.launch(slot, 0).await?;
        }
        Ok(())
    }

    /// Spawns the workers and supervises them until shutdown.
    ///
    /// Only a failure to launch the initial workers ends supervision with an
    /// error. Later launch failures are retried after the relaunch delay.
    pub async fn run(mut self) -> RuntimeResult<()> {
        let mut shutdown = self.shutdown.subscribe();

        let result = self.spawn().await;
        if result.is_ok() {
            loop {
                let report = tokio::select! {
                    biased;
                    _ = shutdown_requested(&mut shutdown) => None,
                    report = self.reports_rx.recv() => report,
                };
                match report {
                    Some(Report::Exited { slot, result }) => self.handle_exit(slot, result).await,
                    Some(Report::Relaunch { slot, restarts }) => self.respawn(slot, restarts).await,
                    None => break,
                }
            }
        }

        self.shutdown.send_replace(true);
        self.drain().await;
        result
    }

    async fn launch(&mut self, slot: usize, restarts: u64) -> RuntimeResult<()> {
        self.table
            .write()
            .await
            .insert(slot, WorkerHandle::starting(slot, restarts));

        let mut process = match self.launcher.launch(slot).await {
            Ok(process) => process,
            Err(e) => {
                error!(slot, error = %e, "Failed to launch worker");
                if let Some(worker) = self.table.write().await.get_mut(&slot) {
                    worker.state = WorkerState::Exited;
                }
                return Err(e);
            }
        };
        let pid = process.pid();
        self.emit(SupervisorEvent::Forked { slot, pid });

        if let Some(worker) = self.table.write().await.get_mut(&slot) {
            worker.pid = pid;
            worker.state = WorkerState::Online;
        }
        if self.verbose() {
            info!(slot, pid, "Worker {} is online", display_pid(pid));
        }
        self.emit(SupervisorEvent::Online { slot, pid });

        let reports = self.reports_tx.clone();
        let mut shutdown = self.shutdown.subscribe();
        self.live += 1;
        tokio::spawn(async move {
            let exited = tokio::select! {
                result = process.wait() => Some(result),
                _ = shutdown_requested(&mut shutdown) => None,
            };
            let result = match exited {
                Some(result) => result,
                None => match process.kill().await {
                    Ok(()) => process.wait().await,
                    Err(e) => Err(e),
                },
            };
            let _ = reports.send(Report::Exited { slot, result });
        });

        Ok(())
    }

    /// Records an exit in the table and returns the updated handle.
    async fn record_exit(
        &mut self,
        slot: usize,
        result: RuntimeResult<ExitInfo>,
    ) -> Option<(WorkerHandle, ExitInfo)> {
        self.live = self.live.saturating_sub(1);
        let exit = match result {
            Ok(exit) => exit,
            Err(e) => {
                error!(slot, error = %e, "Lost track of worker");
                ExitInfo::default()
            }
        };

        let worker = {
            let mut table = self.table.write().await;
            let worker = table.get_mut(&slot)?;
            worker.state = WorkerState::Exited;
            worker.clone()
        };

        self.emit(SupervisorEvent::Exited {
            slot: worker.slot,
            pid: worker.pid,
            exit,
        });
        for handler in &self.exit_handlers {
            handler(&worker, &exit);
        }
        Some((worker, exit))
    }

    async fn handle_exit(&mut self, slot: usize, result: RuntimeResult<ExitInfo>) {
        let Some((worker, exit)) = self.record_exit(slot, result).await else {
            return;
        };

        if self.verbose() {
            info!(
                slot = worker.slot,
                pid = worker.pid,
                code = exit.code,
                signal = exit.signal,
                "Worker {} died with {}",
                display_pid(worker.pid),
                exit
            );
        }

        match self.policy.on_exit(&worker, &exit) {
            RestartAction::Respawn { delay } => {
                if !delay.is_zero() {
                    let mut shutdown = self.shutdown.subscribe();
                    let stopped = tokio::select! {
                        _ = tokio::time::sleep(delay) => false,
                        _ = shutdown_requested(&mut shutdown) => true,
                    };
                    if stopped {
                        return;
                    }
                }
                self.respawn(worker.slot, worker.restarts + 1).await;
            }
            RestartAction::Retire => {
                if self.verbose() {
                    info!(slot = worker.slot, "Worker slot retired");
                }
                self.emit(SupervisorEvent::Retired { slot: worker.slot });
            }
        }
    }

    /// Launches a replacement, scheduling another attempt if the launch fails.
    async fn respawn(&mut self, slot: usize, restarts: u64) {
        if self.verbose() {
            info!(slot, "Starting a new worker");
        }
        self.emit(SupervisorEvent::Respawning { slot });

        if self.launch(slot, restarts).await.is_ok() {
            return;
        }

        let delay = self.relaunch_delay;
        if self.verbose() {
            warn!(slot, delay_ms = delay.as_millis() as u64, "Retrying worker launch");
        }
        let reports = self.reports_tx.clone();
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    let _ = reports.send(Report::Relaunch { slot, restarts });
                }
                _ = shutdown_requested(&mut shutdown) => {}
            }
        });
    }

    /// Waits for every live worker to report its exit after shutdown.
    async fn drain(&mut self) {
        while self.live > 0 {
            match self.reports_rx.recv().await {
                Some(Report::Exited { slot, result }) => {
                    self.record_exit(slot, result).await;
                }
                Some(Report::Relaunch { .. }) => {}
                None => break,
            }
        }
    }
}

/// Resolves once shutdown is requested or the supervisor is gone.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        let stop = *rx.borrow_and_update();
        if stop || rx.changed().await.is_err() {
            return;
        }
    }
}

fn display_pid(pid: Option<u32>) -> String {
    pid.map_or_else(|| "?".to_string(), |p| p.to_string())
}
