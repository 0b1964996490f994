//! Primary/worker role detection and the cluster entry point.

use super::worker::{ProcessLauncher, WORKER_ROLE_ENV, WORKER_SLOT_ENV};
use super::Supervisor;
use crate::config::RuntimeConfig;
use crate::errors::RuntimeResult;
use std::future::Future;
use std::sync::Arc;

/// Which side of the supervision tree this process is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessRole {
    /// Launches and supervises workers.
    Primary,
    /// Runs the service.
    Worker {
        /// Slot assigned by the primary, when known.
        slot: Option<usize>,
    },
}

impl ProcessRole {
    /// Detects the role from the process environment.
    pub fn detect() -> Self {
        Self::from_env_values(
            std::env::var(WORKER_ROLE_ENV).ok().as_deref(),
            std::env::var(WORKER_SLOT_ENV).ok().as_deref(),
        )
    }

    /// Detects the role from raw environment values.
    pub fn from_env_values(role: Option<&str>, slot: Option<&str>) -> Self {
        match role {
            Some("worker") => Self::Worker {
                slot: slot.and_then(|s| s.parse().ok()),
            },
            _ => Self::Primary,
        }
    }

    /// True on the primary process.
    pub fn is_primary(&self) -> bool {
        matches!(self, Self::Primary)
    }
}

/// Runs `entry` on a worker, or supervises re-executed copies of this binary on the primary.
///
/// The primary shuts its workers down on Ctrl-C.
pub async fn run_cluster<F, Fut>(config: &RuntimeConfig, entry: F) -> RuntimeResult<()>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = RuntimeResult<()>>,
{
    match ProcessRole::detect() {
        ProcessRole::Worker { slot } => {
            tracing::debug!(slot, pid = std::process::id(), "Starting worker");
            entry().await
        }
        ProcessRole::Primary => {
            let launcher = ProcessLauncher::current_exe()?;
            let supervisor = Supervisor::from_config(config, Arc::new(launcher));
            let handle = supervisor.handle();

            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Interrupt received, stopping workers");
                    handle.shutdown();
                }
            });

            supervisor.run().await
        }
    }
}
