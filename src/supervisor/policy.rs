//! Restart policies.

use super::worker::{ExitInfo, WorkerHandle};
use std::time::Duration;

/// What to do with a slot whose worker exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartAction {
    /// Launch a replacement after `delay`.
    Respawn {
        /// Delay before the replacement is launched.
        delay: Duration,
    },
    /// Leave the slot empty.
    Retire,
}

/// Decides whether an exited worker is replaced.
pub trait RestartPolicy: Send + Sync {
    /// Called once per worker exit while the supervisor is running.
    fn on_exit(&self, worker: &WorkerHandle, exit: &ExitInfo) -> RestartAction;
}

/// Replaces every exited worker immediately, without limit.
///
/// A worker that crashes on startup is relaunched in a tight loop.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysRestart;

impl RestartPolicy for AlwaysRestart {
    fn on_exit(&self, _worker: &WorkerHandle, _exit: &ExitInfo) -> RestartAction {
        RestartAction::Respawn {
            delay: Duration::ZERO,
        }
    }
}

/// Replaces exited workers until a slot has been restarted `limit` times.
#[derive(Debug, Clone, Copy)]
pub struct MaxRestarts {
    limit: u64,
    delay: Duration,
}

impl MaxRestarts {
    /// Allows `limit` restarts per slot, each after `delay`.
    pub fn new(limit: u64, delay: Duration) -> Self {
        Self { limit, delay }
    }
}

impl RestartPolicy for MaxRestarts {
    fn on_exit(&self, worker: &WorkerHandle, _exit: &ExitInfo) -> RestartAction {
        if worker.restarts < self.limit {
            RestartAction::Respawn { delay: self.delay }
        } else {
            RestartAction::Retire
        }
    }
}
