//! Mock collaborators for testing code built on this crate.

use crate::auth::TokenIssuer;
use crate::errors::{ErrorKind, RuntimeError, RuntimeResult};
use crate::supervisor::{ExitInfo, WorkerLauncher, WorkerProcess};
use async_trait::async_trait;
use secrecy::SecretString;
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Token issuer that records every exchange.
#[derive(Debug)]
pub struct MockTokenIssuer {
    token: Option<String>,
    installation_ids: Mutex<Vec<u64>>,
}

impl MockTokenIssuer {
    /// Issues `token` on every call.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            installation_ids: Mutex::new(Vec::new()),
        }
    }

    /// Rejects every exchange.
    pub fn failing() -> Self {
        Self {
            token: None,
            installation_ids: Mutex::new(Vec::new()),
        }
    }

    /// Number of exchanges attempted.
    pub fn calls(&self) -> usize {
        self.installation_ids().len()
    }

    /// Installation ids passed to each exchange, in order.
    pub fn installation_ids(&self) -> Vec<u64> {
        self.installation_ids
            .lock()
            .map(|ids| ids.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl TokenIssuer for MockTokenIssuer {
    async fn issue_token(&self, installation_id: u64) -> RuntimeResult<SecretString> {
        if let Ok(mut ids) = self.installation_ids.lock() {
            ids.push(installation_id);
        }
        match &self.token {
            Some(token) => Ok(SecretString::new(token.clone())),
            None => Err(RuntimeError::new(
                ErrorKind::TokenIssuanceFailed,
                "Mock token exchange rejected",
            )
            .with_status(401)),
        }
    }
}

type ExitSenders = Arc<Mutex<HashMap<u32, mpsc::UnboundedSender<ExitInfo>>>>;

/// Launcher producing in-memory workers that exit on command.
#[derive(Debug)]
pub struct MockLauncher {
    next_pid: AtomicU32,
    launches: AtomicUsize,
    kills: Arc<AtomicUsize>,
    failures: AtomicUsize,
    fail_after: Option<usize>,
    fail_next: AtomicUsize,
    senders: ExitSenders,
}

impl MockLauncher {
    /// Creates a launcher whose pids start at 1000.
    pub fn new() -> Self {
        Self {
            next_pid: AtomicU32::new(1000),
            launches: AtomicUsize::new(0),
            kills: Arc::new(AtomicUsize::new(0)),
            failures: AtomicUsize::new(0),
            fail_after: None,
            fail_next: AtomicUsize::new(0),
            senders: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Creates a launcher that fails every launch after the first `launches`.
    pub fn failing_after(launches: usize) -> Self {
        Self {
            fail_after: Some(launches),
            ..Self::new()
        }
    }

    /// Refuses the next `launches` launch requests.
    pub fn fail_next(&self, launches: usize) {
        self.fail_next.store(launches, Ordering::SeqCst);
    }

    /// Makes the worker with `pid` exit with `exit`.
    ///
    /// Returns false if no such worker is running.
    pub fn exit(&self, pid: u32, exit: ExitInfo) -> bool {
        let sender = self.senders.lock().ok().and_then(|mut s| s.remove(&pid));
        sender.map(|tx| tx.send(exit).is_ok()).unwrap_or(false)
    }

    /// Successful launches so far.
    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    /// Refused launches so far.
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    /// Workers killed so far.
    pub fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }
}

impl Default for MockLauncher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkerLauncher for MockLauncher {
    async fn launch(&self, slot: usize) -> RuntimeResult<Box<dyn WorkerProcess>> {
        let over_limit = self.fail_after.is_some_and(|limit| self.launches() >= limit);
        let refused = over_limit
            || self
                .fail_next
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
        if refused {
            self.failures.fetch_add(1, Ordering::SeqCst);
            return Err(RuntimeError::new(
                ErrorKind::SpawnFailed,
                format!("Mock launch of worker {} refused", slot),
            ));
        }

        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut senders) = self.senders.lock() {
            senders.insert(pid, tx);
        }
        self.launches.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(MockProcess {
            pid,
            exits: rx,
            exited: None,
            kills: self.kills.clone(),
            senders: self.senders.clone(),
        }))
    }
}

/// In-memory worker created by [`MockLauncher`].
#[derive(Debug)]
pub struct MockProcess {
    pid: u32,
    exits: mpsc::UnboundedReceiver<ExitInfo>,
    exited: Option<ExitInfo>,
    kills: Arc<AtomicUsize>,
    senders: ExitSenders,
}

#[async_trait]
impl WorkerProcess for MockProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    async fn wait(&mut self) -> RuntimeResult<ExitInfo> {
        if let Some(exit) = self.exited {
            return Ok(exit);
        }
        let exit = self.exits.recv().await.ok_or_else(|| {
            RuntimeError::new(ErrorKind::Unknown, "Mock worker lost its exit channel")
        })?;
        self.exited = Some(exit);
        Ok(exit)
    }

    async fn kill(&mut self) -> RuntimeResult<()> {
        if self.exited.is_none() {
            if let Ok(mut senders) = self.senders.lock() {
                senders.remove(&self.pid);
            }
            self.exited = Some(ExitInfo::signal(9));
            self.kills.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Collects formatted log output so tests can assert on it.
#[derive(Debug, Clone, Default)]
pub struct LogCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    /// Installs a capturing subscriber as this thread's default.
    ///
    /// Events are captured until the returned guard is dropped. Tasks spawned
    /// on a current-thread runtime log into the same capture.
    pub fn install() -> (Self, tracing::subscriber::DefaultGuard) {
        let capture = Self::default();
        let writer = capture.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        (capture, tracing::subscriber::set_default(subscriber))
    }

    /// Everything logged so far.
    pub fn contents(&self) -> String {
        self.buffer
            .lock()
            .map(|b| String::from_utf8_lossy(&b).into_owned())
            .unwrap_or_default()
    }

    /// Number of times `needle` appears in the output.
    pub fn count(&self, needle: &str) -> usize {
        self.contents().matches(needle).count()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log capture poisoned"))?
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
