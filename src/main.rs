//! Supervised GitHub runtime.
//!
//! The primary process keeps `worker_count()` copies of this binary running.
//! Each worker optionally loads a settings file named by `SETTINGS_LOCATION`
//! (`owner/repo@path#branch`) and then idles until interrupted.

use anyhow::Context;
use integrations_github_runtime::{run_cluster, ApiClient, FileLocation, RuntimeConfig, RuntimeResult};
use std::future::Future;
use std::io;
use tracing_subscriber::EnvFilter;

const SETTINGS_LOCATION_ENV: &str = "SETTINGS_LOCATION";

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let config = RuntimeConfig::from_env().context("invalid runtime configuration")?;
    init_tracing(config.production);

    run_cluster(&config, || worker(&config))
        .await
        .context("runtime stopped with an error")
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn worker(config: &RuntimeConfig) -> RuntimeResult<()> {
    let client = ApiClient::new(config)?;

    if let Ok(reference) = std::env::var(SETTINGS_LOCATION_ENV) {
        let location: FileLocation = reference.parse()?;
        let Some(repo) = location.repo_slug.as_deref() else {
            tracing::warn!(%location, "Settings location has no repository, skipping");
            return idle().await;
        };

        let settings = client
            .contents()
            .get_file_contents_without_token(repo, &location.path)
            .await?;
        tracing::info!(%location, bytes = settings.len(), "Loaded settings");
    }

    idle().await
}

async fn idle() -> RuntimeResult<()> {
    // The primary kills workers on shutdown; Ctrl-C also reaches the process group.
    wait_for_interrupt(tokio::signal::ctrl_c()).await;
    Ok(())
}

/// Waits for `signal`. A signal handler that cannot be installed waits forever
/// so the worker is not restarted in a loop.
async fn wait_for_interrupt<F>(signal: F)
where
    F: Future<Output = io::Result<()>>,
{
    if let Err(e) = signal.await {
        tracing::warn!(error = %e, "Cannot listen for Ctrl-C, waiting for the primary to stop this worker");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_ends_wait() {
        let waited = timeout(Duration::from_secs(1), wait_for_interrupt(async { Ok(()) })).await;
        assert!(waited.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_signal_handler_keeps_worker_alive() {
        let failing = async { Err(io::Error::new(io::ErrorKind::Other, "no signal driver")) };
        let waited = timeout(Duration::from_secs(3600), wait_for_interrupt(failing)).await;
        assert!(waited.is_err());
    }
}
