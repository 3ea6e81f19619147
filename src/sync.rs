//! Background catalog synchronizer
//!
//! Resyncs the channel catalog on a long fixed interval. A failed cycle is
//! logged and retried after a short backoff; the loop only ends when the
//! stop signal is sent.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use error_stack::ResultExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::catalog::{ChannelCatalog, ResyncOutcome};

#[derive(Debug)]
pub struct SyncError;

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "catalog synchronization failed")
    }
}

impl std::error::Error for SyncError {}

#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Pause after a successful cycle
    pub interval: Duration,
    /// Pause after a failed cycle
    pub backoff: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(7 * 24 * 3600),
            backoff: Duration::from_secs(30),
        }
    }
}

/// Handle to the running synchronizer task
pub struct CatalogSynchronizer {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<u64>,
}

impl CatalogSynchronizer {
    /// Spawn the synchronizer on the current tokio runtime
    pub fn spawn(catalog: Arc<ChannelCatalog>, config: SyncConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run(catalog, config, shutdown_rx));
        Self {
            shutdown_tx,
            handle,
        }
    }

    /// Signal the task to stop and wait up to `grace` for it.
    ///
    /// Returns the number of completed cycles, or `None` when the task did
    /// not stop in time and was aborted.
    pub async fn shutdown(self, grace: Duration) -> Option<u64> {
        let _ = self.shutdown_tx.send(true);
        let abort = self.handle.abort_handle();

        match tokio::time::timeout(grace, self.handle).await {
            Ok(Ok(cycles)) => Some(cycles),
            Ok(Err(e)) => {
                error!("Catalog synchronizer task failed: {}", e);
                None
            }
            Err(_) => {
                warn!("Catalog synchronizer did not stop within {:?}, aborting", grace);
                abort.abort();
                None
            }
        }
    }
}

/// One resync cycle
pub async fn run_cycle(catalog: &ChannelCatalog) -> crate::Result<ResyncOutcome> {
    catalog
        .resync()
        .await
        .change_context(SyncError)
        .attach("Full catalog search against the archiver failed")
}

async fn run(
    catalog: Arc<ChannelCatalog>,
    config: SyncConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> u64 {
    info!(
        interval_secs = config.interval.as_secs(),
        backoff_secs = config.backoff.as_secs(),
        "Catalog synchronizer started"
    );

    let mut cycles = 0u64;
    loop {
        let pause = match run_cycle(&catalog).await {
            Ok(ResyncOutcome::Replaced(count)) => {
                debug!(channels = count, "Scheduled catalog resync done");
                config.interval
            }
            Ok(ResyncOutcome::Skipped) => config.interval,
            Err(report) => {
                error!("Error while retrieving available channels: {:?}", report);
                config.backoff
            }
        };
        cycles += 1;

        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = tokio::time::sleep(pause) => {}
        }
    }

    info!(cycles, "Catalog synchronizer stopped");
    cycles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogConfig;
    use crate::core::ChannelDescriptor;
    use crate::gateway::MemoryGateway;

    fn setup(failing: bool) -> (Arc<MemoryGateway>, Arc<ChannelCatalog>) {
        let gateway = Arc::new(MemoryGateway::new(vec![ChannelDescriptor::new("b", "a")]));
        gateway.set_failing(failing);
        let catalog = Arc::new(ChannelCatalog::with_config(
            gateway.clone(),
            CatalogConfig {
                resync_on_miss: false,
            },
        ));
        (gateway, catalog)
    }

    #[tokio::test(start_paused = true)]
    async fn retries_after_backoff_until_archiver_recovers() {
        let (gateway, catalog) = setup(true);
        let config = SyncConfig {
            interval: Duration::from_secs(3600),
            backoff: Duration::from_secs(30),
        };
        let sync = CatalogSynchronizer::spawn(catalog.clone(), config);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(gateway.search_calls(), 1);
        assert!(catalog.store().is_empty());

        gateway.set_failing(false);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(gateway.search_calls(), 2);
        assert_eq!(catalog.store().len(), 1);

        // Next run only after the full interval
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(gateway.search_calls(), 2);

        assert_eq!(sync.shutdown(Duration::from_secs(1)).await, Some(2));
    }

    #[tokio::test]
    async fn shutdown_stops_sleeping_task() {
        let (_gateway, catalog) = setup(false);
        let sync = CatalogSynchronizer::spawn(catalog, SyncConfig::default());
        tokio::task::yield_now().await;
        assert!(sync.shutdown(Duration::from_secs(5)).await.is_some());
    }

    #[tokio::test]
    async fn failed_cycle_reports_context() {
        let (_gateway, catalog) = setup(true);
        let report = run_cycle(&catalog).await.unwrap_err();
        assert!(report.to_string().contains("catalog synchronization failed"));
        assert!(!catalog.store().is_syncing());
    }
}
