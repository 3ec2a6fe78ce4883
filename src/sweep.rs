//! Temp namespace sweeper
//!
//! Abandons uploads that stopped receiving chunks and removes temp files left
//! behind by crashes, failed merges or abandoned uploads. Runs once at
//! startup when configured and then on a fixed interval; it is never driven
//! by read traffic.

use crate::config::SweepConfig;
use crate::metrics;
use crate::upload::{ChunkedUploadService, StoreError};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Result of one sweep pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub abandoned_uploads: usize,
    pub removed_slots: usize,
    pub removed_staging: usize,
    pub bytes_freed: u64,
}

/// Periodic cleanup of stale uploads and temp files
pub struct Sweeper {
    uploads: Arc<ChunkedUploadService>,
    config: SweepConfig,
}

impl Sweeper {
    pub fn new(uploads: Arc<ChunkedUploadService>, config: SweepConfig) -> Self {
        Self { uploads, config }
    }

    /// Run a single sweep pass
    pub async fn run_once(&self) -> Result<SweepSummary, StoreError> {
        let mut summary = SweepSummary::default();
        let tracker = self.uploads.tracker();
        let store = self.uploads.store();

        for file_name in tracker.stale(self.config.max_idle()) {
            // Re-checked under the entry lock; a chunk may have arrived since.
            if let Some(progress) = tracker.abandon_if_idle(&file_name, self.config.max_idle()) {
                let removed = store.remove_slots(&file_name, progress.total).await;
                summary.abandoned_uploads += 1;
                summary.removed_slots += removed;
                tracing::info!(
                    file_name = %file_name,
                    received = progress.received,
                    total = progress.total,
                    idle_secs = progress.idle.as_secs(),
                    "Abandoned idle upload"
                );
            }
        }

        // Slots of uploads still being received survive regardless of age.
        let report = store
            .sweep(self.config.max_temp_age(), |file_name| tracker.contains(file_name))
            .await?;
        summary.removed_slots += report.removed_slots;
        summary.removed_staging += report.removed_staging;
        summary.bytes_freed += report.bytes_freed;

        metrics::record_sweep(
            summary.removed_slots,
            summary.removed_staging,
            summary.abandoned_uploads,
        );
        if summary != SweepSummary::default() {
            tracing::info!(
                abandoned = summary.abandoned_uploads,
                slots = summary.removed_slots,
                staging = summary.removed_staging,
                bytes = summary.bytes_freed,
                "Sweep finished"
            );
        }

        Ok(summary)
    }

    /// Run sweeps on the configured interval until shut down
    ///
    /// The first pass happens one interval after spawning.
    pub fn spawn(self) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let period = self.config.interval();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_once().await {
                            metrics::record_error("sweep");
                            tracing::warn!(error = %e, "Sweep failed");
                        }
                    }
                }
            }
        });

        SweeperHandle {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }
}

/// Handle to a running sweeper task
pub struct SweeperHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for an in-flight pass to finish
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}
