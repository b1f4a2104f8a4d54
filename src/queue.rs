use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::models::QueuedLocation;
use crate::store::{PendingLocation, Store};
use crate::uplink::{SendOutcome, Uplink};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    pub attempted: usize,
    pub sent: usize,
    pub failed: usize,
    /// The token was rejected; untried items were left for the next session
    /// token.
    pub unauthorized: bool,
    /// Another flush was already running.
    pub skipped: bool,
}

impl FlushReport {
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && !self.unauthorized
    }
}

/// At-least-once buffer between capture and confirmed server receipt.
pub struct DurableQueue {
    store: Arc<dyn Store>,
    flushing: Mutex<()>,
}

impl DurableQueue {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            flushing: Mutex::new(()),
        }
    }

    pub async fn enqueue(&self, item: &QueuedLocation) -> Result<i64, StoreError> {
        let id = self.store.push_location(item).await?;
        debug!(id, kind = %item.kind, "Location queued");
        Ok(id)
    }

    /// Sends every pending item in order and removes the ones the server
    /// accepted. A failing item stays queued and the rest are still tried,
    /// except after a 401, which ends the batch. Returns a skipped report
    /// when another flush is running.
    pub async fn flush(&self, uplink: &dyn Uplink, token: &str) -> Result<FlushReport, StoreError> {
        let Ok(guard) = self.flushing.try_lock() else {
            debug!("Flush already in progress, skipping");
            return Ok(FlushReport {
                skipped: true,
                ..FlushReport::default()
            });
        };
        self.send_pending(guard, uplink, token).await
    }

    /// Like [`flush`](Self::flush), but waits up to `wait` for a running
    /// flush to finish so items queued after its snapshot are attempted.
    pub async fn flush_waiting(
        &self,
        uplink: &dyn Uplink,
        token: &str,
        wait: Duration,
    ) -> Result<FlushReport, StoreError> {
        let Ok(guard) = tokio::time::timeout(wait, self.flushing.lock()).await else {
            debug!(wait_secs = wait.as_secs(), "Running flush did not finish in time");
            return Ok(FlushReport {
                skipped: true,
                ..FlushReport::default()
            });
        };
        self.send_pending(guard, uplink, token).await
    }

    async fn send_pending(
        &self,
        _guard: MutexGuard<'_, ()>,
        uplink: &dyn Uplink,
        token: &str,
    ) -> Result<FlushReport, StoreError> {
        let pending = self.store.pending_locations().await?;
        let mut report = FlushReport::default();
        if pending.is_empty() {
            return Ok(report);
        }

        for (index, PendingLocation { id, item }) in pending.iter().enumerate() {
            report.attempted += 1;
            match uplink.send(item, token).await {
                SendOutcome::Sent => {
                    self.store.remove_location(*id).await?;
                    report.sent += 1;
                    debug!(id, kind = %item.kind, "Queued location sent");
                }
                SendOutcome::Retry => {
                    report.failed += 1;
                    debug!(id, kind = %item.kind, "Queued location kept for retry");
                }
                SendOutcome::Unauthorized => {
                    report.failed += pending.len() - index;
                    report.unauthorized = true;
                    warn!(
                        remaining = pending.len() - index,
                        "Token rejected, stopping flush"
                    );
                    break;
                }
            }
        }

        info!(
            sent = report.sent,
            failed = report.failed,
            "Flushed location queue"
        );
        Ok(report)
    }

    pub async fn len(&self) -> Result<usize, StoreError> {
        self.store.count_locations().await
    }

    pub async fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len().await? == 0)
    }

    pub async fn pending(&self) -> Result<Vec<QueuedLocation>, StoreError> {
        Ok(self
            .store
            .pending_locations()
            .await?
            .into_iter()
            .map(|entry| entry.item)
            .collect())
    }

    pub async fn clear(&self) -> Result<(), StoreError> {
        self.store.clear_locations().await
    }
}
