//! Background drain loop

use super::{Deliverer, DrainReport, SyncQueue};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Drains the queue on a fixed interval until shut down
///
/// At most one drain runs at a time, whether started by the timer or by
/// [`SyncWorker::drain_once`] from a management request.
pub struct SyncWorker {
    queue: Arc<SyncQueue>,
    deliverer: Arc<dyn Deliverer>,
    interval: Duration,
    batch_size: u32,
    drain_lock: Mutex<()>,
}

impl SyncWorker {
    pub fn new(
        queue: Arc<SyncQueue>,
        deliverer: Arc<dyn Deliverer>,
        interval: Duration,
        batch_size: u32,
    ) -> Self {
        Self {
            queue,
            deliverer,
            interval,
            batch_size,
            drain_lock: Mutex::new(()),
        }
    }

    pub async fn drain_once(&self) -> Result<DrainReport> {
        let _guard = self.drain_lock.lock().await;
        self.queue
            .drain(self.deliverer.as_ref(), self.batch_size)
            .await
    }

    /// Reset interrupted rows, then drain every interval until `shutdown`
    /// flips to true
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        if let Err(e) = self.queue.reset_processing().await {
            tracing::error!("Failed to reset interrupted sync operations: {}", e);
        }

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval_secs = self.interval.as_secs(),
            batch_size = self.batch_size,
            "Sync worker started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.drain_once().await {
                        tracing::error!("Sync drain failed: {:#}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Sync worker stopped");
    }

    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
