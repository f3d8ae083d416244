//! Offline-first sync to the control plane
//!
//! State-changing operations are written to the local `sync_queue` table and
//! delivered later by a background worker. Enqueueing never touches the
//! network, so an offline hub keeps working and catches up once the cloud
//! is reachable again. Delivery is at-least-once.
//!
//! Failed attempts back off exponentially: after the n-th failure the row
//! waits `min(2^n, max_backoff_minutes)` minutes. Once `retry_count` reaches
//! `max_retries` the row is marked failed and only a manual
//! [`SyncQueue::retry_failed`] brings it back.

pub mod credentials;
pub mod delivery;
pub mod worker;

pub use delivery::{Deliverer, HttpDeliverer, SyncDeliveryError};
pub use worker::SyncWorker;

use crate::config::SyncConfig;
use crate::db::{
    unix_now, Database, OperationType, QueueStats, SyncQueueEntry, SyncQueueRepository, SyncStatus,
};
use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeMap;

/// Exponential backoff with a ceiling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub max_backoff_minutes: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_backoff_minutes: 60,
        }
    }
}

impl BackoffPolicy {
    /// Minutes to wait after the `retry_count`-th failure
    pub fn delay_minutes(&self, retry_count: u32) -> u64 {
        let exponential = 1u64.checked_shl(retry_count).unwrap_or(u64::MAX);
        exponential.min(self.max_backoff_minutes)
    }

    pub fn delay_secs(&self, retry_count: u32) -> i64 {
        let secs = self.delay_minutes(retry_count).saturating_mul(60);
        i64::try_from(secs).unwrap_or(i64::MAX)
    }
}

/// What one drain pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Rows moved to processing by this pass
    pub claimed: usize,
    pub delivered: usize,
    /// Failed attempts put back to pending with a later `next_retry_at`
    pub rescheduled: usize,
    /// Rows that used their last attempt
    pub failed: usize,
}

/// The local outbox
pub struct SyncQueue {
    repo: SyncQueueRepository,
    max_retries: u32,
    backoff: BackoffPolicy,
}

impl SyncQueue {
    pub fn new(repo: SyncQueueRepository, max_retries: u32, backoff: BackoffPolicy) -> Self {
        Self {
            repo,
            max_retries,
            backoff,
        }
    }

    pub fn from_config(db: &Database, config: &SyncConfig) -> Self {
        Self::new(
            db.sync_queue(),
            config.max_retries,
            BackoffPolicy {
                max_backoff_minutes: config.max_backoff_minutes,
            },
        )
    }

    pub fn backoff(&self) -> BackoffPolicy {
        self.backoff
    }

    /// Record an operation for later delivery
    pub async fn enqueue(
        &self,
        operation_type: OperationType,
        endpoint: &str,
        http_method: &str,
        payload: serde_json::Value,
        headers: BTreeMap<String, String>,
    ) -> Result<SyncQueueEntry> {
        let entry = self
            .repo
            .insert(
                operation_type,
                endpoint,
                http_method,
                &payload,
                &headers,
                self.max_retries,
                unix_now(),
            )
            .await?;

        tracing::debug!(
            id = %entry.id,
            operation = operation_type.as_str(),
            endpoint,
            "Queued sync operation"
        );
        Ok(entry)
    }

    /// Deliver up to `limit` due rows
    pub async fn drain(&self, deliverer: &dyn Deliverer, limit: u32) -> Result<DrainReport> {
        self.drain_with_clock(deliverer, limit, unix_now).await
    }

    /// [`SyncQueue::drain`] with the clock frozen at `now`
    pub async fn drain_at(
        &self,
        deliverer: &dyn Deliverer,
        limit: u32,
        now: i64,
    ) -> Result<DrainReport> {
        self.drain_with_clock(deliverer, limit, move || now).await
    }

    /// [`SyncQueue::drain`] reading time from `clock`
    ///
    /// Rows are claimed one at a time right before delivery, so a row picked
    /// up by a concurrent drain is skipped rather than sent twice by this hub.
    /// The clock is read again after every attempt: `completed_at` and the
    /// next retry time count from when that attempt finished, not from the
    /// start of the pass.
    ///
    /// If recording an outcome fails, the row is put back to pending before
    /// the error is returned.
    pub async fn drain_with_clock<C>(
        &self,
        deliverer: &dyn Deliverer,
        limit: u32,
        clock: C,
    ) -> Result<DrainReport>
    where
        C: Fn() -> i64,
    {
        let mut report = DrainReport::default();

        for entry in self.repo.due(clock(), limit).await? {
            if !self.repo.claim(&entry.id).await? {
                continue;
            }
            report.claimed += 1;

            let outcome = deliverer.deliver(&entry).await;
            if let Err(e) = self.settle(&entry, outcome, clock(), &mut report).await {
                match self.repo.release(&entry.id).await {
                    Ok(_) => tracing::warn!(id = %entry.id, "Returned sync operation to pending"),
                    Err(release_err) => tracing::error!(
                        id = %entry.id,
                        "Sync operation left in processing: {:#}",
                        release_err
                    ),
                }
                return Err(e);
            }
        }

        if report.claimed > 0 {
            tracing::info!(
                delivered = report.delivered,
                rescheduled = report.rescheduled,
                failed = report.failed,
                "Sync drain finished"
            );
        }
        Ok(report)
    }

    /// Record the outcome of one attempt on a claimed row
    async fn settle(
        &self,
        entry: &SyncQueueEntry,
        outcome: Result<(), SyncDeliveryError>,
        now: i64,
        report: &mut DrainReport,
    ) -> Result<()> {
        match outcome {
            Ok(()) => {
                self.repo.mark_completed(&entry.id, now).await?;
                report.delivered += 1;
                tracing::debug!(id = %entry.id, "Sync operation delivered");
            }
            Err(e) => {
                let retry_count = entry.retry_count.saturating_add(1);
                let message = e.to_string();

                if retry_count >= entry.max_retries {
                    self.repo.mark_failed(&entry.id, retry_count, &message).await?;
                    report.failed += 1;
                    tracing::error!(
                        id = %entry.id,
                        operation = entry.operation_type.as_str(),
                        retry_count,
                        "Sync operation failed permanently: {}",
                        message
                    );
                } else {
                    let next_retry_at = now.saturating_add(self.backoff.delay_secs(retry_count));
                    self.repo
                        .mark_retry(&entry.id, retry_count, &message, next_retry_at)
                        .await?;
                    report.rescheduled += 1;
                    tracing::warn!(
                        id = %entry.id,
                        operation = entry.operation_type.as_str(),
                        retry_count,
                        next_retry_at,
                        "Sync delivery failed, retrying later: {}",
                        message
                    );
                }
            }
        }
        Ok(())
    }

    /// Return rows left in processing by an interrupted drain
    pub async fn reset_processing(&self) -> Result<u64> {
        let reset = self.repo.reset_processing().await?;
        if reset > 0 {
            tracing::info!(reset, "Returned interrupted sync operations to pending");
        }
        Ok(reset)
    }

    pub async fn retry_failed(&self, id: &str) -> Result<bool> {
        self.repo.retry_failed(id).await
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        self.repo.stats().await
    }

    /// Delete completed rows older than `older_than_secs`
    pub async fn purge_completed(&self, older_than_secs: i64) -> Result<u64> {
        self.repo
            .purge_completed(unix_now().saturating_sub(older_than_secs))
            .await
    }

    pub async fn get(&self, id: &str) -> Result<Option<SyncQueueEntry>> {
        self.repo.get(id).await
    }

    pub async fn list(&self, status: Option<SyncStatus>, limit: u32) -> Result<Vec<SyncQueueEntry>> {
        self.repo.list(status, limit).await
    }
}
