/// Sync queue persistence
///
/// Rows are the durable outbox for control-plane operations. Status moves
/// pending -> processing -> completed, or back to pending with a later
/// `next_retry_at`, or to failed once `retry_count` reaches `max_retries`.
/// All queries use parameterized statements.
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Kind of control-plane operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    UserRegister,
    UserRemove,
    UserUpdate,
    PluginInstall,
    PluginUninstall,
    SaleSync,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::UserRegister => "user_register",
            OperationType::UserRemove => "user_remove",
            OperationType::UserUpdate => "user_update",
            OperationType::PluginInstall => "plugin_install",
            OperationType::PluginUninstall => "plugin_uninstall",
            OperationType::SaleSync => "sale_sync",
        }
    }
}

impl FromStr for OperationType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "user_register" => OperationType::UserRegister,
            "user_remove" => OperationType::UserRemove,
            "user_update" => OperationType::UserUpdate,
            "plugin_install" => OperationType::PluginInstall,
            "plugin_uninstall" => OperationType::PluginUninstall,
            "sale_sync" => OperationType::SaleSync,
            other => anyhow::bail!("Unknown operation type '{}'", other),
        })
    }
}

/// Delivery status of a queue row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Processing => "processing",
            SyncStatus::Completed => "completed",
            SyncStatus::Failed => "failed",
        }
    }
}

impl FromStr for SyncStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "pending" => SyncStatus::Pending,
            "processing" => SyncStatus::Processing,
            "completed" => SyncStatus::Completed,
            "failed" => SyncStatus::Failed,
            other => anyhow::bail!("Unknown sync status '{}'", other),
        })
    }
}

/// One queued operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncQueueEntry {
    pub id: String,
    pub operation_type: OperationType,
    pub endpoint: String,
    pub http_method: String,
    pub payload: serde_json::Value,
    pub headers: BTreeMap<String, String>,
    pub status: SyncStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub last_error: Option<String>,
    pub created_at: i64,
    pub next_retry_at: Option<i64>,
    pub completed_at: Option<i64>,
}

/// Row counts per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

impl QueueStats {
    pub fn total(&self) -> u64 {
        self.pending + self.processing + self.completed + self.failed
    }
}

const COLUMNS: &str = "id, operation_type, endpoint, http_method, payload, headers, status, \
     retry_count, max_retries, last_error, created_at, next_retry_at, completed_at";

/// Sync queue repository for database operations
pub struct SyncQueueRepository {
    pool: SqlitePool,
}

impl SyncQueueRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new pending row
    #[allow(clippy::too_many_arguments)]
    pub async fn insert(
        &self,
        operation_type: OperationType,
        endpoint: &str,
        http_method: &str,
        payload: &serde_json::Value,
        headers: &BTreeMap<String, String>,
        max_retries: u32,
        now: i64,
    ) -> Result<SyncQueueEntry> {
        let id = uuid::Uuid::new_v4().to_string();
        let http_method = http_method.to_uppercase();
        let payload_json = serde_json::to_string(payload).context("Failed to encode payload")?;
        let headers_json = serde_json::to_string(headers).context("Failed to encode headers")?;

        sqlx::query(
            "INSERT INTO sync_queue (id, operation_type, endpoint, http_method, payload, headers, status, retry_count, max_retries, created_at)
             VALUES (?, ?, ?, ?, ?, ?, 'pending', 0, ?, ?)",
        )
        .bind(&id)
        .bind(operation_type.as_str())
        .bind(endpoint)
        .bind(&http_method)
        .bind(&payload_json)
        .bind(&headers_json)
        .bind(max_retries as i64)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to enqueue sync operation")?;

        Ok(SyncQueueEntry {
            id,
            operation_type,
            endpoint: endpoint.to_string(),
            http_method,
            payload: payload.clone(),
            headers: headers.clone(),
            status: SyncStatus::Pending,
            retry_count: 0,
            max_retries,
            last_error: None,
            created_at: now,
            next_retry_at: None,
            completed_at: None,
        })
    }

    pub async fn get(&self, id: &str) -> Result<Option<SyncQueueEntry>> {
        let row = sqlx::query(&format!("SELECT {} FROM sync_queue WHERE id = ?", COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch sync queue entry")?;

        row.map(|r| Self::from_row(&r)).transpose()
    }

    /// Pending rows that are due at `now`, oldest first
    pub async fn due(&self, now: i64, limit: u32) -> Result<Vec<SyncQueueEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM sync_queue
             WHERE status = 'pending'
               AND retry_count < max_retries
               AND (next_retry_at IS NULL OR next_retry_at <= ?)
             ORDER BY created_at ASC, rowid ASC
             LIMIT ?",
            COLUMNS
        ))
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to select due sync entries")?;

        rows.iter().map(Self::from_row).collect()
    }

    /// Move a pending row to processing
    ///
    /// Returns false if another drain claimed it first.
    pub async fn claim(&self, id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE sync_queue SET status = 'processing' WHERE id = ? AND status = 'pending'",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to claim sync entry")?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn mark_completed(&self, id: &str, now: i64) -> Result<()> {
        sqlx::query(
            "UPDATE sync_queue SET status = 'completed', completed_at = ?, last_error = NULL WHERE id = ?",
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to mark sync entry completed")?;

        Ok(())
    }

    /// Return a row to pending after a failed attempt
    pub async fn mark_retry(
        &self,
        id: &str,
        retry_count: u32,
        last_error: &str,
        next_retry_at: i64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE sync_queue SET status = 'pending', retry_count = ?, last_error = ?, next_retry_at = ? WHERE id = ?",
        )
        .bind(retry_count as i64)
        .bind(last_error)
        .bind(next_retry_at)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to schedule sync retry")?;

        Ok(())
    }

    /// Give up on a row after its final attempt
    pub async fn mark_failed(&self, id: &str, retry_count: u32, last_error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE sync_queue SET status = 'failed', retry_count = ?, last_error = ?, next_retry_at = NULL WHERE id = ?",
        )
        .bind(retry_count as i64)
        .bind(last_error)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to mark sync entry failed")?;

        Ok(())
    }

    /// Return one claimed row to pending without touching its retry budget
    pub async fn release(&self, id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE sync_queue SET status = 'pending' WHERE id = ? AND status = 'processing'",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to release sync entry")?;

        Ok(result.rows_affected() == 1)
    }

    /// Return rows stuck in processing (e.g. after a crash) to pending
    pub async fn reset_processing(&self) -> Result<u64> {
        let result =
            sqlx::query("UPDATE sync_queue SET status = 'pending' WHERE status = 'processing'")
                .execute(&self.pool)
                .await
                .context("Failed to reset processing sync entries")?;

        Ok(result.rows_affected())
    }

    /// Manually replay a failed row from scratch
    pub async fn retry_failed(&self, id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE sync_queue SET status = 'pending', retry_count = 0, next_retry_at = NULL
             WHERE id = ? AND status = 'failed'",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to reset failed sync entry")?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM sync_queue GROUP BY status")
            .fetch_all(&self.pool)
            .await
            .context("Failed to count sync entries")?;

        let mut stats = QueueStats::default();
        for r in rows {
            let status: String = r.get("status");
            let n: i64 = r.get("n");
            let n = n as u64;
            match status.parse::<SyncStatus>()? {
                SyncStatus::Pending => stats.pending = n,
                SyncStatus::Processing => stats.processing = n,
                SyncStatus::Completed => stats.completed = n,
                SyncStatus::Failed => stats.failed = n,
            }
        }

        Ok(stats)
    }

    /// Delete completed rows finished before `older_than`
    pub async fn purge_completed(&self, older_than: i64) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM sync_queue WHERE status = 'completed' AND completed_at < ?",
        )
        .bind(older_than)
        .execute(&self.pool)
        .await
        .context("Failed to purge completed sync entries")?;

        Ok(result.rows_affected())
    }

    /// Rows ordered by creation, optionally filtered by status
    pub async fn list(&self, status: Option<SyncStatus>, limit: u32) -> Result<Vec<SyncQueueEntry>> {
        let rows = match status {
            Some(status) => {
                sqlx::query(&format!(
                    "SELECT {} FROM sync_queue WHERE status = ? ORDER BY created_at ASC, rowid ASC LIMIT ?",
                    COLUMNS
                ))
                .bind(status.as_str())
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {} FROM sync_queue ORDER BY created_at ASC, rowid ASC LIMIT ?",
                    COLUMNS
                ))
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
            }
        }
        .context("Failed to list sync entries")?;

        rows.iter().map(Self::from_row).collect()
    }

    fn from_row(r: &sqlx::sqlite::SqliteRow) -> Result<SyncQueueEntry> {
        let operation_type: String = r.get("operation_type");
        let status: String = r.get("status");
        let payload: String = r.get("payload");
        let headers: String = r.get("headers");
        let retry_count: i64 = r.get("retry_count");
        let max_retries: i64 = r.get("max_retries");

        Ok(SyncQueueEntry {
            id: r.get("id"),
            operation_type: operation_type.parse()?,
            endpoint: r.get("endpoint"),
            http_method: r.get("http_method"),
            payload: serde_json::from_str(&payload).context("Corrupt sync payload")?,
            headers: serde_json::from_str(&headers).context("Corrupt sync headers")?,
            status: status.parse()?,
            retry_count: retry_count.max(0) as u32,
            max_retries: max_retries.max(0) as u32,
            last_error: r.get("last_error"),
            created_at: r.get("created_at"),
            next_retry_at: r.get("next_retry_at"),
            completed_at: r.get("completed_at"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use serde_json::json;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, Database) {
        let temp = TempDir::new().unwrap();
        let db = Database::new(&temp.path().join("hub.db")).await.unwrap();
        (temp, db)
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let (_temp, db) = setup().await;
        let repo = db.sync_queue();

        let mut headers = BTreeMap::new();
        headers.insert("X-Source".to_string(), "hub".to_string());
        let entry = repo
            .insert(
                OperationType::SaleSync,
                "/sales",
                "post",
                &json!({"total": 12.5}),
                &headers,
                5,
                1_000,
            )
            .await
            .unwrap();

        assert_eq!(entry.http_method, "POST");

        let loaded = repo.get(&entry.id).await.unwrap().unwrap();
        assert_eq!(loaded.operation_type, OperationType::SaleSync);
        assert_eq!(loaded.status, SyncStatus::Pending);
        assert_eq!(loaded.payload, json!({"total": 12.5}));
        assert_eq!(loaded.headers.get("X-Source").map(String::as_str), Some("hub"));
        assert_eq!(loaded.max_retries, 5);
    }

    #[tokio::test]
    async fn test_due_respects_next_retry_at_and_order() {
        let (_temp, db) = setup().await;
        let repo = db.sync_queue();
        let empty = BTreeMap::new();

        let a = repo
            .insert(OperationType::UserRegister, "/users", "POST", &json!({}), &empty, 5, 100)
            .await
            .unwrap();
        let b = repo
            .insert(OperationType::UserUpdate, "/users/1", "PUT", &json!({}), &empty, 5, 100)
            .await
            .unwrap();
        let c = repo
            .insert(OperationType::UserRemove, "/users/1", "DELETE", &json!({}), &empty, 5, 50)
            .await
            .unwrap();

        repo.mark_retry(&b.id, 1, "boom", 500).await.unwrap();

        let due: Vec<String> = repo.due(200, 10).await.unwrap().into_iter().map(|e| e.id).collect();
        assert_eq!(due, vec![c.id.clone(), a.id.clone()]);

        let due_later = repo.due(500, 10).await.unwrap();
        assert_eq!(due_later.len(), 3);
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let (_temp, db) = setup().await;
        let repo = db.sync_queue();

        let entry = repo
            .insert(OperationType::PluginInstall, "/plugins", "POST", &json!({}), &BTreeMap::new(), 5, 1)
            .await
            .unwrap();

        assert!(repo.claim(&entry.id).await.unwrap());
        assert!(!repo.claim(&entry.id).await.unwrap());
        assert!(repo.due(10, 10).await.unwrap().is_empty());

        assert_eq!(repo.reset_processing().await.unwrap(), 1);
        assert!(repo.claim(&entry.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_retry_failed_and_stats() {
        let (_temp, db) = setup().await;
        let repo = db.sync_queue();

        let entry = repo
            .insert(OperationType::PluginUninstall, "/plugins/x", "DELETE", &json!(null), &BTreeMap::new(), 5, 1)
            .await
            .unwrap();
        repo.mark_failed(&entry.id, 5, "gone").await.unwrap();

        let stats = repo.stats().await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.total(), 1);

        assert!(repo.retry_failed(&entry.id).await.unwrap());
        assert!(!repo.retry_failed(&entry.id).await.unwrap());

        let reset = repo.get(&entry.id).await.unwrap().unwrap();
        assert_eq!(reset.status, SyncStatus::Pending);
        assert_eq!(reset.retry_count, 0);
        assert_eq!(reset.last_error.as_deref(), Some("gone"));
    }

    #[tokio::test]
    async fn test_purge_completed() {
        let (_temp, db) = setup().await;
        let repo = db.sync_queue();
        let empty = BTreeMap::new();

        let old = repo
            .insert(OperationType::SaleSync, "/sales", "POST", &json!({}), &empty, 5, 1)
            .await
            .unwrap();
        let fresh = repo
            .insert(OperationType::SaleSync, "/sales", "POST", &json!({}), &empty, 5, 1)
            .await
            .unwrap();
        repo.mark_completed(&old.id, 100).await.unwrap();
        repo.mark_completed(&fresh.id, 900).await.unwrap();

        assert_eq!(repo.purge_completed(500).await.unwrap(), 1);
        assert!(repo.get(&old.id).await.unwrap().is_none());
        assert!(repo.get(&fresh.id).await.unwrap().is_some());

        let completed = repo.list(Some(SyncStatus::Completed), 10).await.unwrap();
        assert_eq!(completed.len(), 1);
    }
}
