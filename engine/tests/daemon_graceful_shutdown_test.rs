//! Integration tests for the background sync worker and graceful shutdown

use async_trait::async_trait;
use hub_engine::config::SyncConfig;
use hub_engine::db::{Database, OperationType, SyncQueueEntry};
use hub_engine::sync::{Deliverer, SyncDeliveryError, SyncQueue, SyncWorker};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;
use tokio::time::{sleep, timeout};

#[derive(Default)]
struct Counting {
    delivered: AtomicUsize,
}

#[async_trait]
impl Deliverer for Counting {
    async fn deliver(&self, _entry: &SyncQueueEntry) -> Result<(), SyncDeliveryError> {
        self.delivered.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

async fn setup(temp: &TempDir) -> (Database, Arc<SyncQueue>) {
    let db = Database::new(&temp.path().join("hub.db")).await.unwrap();
    let queue = Arc::new(SyncQueue::from_config(&db, &SyncConfig::default()));
    (db, queue)
}

async fn enqueue(queue: &SyncQueue, n: u32) {
    queue
        .enqueue(
            OperationType::SaleSync,
            "/hub/sales",
            "POST",
            json!({ "sale_id": n }),
            BTreeMap::new(),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_worker_drains_then_stops_on_signal() {
    let temp = TempDir::new().unwrap();
    let (db, queue) = setup(&temp).await;
    for n in 0..3 {
        enqueue(&queue, n).await;
    }

    let deliverer = Arc::new(Counting::default());
    let worker = Arc::new(SyncWorker::new(
        Arc::clone(&queue),
        Arc::clone(&deliverer) as Arc<dyn Deliverer>,
        Duration::from_millis(50),
        10,
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = worker.spawn(shutdown_rx);

    // The first tick fires immediately
    for _ in 0..50 {
        if deliverer.delivered.load(Ordering::SeqCst) == 3 {
            break;
        }
        sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(deliverer.delivered.load(Ordering::SeqCst), 3);

    shutdown_tx.send(true).unwrap();
    timeout(Duration::from_secs(5), handle)
        .await
        .expect("worker did not stop")
        .unwrap();

    assert_eq!(queue.stats().await.unwrap().completed, 3);
    db.close().await.unwrap();
}

#[tokio::test]
async fn test_worker_stops_when_sender_dropped() {
    let temp = TempDir::new().unwrap();
    let (db, queue) = setup(&temp).await;

    let worker = Arc::new(SyncWorker::new(
        Arc::clone(&queue),
        Arc::new(Counting::default()),
        Duration::from_secs(3600),
        10,
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = worker.spawn(shutdown_rx);

    drop(shutdown_tx);
    timeout(Duration::from_secs(5), handle)
        .await
        .expect("worker did not stop")
        .unwrap();

    db.close().await.unwrap();
}

#[tokio::test]
async fn test_worker_start_recovers_interrupted_rows() {
    let temp = TempDir::new().unwrap();
    let (db, queue) = setup(&temp).await;
    enqueue(&queue, 1).await;
    let id = queue.list(None, 1).await.unwrap()[0].id.clone();

    // Simulate a drain that died mid-delivery
    assert!(db.sync_queue().claim(&id).await.unwrap());

    let deliverer = Arc::new(Counting::default());
    let worker = Arc::new(SyncWorker::new(
        Arc::clone(&queue),
        Arc::clone(&deliverer) as Arc<dyn Deliverer>,
        Duration::from_millis(50),
        10,
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = worker.spawn(shutdown_rx);

    for _ in 0..50 {
        if deliverer.delivered.load(Ordering::SeqCst) == 1 {
            break;
        }
        sleep(Duration::from_millis(20)).await;
    }
    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();

    assert_eq!(deliverer.delivered.load(Ordering::SeqCst), 1);
    assert_eq!(queue.stats().await.unwrap().processing, 0);
    db.close().await.unwrap();
}

#[tokio::test]
async fn test_close_checkpoints_wal() {
    let temp = TempDir::new().unwrap();
    let db_path = temp.path().join("hub.db");
    let (db, queue) = setup(&temp).await;
    for n in 0..20 {
        enqueue(&queue, n).await;
    }
    drop(queue);

    db.close().await.unwrap();

    let wal = temp.path().join("hub.db-wal");
    assert!(!wal.exists() || std::fs::metadata(&wal).unwrap().len() == 0);

    // Data survives a reopen
    let db = Database::new(&db_path).await.unwrap();
    let stats = db.sync_queue().stats().await.unwrap();
    assert_eq!(stats.pending, 20);
    db.close().await.unwrap();
}
