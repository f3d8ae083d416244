//! Integration tests for HTTP delivery of queued operations
//!
//! Drives the queue against a mock control plane

use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::{
    matchers::{body_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

use hub_engine::config::SyncConfig;
use hub_engine::db::{Database, OperationType, SyncStatus};
use hub_engine::sync::{Deliverer, HttpDeliverer, SyncDeliveryError, SyncQueue};

async fn queue(temp: &TempDir) -> (Database, SyncQueue) {
    let db = Database::new(&temp.path().join("hub.db")).await.unwrap();
    let queue = SyncQueue::from_config(&db, &SyncConfig::default());
    (db, queue)
}

fn deliverer(server: &MockServer, token: Option<&str>) -> HttpDeliverer {
    HttpDeliverer::new(
        format!("{}/api/", server.uri()),
        Duration::from_secs(5),
        token.map(str::to_string),
        Some("hub-0042".to_string()),
    )
    .unwrap()
}

#[tokio::test]
async fn test_delivery_sends_token_hub_id_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/hub/modules"))
        .and(header("authorization", "Bearer s3cret"))
        .and(header("x-hub-id", "hub-0042"))
        .and(header("x-request-source", "pos-3"))
        .and(body_json(json!({ "module_id": "reports", "version": "1.2.0" })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let temp = TempDir::new().unwrap();
    let (db, queue) = queue(&temp).await;
    let mut headers = BTreeMap::new();
    headers.insert("X-Request-Source".to_string(), "pos-3".to_string());
    let entry = queue
        .enqueue(
            OperationType::PluginInstall,
            "/hub/modules",
            "POST",
            json!({ "module_id": "reports", "version": "1.2.0" }),
            headers,
        )
        .await
        .unwrap();

    let report = queue
        .drain(&deliverer(&server, Some("s3cret")), 10)
        .await
        .unwrap();

    assert_eq!(report.delivered, 1);
    let row = queue.get(&entry.id).await.unwrap().unwrap();
    assert_eq!(row.status, SyncStatus::Completed);

    db.close().await.unwrap();
}

#[tokio::test]
async fn test_queued_header_cannot_replace_token() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/hub/modules/reports"))
        .and(header("authorization", "Bearer s3cret"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let temp = TempDir::new().unwrap();
    let (db, queue) = queue(&temp).await;
    let mut headers = BTreeMap::new();
    headers.insert("Authorization".to_string(), "Bearer forged".to_string());
    queue
        .enqueue(
            OperationType::PluginUninstall,
            "/hub/modules/reports",
            "DELETE",
            json!({ "module_id": "reports" }),
            headers,
        )
        .await
        .unwrap();

    let report = queue
        .drain(&deliverer(&server, Some("s3cret")), 10)
        .await
        .unwrap();
    assert_eq!(report.delivered, 1);

    db.close().await.unwrap();
}

#[tokio::test]
async fn test_server_error_is_retried_with_status_in_last_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/hub/users"))
        .respond_with(ResponseTemplate::new(500).set_body_string("database locked"))
        .mount(&server)
        .await;

    let temp = TempDir::new().unwrap();
    let (db, queue) = queue(&temp).await;
    let entry = queue
        .enqueue(
            OperationType::UserRegister,
            "hub/users",
            "POST",
            json!({ "username": "cashier1" }),
            BTreeMap::new(),
        )
        .await
        .unwrap();

    let report = queue.drain(&deliverer(&server, None), 10).await.unwrap();
    assert_eq!(report.rescheduled, 1);

    let row = queue.get(&entry.id).await.unwrap().unwrap();
    assert_eq!(row.status, SyncStatus::Pending);
    assert_eq!(row.retry_count, 1);
    let error = row.last_error.unwrap();
    assert!(error.contains("500"), "last_error: {}", error);
    assert!(error.contains("database locked"));

    db.close().await.unwrap();
}

#[tokio::test]
async fn test_slow_server_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/api/hub/users/7"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let temp = TempDir::new().unwrap();
    let (db, queue) = queue(&temp).await;
    let entry = queue
        .enqueue(
            OperationType::UserUpdate,
            "/hub/users/7",
            "PUT",
            json!({ "role": "manager" }),
            BTreeMap::new(),
        )
        .await
        .unwrap();

    let impatient = HttpDeliverer::new(
        format!("{}/api", server.uri()),
        Duration::from_millis(200),
        None,
        None,
    )
    .unwrap();

    let err = impatient.deliver(&entry).await.unwrap_err();
    assert!(matches!(err, SyncDeliveryError::Timeout(_)), "got {:?}", err);

    db.close().await.unwrap();
}

#[tokio::test]
async fn test_absolute_endpoint_bypasses_base_url() {
    let other = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ingest/sales"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&other)
        .await;
    let base = MockServer::start().await;

    let temp = TempDir::new().unwrap();
    let (db, queue) = queue(&temp).await;
    queue
        .enqueue(
            OperationType::SaleSync,
            &format!("{}/ingest/sales", other.uri()),
            "POST",
            json!({ "sale_id": 9 }),
            BTreeMap::new(),
        )
        .await
        .unwrap();

    let report = queue.drain(&deliverer(&base, None), 10).await.unwrap();
    assert_eq!(report.delivered, 1);

    db.close().await.unwrap();
}
