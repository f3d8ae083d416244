//! Outbound delivery of queued operations

use crate::db::SyncQueueEntry;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Method};
use std::time::Duration;
use thiserror::Error;

/// Header carrying the hub id on every delivery
pub const HUB_ID_HEADER: &str = "x-hub-id";

/// Why a delivery attempt failed
///
/// Every variant is retried with backoff; none is treated as permanent.
#[derive(Debug, Error)]
pub enum SyncDeliveryError {
    #[error("Request to {0} timed out")]
    Timeout(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Server answered {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Cannot build request: {0}")]
    InvalidRequest(String),
}

/// Sends one queued operation
#[async_trait]
pub trait Deliverer: Send + Sync {
    async fn deliver(&self, entry: &SyncQueueEntry) -> Result<(), SyncDeliveryError>;
}

/// Delivers over HTTPS to the control plane
pub struct HttpDeliverer {
    client: Client,
    base_url: String,
    token: Option<String>,
    hub_id: Option<String>,
}

impl HttpDeliverer {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        token: Option<String>,
        hub_id: Option<String>,
    ) -> Result<Self, SyncDeliveryError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(format!("cpos-hub/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncDeliveryError::Transport(e.to_string()))?;

        if token.is_none() {
            tracing::warn!("No cloud token configured; deliveries will be unauthenticated");
        }

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            hub_id,
        })
    }

    /// Absolute URL for an endpoint; relative paths are joined to the base URL
    pub fn url_for(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else {
            format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
        }
    }

    fn headers_for(&self, entry: &SyncQueueEntry) -> Result<HeaderMap, SyncDeliveryError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &entry.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| SyncDeliveryError::InvalidRequest(format!("header {}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| SyncDeliveryError::InvalidRequest(format!("header {}: {}", name, e)))?;
            headers.insert(name, value);
        }

        if let Some(hub_id) = &self.hub_id {
            let value = HeaderValue::from_str(hub_id)
                .map_err(|e| SyncDeliveryError::InvalidRequest(format!("hub id: {}", e)))?;
            headers.insert(HUB_ID_HEADER, value);
        }

        // Attached last so a queued header can never override it
        if let Some(token) = &self.token {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| SyncDeliveryError::InvalidRequest("malformed cloud token".into()))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        Ok(headers)
    }
}

#[async_trait]
impl Deliverer for HttpDeliverer {
    async fn deliver(&self, entry: &SyncQueueEntry) -> Result<(), SyncDeliveryError> {
        let method = Method::from_bytes(entry.http_method.as_bytes())
            .map_err(|e| SyncDeliveryError::InvalidRequest(e.to_string()))?;
        let url = self.url_for(&entry.endpoint);

        let mut request = self
            .client
            .request(method.clone(), &url)
            .headers(self.headers_for(entry)?);
        if method != Method::GET && !entry.payload.is_null() {
            request = request.json(&entry.payload);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                SyncDeliveryError::Timeout(url.clone())
            } else {
                SyncDeliveryError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body: String = response
            .text()
            .await
            .unwrap_or_default()
            .chars()
            .take(512)
            .collect();
        Err(SyncDeliveryError::Status {
            status: status.as_u16(),
            body,
        })
    }
}
