//! Hub daemon
//!
//! `hub serve` runs the HTTP surface of the hub in the foreground:
//!
//! 1. Reconciles module records with the modules root
//! 2. Loads every active module into the hook pipeline
//! 3. Returns interrupted queue rows to pending and starts the sync worker
//! 4. Serves the management API, wrapped in the extension pipeline
//!
//! Ctrl-C or SIGTERM stops the listener, waits for the sync worker to finish
//! its current drain and flushes the SQLite WAL.

use crate::context::HubContext;
use crate::modules::{ModuleState, ModuleLifecycle};
use crate::pipeline::{extension_middleware, ExtensionPipeline};
use crate::sync::SyncWorker;
use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{middleware, Json, Router};
use sdk::errors::{HubError, HubErrorExt};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Shared state of the management API
#[derive(Clone)]
pub struct ApiState {
    ctx: Arc<HubContext>,
}

/// [`HubError`] rendered as a JSON response
pub struct ApiError(HubError);

impl From<HubError> for ApiError {
    fn from(err: HubError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            HubError::ModuleNotFound(_) => StatusCode::NOT_FOUND,
            HubError::Activation(_) | HubError::Hook(_) => StatusCode::CONFLICT,
            HubError::ValidationFailed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = json!({
            "error": self.0.to_string(),
            "hint": self.0.user_hint(),
        });
        (status, Json(body)).into_response()
    }
}

/// Management API wrapped in the extension pipeline
pub fn router(ctx: Arc<HubContext>) -> Router {
    let pipeline = Arc::new(ctx.pipeline());
    build_router(ApiState { ctx }, pipeline)
}

fn build_router(state: ApiState, pipeline: Arc<ExtensionPipeline>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/modules", get(list_modules))
        .route("/api/modules/:id/activate", post(activate_module))
        .route("/api/modules/:id/deactivate", post(deactivate_module))
        .route("/api/modules/:id", delete(delete_module))
        .route("/api/queue", get(queue_stats))
        .fallback(not_found)
        .with_state(state)
        .layer(middleware::from_fn_with_state(pipeline, extension_middleware))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "not found" })))
}

async fn list_modules(State(state): State<ApiState>) -> Result<Json<serde_json::Value>, ApiError> {
    let modules = Arc::clone(&state.ctx.modules);
    let discovered = tokio::task::spawn_blocking(move || {
        modules.discover(true).map(|infos| {
            infos
                .into_iter()
                .map(|info| {
                    let state = if !info.is_active {
                        ModuleState::Inactive
                    } else if modules.is_loaded(&info.module_id) {
                        ModuleState::Loaded
                    } else {
                        ModuleState::Active
                    };
                    let permissions = info
                        .manifest
                        .as_ref()
                        .map(|m| m.requested_permissions())
                        .unwrap_or_default();
                    json!({
                        "module_id": info.module_id,
                        "state": state,
                        "version": info.manifest.as_ref().map(|m| m.version.clone()),
                        "name": info.manifest.as_ref().map(|m| m.name.clone()),
                        "permissions": permissions,
                        "has_error": info.has_error,
                        "error": info.error,
                    })
                })
                .collect::<Vec<_>>()
        })
    })
    .await
    .map_err(|e| HubError::Activation(e.to_string()))?
    .map_err(HubError::from)?;

    Ok(Json(json!({ "modules": discovered })))
}

fn lifecycle(state: &ApiState) -> ModuleLifecycle {
    state.ctx.lifecycle()
}

async fn activate_module(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let outcome = lifecycle(&state).activate(&id).await?;
    Ok(Json(json!({
        "module_id": outcome.module_id,
        "restart_required": outcome.restart_required,
    })))
}

async fn deactivate_module(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let outcome = lifecycle(&state).deactivate(&id).await?;
    Ok(Json(json!({
        "module_id": outcome.module_id,
        "restart_required": outcome.restart_required,
    })))
}

async fn delete_module(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    lifecycle(&state).uninstall(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn queue_stats(State(state): State<ApiState>) -> Result<Json<serde_json::Value>, ApiError> {
    let stats = state
        .ctx
        .queue
        .stats()
        .await
        .map_err(|e| HubError::Database(format!("{:#}", e)))?;
    Ok(Json(json!({ "queue": stats, "total": stats.total() })))
}

/// Run the daemon until Ctrl-C or SIGTERM
pub async fn serve(ctx: HubContext) -> Result<()> {
    let ctx = Arc::new(ctx);

    if let Err(e) = ctx.lifecycle().reconcile().await {
        tracing::warn!("Module reconciliation failed: {}", e);
    }

    let report = ctx
        .modules
        .load_active()
        .context("Failed to scan modules root")?;
    tracing::info!(
        loaded = report.loaded.len(),
        failed = report.failed.len(),
        "Active modules loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_handle = if ctx.config.sync.enabled {
        let deliverer = Arc::new(ctx.deliverer()?);
        let worker = Arc::new(SyncWorker::new(
            Arc::clone(&ctx.queue),
            deliverer,
            Duration::from_secs(ctx.config.sync.interval_secs),
            ctx.config.sync.batch_size,
        ));
        Some(worker.spawn(shutdown_rx))
    } else {
        tracing::info!("Sync disabled; queued operations stay local");
        None
    };

    let addr = format!(
        "{}:{}",
        ctx.config.server.bind_address, ctx.config.server.port
    );
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Hub listening on http://{}", addr);

    let app = router(Arc::clone(&ctx));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    tracing::info!("Starting graceful shutdown");
    // The worker may already be gone if it exited on its own
    let _ = shutdown_tx.send(true);
    if let Some(handle) = worker_handle {
        match tokio::time::timeout(Duration::from_secs(30), handle).await {
            Ok(Ok(())) => tracing::info!("Sync worker stopped"),
            Ok(Err(e)) => tracing::error!("Sync worker panicked: {}", e),
            Err(_) => tracing::warn!("Timeout waiting for sync worker, proceeding with shutdown"),
        }
    }

    match Arc::try_unwrap(ctx) {
        Ok(ctx) => ctx.close().await?,
        Err(ctx) => {
            tracing::warn!("Context still shared at shutdown, flushing WAL only");
            ctx.db.flush_wal().await?;
        }
    }

    tracing::info!("Graceful shutdown completed");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl-C"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}
