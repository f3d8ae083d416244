//! Request-time extension pipeline
//!
//! Wraps the hub's HTTP router. On every request the set of active modules is
//! read from the modules root (no caching of the active set, so an activation
//! is visible on the next request), each active and loaded module contributes
//! the hooks its manifest declares, and the hooks run around the inner
//! service:
//!
//! 1. `on_request` in module-id order, then manifest declaration order. The
//!    first hook that returns a response short-circuits: later pre-hooks and
//!    the inner service are skipped.
//! 2. `on_response` in reverse, over exactly the hooks whose `on_request` ran.
//!
//! Hook instances are shared across requests and must not keep per-request
//! state.

pub mod builtin;
pub mod registry;

pub use registry::{HookFactory, HookRegistry};

use crate::modules::ModuleManager;
use async_trait::async_trait;
use axum::body::Body;
use axum::extract::State;
use axum::http::{Method, Request};
use axum::middleware::Next;
use axum::response::Response;
use std::future::Future;
use std::sync::Arc;

/// A request hook contributed by a module
#[async_trait]
pub trait ModuleHook: Send + Sync {
    /// Registry name of this hook
    fn name(&self) -> &str;

    /// Inspect or rewrite the request; returning a response short-circuits
    async fn on_request(&self, _request: &mut Request<Body>) -> Option<Response> {
        None
    }

    /// Inspect or rewrite the response
    async fn on_response(&self, _info: &RequestInfo, response: Response) -> Response {
        response
    }
}

/// Request line as seen by the first pre-hook
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub method: Method,
    pub path: String,
}

/// A resolved hook together with the module that declared it
#[derive(Clone)]
pub struct BoundHook {
    pub module_id: String,
    pub hook: Arc<dyn ModuleHook>,
}

pub struct ExtensionPipeline {
    modules: Arc<ModuleManager>,
}

impl ExtensionPipeline {
    pub fn new(modules: Arc<ModuleManager>) -> Self {
        Self { modules }
    }

    /// Hooks to run for a request arriving now
    ///
    /// A discovery failure is logged and yields no hooks; the request is
    /// still served.
    pub async fn active_hooks(&self) -> Vec<BoundHook> {
        let manager = Arc::clone(&self.modules);
        let active = match tokio::task::spawn_blocking(move || manager.active_module_ids()).await {
            Ok(Ok(ids)) => ids,
            Ok(Err(e)) => {
                tracing::warn!("Module discovery failed, running without hooks: {}", e);
                return Vec::new();
            }
            Err(e) => {
                tracing::warn!("Module discovery task failed: {}", e);
                return Vec::new();
            }
        };

        let registry = self.modules.hooks();
        let mut bound = Vec::new();
        for module_id in active {
            // Active on disk but not loaded since the last restart
            let Some(hook_names) = self.modules.loaded_hooks(&module_id) else {
                continue;
            };
            for name in hook_names {
                match registry.instance(&module_id, &name) {
                    Some(hook) => bound.push(BoundHook {
                        module_id: module_id.clone(),
                        hook,
                    }),
                    None => tracing::warn!(
                        module_id = %module_id,
                        hook = %name,
                        "Hook disappeared from registry"
                    ),
                }
            }
        }
        bound
    }

    /// Run the hooks around `inner`
    pub async fn run<F, Fut>(&self, request: Request<Body>, inner: F) -> Response
    where
        F: FnOnce(Request<Body>) -> Fut,
        Fut: Future<Output = Response>,
    {
        let hooks = self.active_hooks().await;
        run_hooks(&hooks, request, inner).await
    }
}

/// Run `hooks` around `inner`
pub async fn run_hooks<F, Fut>(hooks: &[BoundHook], mut request: Request<Body>, inner: F) -> Response
where
    F: FnOnce(Request<Body>) -> Fut,
    Fut: Future<Output = Response>,
{
    let info = RequestInfo {
        method: request.method().clone(),
        path: request.uri().path().to_string(),
    };

    let mut ran = 0;
    let mut short_circuit = None;
    for bound in hooks {
        ran += 1;
        if let Some(response) = bound.hook.on_request(&mut request).await {
            tracing::debug!(
                module_id = %bound.module_id,
                hook = bound.hook.name(),
                path = %info.path,
                "Request short-circuited by hook"
            );
            short_circuit = Some(response);
            break;
        }
    }

    let mut response = match short_circuit {
        Some(response) => response,
        None => inner(request).await,
    };

    for bound in hooks[..ran].iter().rev() {
        response = bound.hook.on_response(&info, response).await;
    }

    response
}

/// axum middleware entry point, installed with `middleware::from_fn_with_state`
pub async fn extension_middleware(
    State(pipeline): State<Arc<ExtensionPipeline>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    pipeline.run(request, |request| next.run(request)).await
}
