//! Hooks compiled into the hub
//!
//! - `module_header`: tags every response with `x-cpos-module: <id>`
//! - `read_only`: refuses mutating requests under the module's `/m/<id>/` prefix

use super::registry::HookRegistry;
use super::{ModuleHook, RequestInfo};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderName, HeaderValue, Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

pub const MODULE_HEADER_HOOK: &str = "module_header";
pub const READ_ONLY_HOOK: &str = "read_only";

/// Response header added by [`ModuleHeaderHook`]
pub const MODULE_HEADER: HeaderName = HeaderName::from_static("x-cpos-module");

pub(super) fn register_all(registry: &mut HookRegistry) {
    registry.register(MODULE_HEADER_HOOK, |module_id: &str| {
        Arc::new(ModuleHeaderHook::new(module_id)) as Arc<dyn ModuleHook>
    });
    registry.register(READ_ONLY_HOOK, |module_id: &str| {
        Arc::new(ReadOnlyHook::new(module_id)) as Arc<dyn ModuleHook>
    });
}

pub struct ModuleHeaderHook {
    module_id: String,
}

impl ModuleHeaderHook {
    pub fn new(module_id: &str) -> Self {
        Self {
            module_id: module_id.to_string(),
        }
    }
}

#[async_trait]
impl ModuleHook for ModuleHeaderHook {
    fn name(&self) -> &str {
        MODULE_HEADER_HOOK
    }

    async fn on_response(&self, _info: &RequestInfo, mut response: Response) -> Response {
        if let Ok(value) = HeaderValue::from_str(&self.module_id) {
            response.headers_mut().append(MODULE_HEADER, value);
        }
        response
    }
}

pub struct ReadOnlyHook {
    prefix: String,
}

impl ReadOnlyHook {
    pub fn new(module_id: &str) -> Self {
        Self {
            prefix: format!("/m/{}/", module_id),
        }
    }
}

#[async_trait]
impl ModuleHook for ReadOnlyHook {
    fn name(&self) -> &str {
        READ_ONLY_HOOK
    }

    async fn on_request(&self, request: &mut Request<Body>) -> Option<Response> {
        let safe = matches!(
            *request.method(),
            Method::GET | Method::HEAD | Method::OPTIONS
        );
        if safe || !request.uri().path().starts_with(&self.prefix) {
            return None;
        }

        tracing::debug!(
            method = %request.method(),
            path = %request.uri().path(),
            "Rejected write to read-only module"
        );
        Some((StatusCode::METHOD_NOT_ALLOWED, "module is read-only").into_response())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_only_only_guards_own_prefix() {
        let hook = ReadOnlyHook::new("reports");

        let mut post = Request::post("/m/reports/export").body(Body::empty()).unwrap();
        let response = hook.on_request(&mut post).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

        let mut get = Request::get("/m/reports/export").body(Body::empty()).unwrap();
        assert!(hook.on_request(&mut get).await.is_none());

        let mut other = Request::post("/m/inventory/items").body(Body::empty()).unwrap();
        assert!(hook.on_request(&mut other).await.is_none());
    }
}
