//! Compiled-in hook registry
//!
//! Manifests name hooks as plain strings. The registry maps each name to a
//! factory and caches one instance per `(module_id, hook_name)`, built on
//! first use and dropped when the module is deactivated or deleted.

use super::ModuleHook;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Builds a hook instance for a module id
pub type HookFactory = Arc<dyn Fn(&str) -> Arc<dyn ModuleHook> + Send + Sync>;

type InstanceKey = (String, String);

#[derive(Default)]
pub struct HookRegistry {
    factories: HashMap<String, HookFactory>,
    instances: RwLock<HashMap<InstanceKey, Arc<dyn ModuleHook>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the hooks shipped in the hub binary
    pub fn with_builtin_hooks() -> Self {
        let mut registry = Self::new();
        super::builtin::register_all(&mut registry);
        registry
    }

    /// Register (or replace) a factory under `name`
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&str) -> Arc<dyn ModuleHook> + Send + Sync + 'static,
    {
        let name = name.into();
        tracing::debug!(hook = %name, "Registered hook factory");
        self.factories.insert(name, Arc::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered hook names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Cached instance for `(module_id, hook_name)`, created on first use
    ///
    /// Returns `None` if no factory is registered under `hook_name`.
    pub fn instance(&self, module_id: &str, hook_name: &str) -> Option<Arc<dyn ModuleHook>> {
        let key = (module_id.to_string(), hook_name.to_string());

        if let Some(hook) = self
            .instances
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Some(Arc::clone(hook));
        }

        let factory = self.factories.get(hook_name)?;
        let mut instances = self
            .instances
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let hook = instances
            .entry(key)
            .or_insert_with(|| factory(module_id));
        Some(Arc::clone(hook))
    }

    /// Drop every cached instance of `module_id`; returns how many were dropped
    pub fn evict_module(&self, module_id: &str) -> usize {
        let mut instances = self
            .instances
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = instances.len();
        instances.retain(|(id, _), _| id != module_id);
        let evicted = before - instances.len();
        if evicted > 0 {
            tracing::debug!(module_id, evicted, "Evicted cached hook instances");
        }
        evicted
    }

    pub fn cached_instances(&self) -> usize {
        self.instances
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
