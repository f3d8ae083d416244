//! Module lifecycle on the filesystem
//!
//! A module's state is encoded in its directory name under the modules root:
//!
//! | Directory   | State    |
//! |-------------|----------|
//! | `<id>`      | active   |
//! | `_<id>`     | inactive |
//! | `.<id>`     | hidden (never discovered) |
//!
//! Activation and deactivation are a single `rename` between the first two
//! forms. A rename is atomic on one filesystem, so a request never sees a
//! half-activated module. Loading is separate: an active module only
//! contributes hooks once [`ModuleManager::load`] registered it, which the
//! daemon does at startup. That is why activation reports `restart_required`.

pub mod installer;
pub mod lifecycle;

pub use installer::{InstallError, InstallOutcome, Installer};
pub use lifecycle::ModuleLifecycle;

use crate::pipeline::HookRegistry;
use sdk::errors::HubError;
use sdk::{is_valid_module_id, ModuleManifest, MANIFEST_FILE};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

/// Lifecycle errors
#[derive(Debug, Error)]
pub enum ActivationError {
    #[error("Invalid module id '{0}': only letters, digits, '_' and '-' are allowed, with no leading '_'")]
    InvalidId(String),

    #[error("Module '{0}' not found")]
    NotFound(String),

    #[error("Both '{module_id}' and '_{module_id}' exist; remove one of them by hand")]
    Conflict { module_id: String },

    #[error("Module '{0}' is not active")]
    NotActive(String),

    #[error("Module '{module_id}' has an unusable manifest: {reason}")]
    Manifest { module_id: String, reason: String },

    #[error("Module '{module_id}' declares unknown hook '{hook}'")]
    UnknownHook { module_id: String, hook: String },

    #[error("Failed to rename {} to {}: {reason}", .from.display(), .to.display())]
    Rename {
        from: PathBuf,
        to: PathBuf,
        reason: String,
    },

    #[error("Module '{0}' disappeared during rename")]
    Vanished(String),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<ActivationError> for HubError {
    fn from(err: ActivationError) -> Self {
        match err {
            ActivationError::NotFound(id) => HubError::ModuleNotFound(id),
            ActivationError::UnknownHook { .. } => HubError::Hook(err.to_string()),
            other => HubError::Activation(other.to_string()),
        }
    }
}

/// Observable state of a module id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleState {
    Absent,
    Inactive,
    Active,
    /// Active and registered with the hook pipeline
    Loaded,
}

/// One discovered module directory
#[derive(Debug, Clone, Serialize)]
pub struct ModuleInfo {
    pub module_id: String,
    pub path: PathBuf,
    pub is_active: bool,
    pub manifest: Option<ModuleManifest>,
    pub has_error: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivationOutcome {
    pub module_id: String,
    /// The change takes effect after the daemon reloads modules
    pub restart_required: bool,
    pub path: PathBuf,
}

/// A module registered with the pipeline
#[derive(Debug, Clone)]
pub struct LoadedModule {
    pub manifest: ModuleManifest,
    pub hooks: Vec<String>,
}

/// Result of loading every active module at startup
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    pub failed: Vec<(String, ActivationError)>,
}

pub struct ModuleManager {
    root: PathBuf,
    hooks: Arc<HookRegistry>,
    loaded: RwLock<BTreeMap<String, LoadedModule>>,
}

impl ModuleManager {
    pub fn new(root: impl Into<PathBuf>, hooks: Arc<HookRegistry>) -> Self {
        Self {
            root: root.into(),
            hooks,
            loaded: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn hooks(&self) -> &Arc<HookRegistry> {
        &self.hooks
    }

    pub fn active_path(&self, module_id: &str) -> PathBuf {
        self.root.join(module_id)
    }

    pub fn inactive_path(&self, module_id: &str) -> PathBuf {
        self.root.join(format!("_{}", module_id))
    }

    /// Directory of `module_id` in whichever state it is in
    pub fn module_path(&self, module_id: &str) -> Option<PathBuf> {
        [self.active_path(module_id), self.inactive_path(module_id)]
            .into_iter()
            .find(|p| p.is_dir())
    }

    /// List module directories under the root, sorted by module id
    ///
    /// Hidden (`.`-prefixed) directories and names that are not valid module
    /// ids are skipped. A missing root yields an empty list.
    pub fn discover(&self, include_inactive: bool) -> Result<Vec<ModuleInfo>, ActivationError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(ActivationError::Io {
                    path: self.root.clone(),
                    source,
                })
            }
        };

        let mut modules = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| ActivationError::Io {
                path: self.root.clone(),
                source,
            })?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }

            let Some(dir_name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if dir_name.starts_with('.') {
                continue;
            }

            let (module_id, is_active) = match dir_name.strip_prefix('_') {
                Some(id) => (id.to_string(), false),
                None => (dir_name.clone(), true),
            };
            if !is_active && !include_inactive {
                continue;
            }
            if !is_valid_module_id(&module_id) {
                tracing::debug!("Skipping directory with invalid module name: {}", dir_name);
                continue;
            }

            modules.push(describe(module_id, path, is_active));
        }

        modules.sort_by(|a, b| {
            a.module_id
                .cmp(&b.module_id)
                .then(b.is_active.cmp(&a.is_active))
        });
        Ok(modules)
    }

    /// Ids of the active modules, sorted
    pub fn active_module_ids(&self) -> Result<Vec<String>, ActivationError> {
        Ok(self
            .discover(false)?
            .into_iter()
            .map(|m| m.module_id)
            .collect())
    }

    pub fn state(&self, module_id: &str) -> Result<ModuleState, ActivationError> {
        check_id(module_id)?;
        if self.active_path(module_id).is_dir() {
            if self.is_loaded(module_id) {
                Ok(ModuleState::Loaded)
            } else {
                Ok(ModuleState::Active)
            }
        } else if self.inactive_path(module_id).is_dir() {
            Ok(ModuleState::Inactive)
        } else {
            Ok(ModuleState::Absent)
        }
    }

    /// Rename `_<id>` to `<id>`
    ///
    /// Activating an active module is a no-op with `restart_required = false`.
    pub fn activate(&self, module_id: &str) -> Result<ActivationOutcome, ActivationError> {
        check_id(module_id)?;
        let active = self.active_path(module_id);
        let inactive = self.inactive_path(module_id);

        match (active.is_dir(), inactive.is_dir()) {
            (true, true) => Err(ActivationError::Conflict {
                module_id: module_id.to_string(),
            }),
            (true, false) => {
                tracing::debug!(module_id, "Module already active");
                Ok(ActivationOutcome {
                    module_id: module_id.to_string(),
                    restart_required: false,
                    path: active,
                })
            }
            (false, false) => Err(ActivationError::NotFound(module_id.to_string())),
            (false, true) => {
                rename_checked(module_id, &inactive, &active)?;
                tracing::info!(module_id, "Module activated");
                Ok(ActivationOutcome {
                    module_id: module_id.to_string(),
                    restart_required: true,
                    path: active,
                })
            }
        }
    }

    /// Rename `<id>` to `_<id>` and drop its hooks
    ///
    /// Hooks stop running on the next request, so no restart is needed.
    pub fn deactivate(&self, module_id: &str) -> Result<ActivationOutcome, ActivationError> {
        check_id(module_id)?;
        let active = self.active_path(module_id);
        let inactive = self.inactive_path(module_id);

        match (active.is_dir(), inactive.is_dir()) {
            (true, true) => Err(ActivationError::Conflict {
                module_id: module_id.to_string(),
            }),
            (false, true) => {
                self.unload(module_id);
                Ok(ActivationOutcome {
                    module_id: module_id.to_string(),
                    restart_required: false,
                    path: inactive,
                })
            }
            (false, false) => Err(ActivationError::NotFound(module_id.to_string())),
            (true, false) => {
                rename_checked(module_id, &active, &inactive)?;
                self.unload(module_id);
                tracing::info!(module_id, "Module deactivated");
                Ok(ActivationOutcome {
                    module_id: module_id.to_string(),
                    restart_required: false,
                    path: inactive,
                })
            }
        }
    }

    /// Remove the module directory in whichever state it is in
    pub fn delete(&self, module_id: &str) -> Result<(), ActivationError> {
        check_id(module_id)?;
        let existing: Vec<PathBuf> = [self.active_path(module_id), self.inactive_path(module_id)]
            .into_iter()
            .filter(|p| p.is_dir())
            .collect();

        if existing.is_empty() {
            return Err(ActivationError::NotFound(module_id.to_string()));
        }

        self.unload(module_id);
        for path in existing {
            fs::remove_dir_all(&path).map_err(|source| ActivationError::Io {
                path: path.clone(),
                source,
            })?;
        }

        tracing::info!(module_id, "Module deleted");
        Ok(())
    }

    /// Register an active module and its hooks with the pipeline
    ///
    /// Loading a loaded module returns the existing registration. On any
    /// failure nothing is registered.
    pub fn load(&self, module_id: &str) -> Result<LoadedModule, ActivationError> {
        check_id(module_id)?;

        if let Some(existing) = self.read_loaded().get(module_id) {
            return Ok(existing.clone());
        }

        let path = self.active_path(module_id);
        if !path.is_dir() {
            return Err(if self.inactive_path(module_id).is_dir() {
                ActivationError::NotActive(module_id.to_string())
            } else {
                ActivationError::NotFound(module_id.to_string())
            });
        }

        let manifest =
            read_manifest(&path).map_err(|reason| ActivationError::Manifest {
                module_id: module_id.to_string(),
                reason,
            })?;
        if manifest.module_id != module_id {
            return Err(ActivationError::Manifest {
                module_id: module_id.to_string(),
                reason: format!(
                    "manifest module_id '{}' does not match directory",
                    manifest.module_id
                ),
            });
        }

        if let Some(unknown) = manifest.hooks.iter().find(|h| !self.hooks.contains(h)) {
            return Err(ActivationError::UnknownHook {
                module_id: module_id.to_string(),
                hook: unknown.clone(),
            });
        }

        for hook in &manifest.hooks {
            self.hooks.instance(module_id, hook);
        }

        let permissions = manifest.requested_permissions();
        if !permissions.is_empty() {
            tracing::info!(
                module_id,
                permissions = %permissions.join(","),
                "Module requests permissions (not enforced)"
            );
        }

        let loaded = LoadedModule {
            hooks: manifest.hooks.clone(),
            manifest,
        };

        let mut registry = self.loaded.write().unwrap_or_else(PoisonError::into_inner);
        let entry = registry
            .entry(module_id.to_string())
            .or_insert(loaded)
            .clone();
        drop(registry);

        tracing::info!(module_id, hooks = entry.hooks.len(), "Module loaded");
        Ok(entry)
    }

    /// Load every active module, collecting failures instead of stopping
    pub fn load_active(&self) -> Result<LoadReport, ActivationError> {
        let mut report = LoadReport::default();
        for module_id in self.active_module_ids()? {
            match self.load(&module_id) {
                Ok(_) => report.loaded.push(module_id),
                Err(e) => {
                    tracing::warn!(module_id = %module_id, "Failed to load module: {}", e);
                    report.failed.push((module_id, e));
                }
            }
        }
        Ok(report)
    }

    /// Drop the registration and cached hook instances of `module_id`
    pub fn unload(&self, module_id: &str) -> bool {
        let removed = self
            .loaded
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(module_id)
            .is_some();
        self.hooks.evict_module(module_id);
        removed
    }

    pub fn is_loaded(&self, module_id: &str) -> bool {
        self.read_loaded().contains_key(module_id)
    }

    /// Hook names of a loaded module, in declaration order
    pub fn loaded_hooks(&self, module_id: &str) -> Option<Vec<String>> {
        self.read_loaded().get(module_id).map(|m| m.hooks.clone())
    }

    fn read_loaded(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, LoadedModule>> {
        self.loaded.read().unwrap_or_else(PoisonError::into_inner)
    }
}

fn check_id(module_id: &str) -> Result<(), ActivationError> {
    if is_valid_module_id(module_id) {
        Ok(())
    } else {
        Err(ActivationError::InvalidId(module_id.to_string()))
    }
}

fn describe(module_id: String, path: PathBuf, is_active: bool) -> ModuleInfo {
    let manifest_path = path.join(MANIFEST_FILE);
    let (manifest, error) = if manifest_path.is_file() {
        match read_manifest(&path) {
            Ok(manifest) => (Some(manifest), None),
            Err(reason) => (None, Some(reason)),
        }
    } else {
        (None, None)
    };

    ModuleInfo {
        module_id,
        path,
        is_active,
        manifest,
        has_error: error.is_some(),
        error,
    }
}

fn read_manifest(module_dir: &Path) -> Result<ModuleManifest, String> {
    let path = module_dir.join(MANIFEST_FILE);
    let json = fs::read_to_string(&path).map_err(|e| format!("{}: {}", path.display(), e))?;
    ModuleManifest::from_json(&json).map_err(|e| format!("{}: {}", path.display(), e))
}

/// Rename and confirm the result
///
/// - target present, source gone: done
/// - both present: something recreated the source meanwhile, report a conflict
/// - target missing, source present: the rename did not happen, state unchanged
/// - both missing: the directory vanished underneath us
fn rename_checked(module_id: &str, from: &Path, to: &Path) -> Result<(), ActivationError> {
    fs::rename(from, to).map_err(|e| ActivationError::Rename {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        reason: e.to_string(),
    })?;

    match (to.is_dir(), from.exists()) {
        (true, false) => Ok(()),
        (true, true) => Err(ActivationError::Conflict {
            module_id: module_id.to_string(),
        }),
        (false, true) => Err(ActivationError::Rename {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
            reason: "target missing after rename".to_string(),
        }),
        (false, false) => {
            tracing::error!(module_id, "Module directory vanished during rename");
            Err(ActivationError::Vanished(module_id.to_string()))
        }
    }
}
