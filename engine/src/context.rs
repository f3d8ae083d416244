//! Shared hub state
//!
//! Built once per process from the loaded [`Config`] and passed explicitly to
//! the CLI handlers and the daemon. Nothing in the engine reaches for global
//! state.

use crate::config::Config;
use crate::crypto::TrustedKeyStore;
use crate::db::Database;
use crate::modules::{Installer, ModuleLifecycle, ModuleManager};
use crate::packager::PackageOptions;
use crate::pipeline::{ExtensionPipeline, HookRegistry};
use crate::sync::{credentials, HttpDeliverer, SyncQueue};
use crate::validator::PackageValidator;
use anyhow::{Context, Result};
use sdk::errors::HubError;
use std::sync::Arc;
use std::time::Duration;

pub struct HubContext {
    pub config: Config,
    pub db: Database,
    pub hooks: Arc<HookRegistry>,
    pub modules: Arc<ModuleManager>,
    pub queue: Arc<SyncQueue>,
}

impl HubContext {
    /// Open the database and wire up the components
    pub async fn init(config: Config) -> Result<Self> {
        let db = Database::new(&config.database_path())
            .await
            .context("Failed to open hub database")?;

        let hooks = Arc::new(HookRegistry::with_builtin_hooks());
        let modules = Arc::new(ModuleManager::new(
            config.core.modules_dir.clone(),
            Arc::clone(&hooks),
        ));
        let queue = Arc::new(SyncQueue::from_config(&db, &config.sync));

        Ok(Self {
            config,
            db,
            hooks,
            modules,
            queue,
        })
    }

    /// Validator that knows the hooks compiled into this hub
    pub fn validator(&self) -> Result<PackageValidator> {
        Ok(PackageValidator::new()?.with_known_hooks(self.hooks.names()))
    }

    pub fn package_options(&self, skip_validation: bool) -> PackageOptions {
        PackageOptions {
            skip_validation,
            allow_unsigned: self.config.packaging.allow_unsigned,
            max_size_bytes: self.config.packaging.max_size_bytes(),
        }
    }

    pub fn trusted_keys(&self) -> Result<TrustedKeyStore, HubError> {
        let dir = &self.config.signing.trusted_keys_dir;
        let store = TrustedKeyStore::load_dir(dir).map_err(|e| {
            HubError::Config(format!("Cannot read trusted keys from {}: {}", dir.display(), e))
        })?;
        tracing::debug!(keys = store.len(), "Loaded trusted keys");
        Ok(store)
    }

    /// Installer honoring `packaging.allow_unsigned`
    pub fn installer(&self) -> Result<Installer, HubError> {
        Ok(Installer::new(
            self.config.core.modules_dir.clone(),
            self.trusted_keys()?,
            !self.config.packaging.allow_unsigned,
        ))
    }

    pub fn lifecycle(&self) -> ModuleLifecycle {
        ModuleLifecycle::new(
            Arc::clone(&self.modules),
            self.db.clone(),
            Arc::clone(&self.queue),
        )
    }

    pub fn pipeline(&self) -> ExtensionPipeline {
        ExtensionPipeline::new(Arc::clone(&self.modules))
    }

    /// HTTP deliverer for the configured control plane
    pub fn deliverer(&self) -> Result<HttpDeliverer, HubError> {
        HttpDeliverer::new(
            self.config.cloud.base_url.clone(),
            Duration::from_secs(self.config.sync.timeout_secs),
            credentials::cloud_token(),
            self.config.cloud.hub_id.clone(),
        )
        .map_err(|e| HubError::Network(e.to_string()))
    }

    /// Checkpoint the WAL and close the pool
    pub async fn close(self) -> Result<()> {
        self.db.close().await
    }
}
