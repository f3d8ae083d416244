//! Lifecycle operations with bookkeeping
//!
//! [`ModuleManager`] only moves directories. This layer records each
//! successful transition in `installed_modules` and queues the control-plane
//! notification. The directory change comes first; the record follows.

use super::installer::download;
use super::{ActivationOutcome, InstallOutcome, Installer, ModuleManager};
use crate::db::{Database, OperationType, PersistedState};
use crate::sync::SyncQueue;
use sdk::errors::HubError;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Control-plane endpoint for install notifications
pub const INSTALL_ENDPOINT: &str = "/hub/modules";

fn db_err(e: anyhow::Error) -> HubError {
    HubError::Database(format!("{:#}", e))
}

pub struct ModuleLifecycle {
    manager: Arc<ModuleManager>,
    db: Database,
    queue: Arc<SyncQueue>,
}

impl ModuleLifecycle {
    pub fn new(manager: Arc<ModuleManager>, db: Database, queue: Arc<SyncQueue>) -> Self {
        Self { manager, db, queue }
    }

    pub fn manager(&self) -> &Arc<ModuleManager> {
        &self.manager
    }

    /// Install an archive as an inactive module
    pub async fn install(
        &self,
        installer: &Installer,
        archive: &Path,
    ) -> Result<InstallOutcome, HubError> {
        let outcome = installer.install_archive(archive)?;

        let manifest_json = outcome
            .manifest
            .to_json()
            .map_err(|e| HubError::Install(format!("Failed to encode manifest: {}", e)))?;
        self.db
            .modules()
            .upsert(
                &outcome.module_id,
                &outcome.version,
                PersistedState::Inactive,
                outcome.content_hash.as_deref(),
                &manifest_json,
            )
            .await
            .map_err(db_err)?;

        self.notify(
            OperationType::PluginInstall,
            INSTALL_ENDPOINT,
            "POST",
            json!({
                "module_id": outcome.module_id,
                "version": outcome.version,
                "content_hash": outcome.content_hash,
            }),
        )
        .await;

        Ok(outcome)
    }

    /// Download an archive, check its SHA-256 and install it
    ///
    /// The downloaded copy is deleted afterwards, whether the install
    /// succeeded or not.
    pub async fn install_from_url(
        &self,
        installer: &Installer,
        url: &str,
        expected_sha256: &str,
        downloads_dir: &Path,
    ) -> Result<InstallOutcome, HubError> {
        let archive = download(url, expected_sha256, downloads_dir).await?;
        let result = self.install(installer, &archive).await;

        if let Err(e) = tokio::fs::remove_file(&archive).await {
            tracing::warn!(
                "Failed to remove downloaded archive {}: {}",
                archive.display(),
                e
            );
        }
        result
    }

    pub async fn activate(&self, module_id: &str) -> Result<ActivationOutcome, HubError> {
        let outcome = self.manager.activate(module_id)?;
        self.record_state(module_id, PersistedState::Active).await?;
        Ok(outcome)
    }

    pub async fn deactivate(&self, module_id: &str) -> Result<ActivationOutcome, HubError> {
        let outcome = self.manager.deactivate(module_id)?;
        self.record_state(module_id, PersistedState::Inactive).await?;
        Ok(outcome)
    }

    /// Delete the module directory, drop its record and notify the cloud
    pub async fn uninstall(&self, module_id: &str) -> Result<(), HubError> {
        self.manager.delete(module_id)?;
        self.db.modules().delete(module_id).await.map_err(db_err)?;

        self.notify(
            OperationType::PluginUninstall,
            &format!("{}/{}", INSTALL_ENDPOINT, module_id),
            "DELETE",
            json!({ "module_id": module_id }),
        )
        .await;

        Ok(())
    }

    /// Bring `installed_modules` in line with the modules root
    ///
    /// The directories win: modules copied in by hand get a record, records
    /// whose directory is gone are dropped. Returns the number of changes.
    pub async fn reconcile(&self) -> Result<usize, HubError> {
        let repo = self.db.modules();
        let discovered = self.manager.discover(true)?;
        let records: BTreeMap<String, PersistedState> = repo
            .list()
            .await
            .map_err(db_err)?
            .into_iter()
            .map(|r| (r.module_id, r.state))
            .collect();

        let mut changes = 0;
        for info in &discovered {
            let state = if info.is_active {
                PersistedState::Active
            } else {
                PersistedState::Inactive
            };

            match records.get(&info.module_id) {
                Some(recorded) if *recorded == state => {}
                Some(_) => {
                    repo.set_state(&info.module_id, state).await.map_err(db_err)?;
                    changes += 1;
                }
                None => {
                    let Some(manifest) = &info.manifest else {
                        continue;
                    };
                    let manifest_json = manifest
                        .to_json()
                        .map_err(|e| HubError::Database(e.to_string()))?;
                    repo.upsert(&info.module_id, &manifest.version, state, None, &manifest_json)
                        .await
                        .map_err(db_err)?;
                    changes += 1;
                }
            }
        }

        for module_id in records.keys() {
            if !discovered.iter().any(|m| &m.module_id == module_id) {
                repo.delete(module_id).await.map_err(db_err)?;
                changes += 1;
            }
        }

        if changes > 0 {
            tracing::info!(changes, "Reconciled module records with modules root");
        }
        Ok(changes)
    }

    async fn record_state(&self, module_id: &str, state: PersistedState) -> Result<(), HubError> {
        let recorded = self
            .db
            .modules()
            .set_state(module_id, state)
            .await
            .map_err(db_err)?;
        if !recorded {
            tracing::debug!(module_id, "No install record for module; state not persisted");
        }
        Ok(())
    }

    /// Queue a notification; a local queue failure is logged, not returned
    async fn notify(
        &self,
        operation: OperationType,
        endpoint: &str,
        method: &str,
        payload: serde_json::Value,
    ) {
        if let Err(e) = self
            .queue
            .enqueue(operation, endpoint, method, payload, BTreeMap::new())
            .await
        {
            tracing::error!(
                operation = operation.as_str(),
                "Failed to queue sync notification: {:#}",
                e
            );
        }
    }
}
