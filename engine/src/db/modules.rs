/// Installed module registry
///
/// Explicit lifecycle record for every module the hub has installed. The
/// activation directory rename is the side effect; this row is written after
/// the rename succeeded so the two never disagree for long.
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Persisted lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistedState {
    Inactive,
    Active,
}

impl PersistedState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PersistedState::Inactive => "inactive",
            PersistedState::Active => "active",
        }
    }
}

impl FromStr for PersistedState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "inactive" => Ok(PersistedState::Inactive),
            "active" => Ok(PersistedState::Active),
            other => anyhow::bail!("Unknown module state '{}'", other),
        }
    }
}

/// Installed module record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstalledModule {
    pub module_id: String,
    pub version: String,
    pub state: PersistedState,
    pub content_hash: Option<String>,
    pub manifest_json: String,
    pub installed_at: i64,
    pub updated_at: i64,
}

/// Module repository for database operations
pub struct ModuleRepository {
    pool: SqlitePool,
}

impl ModuleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a module record, or replace version/hash/manifest of an existing one
    ///
    /// `installed_at` is kept on conflict.
    pub async fn upsert(
        &self,
        module_id: &str,
        version: &str,
        state: PersistedState,
        content_hash: Option<&str>,
        manifest_json: &str,
    ) -> Result<()> {
        let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs() as i64;

        sqlx::query(
            "INSERT INTO installed_modules (module_id, version, state, content_hash, manifest_json, installed_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(module_id) DO UPDATE SET
                version = excluded.version,
                state = excluded.state,
                content_hash = excluded.content_hash,
                manifest_json = excluded.manifest_json,
                updated_at = excluded.updated_at",
        )
        .bind(module_id)
        .bind(version)
        .bind(state.as_str())
        .bind(content_hash)
        .bind(manifest_json)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to record installed module")?;

        Ok(())
    }

    /// Record a lifecycle transition
    ///
    /// Returns false when the module has no record (e.g. it was copied into
    /// the modules root by hand).
    pub async fn set_state(&self, module_id: &str, state: PersistedState) -> Result<bool> {
        let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs() as i64;

        let result =
            sqlx::query("UPDATE installed_modules SET state = ?, updated_at = ? WHERE module_id = ?")
                .bind(state.as_str())
                .bind(now)
                .bind(module_id)
                .execute(&self.pool)
                .await
                .context("Failed to update module state")?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get(&self, module_id: &str) -> Result<Option<InstalledModule>> {
        let row = sqlx::query(
            "SELECT module_id, version, state, content_hash, manifest_json, installed_at, updated_at
             FROM installed_modules WHERE module_id = ?",
        )
        .bind(module_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch installed module")?;

        row.map(|r| Self::from_row(&r)).transpose()
    }

    /// All records ordered by module id
    pub async fn list(&self) -> Result<Vec<InstalledModule>> {
        let rows = sqlx::query(
            "SELECT module_id, version, state, content_hash, manifest_json, installed_at, updated_at
             FROM installed_modules ORDER BY module_id",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list installed modules")?;

        rows.iter().map(Self::from_row).collect()
    }

    /// Remove a record; returns whether one existed
    pub async fn delete(&self, module_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM installed_modules WHERE module_id = ?")
            .bind(module_id)
            .execute(&self.pool)
            .await
            .context("Failed to delete installed module")?;

        Ok(result.rows_affected() > 0)
    }

    fn from_row(r: &sqlx::sqlite::SqliteRow) -> Result<InstalledModule> {
        let state: String = r.get("state");
        Ok(InstalledModule {
            module_id: r.get("module_id"),
            version: r.get("version"),
            state: state.parse()?,
            content_hash: r.get("content_hash"),
            manifest_json: r.get("manifest_json"),
            installed_at: r.get("installed_at"),
            updated_at: r.get("updated_at"),
        })
    }
}
