//! Integration tests for module activation and lifecycle bookkeeping

mod common;

use hub_engine::config::Config;
use hub_engine::context::HubContext;
use hub_engine::crypto::content_hash;
use hub_engine::db::{OperationType, PersistedState, SyncStatus};
use hub_engine::modules::{ActivationError, ModuleManager, ModuleState};
use hub_engine::pipeline::HookRegistry;
use sdk::errors::HubError;
use std::sync::Arc;
use tempfile::TempDir;

fn manager(temp: &TempDir) -> ModuleManager {
    ModuleManager::new(
        temp.path().join("modules"),
        Arc::new(HookRegistry::with_builtin_hooks()),
    )
}

#[test]
fn test_activate_and_deactivate_round_trip() {
    let temp = TempDir::new().unwrap();
    let modules = manager(&temp);
    let inactive = common::write_module(modules.root(), "_reports", "reports");
    let hash = content_hash(&inactive).unwrap();

    let outcome = modules.activate("reports").unwrap();
    assert!(outcome.restart_required);
    assert_eq!(outcome.path, modules.root().join("reports"));
    assert!(!inactive.exists());
    assert_eq!(modules.state("reports").unwrap(), ModuleState::Active);

    let outcome = modules.deactivate("reports").unwrap();
    assert!(!outcome.restart_required);
    assert!(inactive.is_dir());
    assert!(!modules.root().join("reports").exists());
    assert_eq!(modules.state("reports").unwrap(), ModuleState::Inactive);

    assert_eq!(content_hash(&inactive).unwrap(), hash);
}

#[test]
fn test_repeated_transitions_are_no_ops() {
    let temp = TempDir::new().unwrap();
    let modules = manager(&temp);
    common::write_module(modules.root(), "_reports", "reports");

    modules.activate("reports").unwrap();
    let again = modules.activate("reports").unwrap();
    assert!(!again.restart_required);
    assert!(modules.root().join("reports").is_dir());

    modules.deactivate("reports").unwrap();
    modules.deactivate("reports").unwrap();
    assert!(modules.root().join("_reports").is_dir());
}

#[test]
fn test_unknown_module_is_not_found() {
    let temp = TempDir::new().unwrap();
    let modules = manager(&temp);

    assert!(matches!(
        modules.activate("ghost"),
        Err(ActivationError::NotFound(id)) if id == "ghost"
    ));
    assert!(matches!(
        modules.delete("ghost"),
        Err(ActivationError::NotFound(_))
    ));
    assert_eq!(modules.state("ghost").unwrap(), ModuleState::Absent);
}

#[test]
fn test_path_like_ids_are_refused() {
    let temp = TempDir::new().unwrap();
    let modules = manager(&temp);
    common::write_module(temp.path(), "_escape", "escape");

    for id in ["../_escape", "", ".", "a/b", "reports.bak"] {
        assert!(
            matches!(modules.activate(id), Err(ActivationError::InvalidId(_))),
            "id {:?} accepted",
            id
        );
    }
    assert!(temp.path().join("_escape").is_dir());
}

#[test]
fn test_inactive_directory_name_is_not_an_id() {
    let temp = TempDir::new().unwrap();
    let modules = manager(&temp);
    let inactive = common::write_module(modules.root(), "_foo", "foo");

    assert!(matches!(
        modules.deactivate("_foo"),
        Err(ActivationError::InvalidId(id)) if id == "_foo"
    ));
    assert!(matches!(modules.activate("_foo"), Err(ActivationError::InvalidId(_))));
    assert!(matches!(modules.delete("_foo"), Err(ActivationError::InvalidId(_))));

    assert!(inactive.is_dir());
    assert!(!modules.root().join("__foo").exists());
    assert_eq!(modules.state("foo").unwrap(), ModuleState::Inactive);
}

#[test]
fn test_load_and_deactivate_drive_hook_registration() {
    let temp = TempDir::new().unwrap();
    let modules = manager(&temp);
    common::write_module_with(modules.root(), "_reports", "reports", &["module_header"]);
    common::write_module_with(modules.root(), "broken", "broken", &["no_such_hook"]);

    assert!(matches!(
        modules.load("reports"),
        Err(ActivationError::NotActive(_))
    ));

    modules.activate("reports").unwrap();
    let report = modules.load_active().unwrap();
    assert_eq!(report.loaded, vec!["reports".to_string()]);
    assert_eq!(report.failed.len(), 1);
    assert!(matches!(
        report.failed[0].1,
        ActivationError::UnknownHook { ref hook, .. } if hook == "no_such_hook"
    ));

    assert_eq!(modules.state("reports").unwrap(), ModuleState::Loaded);
    assert_eq!(
        modules.loaded_hooks("reports"),
        Some(vec!["module_header".to_string()])
    );

    modules.deactivate("reports").unwrap();
    assert!(!modules.is_loaded("reports"));
    assert_eq!(modules.hooks().cached_instances(), 0);
}

async fn context(temp: &TempDir) -> HubContext {
    HubContext::init(Config::rooted_at(temp.path())).await.unwrap()
}

#[tokio::test]
async fn test_lifecycle_records_state_changes() {
    let temp = TempDir::new().unwrap();
    let ctx = context(&temp).await;
    common::write_module(&ctx.config.core.modules_dir, "_reports", "reports");

    let lifecycle = ctx.lifecycle();
    assert_eq!(lifecycle.reconcile().await.unwrap(), 1);

    let record = ctx.db.modules().get("reports").await.unwrap().unwrap();
    assert_eq!(record.state, PersistedState::Inactive);
    assert_eq!(record.version, "1.2.0");

    lifecycle.activate("reports").await.unwrap();
    let record = ctx.db.modules().get("reports").await.unwrap().unwrap();
    assert_eq!(record.state, PersistedState::Active);

    lifecycle.deactivate("reports").await.unwrap();
    let record = ctx.db.modules().get("reports").await.unwrap().unwrap();
    assert_eq!(record.state, PersistedState::Inactive);

    assert_eq!(lifecycle.reconcile().await.unwrap(), 0);
    ctx.close().await.unwrap();
}

#[tokio::test]
async fn test_uninstall_queues_cloud_notification() {
    let temp = TempDir::new().unwrap();
    let ctx = context(&temp).await;
    common::write_module(&ctx.config.core.modules_dir, "reports", "reports");
    let lifecycle = ctx.lifecycle();
    lifecycle.reconcile().await.unwrap();

    lifecycle.uninstall("reports").await.unwrap();

    assert!(ctx.modules.module_path("reports").is_none());
    assert!(ctx.db.modules().get("reports").await.unwrap().is_none());

    let queued = ctx.queue.list(Some(SyncStatus::Pending), 10).await.unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].operation_type, OperationType::PluginUninstall);
    assert_eq!(queued[0].http_method, "DELETE");
    assert_eq!(queued[0].endpoint, "/hub/modules/reports");

    assert!(matches!(
        lifecycle.uninstall("reports").await,
        Err(HubError::ModuleNotFound(_))
    ));
    ctx.close().await.unwrap();
}

#[tokio::test]
async fn test_reconcile_drops_records_without_directory() {
    let temp = TempDir::new().unwrap();
    let ctx = context(&temp).await;
    let dir = common::write_module(&ctx.config.core.modules_dir, "reports", "reports");
    let lifecycle = ctx.lifecycle();
    lifecycle.reconcile().await.unwrap();

    std::fs::remove_dir_all(dir).unwrap();

    assert_eq!(lifecycle.reconcile().await.unwrap(), 1);
    assert!(ctx.db.modules().list().await.unwrap().is_empty());
    ctx.close().await.unwrap();
}
