//! Integration tests for configuration management
//!
//! These tests load real files from disk and check that every section is
//! parsed, validated and that directories are created under the data root.

use hub_engine::config::Config;
use sdk::errors::HubError;
use std::fs;
use tempfile::TempDir;

fn write_config(temp: &TempDir, body: &str) -> std::path::PathBuf {
    let path = temp.path().join("config.toml");
    fs::write(&path, body).unwrap();
    path
}

#[test]
fn test_all_sections_are_parsed() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().display().to_string();
    let path = write_config(
        &temp,
        &format!(
            r#"
[core]
log_level = "debug"
data_dir = "{root}/data"
modules_dir = "{root}/modules"

[server]
bind_address = "0.0.0.0"
port = 9000

[packaging]
max_size_mb = 10
allow_unsigned = true
output_dir = "{root}/dist"

[signing]
key_dir = "{root}/keys"
trusted_keys_dir = "{root}/trusted"

[sync]
enabled = false
interval_secs = 15
batch_size = 5
timeout_secs = 3
max_retries = 7
max_backoff_minutes = 30

[cloud]
base_url = "https://cloud.example.test/api"
hub_id = "hub-017"
"#
        ),
    );

    let config = Config::load_from_path(&path).unwrap();

    assert_eq!(config.core.log_level, "debug");
    assert_eq!(config.core.modules_dir, temp.path().join("modules"));
    assert_eq!(config.server.bind_address, "0.0.0.0");
    assert_eq!(config.server.port, 9000);
    assert_eq!(config.packaging.max_size_bytes(), 10 * 1024 * 1024);
    assert!(config.packaging.allow_unsigned);
    assert_eq!(config.signing.trusted_keys_dir, temp.path().join("trusted"));
    assert!(!config.sync.enabled);
    assert_eq!(config.sync.batch_size, 5);
    assert_eq!(config.sync.max_retries, 7);
    assert_eq!(config.sync.max_backoff_minutes, 30);
    assert_eq!(config.cloud.base_url, "https://cloud.example.test/api");
    assert_eq!(config.cloud.hub_id.as_deref(), Some("hub-017"));
    assert_eq!(config.database_path(), temp.path().join("data").join("hub.db"));

    // Data and modules roots are created on load; key directories are not
    assert!(temp.path().join("data").is_dir());
    assert!(temp.path().join("modules").is_dir());
    assert!(!temp.path().join("keys").exists());
}

#[test]
fn test_partial_file_keeps_defaults() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().display().to_string();
    let path = write_config(
        &temp,
        &format!(
            "[core]\ndata_dir = \"{root}\"\nmodules_dir = \"{root}/modules\"\n\n[sync]\nbatch_size = 50\n"
        ),
    );

    let config = Config::load_from_path(&path).unwrap();

    assert_eq!(config.sync.batch_size, 50);
    assert_eq!(config.sync.interval_secs, 60);
    assert_eq!(config.sync.max_retries, 5);
    assert_eq!(config.packaging.max_size_mb, 50);
    assert_eq!(config.server.port, 8765);
    assert!(config.cloud.hub_id.is_none());
}

#[test]
fn test_invalid_values_are_rejected() {
    let cases = [
        "[core]\nlog_level = \"verbose\"\n",
        "[packaging]\nmax_size_mb = 0\n",
        "[sync]\nmax_retries = 0\n",
        "[cloud]\nbase_url = \"ftp://cloud.example.test\"\n",
    ];

    for body in cases {
        let temp = TempDir::new().unwrap();
        let path = write_config(&temp, body);
        let result = Config::load_from_path(&path);
        assert!(
            matches!(result, Err(HubError::Config(_))),
            "accepted invalid config:\n{}",
            body
        );
    }
}

#[test]
fn test_malformed_toml_is_a_config_error() {
    let temp = TempDir::new().unwrap();
    let path = write_config(&temp, "[core\nlog_level = ");

    let err = Config::load_from_path(&path).unwrap_err();
    assert!(err.to_string().contains("parse"));
}

#[test]
fn test_existing_file_is_not_overwritten() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().display().to_string();
    let body = format!(
        "[core]\ndata_dir = \"{root}\"\nmodules_dir = \"{root}/modules\"\n\n[server]\nport = 9100\n"
    );
    let path = write_config(&temp, &body);

    let config = Config::load_or_create_at(&path).unwrap();

    assert_eq!(config.server.port, 9100);
    assert_eq!(fs::read_to_string(&path).unwrap(), body);
}

#[test]
fn test_rooted_config_keeps_everything_under_root() {
    let temp = TempDir::new().unwrap();
    let mut config = Config::rooted_at(temp.path());
    config.validate_and_process().unwrap();

    for dir in [
        &config.core.modules_dir,
        &config.packaging.output_dir,
        &config.signing.key_dir,
        &config.signing.trusted_keys_dir,
    ] {
        assert!(dir.starts_with(temp.path()), "{:?} escapes the root", dir);
    }
    assert!(config.core.modules_dir.is_dir());
}
