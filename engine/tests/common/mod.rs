//! Shared fixtures for integration tests

#![allow(dead_code)]

use ed25519_dalek::SigningKey;
use hub_engine::crypto::keys;
use hub_engine::crypto::Signer;
use std::fs;
use std::path::{Path, PathBuf};

/// Write a module that passes validation without warnings
pub fn write_module(parent: &Path, dir_name: &str, module_id: &str) -> PathBuf {
    write_module_with(parent, dir_name, module_id, &[])
}

/// Same as [`write_module`], declaring `hooks` in the manifest
pub fn write_module_with(
    parent: &Path,
    dir_name: &str,
    module_id: &str,
    hooks: &[&str],
) -> PathBuf {
    let dir = parent.join(dir_name);
    fs::create_dir_all(dir.join("tests")).unwrap();
    fs::create_dir_all(dir.join("templates")).unwrap();

    let manifest = serde_json::json!({
        "module_id": module_id,
        "name": "Daily Reports",
        "version": "1.2.0",
        "description": "End of day sales reports",
        "author": "Store Tools",
        "dependencies": { "python": ["openpyxl>=3.1.0"], "modules": [] },
        "compatibility": { "min_cpos_version": "2.0.0", "max_cpos_version": "3.0.0" },
        "permissions": { "database": true },
        "hooks": hooks,
    });
    fs::write(
        dir.join("module.json"),
        serde_json::to_string_pretty(&manifest).unwrap(),
    )
    .unwrap();

    fs::write(dir.join("__init__.py"), "from .views import register\n").unwrap();
    fs::write(
        dir.join("views.py"),
        "def register(app):\n    return app\n",
    )
    .unwrap();
    fs::write(
        dir.join("models.py"),
        format!(
            "class Summary:\n    class Meta:\n        db_table = \"{}_summary\"\n",
            module_id
        ),
    )
    .unwrap();
    fs::write(dir.join("tests").join("test_views.py"), "def test_ok():\n    assert True\n").unwrap();
    fs::write(dir.join("templates").join("report.html"), "<h1>{{ title }}</h1>\n").unwrap();

    dir
}

pub fn signing_key() -> SigningKey {
    keys::generate_signing_key()
}

/// Sign `module_dir` with `key`
pub fn sign(module_dir: &Path, key: &SigningKey) {
    Signer::new(key.clone()).sign(module_dir, false).unwrap();
}

/// Pin the public half of `key` under `trusted_dir` as `name`
pub fn trust(trusted_dir: &Path, name: &str, key: &SigningKey) {
    let pem = keys::public_key_pem(&key.verifying_key()).unwrap();
    keys::trust_public_key(trusted_dir, name, &pem).unwrap();
}
