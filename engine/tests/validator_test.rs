//! Integration tests for module validation

mod common;

use hub_engine::validator::PackageValidator;
use std::fs;
use tempfile::TempDir;

fn validator() -> PackageValidator {
    PackageValidator::new().unwrap()
}

#[test]
fn test_complete_module_passes_without_warnings() {
    let temp = TempDir::new().unwrap();
    let dir = common::write_module(temp.path(), "reports", "reports");

    let result = validator().validate(&dir);

    assert!(result.passed(), "unexpected errors: {:?}", result.errors);
    assert!(result.warnings.is_empty(), "unexpected warnings: {:?}", result.warnings);
    assert!(result.passed_strict());
}

#[test]
fn test_inactive_directory_name_matches_module_id() {
    let temp = TempDir::new().unwrap();
    let dir = common::write_module(temp.path(), "_reports", "reports");

    assert!(validator().validate(&dir).passed());
}

#[test]
fn test_generic_table_name_is_an_error() {
    let temp = TempDir::new().unwrap();
    let dir = common::write_module(temp.path(), "reports", "reports");
    fs::write(
        dir.join("models.py"),
        "class Product:\n    class Meta:\n        db_table = \"product\"\n",
    )
    .unwrap();

    let result = validator().validate(&dir);

    assert!(!result.passed());
    let error = result
        .errors
        .iter()
        .find(|e| e.contains("'product'"))
        .expect("table error reported");
    assert!(error.contains("reports_product"));
}

#[test]
fn test_unprefixed_specific_table_is_a_warning() {
    let temp = TempDir::new().unwrap();
    let dir = common::write_module(temp.path(), "reports", "reports");
    fs::create_dir_all(dir.join("models")).unwrap();
    fs::write(
        dir.join("models").join("archive.py"),
        "class Archive:\n    class Meta:\n        db_table = 'daily_archive'\n",
    )
    .unwrap();

    let result = validator().validate(&dir);

    assert!(result.passed());
    assert!(result
        .warnings
        .iter()
        .any(|w| w.contains("daily_archive") && w.contains("models/archive.py")));
    assert!(!validator().validate_strict(&dir).passed());
}

#[test]
fn test_dependency_outside_allowlist_names_bare_package() {
    let temp = TempDir::new().unwrap();
    let dir = common::write_module(temp.path(), "reports", "reports");
    let manifest = r#"{
        "module_id": "reports",
        "name": "Daily Reports",
        "version": "1.2.0",
        "description": "End of day sales reports",
        "author": "Store Tools",
        "dependencies": { "python": ["numpy>=1.26", "Pillow==10.1.0"] },
        "compatibility": { "min_cpos_version": "2.0.0", "max_cpos_version": "3.0.0" }
    }"#;
    fs::write(dir.join("module.json"), manifest).unwrap();

    let result = validator().validate(&dir);

    assert_eq!(result.errors.len(), 1, "errors: {:?}", result.errors);
    assert!(result.errors[0].contains("'numpy'"));
    assert!(!result.errors[0].contains(">="));
    assert!(result.errors[0].contains("babel"));
}

#[test]
fn test_each_missing_field_is_reported() {
    let temp = TempDir::new().unwrap();
    let dir = common::write_module(temp.path(), "reports", "reports");
    fs::write(dir.join("module.json"), r#"{"module_id": "reports", "name": "  "}"#).unwrap();

    let result = validator().validate(&dir);

    for field in ["name", "version", "description", "author"] {
        assert!(
            result
                .errors
                .iter()
                .any(|e| e.contains(&format!("'{}'", field))),
            "missing field '{}' not reported: {:?}",
            field,
            result.errors
        );
    }
    assert!(!result.errors.iter().any(|e| e.contains("'module_id'")));
}

#[test]
fn test_malformed_manifest_still_checks_sources() {
    let temp = TempDir::new().unwrap();
    let dir = common::write_module(temp.path(), "reports", "reports");
    fs::write(dir.join("module.json"), "{ not json").unwrap();
    fs::write(dir.join("views.py"), "def register(app:\n    return app\n").unwrap();

    let result = validator().validate(&dir);

    assert!(result.errors.iter().any(|e| e.contains("Invalid JSON")));
    assert!(result
        .errors
        .iter()
        .any(|e| e.starts_with("Syntax error in views.py")));
}

#[test]
fn test_module_id_must_match_directory() {
    let temp = TempDir::new().unwrap();
    let dir = common::write_module(temp.path(), "reports", "inventory");

    let result = validator().validate(&dir);

    assert!(result
        .errors
        .iter()
        .any(|e| e.contains("does not match directory name 'reports'")));
}

#[test]
fn test_underscore_prefixed_module_id_is_an_error() {
    let temp = TempDir::new().unwrap();
    // An inactive `foo` lives in `_foo`, so `_foo` can never be an id
    let dir = common::write_module(temp.path(), "__foo", "_foo");

    let result = validator().validate(&dir);

    assert!(!result.passed());
    assert!(result
        .errors
        .iter()
        .any(|e| e.contains("Invalid module_id '_foo'")));
}

#[test]
fn test_missing_entry_point_and_optional_dirs() {
    let temp = TempDir::new().unwrap();
    let dir = common::write_module(temp.path(), "reports", "reports");
    fs::remove_file(dir.join("__init__.py")).unwrap();
    fs::remove_dir_all(dir.join("templates")).unwrap();

    let result = validator().validate(&dir);

    assert!(result.errors.iter().any(|e| e.contains("__init__.py")));
    assert!(result.warnings.iter().any(|w| w.contains("templates/")));
}

#[test]
fn test_security_findings_are_warnings_with_line_numbers() {
    let temp = TempDir::new().unwrap();
    let dir = common::write_module(temp.path(), "reports", "reports");
    fs::write(
        dir.join("views.py"),
        "import os\n\ndef register(app):\n    os.system(\"lp report.pdf\")\n    return app\n",
    )
    .unwrap();

    let result = validator().validate(&dir);

    assert!(result.passed());
    assert!(result
        .warnings
        .iter()
        .any(|w| w.contains("os.system(") && w.contains("line 4")));
}
