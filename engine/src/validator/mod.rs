//! Module package validation
//!
//! Checks a module directory before it is signed or packaged. Every check
//! appends to the result instead of returning early, so one run reports the
//! whole defect list. Only an unreadable or malformed `module.json` skips the
//! checks that need the manifest.
//!
//! The security scan is a hygiene heuristic. Its findings are warnings and it
//! does not sandbox or restrict module code.

pub mod allowlist;
pub mod syntax;

use crate::fileset;
use regex::Regex;
use sdk::{is_valid_module_id, ModuleManifest, PackageRequirement, VersionOp, MANIFEST_FILE};
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Entry point every module must ship
pub const ENTRY_POINT: &str = "__init__.py";

/// Table names that collide across modules when left unprefixed
const GENERIC_TABLE_NAMES: &[&str] = &["product", "category", "item", "user", "order", "sale"];

/// Number of allowed package names quoted in a dependency error
const ALLOWED_NAMES_IN_ERROR: usize = 10;

/// Outcome of a validation run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn passed(&self) -> bool {
        self.errors.is_empty()
    }

    /// Passed with no warnings either
    pub fn passed_strict(&self) -> bool {
        self.passed() && self.warnings.is_empty()
    }

    fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    fn warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

/// Validates module directories
pub struct PackageValidator {
    hook_pattern: Regex,
    table_pattern: Regex,
    security_patterns: Vec<(&'static str, Regex)>,
    known_hooks: Option<HashSet<String>>,
}

impl PackageValidator {
    /// Create a validator with the built-in rules
    ///
    /// # Errors
    ///
    /// Returns an error if a built-in pattern fails to compile.
    pub fn new() -> anyhow::Result<Self> {
        let security_patterns = vec![
            ("os.system(", Regex::new(r"\bos\.system\s*\(")?),
            ("subprocess.", Regex::new(r"\bsubprocess\.")?),
            ("eval(", Regex::new(r"\beval\s*\(")?),
            ("exec(", Regex::new(r"\bexec\s*\(")?),
            ("__import__(", Regex::new(r"\b__import__\s*\(")?),
        ];

        Ok(Self {
            hook_pattern: Regex::new(r"^[A-Za-z0-9_-]+$")?,
            table_pattern: Regex::new(r#"db_table\s*=\s*["']([^"']+)["']"#)?,
            security_patterns,
            known_hooks: None,
        })
    }

    /// Check declared hooks against the hooks this hub build provides
    ///
    /// Without this, unknown hook names are only warnings.
    pub fn with_known_hooks<I, S>(mut self, hooks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known_hooks = Some(hooks.into_iter().map(Into::into).collect());
        self
    }

    /// Validate a module directory
    pub fn validate(&self, module_dir: &Path) -> ValidationResult {
        let mut result = ValidationResult::default();

        if !module_dir.is_dir() {
            result.error(format!(
                "Module directory not found: {}",
                module_dir.display()
            ));
            return result;
        }

        self.check_structure(module_dir, &mut result);

        if let Some(manifest) = self.load_manifest(module_dir, &mut result) {
            self.check_manifest(module_dir, &manifest, &mut result);
            self.check_dependencies(&manifest, &mut result);
            self.check_compatibility(&manifest, &mut result);
            self.check_hooks(&manifest, &mut result);
            if is_valid_module_id(&manifest.module_id) {
                self.check_table_names(module_dir, &manifest.module_id, &mut result);
            }
        }

        self.check_sources(module_dir, &mut result);

        tracing::debug!(
            module = %module_dir.display(),
            errors = result.errors.len(),
            warnings = result.warnings.len(),
            "Validation finished"
        );

        result
    }

    /// Validate, treating every warning as an error
    pub fn validate_strict(&self, module_dir: &Path) -> ValidationResult {
        let mut result = self.validate(module_dir);
        let promoted = result
            .warnings
            .iter()
            .map(|warning| format!("{} (strict mode)", warning));
        result.errors.extend(promoted);
        result
    }

    fn check_structure(&self, module_dir: &Path, result: &mut ValidationResult) {
        if !module_dir.join(MANIFEST_FILE).is_file() {
            result.error(format!("Missing manifest file {}", MANIFEST_FILE));
        }

        if !module_dir.join(ENTRY_POINT).is_file() {
            result.error(format!("Missing entry point {}", ENTRY_POINT));
        }

        if !module_dir.join("tests").is_dir() {
            result.warning("No tests/ directory found");
        }

        if !module_dir.join("templates").is_dir() {
            result.warning("No templates/ directory found");
        }
    }

    fn load_manifest(
        &self,
        module_dir: &Path,
        result: &mut ValidationResult,
    ) -> Option<ModuleManifest> {
        let path = module_dir.join(MANIFEST_FILE);
        if !path.is_file() {
            return None;
        }

        let json = match fs::read_to_string(&path) {
            Ok(json) => json,
            Err(e) => {
                result.error(format!("Cannot read {}: {}", MANIFEST_FILE, e));
                return None;
            }
        };

        match ModuleManifest::from_json(&json) {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                result.error(format!("Invalid JSON in {}: {}", MANIFEST_FILE, e));
                None
            }
        }
    }

    fn check_manifest(
        &self,
        module_dir: &Path,
        manifest: &ModuleManifest,
        result: &mut ValidationResult,
    ) {
        for field in manifest.missing_required_fields() {
            result.error(format!(
                "Missing required field '{}' in {}",
                field, MANIFEST_FILE
            ));
        }

        let module_id = manifest.module_id.trim();
        if !module_id.is_empty() && !is_valid_module_id(module_id) {
            result.error(format!(
                "Invalid module_id '{}': only letters, digits, '_' and '-' are allowed, and it may not start with '_'",
                manifest.module_id
            ));
        }

        let version = manifest.version.trim();
        if !version.is_empty() && !is_three_part_version(version) {
            result.error(format!(
                "Invalid version '{}': expected MAJOR.MINOR.PATCH with numeric parts",
                manifest.version
            ));
        }

        let dir_name = module_dir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        let logical_name = dir_name.strip_prefix('_').unwrap_or(dir_name);
        if !module_id.is_empty() && module_id != logical_name {
            result.error(format!(
                "module_id '{}' does not match directory name '{}'",
                manifest.module_id, logical_name
            ));
        }

        for dependency in &manifest.dependencies.modules {
            if !is_valid_module_id(dependency.trim()) {
                result.error(format!("Invalid module dependency '{}'", dependency));
            }
        }
    }

    fn check_dependencies(&self, manifest: &ModuleManifest, result: &mut ValidationResult) {
        for declaration in &manifest.dependencies.python {
            let requirement = PackageRequirement::parse(declaration);
            if requirement.name.is_empty() {
                result.error(format!("Invalid dependency declaration '{}'", declaration));
                continue;
            }

            let Some(allowed) = allowlist::lookup(&requirement.name) else {
                result.error(format!(
                    "Dependency '{}' is not in the allowlist. Allowed packages include: {} ({} total)",
                    requirement.name,
                    allowlist::allowed_prefix(ALLOWED_NAMES_IN_ERROR).join(", "),
                    allowlist::ALLOWED_PACKAGES.len()
                ));
                continue;
            };

            if let (Some(minimum), Some((op, version))) =
                (allowed.min_version, &requirement.constraint)
            {
                if allowlist::is_below_minimum(version, minimum) {
                    let op = match op {
                        VersionOp::AtLeast => ">=",
                        VersionOp::Exactly => "==",
                    };
                    result.warning(format!(
                        "Dependency '{}{}{}' is older than the supported minimum {}",
                        requirement.name, op, version, minimum
                    ));
                }
            }
        }
    }

    fn check_compatibility(&self, manifest: &ModuleManifest, result: &mut ValidationResult) {
        let compat = &manifest.compatibility;
        if compat.min_cpos_version.as_deref().map_or(true, str::is_empty) {
            result.warning("compatibility.min_cpos_version is not set");
        }
        if compat.max_cpos_version.as_deref().map_or(true, str::is_empty) {
            result.warning("compatibility.max_cpos_version is not set");
        }
    }

    fn check_hooks(&self, manifest: &ModuleManifest, result: &mut ValidationResult) {
        for hook in &manifest.hooks {
            match &self.known_hooks {
                Some(known) if !known.contains(hook) => {
                    result.error(format!("Hook '{}' is not provided by this hub", hook))
                }
                None if !self.hook_pattern.is_match(hook) => {
                    result.warning(format!("Hook name '{}' looks invalid", hook))
                }
                _ => {}
            }
        }
    }

    fn check_table_names(
        &self,
        module_dir: &Path,
        module_id: &str,
        result: &mut ValidationResult,
    ) {
        let prefix = format!("{}_", module_id);

        for file in model_sources(module_dir) {
            let Ok(source) = fs::read_to_string(&file.absolute) else {
                continue;
            };

            for captures in self.table_pattern.captures_iter(&source) {
                let table = &captures[1];
                if table.starts_with(&prefix) {
                    continue;
                }

                if GENERIC_TABLE_NAMES.contains(&table.to_ascii_lowercase().as_str()) {
                    result.error(format!(
                        "Table name '{}' in {} is a generic unprefixed name; use '{}{}'",
                        table, file.relative, prefix, table
                    ));
                } else {
                    result.warning(format!(
                        "Table name '{}' in {} should start with '{}'",
                        table, file.relative, prefix
                    ));
                }
            }
        }
    }

    fn check_sources(&self, module_dir: &Path, result: &mut ValidationResult) {
        let files = match fileset::collect_files(module_dir) {
            Ok(files) => files,
            Err(e) => {
                result.error(format!("Cannot list module files: {}", e));
                return;
            }
        };

        for file in files.iter().filter(|f| f.relative.ends_with(".py")) {
            let source = match fs::read(&file.absolute) {
                Ok(bytes) => match String::from_utf8(bytes) {
                    Ok(source) => source,
                    Err(_) => {
                        result.error(format!("{} is not valid UTF-8", file.relative));
                        continue;
                    }
                },
                Err(e) => {
                    result.error(format!("Cannot read {}: {}", file.relative, e));
                    continue;
                }
            };

            if let Err(issue) = syntax::check(&source) {
                result.error(format!(
                    "Syntax error in {} at line {}: {}",
                    file.relative, issue.line, issue.message
                ));
            }

            for (label, pattern) in &self.security_patterns {
                if let Some(found) = pattern.find(&source) {
                    let line = source[..found.start()].matches('\n').count() + 1;
                    result.warning(format!(
                        "Potentially unsafe call '{}' in {} at line {}",
                        label, file.relative, line
                    ));
                }
            }
        }
    }
}

/// `models.py` at the root plus any `.py` under `models/`
fn model_sources(module_dir: &Path) -> Vec<fileset::ModuleFile> {
    fileset::collect_files(module_dir)
        .unwrap_or_default()
        .into_iter()
        .filter(|f| {
            f.relative == "models.py"
                || (f.relative.starts_with("models/") && f.relative.ends_with(".py"))
        })
        .collect()
}

/// `N.N.N` with non-negative integer parts
pub fn is_three_part_version(version: &str) -> bool {
    let parts: Vec<&str> = version.split('.').collect();
    parts.len() == 3
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_three_part_version() {
        assert!(is_three_part_version("1.0.0"));
        assert!(is_three_part_version("10.20.30"));
        assert!(!is_three_part_version("1.0"));
        assert!(!is_three_part_version("1.0.0.0"));
        assert!(!is_three_part_version("1.a.0"));
        assert!(!is_three_part_version("1..0"));
        assert!(!is_three_part_version("-1.0.0"));
    }

    #[test]
    fn test_strict_promotes_warnings() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join("reports");
        fs::create_dir(&dir).unwrap();
        fs::write(
            dir.join(MANIFEST_FILE),
            r#"{"module_id":"reports","name":"R","version":"1.0.0","description":"d","author":"a"}"#,
        )
        .unwrap();
        fs::write(dir.join(ENTRY_POINT), "").unwrap();

        let validator = PackageValidator::new().unwrap();
        let lenient = validator.validate(&dir);
        assert!(lenient.passed());
        assert!(!lenient.passed_strict());

        let strict = validator.validate_strict(&dir);
        assert!(!strict.passed());
        assert!(strict.errors.iter().any(|e| e.contains("tests/")));
    }

    #[test]
    fn test_unknown_hook_is_error_with_registry() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join("reports");
        fs::create_dir(&dir).unwrap();
        fs::write(
            dir.join(MANIFEST_FILE),
            r#"{"module_id":"reports","name":"R","version":"1.0.0","description":"d","author":"a","hooks":["module_header","teleport"]}"#,
        )
        .unwrap();
        fs::write(dir.join(ENTRY_POINT), "").unwrap();

        let result = PackageValidator::new()
            .unwrap()
            .with_known_hooks(["module_header"])
            .validate(&dir);

        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("teleport"));
    }
}
