//! Module manifest types
//!
//! A module ships a `module.json` at its root describing identity, declared
//! dependencies, host compatibility, permissions, menu placement and the
//! request hooks it wants to run. Unknown keys are ignored so newer tooling
//! can add fields without breaking older hubs.

use serde::{Deserialize, Serialize};

/// Name of the manifest file at the root of every module directory
pub const MANIFEST_FILE: &str = "module.json";

/// Whether `id` matches `^[A-Za-z0-9-][A-Za-z0-9_-]*$`
///
/// Ids become directory names, so anything else (including `.` and path
/// separators) is refused before touching the filesystem. A leading `_` is
/// reserved for the directory of an inactive module.
pub fn is_valid_module_id(id: &str) -> bool {
    !id.is_empty()
        && !id.starts_with('_')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Parsed `module.json`
///
/// All fields default when absent so that a partially filled manifest still
/// parses; the validator reports missing required fields one by one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleManifest {
    pub module_id: String,
    pub name: String,
    pub version: String,
    pub description: String,
    pub author: String,
    pub dependencies: Dependencies,
    pub compatibility: Compatibility,
    pub permissions: Permissions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub menu: Option<MenuEntry>,
    /// Hook names resolved against the hub's hook registry at load time
    pub hooks: Vec<String>,
}

impl ModuleManifest {
    /// Fields that must be present and non-empty
    pub const REQUIRED_FIELDS: [&'static str; 5] =
        ["module_id", "name", "version", "description", "author"];

    /// Parse manifest from JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize manifest to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Required fields that are missing or blank, in declaration order
    pub fn missing_required_fields(&self) -> Vec<&'static str> {
        let values = [
            &self.module_id,
            &self.name,
            &self.version,
            &self.description,
            &self.author,
        ];

        Self::REQUIRED_FIELDS
            .iter()
            .zip(values)
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(field, _)| *field)
            .collect()
    }

    /// Permission flags that are set, for display and load-time logging
    pub fn requested_permissions(&self) -> Vec<&'static str> {
        self.permissions.granted()
    }
}

/// Declared dependencies
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Dependencies {
    /// External Python libraries, each optionally carrying `>=` or `==`
    pub python: Vec<String>,
    /// Other hub modules this module relies on
    pub modules: Vec<String>,
}

/// Supported host version range
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Compatibility {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_cpos_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_cpos_version: Option<String>,
}

/// Declared capabilities
///
/// These flags are informational. The hub surfaces them to operators but does
/// not enforce them at runtime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Permissions {
    pub database: bool,
    pub filesystem: bool,
    pub network: bool,
    pub hardware: bool,
}

impl Permissions {
    /// Names of the flags that are set
    pub fn granted(&self) -> Vec<&'static str> {
        [
            ("database", self.database),
            ("filesystem", self.filesystem),
            ("network", self.network),
            ("hardware", self.hardware),
        ]
        .into_iter()
        .filter(|(_, set)| *set)
        .map(|(name, _)| name)
        .collect()
    }
}

/// Menu placement in the hub UI
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MenuEntry {
    pub label: String,
    pub icon: String,
    pub url: String,
    pub order: i64,
}

/// Comparison operator in a dependency declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionOp {
    /// `>=`
    AtLeast,
    /// `==`
    Exactly,
}

/// A single `dependencies.python` entry split into name and specifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRequirement {
    /// Bare package name, lowercased
    pub name: String,
    /// Recognised pin, if any
    pub constraint: Option<(VersionOp, String)>,
}

impl PackageRequirement {
    /// Split a declaration such as `requests>=2.28` or `Pillow==10.0.0`
    ///
    /// The name ends at the first character that cannot belong to a Python
    /// distribution name. Specifiers other than `>=` and `==` are stripped but
    /// not interpreted.
    pub fn parse(declaration: &str) -> Self {
        let trimmed = declaration.trim();
        let name_end = trimmed
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.'))
            .unwrap_or(trimmed.len());

        let name = trimmed[..name_end].to_ascii_lowercase();
        let rest = trimmed[name_end..].trim();

        let constraint = if let Some(version) = rest.strip_prefix(">=") {
            Some((VersionOp::AtLeast, version.trim().to_string()))
        } else if let Some(version) = rest.strip_prefix("==") {
            Some((VersionOp::Exactly, version.trim().to_string()))
        } else {
            None
        };

        Self {
            name,
            constraint: constraint.filter(|(_, v)| !v.is_empty()),
        }
    }
}
