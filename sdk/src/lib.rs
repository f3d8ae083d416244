//! CPOS Hub SDK
//!
//! Shared types for the hub engine and for tooling that produces modules:
//! the module manifest, the detached signature record and the hub error type.

/// Error types and handling
pub mod errors;

/// Module manifest types
pub mod manifest;

/// Detached signature record
pub mod signature;

// Re-export commonly used types
pub use errors::{HubError, HubErrorExt};
pub use manifest::{
    Compatibility, Dependencies, MenuEntry, ModuleManifest, PackageRequirement, Permissions,
    VersionOp, MANIFEST_FILE, is_valid_module_id,
};
pub use signature::{SignatureRecord, ALGORITHM_ED25519, SIGNATURE_FILE};
