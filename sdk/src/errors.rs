//! Error types and handling
//!
//! This module provides the umbrella error type used at the boundaries of the
//! hub (CLI, daemon, management API). Component errors in the engine convert
//! into [`HubError`], and every variant implements [`HubErrorExt`] so callers
//! get an actionable hint and know whether retrying makes sense.
//!
//! # Messages
//!
//! Every message names the offending module, file, field or package. Messages
//! never include key material or the cloud token.

use thiserror::Error;

/// Trait for hub error extensions
///
/// Provides additional context for errors, including user-friendly hints and
/// recoverability information.
pub trait HubErrorExt {
    /// Returns a short hint describing what the operator can do next
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors can be retried or fixed by the operator without
    /// touching the module artifact. Non-recoverable errors mean the artifact
    /// itself is not trustworthy or the installation is inconsistent.
    fn is_recoverable(&self) -> bool;
}

/// Main hub error type
///
/// # Error Categories
///
/// - **Configuration**: invalid or missing configuration
/// - **Database**: SQLite operation failures
/// - **Supply chain**: validation, signing, verification, packaging
/// - **Lifecycle**: activation, install, hook resolution
/// - **Sync**: network and keychain failures
///
/// # Examples
///
/// ```
/// use sdk::errors::{HubError, HubErrorExt};
///
/// let error = HubError::ModuleNotFound("reports".to_string());
/// assert!(error.is_recoverable());
///
/// let fatal = HubError::Verification("content hash mismatch".to_string());
/// assert!(!fatal.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum HubError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Database errors
    #[error("Database error: {0}")]
    Database(String),

    // Supply chain errors
    #[error("Validation failed for module '{module_id}': {}", .errors.join("; "))]
    ValidationFailed {
        module_id: String,
        errors: Vec<String>,
    },

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Signature verification failed: {0}")]
    Verification(String),

    #[error("Packaging failed: {0}")]
    Packaging(String),

    // Lifecycle errors
    #[error("Activation failed: {0}")]
    Activation(String),

    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    #[error("Install failed: {0}")]
    Install(String),

    #[error("Hook error: {0}")]
    Hook(String),

    // Sync errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Keyring error: {0}")]
    Keyring(String),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HubErrorExt for HubError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Config(_) => "Check your config.toml file for errors",
            Self::Database(_) => "Database operation failed. Try restarting the hub",

            Self::ValidationFailed { .. } => {
                "Fix the listed problems and run 'hub validate' again"
            }
            Self::Signing(_) => "Check the signing key and use --force to re-sign",
            Self::Verification(_) => {
                "Module content does not match a trusted signature. Do not install it"
            }
            Self::Packaging(_) => "Validate and sign the module before packaging",

            Self::Activation(_) => "Check the modules directory for conflicting folders",
            Self::ModuleNotFound(_) => "Run 'hub list --all' to see installed modules",
            Self::Install(_) => "The archive could not be installed. Check the archive and retry",
            Self::Hook(_) => "A module hook is not registered in this hub build",

            Self::Network(_) => "Cloud unreachable. Queued operations will be retried",
            Self::Keyring(_) => "Failed to access secure storage. Check system keychain",

            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            // Tampered or untrusted artifacts must not be retried blindly
            Self::Verification(_) => false,

            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_failed_lists_every_error() {
        let error = HubError::ValidationFailed {
            module_id: "inventory".to_string(),
            errors: vec![
                "Missing required field: name".to_string(),
                "Dependency 'leftpad' is not allowed".to_string(),
            ],
        };

        let message = error.to_string();
        assert!(message.contains("inventory"));
        assert!(message.contains("Missing required field: name"));
        assert!(message.contains("leftpad"));
    }

    #[test]
    fn test_verification_is_not_recoverable() {
        let error = HubError::Verification("signature does not match".to_string());
        assert!(!error.is_recoverable());
        assert!(error.user_hint().contains("Do not install"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let error: HubError = io.into();
        assert!(matches!(error, HubError::Io(_)));
        assert!(error.is_recoverable());
    }
}
