//! Detached signature record
//!
//! Stored as `.signature` next to `module.json`. The record binds a module id
//! and version to a content hash; `signature` is computed over the lowercase
//! hex form of that hash.

use serde::{Deserialize, Serialize};

/// Reserved file name of the detached signature
pub const SIGNATURE_FILE: &str = ".signature";

/// Algorithm identifier written into new records
pub const ALGORITHM_ED25519: &str = "ed25519";

/// Contents of `.signature`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureRecord {
    pub module_id: String,
    pub version: String,
    /// Lowercase hex SHA-256 over the canonical file set
    pub content_hash: String,
    pub algorithm: String,
    /// Standard base64 signature bytes
    pub signature: String,
    /// SPKI PEM of the signing key. Informational only, never used to verify.
    pub public_key: String,
    /// Set when the module is packaged, `null` on disk
    pub signed_at: Option<String>,
}

impl SignatureRecord {
    /// Parse a record from JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize the record to pretty JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Copy of this record with `signed_at` set
    pub fn stamped(&self, signed_at: impl Into<String>) -> Self {
        Self {
            signed_at: Some(signed_at.into()),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> SignatureRecord {
        SignatureRecord {
            module_id: "reports".to_string(),
            version: "1.0.0".to_string(),
            content_hash: "ab".repeat(32),
            algorithm: ALGORITHM_ED25519.to_string(),
            signature: "c2ln".to_string(),
            public_key: "-----BEGIN PUBLIC KEY-----\n...".to_string(),
            signed_at: None,
        }
    }

    #[test]
    fn test_unsigned_timestamp_serializes_as_null() {
        let json = record().to_json().unwrap();
        assert!(json.contains("\"signed_at\": null"));
    }

    #[test]
    fn test_stamped_leaves_original_untouched() {
        let original = record();
        let stamped = original.stamped("2026-01-01T00:00:00+00:00");

        assert_eq!(original.signed_at, None);
        assert_eq!(stamped.signed_at.as_deref(), Some("2026-01-01T00:00:00+00:00"));
        assert_eq!(stamped.content_hash, original.content_hash);
    }
}
