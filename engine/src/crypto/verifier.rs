//! Signature verification
//!
//! Install-side counterpart of the signer. The hash is recomputed with the
//! same file-set rules and the signature is checked against every pinned key.

use super::content_hash;
use super::keys::TrustedKeyStore;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use ed25519_dalek::{Signature, VerifyingKey, SIGNATURE_LENGTH};
use pkcs8::DecodePublicKey;
use sdk::errors::HubError;
use sdk::{ModuleManifest, SignatureRecord, ALGORITHM_ED25519, MANIFEST_FILE, SIGNATURE_FILE};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Reasons a module is not trusted
#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("No trusted keys configured; add one with 'hub keys trust'")]
    NoTrustedKeys,

    #[error("Cannot read {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },

    #[error("Unsupported signature algorithm '{0}'")]
    UnsupportedAlgorithm(String),

    #[error("Signature is for module '{signed}' but manifest declares '{manifest}'")]
    ModuleMismatch { signed: String, manifest: String },

    #[error("Signature is for version {signed} but manifest declares {manifest}")]
    VersionMismatch { signed: String, manifest: String },

    #[error("Content hash mismatch: signed {expected}, computed {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("Malformed signature: {0}")]
    MalformedSignature(String),

    #[error("Signature of module '{0}' does not verify against any trusted key")]
    Untrusted(String),
}

impl From<VerificationError> for HubError {
    fn from(err: VerificationError) -> Self {
        HubError::Verification(err.to_string())
    }
}

/// Verify `record` against the files in `module_dir`
///
/// Returns the name of the trusted key that verified the signature.
///
/// # Errors
///
/// Fails when the store is empty, the record names another module or
/// version than the manifest, the content hash differs, or no trusted key
/// accepts the signature. Signatures are checked with `verify_strict`, so
/// weak keys and non-canonical encodings are refused.
pub fn verify(
    module_dir: &Path,
    record: &SignatureRecord,
    trusted_keys: &TrustedKeyStore,
) -> Result<String, VerificationError> {
    if trusted_keys.is_empty() {
        return Err(VerificationError::NoTrustedKeys);
    }

    if record.algorithm != ALGORITHM_ED25519 {
        return Err(VerificationError::UnsupportedAlgorithm(
            record.algorithm.clone(),
        ));
    }

    let manifest_path = module_dir.join(MANIFEST_FILE);
    let manifest = fs::read_to_string(&manifest_path)
        .map_err(|e| e.to_string())
        .and_then(|json| ModuleManifest::from_json(&json).map_err(|e| e.to_string()))
        .map_err(|reason| VerificationError::Unreadable {
            path: manifest_path.clone(),
            reason,
        })?;

    if manifest.module_id != record.module_id {
        return Err(VerificationError::ModuleMismatch {
            signed: record.module_id.clone(),
            manifest: manifest.module_id,
        });
    }

    if manifest.version != record.version {
        return Err(VerificationError::VersionMismatch {
            signed: record.version.clone(),
            manifest: manifest.version,
        });
    }

    let digest = content_hash(module_dir).map_err(|e| VerificationError::Unreadable {
        path: module_dir.to_path_buf(),
        reason: e.to_string(),
    })?;

    if digest.hex != record.content_hash {
        tracing::warn!(
            module_id = %record.module_id,
            "Content hash mismatch, module was modified after signing"
        );
        return Err(VerificationError::HashMismatch {
            expected: record.content_hash.clone(),
            actual: digest.hex,
        });
    }

    let signature = decode_signature(&record.signature)?;

    let embedded = VerifyingKey::from_public_key_pem(&record.public_key).ok();
    match embedded {
        Some(key) if !trusted_keys.contains(&key) => tracing::warn!(
            module_id = %record.module_id,
            "Embedded public key is not in the trusted key store and is ignored"
        ),
        None => tracing::debug!("Embedded public key could not be parsed"),
        _ => {}
    }

    let trusted = trusted_keys
        .iter()
        .find(|trusted| trusted.key.verify_strict(digest.hex.as_bytes(), &signature).is_ok());

    match trusted {
        Some(trusted) => {
            tracing::info!(
                module_id = %record.module_id,
                key = %trusted.name,
                "Signature verified"
            );
            Ok(trusted.name.clone())
        }
        None => Err(VerificationError::Untrusted(record.module_id.clone())),
    }
}

/// Boolean form of [`verify`]
pub fn is_valid(module_dir: &Path, record: &SignatureRecord, trusted_keys: &TrustedKeyStore) -> bool {
    verify(module_dir, record, trusted_keys).is_ok()
}

/// Read `.signature` from `module_dir` and verify it
pub fn verify_installed(
    module_dir: &Path,
    trusted_keys: &TrustedKeyStore,
) -> Result<String, VerificationError> {
    let record = read_signature(module_dir)?;
    verify(module_dir, &record, trusted_keys)
}

/// Parse the `.signature` file of a module
pub fn read_signature(module_dir: &Path) -> Result<SignatureRecord, VerificationError> {
    let path = module_dir.join(SIGNATURE_FILE);
    fs::read_to_string(&path)
        .map_err(|e| e.to_string())
        .and_then(|json| SignatureRecord::from_json(&json).map_err(|e| e.to_string()))
        .map_err(|reason| VerificationError::Unreadable { path, reason })
}

fn decode_signature(encoded: &str) -> Result<Signature, VerificationError> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| VerificationError::MalformedSignature(e.to_string()))?;

    let bytes: [u8; SIGNATURE_LENGTH] = bytes.try_into().map_err(|b: Vec<u8>| {
        VerificationError::MalformedSignature(format!(
            "expected {} bytes, got {}",
            SIGNATURE_LENGTH,
            b.len()
        ))
    })?;

    Ok(Signature::from_bytes(&bytes))
}
