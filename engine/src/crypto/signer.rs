//! Module signing
//!
//! Produces the detached `.signature` record for a module directory. The
//! signed message is the lowercase hex content hash, so the record can be
//! checked without re-reading the manifest's bytes.

use super::keys::{self, KeyPaths};
use super::content_hash;
use crate::fileset::is_within;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use ed25519_dalek::{Signer as _, SigningKey, VerifyingKey};
use sdk::errors::HubError;
use sdk::{ModuleManifest, SignatureRecord, ALGORITHM_ED25519, MANIFEST_FILE, SIGNATURE_FILE};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that abort signing
#[derive(Debug, Error)]
pub enum SigningError {
    #[error("Module directory not found: {0}")]
    ModuleNotFound(PathBuf),

    #[error("Cannot read manifest {path}: {reason}")]
    Manifest { path: PathBuf, reason: String },

    #[error("{0} already exists; pass --force to re-sign")]
    AlreadySigned(PathBuf),

    #[error("No files to sign in {0}")]
    EmptyFileSet(PathBuf),

    #[error("Key file {0} is inside the module directory and would be shipped")]
    KeyInsideModule(PathBuf),

    #[error("Invalid key material in {path}: {reason}")]
    KeyMaterial { path: PathBuf, reason: String },

    #[error("Cryptographic failure: {0}")]
    Crypto(String),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<SigningError> for HubError {
    fn from(err: SigningError) -> Self {
        HubError::Signing(err.to_string())
    }
}

/// Where the signing key came from
#[derive(Debug, Clone)]
pub enum KeyOrigin {
    /// `--key-file`
    Supplied(PathBuf),
    /// Existing developer key in the key directory
    KeyDir(PathBuf),
    /// Freshly generated into the key directory
    Generated(KeyPaths),
}

/// Signs module directories with one Ed25519 key
pub struct Signer {
    key: SigningKey,
    origin: KeyOrigin,
}

impl Signer {
    /// Wrap an in-memory key
    pub fn new(key: SigningKey) -> Self {
        Self {
            key,
            origin: KeyOrigin::KeyDir(PathBuf::new()),
        }
    }

    /// Pick the key for signing `module_dir`
    ///
    /// With `key_file` the key is read from that file, which must not live
    /// inside the module. Otherwise the developer key in `key_dir` is used,
    /// generated on first use.
    ///
    /// # Errors
    ///
    /// - `KeyInsideModule` if the key file or key directory is under `module_dir`
    /// - `KeyMaterial` if the key file is not a PKCS#8 Ed25519 key
    pub fn for_module(
        module_dir: &Path,
        key_file: Option<&Path>,
        key_dir: &Path,
    ) -> Result<Self, SigningError> {
        match key_file {
            Some(path) => {
                if is_within(path, module_dir) {
                    return Err(SigningError::KeyInsideModule(path.to_path_buf()));
                }
                Ok(Self {
                    key: keys::load_signing_key(path)?,
                    origin: KeyOrigin::Supplied(path.to_path_buf()),
                })
            }
            None => {
                if is_within(key_dir, module_dir) {
                    return Err(SigningError::KeyInsideModule(key_dir.to_path_buf()));
                }
                let (key, generated) = keys::load_or_generate(key_dir)?;
                let origin = if generated {
                    KeyOrigin::Generated(KeyPaths::in_dir(key_dir))
                } else {
                    KeyOrigin::KeyDir(key_dir.to_path_buf())
                };
                Ok(Self { key, origin })
            }
        }
    }

    pub fn origin(&self) -> &KeyOrigin {
        &self.origin
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }

    /// Sign `module_dir` and write `.signature` into it
    ///
    /// `signed_at` is left null; the packager stamps it into the archive copy.
    ///
    /// # Errors
    ///
    /// - `AlreadySigned` if `.signature` exists and `force` is false
    /// - `Manifest` if `module.json` is missing, malformed or lacks id/version
    /// - `EmptyFileSet` if there is nothing to hash
    pub fn sign(&self, module_dir: &Path, force: bool) -> Result<SignatureRecord, SigningError> {
        if !module_dir.is_dir() {
            return Err(SigningError::ModuleNotFound(module_dir.to_path_buf()));
        }

        let signature_path = module_dir.join(SIGNATURE_FILE);
        if signature_path.exists() && !force {
            return Err(SigningError::AlreadySigned(signature_path));
        }

        let manifest = read_manifest(module_dir)?;

        let digest = content_hash(module_dir).map_err(|source| SigningError::Io {
            path: module_dir.to_path_buf(),
            source,
        })?;
        if digest.file_count == 0 {
            return Err(SigningError::EmptyFileSet(module_dir.to_path_buf()));
        }

        let signature = self.key.sign(digest.hex.as_bytes());

        let record = SignatureRecord {
            module_id: manifest.module_id,
            version: manifest.version,
            content_hash: digest.hex,
            algorithm: ALGORITHM_ED25519.to_string(),
            signature: STANDARD.encode(signature.to_bytes()),
            public_key: keys::public_key_pem(&self.key.verifying_key())?,
            signed_at: None,
        };

        let json = record
            .to_json()
            .map_err(|e| SigningError::Crypto(format!("Failed to encode signature: {}", e)))?;
        fs::write(&signature_path, json).map_err(|source| SigningError::Io {
            path: signature_path.clone(),
            source,
        })?;

        tracing::info!(
            module_id = %record.module_id,
            version = %record.version,
            files = digest.file_count,
            "Module signed"
        );

        Ok(record)
    }
}

fn read_manifest(module_dir: &Path) -> Result<ModuleManifest, SigningError> {
    let path = module_dir.join(MANIFEST_FILE);
    let manifest_err = |reason: String| SigningError::Manifest {
        path: path.clone(),
        reason,
    };

    let json = fs::read_to_string(&path).map_err(|e| manifest_err(e.to_string()))?;
    let manifest = ModuleManifest::from_json(&json).map_err(|e| manifest_err(e.to_string()))?;

    for (field, value) in [("module_id", &manifest.module_id), ("version", &manifest.version)] {
        if value.trim().is_empty() {
            return Err(manifest_err(format!("missing {}", field)));
        }
    }

    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module(dir: &Path) {
        fs::create_dir_all(dir).unwrap();
        fs::write(
            dir.join(MANIFEST_FILE),
            r#"{"module_id":"reports","name":"Reports","version":"1.0.0","description":"d","author":"a"}"#,
        )
        .unwrap();
        fs::write(dir.join("__init__.py"), "").unwrap();
    }

    #[test]
    fn test_key_file_inside_module_is_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let module_dir = temp.path().join("reports");
        module(&module_dir);

        let key_path = module_dir.join("key.pem");
        keys::save_keypair(&module_dir, &keys::generate_signing_key()).unwrap();
        fs::rename(module_dir.join(keys::PRIVATE_KEY_FILE), &key_path).unwrap();

        let result = Signer::for_module(&module_dir, Some(&key_path), &temp.path().join("keys"));
        assert!(matches!(result, Err(SigningError::KeyInsideModule(_))));
    }

    #[test]
    fn test_key_dir_inside_module_is_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let module_dir = temp.path().join("reports");
        module(&module_dir);

        let result = Signer::for_module(&module_dir, None, &module_dir.join("keys"));
        assert!(matches!(result, Err(SigningError::KeyInsideModule(_))));
        assert!(!module_dir.join("keys").exists());
    }

    #[test]
    fn test_sign_refuses_existing_signature_without_force() {
        let temp = tempfile::tempdir().unwrap();
        let module_dir = temp.path().join("reports");
        module(&module_dir);

        let signer = Signer::new(keys::generate_signing_key());
        signer.sign(&module_dir, false).unwrap();

        let err = signer.sign(&module_dir, false).unwrap_err();
        assert!(matches!(err, SigningError::AlreadySigned(_)));
        assert!(signer.sign(&module_dir, true).is_ok());
    }

    #[test]
    fn test_sign_writes_null_timestamp() {
        let temp = tempfile::tempdir().unwrap();
        let module_dir = temp.path().join("reports");
        module(&module_dir);

        let record = Signer::new(keys::generate_signing_key())
            .sign(&module_dir, false)
            .unwrap();

        assert_eq!(record.module_id, "reports");
        assert_eq!(record.algorithm, "ed25519");
        assert_eq!(record.signed_at, None);

        let on_disk = fs::read_to_string(module_dir.join(SIGNATURE_FILE)).unwrap();
        assert_eq!(SignatureRecord::from_json(&on_disk).unwrap(), record);
    }

    #[test]
    fn test_missing_manifest_is_signing_error() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("__init__.py"), "").unwrap();

        let err = Signer::new(keys::generate_signing_key())
            .sign(temp.path(), false)
            .unwrap_err();
        assert!(matches!(err, SigningError::Manifest { .. }));
    }
}
