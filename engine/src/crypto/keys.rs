//! Key material handling
//!
//! Developer signing keys live in the key directory (`~/.cpos-hub/keys` by
//! default): `module_signing_key.pem` (PKCS#8, mode 0600) and
//! `module_signing_key.pub.pem` (SPKI). The hub trusts only the SPKI keys
//! found in its trusted-key directory.

use super::signer::SigningError;
use ed25519_dalek::{SigningKey, VerifyingKey};
use pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rand::rngs::OsRng;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// File name of the developer private key
pub const PRIVATE_KEY_FILE: &str = "module_signing_key.pem";

/// File name of the developer public key
pub const PUBLIC_KEY_FILE: &str = "module_signing_key.pub.pem";

/// Where a saved keypair was written
#[derive(Debug, Clone)]
pub struct KeyPaths {
    pub private_key: PathBuf,
    pub public_key: PathBuf,
}

impl KeyPaths {
    pub fn in_dir(key_dir: &Path) -> Self {
        Self {
            private_key: key_dir.join(PRIVATE_KEY_FILE),
            public_key: key_dir.join(PUBLIC_KEY_FILE),
        }
    }
}

/// Generate a fresh Ed25519 signing key from the OS RNG
pub fn generate_signing_key() -> SigningKey {
    SigningKey::generate(&mut OsRng)
}

/// SPKI PEM encoding of a public key
pub fn public_key_pem(key: &VerifyingKey) -> Result<String, SigningError> {
    key.to_public_key_pem(LineEnding::LF)
        .map_err(|e| SigningError::Crypto(format!("Failed to encode public key: {}", e)))
}

/// Read a PKCS#8 PEM private key
pub fn load_signing_key(path: &Path) -> Result<SigningKey, SigningError> {
    let pem = fs::read_to_string(path).map_err(|e| SigningError::KeyMaterial {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    SigningKey::from_pkcs8_pem(&pem).map_err(|e| SigningError::KeyMaterial {
        path: path.to_path_buf(),
        reason: format!("not a PKCS#8 Ed25519 private key ({})", e),
    })
}

/// Write a keypair into `key_dir`, private key readable by the owner only
pub fn save_keypair(key_dir: &Path, key: &SigningKey) -> Result<KeyPaths, SigningError> {
    let paths = KeyPaths::in_dir(key_dir);
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source: std::io::Error| SigningError::Io { path, source }
    };

    fs::create_dir_all(key_dir).map_err(io_err(key_dir))?;

    let private_pem = key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| SigningError::Crypto(format!("Failed to encode private key: {}", e)))?;

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options
        .open(&paths.private_key)
        .map_err(io_err(&paths.private_key))?;
    file.write_all(private_pem.as_bytes())
        .map_err(io_err(&paths.private_key))?;

    fs::write(&paths.public_key, public_key_pem(&key.verifying_key())?)
        .map_err(io_err(&paths.public_key))?;

    tracing::info!("Saved signing keypair to {}", key_dir.display());
    Ok(paths)
}

/// Load the developer key from `key_dir`, generating and saving one if absent
pub fn load_or_generate(key_dir: &Path) -> Result<(SigningKey, bool), SigningError> {
    let paths = KeyPaths::in_dir(key_dir);

    if paths.private_key.exists() {
        return Ok((load_signing_key(&paths.private_key)?, false));
    }

    let key = generate_signing_key();
    save_keypair(key_dir, &key)?;
    tracing::warn!(
        "No signing key found, generated a new one at {}",
        paths.private_key.display()
    );

    Ok((key, true))
}

/// A pinned public key
#[derive(Debug, Clone)]
pub struct TrustedKey {
    /// File stem or caller-supplied label
    pub name: String,
    pub key: VerifyingKey,
}

/// Set of public keys the hub accepts signatures from
#[derive(Debug, Clone, Default)]
pub struct TrustedKeyStore {
    keys: Vec<TrustedKey>,
}

impl TrustedKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `*.pem` file in `dir`
    ///
    /// A missing directory yields an empty store. Files that do not parse as
    /// SPKI Ed25519 keys are skipped with a warning.
    pub fn load_dir(dir: &Path) -> std::io::Result<Self> {
        let mut store = Self::new();

        if !dir.is_dir() {
            tracing::debug!("Trusted key directory {} does not exist", dir.display());
            return Ok(store);
        }

        let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("pem"))
            .collect();
        paths.sort();

        for path in paths {
            let name = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();

            let pem = fs::read_to_string(&path)?;
            match store.add_pem(&name, &pem) {
                Ok(()) => tracing::debug!("Loaded trusted key '{}'", name),
                Err(e) => tracing::warn!("Skipping trusted key {}: {}", path.display(), e),
            }
        }

        tracing::info!("Loaded {} trusted key(s) from {}", store.len(), dir.display());
        Ok(store)
    }

    pub fn add(&mut self, name: impl Into<String>, key: VerifyingKey) {
        self.keys.push(TrustedKey {
            name: name.into(),
            key,
        });
    }

    /// Parse and add an SPKI PEM key
    pub fn add_pem(&mut self, name: &str, pem: &str) -> Result<(), String> {
        let key = VerifyingKey::from_public_key_pem(pem).map_err(|e| e.to_string())?;
        self.add(name, key);
        Ok(())
    }

    pub fn contains(&self, key: &VerifyingKey) -> bool {
        self.keys.iter().any(|k| &k.key == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrustedKey> {
        self.keys.iter()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Copy a public key PEM into the trusted-key directory as `<name>.pem`
pub fn trust_public_key(trusted_dir: &Path, name: &str, pem: &str) -> Result<PathBuf, SigningError> {
    VerifyingKey::from_public_key_pem(pem).map_err(|e| SigningError::KeyMaterial {
        path: PathBuf::from(name),
        reason: format!("not an SPKI Ed25519 public key ({})", e),
    })?;

    fs::create_dir_all(trusted_dir).map_err(|source| SigningError::Io {
        path: trusted_dir.to_path_buf(),
        source,
    })?;

    let target = trusted_dir.join(format!("{}.pem", name));
    fs::write(&target, pem).map_err(|source| SigningError::Io {
        path: target.clone(),
        source,
    })?;

    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_round_trips_through_pem() {
        let temp = tempfile::tempdir().unwrap();
        let key = generate_signing_key();

        let paths = save_keypair(temp.path(), &key).unwrap();
        let loaded = load_signing_key(&paths.private_key).unwrap();
        assert_eq!(loaded.verifying_key(), key.verifying_key());

        let pub_pem = fs::read_to_string(&paths.public_key).unwrap();
        assert!(pub_pem.starts_with("-----BEGIN PUBLIC KEY-----"));
    }

    #[cfg(unix)]
    #[test]
    fn test_private_key_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir().unwrap();
        let paths = save_keypair(temp.path(), &generate_signing_key()).unwrap();
        let mode = fs::metadata(&paths.private_key).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_load_or_generate_reuses_existing_key() {
        let temp = tempfile::tempdir().unwrap();
        let (first, generated) = load_or_generate(temp.path()).unwrap();
        assert!(generated);

        let (second, generated) = load_or_generate(temp.path()).unwrap();
        assert!(!generated);
        assert_eq!(first.verifying_key(), second.verifying_key());
    }

    #[test]
    fn test_trusted_store_loads_pem_files_and_skips_garbage() {
        let temp = tempfile::tempdir().unwrap();
        let key = generate_signing_key();
        let pem = public_key_pem(&key.verifying_key()).unwrap();

        trust_public_key(temp.path(), "vendor", &pem).unwrap();
        fs::write(temp.path().join("broken.pem"), "not a key").unwrap();
        fs::write(temp.path().join("notes.txt"), "ignored").unwrap();

        let store = TrustedKeyStore::load_dir(temp.path()).unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.contains(&key.verifying_key()));
        assert_eq!(store.iter().next().map(|k| k.name.as_str()), Some("vendor"));
    }

    #[test]
    fn test_missing_trusted_dir_is_empty() {
        let temp = tempfile::tempdir().unwrap();
        let store = TrustedKeyStore::load_dir(&temp.path().join("nope")).unwrap();
        assert!(store.is_empty());
    }
}
