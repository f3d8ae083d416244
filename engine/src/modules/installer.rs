//! Archive installation
//!
//! Installs a packaged module into the modules root as an inactive module
//! (`_<id>`). The archive is extracted into a hidden staging directory,
//! checked, verified against the trusted keys and only then renamed into
//! place, so a rejected archive never becomes visible to discovery.

use crate::crypto::verifier::{read_signature, verify};
use crate::crypto::{TrustedKeyStore, VerificationError};
use crate::fileset;
use sdk::errors::HubError;
use sdk::{is_valid_module_id, ModuleManifest, MANIFEST_FILE, SIGNATURE_FILE};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, Read, Seek};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use zip::ZipArchive;

/// Unix file type bits for a symbolic link
const S_IFLNK: u32 = 0o120000;
const S_IFMT: u32 = 0o170000;

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("Archive entry escapes the module directory: {path}")]
    PathTraversal { path: String },

    #[error("Archive entry {0} is a symbolic link")]
    Symlink(String),

    #[error("Archive must contain exactly one top-level module directory, found: {}", .0.join(", "))]
    RootCount(Vec<String>),

    #[error("Archive contains a file outside the module directory: {0}")]
    LooseFile(String),

    #[error("Archive entry {0} is not covered by the module signature")]
    Unhashed(String),

    #[error("Invalid module id '{0}' in archive")]
    InvalidId(String),

    #[error("Archive manifest is unusable: {0}")]
    Manifest(String),

    #[error("Archive directory '{root}' does not match manifest module_id '{module_id}'")]
    RootMismatch { root: String, module_id: String },

    #[error("Module '{0}' is not signed")]
    Unsigned(String),

    #[error("Signature check failed: {0}")]
    Verification(#[from] VerificationError),

    #[error("Module '{0}' is already installed; delete it first")]
    AlreadyInstalled(String),

    #[error("Download of {url} failed: {reason}")]
    Download { url: String, reason: String },

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl From<InstallError> for HubError {
    fn from(err: InstallError) -> Self {
        match err {
            InstallError::Verification(e) => e.into(),
            InstallError::Download { .. } => HubError::Network(err.to_string()),
            other => HubError::Install(other.to_string()),
        }
    }
}

/// An installed (inactive) module
#[derive(Debug, Clone)]
pub struct InstallOutcome {
    pub module_id: String,
    pub version: String,
    pub path: PathBuf,
    pub manifest: ModuleManifest,
    /// Verified content hash, if the module was signed
    pub content_hash: Option<String>,
    /// Name of the trusted key that verified the signature
    pub trusted_key: Option<String>,
}

/// Staging directory, removed on drop
///
/// On success the module has already been renamed out of it.
struct Staging {
    path: PathBuf,
}

impl Drop for Staging {
    fn drop(&mut self) {
        if self.path.exists() {
            if let Err(e) = fs::remove_dir_all(&self.path) {
                tracing::warn!("Failed to remove staging directory {}: {}", self.path.display(), e);
            }
        }
    }
}

pub struct Installer {
    modules_root: PathBuf,
    trusted_keys: TrustedKeyStore,
    require_signature: bool,
}

impl Installer {
    /// `require_signature = false` is development mode: unsigned archives
    /// install with a warning, signed ones are still verified.
    pub fn new(
        modules_root: impl Into<PathBuf>,
        trusted_keys: TrustedKeyStore,
        require_signature: bool,
    ) -> Self {
        Self {
            modules_root: modules_root.into(),
            trusted_keys,
            require_signature,
        }
    }

    /// Install the zip at `archive` as `_<module_id>`
    pub fn install_archive(&self, archive: &Path) -> Result<InstallOutcome, InstallError> {
        let file = File::open(archive).map_err(|source| InstallError::Io {
            path: archive.to_path_buf(),
            source,
        })?;
        self.install_from(file)
    }

    /// Install from any seekable zip source
    pub fn install_from<R: Read + Seek>(&self, reader: R) -> Result<InstallOutcome, InstallError> {
        let mut zip = ZipArchive::new(reader)?;

        let root = archive_root(&mut zip)?;
        self.ensure_not_installed(&root)?;

        fs::create_dir_all(&self.modules_root).map_err(|source| InstallError::Io {
            path: self.modules_root.clone(),
            source,
        })?;
        let staging = Staging {
            path: self
                .modules_root
                .join(format!(".staging-{}", uuid::Uuid::new_v4())),
        };
        extract(&mut zip, &staging.path)?;

        let staged = staging.path.join(&root);
        let manifest = read_manifest(&staged)?;
        if manifest.module_id != root {
            return Err(InstallError::RootMismatch {
                root,
                module_id: manifest.module_id,
            });
        }

        let (content_hash, trusted_key) = if staged.join(SIGNATURE_FILE).is_file() {
            let record = read_signature(&staged)?;
            let key = verify(&staged, &record, &self.trusted_keys)?;
            (Some(record.content_hash), Some(key))
        } else if self.require_signature {
            return Err(InstallError::Unsigned(root));
        } else {
            tracing::warn!(module_id = %root, "Installing unsigned module (development mode)");
            (None, None)
        };

        // Another install may have finished while this one was extracting
        self.ensure_not_installed(&root)?;

        let target = self.modules_root.join(format!("_{}", root));
        fs::rename(&staged, &target).map_err(|source| InstallError::Io {
            path: target.clone(),
            source,
        })?;
        drop(staging);

        tracing::info!(
            module_id = %root,
            version = %manifest.version,
            signed = content_hash.is_some(),
            "Module installed (inactive)"
        );

        Ok(InstallOutcome {
            module_id: root,
            version: manifest.version.clone(),
            path: target,
            manifest,
            content_hash,
            trusted_key,
        })
    }

    fn ensure_not_installed(&self, module_id: &str) -> Result<(), InstallError> {
        let active = self.modules_root.join(module_id);
        let inactive = self.modules_root.join(format!("_{}", module_id));
        if active.exists() || inactive.exists() {
            return Err(InstallError::AlreadyInstalled(module_id.to_string()));
        }
        Ok(())
    }
}

/// Download an archive into `dest_dir`
///
/// The body is held in memory and its SHA-256 checked against
/// `expected_sha256` before anything is written.
pub async fn download(
    url: &str,
    expected_sha256: &str,
    dest_dir: &Path,
) -> Result<PathBuf, InstallError> {
    let download_err = |reason: String| InstallError::Download {
        url: url.to_string(),
        reason,
    };

    let parsed = reqwest::Url::parse(url).map_err(|e| download_err(e.to_string()))?;
    let file_name = parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| {
            name.ends_with(".zip")
                && name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        })
        .unwrap_or("module.zip")
        .to_string();

    tracing::info!("Downloading module archive from {}", url);

    let client = reqwest::Client::builder()
        .user_agent(format!("cpos-hub/{}", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| download_err(e.to_string()))?;

    let bytes = client
        .get(parsed)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| download_err(e.to_string()))?
        .bytes()
        .await
        .map_err(|e| download_err(e.to_string()))?;

    let actual = hex::encode(Sha256::digest(&bytes));
    if !actual.eq_ignore_ascii_case(expected_sha256.trim()) {
        return Err(InstallError::ChecksumMismatch {
            expected: expected_sha256.trim().to_lowercase(),
            actual,
        });
    }

    tokio::fs::create_dir_all(dest_dir)
        .await
        .map_err(|source| InstallError::Io {
            path: dest_dir.to_path_buf(),
            source,
        })?;
    let dest = dest_dir.join(file_name);
    tokio::fs::write(&dest, &bytes)
        .await
        .map_err(|source| InstallError::Io {
            path: dest.clone(),
            source,
        })?;

    tracing::info!("Archive saved to {}", dest.display());
    Ok(dest)
}

/// Reject absolute paths and `..` components
fn validate_entry_path(name: &str) -> Result<(), InstallError> {
    let path = Path::new(name);
    let escapes = path.is_absolute()
        || name.starts_with('/')
        || name.starts_with('\\')
        || path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_) | Component::RootDir));

    if escapes {
        return Err(InstallError::PathTraversal {
            path: name.to_string(),
        });
    }
    Ok(())
}

/// Check every entry name and return the single top-level directory
fn archive_root<R: Read + Seek>(zip: &mut ZipArchive<R>) -> Result<String, InstallError> {
    let mut roots = BTreeSet::new();

    for i in 0..zip.len() {
        let entry = zip.by_index(i)?;
        let name = entry.name().to_string();
        validate_entry_path(&name)?;

        let mut parts = name.split('/').filter(|p| !p.is_empty() && *p != ".");
        let Some(first) = parts.next() else {
            continue;
        };
        let inside: PathBuf = parts.collect();
        if inside.as_os_str().is_empty() {
            if !entry.is_dir() {
                return Err(InstallError::LooseFile(name));
            }
        } else if inside != Path::new(SIGNATURE_FILE) && fileset::is_excluded(&inside) {
            // Excluded paths are never hashed, so nothing vouches for them
            return Err(InstallError::Unhashed(name));
        }
        roots.insert(first.to_string());
    }

    let roots: Vec<String> = roots.into_iter().collect();
    match roots.as_slice() {
        [root] if is_valid_module_id(root) => Ok(root.clone()),
        [root] => Err(InstallError::InvalidId(root.clone())),
        _ => Err(InstallError::RootCount(roots)),
    }
}

fn extract<R: Read + Seek>(zip: &mut ZipArchive<R>, dest: &Path) -> Result<(), InstallError> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source: io::Error| InstallError::Io { path, source }
    };

    fs::create_dir_all(dest).map_err(io_err(dest))?;

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let name = entry.name().to_string();

        if entry
            .unix_mode()
            .map(|mode| mode & S_IFMT == S_IFLNK)
            .unwrap_or(false)
        {
            return Err(InstallError::Symlink(name));
        }

        let relative = entry
            .enclosed_name()
            .ok_or_else(|| InstallError::PathTraversal { path: name.clone() })?;
        let out = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out).map_err(io_err(&out))?;
            continue;
        }

        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
        let mut file = File::create(&out).map_err(io_err(&out))?;
        io::copy(&mut entry, &mut file).map_err(io_err(&out))?;
    }

    Ok(())
}

fn read_manifest(module_dir: &Path) -> Result<ModuleManifest, InstallError> {
    let path = module_dir.join(MANIFEST_FILE);
    let json = fs::read_to_string(&path)
        .map_err(|e| InstallError::Manifest(format!("{}: {}", MANIFEST_FILE, e)))?;
    ModuleManifest::from_json(&json).map_err(|e| InstallError::Manifest(e.to_string()))
}
