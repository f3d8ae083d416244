//! Cryptographic operations module
//!
//! This module provides the supply-chain primitives of the hub:
//! - SHA-256 content hash over a module's canonical file set
//! - Ed25519 signing of that hash into a detached `.signature` record
//! - Verification of a record against the pinned trusted-key store
//!
//! # Security
//!
//! The public key embedded in a `.signature` file is never used to verify
//! it. Only keys in the [`TrustedKeyStore`] grant trust.

pub mod keys;
pub mod signer;
pub mod verifier;

pub use keys::{KeyPaths, TrustedKeyStore};
pub use signer::{Signer, SigningError};
pub use verifier::{verify, verify_installed, VerificationError};

use crate::fileset;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Result of hashing a module directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDigest {
    /// Lowercase hex SHA-256
    pub hex: String,
    /// Number of files that went into the digest
    pub file_count: usize,
}

/// Compute the content hash of a module directory
///
/// Every file of the canonical set (see [`crate::fileset`]) streams through a
/// single SHA-256 in lexicographic path order. Only file bytes are hashed, so
/// renaming a file without changing contents changes the order at most.
///
/// # Errors
///
/// Returns an IO error if the directory cannot be walked or a file cannot be read.
pub fn content_hash(module_dir: &Path) -> std::io::Result<ContentDigest> {
    let files = fileset::collect_files(module_dir)?;
    let mut hasher = Sha256::new();

    let mut buffer = [0u8; 8192];
    for file in &files {
        let mut handle = File::open(&file.absolute)?;
        loop {
            let bytes_read = handle.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }
    }

    tracing::debug!(
        "Hashed {} files under {}",
        files.len(),
        module_dir.display()
    );

    Ok(ContentDigest {
        hex: hex::encode(hasher.finalize()),
        file_count: files.len(),
    })
}
