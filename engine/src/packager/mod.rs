//! Distributable archive builder
//!
//! Produces `<module_id>-<version>.zip` with every entry rooted at
//! `<module_id>/`. Entries are written in lexicographic order with a fixed
//! timestamp and fixed permissions, so the same directory always yields the
//! same bytes apart from the stamped `signed_at` in `.signature`.

use crate::crypto::verifier::read_signature;
use crate::fileset::{self, is_within};
use crate::validator::{is_three_part_version, PackageValidator};
use sdk::errors::HubError;
use sdk::{is_valid_module_id, ModuleManifest, MANIFEST_FILE, SIGNATURE_FILE};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

/// Errors that abort packaging
#[derive(Debug, Error)]
pub enum PackagingError {
    #[error("Module directory not found: {0}")]
    ModuleNotFound(PathBuf),

    #[error("Validation failed for module '{module_id}': {}", .errors.join("; "))]
    ValidationFailed {
        module_id: String,
        errors: Vec<String>,
    },

    #[error("Cannot read manifest {path}: {reason}")]
    Manifest { path: PathBuf, reason: String },

    #[error("Module is not signed ({0} missing); sign it or enable packaging.allow_unsigned")]
    MissingSignature(PathBuf),

    #[error("Signature file is unreadable: {0}")]
    InvalidSignature(String),

    #[error("Output directory {0} is inside the module directory")]
    OutputInsideModule(PathBuf),

    #[error("Archive is {size} bytes, over the {limit} byte limit; archive deleted")]
    TooLarge { size: u64, limit: u64 },

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl From<PackagingError> for HubError {
    fn from(err: PackagingError) -> Self {
        match err {
            PackagingError::ValidationFailed { module_id, errors } => {
                HubError::ValidationFailed { module_id, errors }
            }
            other => HubError::Packaging(other.to_string()),
        }
    }
}

/// Packaging policy
#[derive(Debug, Clone)]
pub struct PackageOptions {
    pub skip_validation: bool,
    /// Development mode: package modules without `.signature`
    pub allow_unsigned: bool,
    pub max_size_bytes: u64,
}

impl Default for PackageOptions {
    fn default() -> Self {
        Self {
            skip_validation: false,
            allow_unsigned: false,
            max_size_bytes: 50 * 1024 * 1024,
        }
    }
}

/// A finished archive
#[derive(Debug, Clone)]
pub struct PackageOutcome {
    pub path: PathBuf,
    pub size: u64,
    pub entries: usize,
    pub signed: bool,
}

/// Removes a half-written archive unless it was committed
struct PartialArchive {
    path: PathBuf,
    committed: bool,
}

impl Drop for PartialArchive {
    fn drop(&mut self) {
        if !self.committed && self.path.exists() {
            if let Err(e) = fs::remove_file(&self.path) {
                tracing::warn!("Failed to remove partial archive {}: {}", self.path.display(), e);
            }
        }
    }
}

enum EntrySource {
    File(PathBuf),
    Bytes(Vec<u8>),
}

/// Builds archives from module directories
pub struct Packager<'a> {
    validator: &'a PackageValidator,
    options: PackageOptions,
}

impl<'a> Packager<'a> {
    pub fn new(validator: &'a PackageValidator, options: PackageOptions) -> Self {
        Self { validator, options }
    }

    /// Package `module_dir` into `output_dir`
    ///
    /// Nothing is written when validation fails or the signature is missing.
    /// The module directory is only read; the stamped signature goes into the
    /// archive and `.signature` on disk keeps `signed_at: null`.
    ///
    /// # Errors
    ///
    /// See [`PackagingError`]. On `TooLarge` the archive has already been deleted.
    pub fn package(
        &self,
        module_dir: &Path,
        output_dir: &Path,
    ) -> Result<PackageOutcome, PackagingError> {
        if !module_dir.is_dir() {
            return Err(PackagingError::ModuleNotFound(module_dir.to_path_buf()));
        }

        if is_within(output_dir, module_dir) {
            return Err(PackagingError::OutputInsideModule(output_dir.to_path_buf()));
        }

        if !self.options.skip_validation {
            let result = self.validator.validate(module_dir);
            if !result.passed() {
                let module_id = module_dir
                    .file_name()
                    .map(|n| n.to_string_lossy().trim_start_matches('_').to_string())
                    .unwrap_or_default();
                return Err(PackagingError::ValidationFailed {
                    module_id,
                    errors: result.errors,
                });
            }
        }

        let manifest = read_manifest(module_dir)?;

        let signature_path = module_dir.join(SIGNATURE_FILE);
        let stamped = if signature_path.is_file() {
            let record = read_signature(module_dir)
                .map_err(|e| PackagingError::InvalidSignature(e.to_string()))?;
            let stamped = record.stamped(chrono::Utc::now().to_rfc3339());
            let json = stamped
                .to_json()
                .map_err(|e| PackagingError::InvalidSignature(e.to_string()))?;
            Some(json.into_bytes())
        } else if self.options.allow_unsigned {
            tracing::warn!(
                module_id = %manifest.module_id,
                "Packaging unsigned module (development mode)"
            );
            None
        } else {
            return Err(PackagingError::MissingSignature(signature_path));
        };
        let signed = stamped.is_some();

        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source: io::Error| PackagingError::Io { path, source }
        };

        let mut entries: Vec<(String, EntrySource)> = fileset::collect_files(module_dir)
            .map_err(io_err(module_dir))?
            .into_iter()
            .map(|f| (f.relative, EntrySource::File(f.absolute)))
            .collect();
        if let Some(bytes) = stamped {
            entries.push((SIGNATURE_FILE.to_string(), EntrySource::Bytes(bytes)));
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        fs::create_dir_all(output_dir).map_err(io_err(output_dir))?;

        let archive_name = format!("{}-{}.zip", manifest.module_id, manifest.version);
        let final_path = output_dir.join(&archive_name);
        let mut partial = PartialArchive {
            path: output_dir.join(format!(".{}.partial", archive_name)),
            committed: false,
        };

        let file = File::create(&partial.path).map_err(io_err(&partial.path))?;
        let mut writer = ZipWriter::new(file);
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .last_modified_time(DateTime::default())
            .unix_permissions(0o644);

        for (relative, source) in &entries {
            writer.start_file(format!("{}/{}", manifest.module_id, relative), options)?;
            match source {
                EntrySource::File(path) => {
                    let mut input = File::open(path).map_err(io_err(path))?;
                    io::copy(&mut input, &mut writer).map_err(io_err(path))?;
                }
                EntrySource::Bytes(bytes) => {
                    writer.write_all(bytes).map_err(io_err(&partial.path))?;
                }
            }
        }

        let file = writer.finish()?;
        file.sync_all().map_err(io_err(&partial.path))?;
        drop(file);

        let size = fs::metadata(&partial.path)
            .map_err(io_err(&partial.path))?
            .len();
        if size > self.options.max_size_bytes {
            tracing::error!(
                module_id = %manifest.module_id,
                size,
                limit = self.options.max_size_bytes,
                "Archive exceeds size limit"
            );
            return Err(PackagingError::TooLarge {
                size,
                limit: self.options.max_size_bytes,
            });
        }

        fs::rename(&partial.path, &final_path).map_err(io_err(&final_path))?;
        partial.committed = true;

        tracing::info!(
            module_id = %manifest.module_id,
            archive = %final_path.display(),
            size,
            entries = entries.len(),
            "Module packaged"
        );

        Ok(PackageOutcome {
            path: final_path,
            size,
            entries: entries.len(),
            signed,
        })
    }
}

fn read_manifest(module_dir: &Path) -> Result<ModuleManifest, PackagingError> {
    let path = module_dir.join(MANIFEST_FILE);
    let manifest = fs::read_to_string(&path)
        .map_err(|e| e.to_string())
        .and_then(|json| ModuleManifest::from_json(&json).map_err(|e| e.to_string()))
        .map_err(|reason| PackagingError::Manifest {
            path: path.clone(),
            reason,
        })?;

    if manifest.module_id.trim().is_empty() || manifest.version.trim().is_empty() {
        return Err(PackagingError::Manifest {
            path,
            reason: "module_id and version are required to name the archive".to_string(),
        });
    }

    // Both end up in the output file name, even when validation is skipped
    if !is_valid_module_id(&manifest.module_id) {
        return Err(PackagingError::Manifest {
            path,
            reason: format!("module_id '{}' cannot name an archive", manifest.module_id),
        });
    }
    if !is_three_part_version(&manifest.version) {
        return Err(PackagingError::Manifest {
            path,
            reason: format!("version '{}' cannot name an archive", manifest.version),
        });
    }

    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module(root: &Path) -> PathBuf {
        let dir = root.join("reports");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join(MANIFEST_FILE),
            r#"{"module_id":"reports","name":"R","version":"1.0.0","description":"d","author":"a"}"#,
        )
        .unwrap();
        fs::write(dir.join("__init__.py"), "").unwrap();
        dir
    }

    #[test]
    fn test_output_inside_module_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let dir = module(temp.path());
        let validator = PackageValidator::new().unwrap();
        let packager = Packager::new(
            &validator,
            PackageOptions {
                allow_unsigned: true,
                ..PackageOptions::default()
            },
        );

        let err = packager.package(&dir, &dir.join("dist")).unwrap_err();
        assert!(matches!(err, PackagingError::OutputInsideModule(_)));
        assert!(!dir.join("dist").exists());
    }

    #[test]
    fn test_unsigned_requires_development_mode() {
        let temp = tempfile::tempdir().unwrap();
        let dir = module(temp.path());
        let out = temp.path().join("dist");
        let validator = PackageValidator::new().unwrap();

        let err = Packager::new(&validator, PackageOptions::default())
            .package(&dir, &out)
            .unwrap_err();
        assert!(matches!(err, PackagingError::MissingSignature(_)));
        assert!(!out.join("reports-1.0.0.zip").exists());

        let outcome = Packager::new(
            &validator,
            PackageOptions {
                allow_unsigned: true,
                ..PackageOptions::default()
            },
        )
        .package(&dir, &out)
        .unwrap();
        assert!(!outcome.signed);
        assert_eq!(outcome.path, out.join("reports-1.0.0.zip"));
        assert_eq!(outcome.entries, 2);
    }
}
