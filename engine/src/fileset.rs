//! Canonical file set of a module directory
//!
//! Signing, verification and packaging all walk a module through this module
//! so that the set of hashed files and the set of shipped files are the same.
//! Files are returned in lexicographic order of their `/`-separated relative
//! path. Symlinks are not followed and never included.

use sdk::SIGNATURE_FILE;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Directory names that are never hashed or shipped, at any depth
const EXCLUDED_DIRS: &[&str] = &[
    "__pycache__",
    ".git",
    ".svn",
    ".hg",
    ".idea",
    ".vscode",
    "htmlcov",
    ".pytest_cache",
];

/// File names that are never hashed or shipped, at any depth
const EXCLUDED_FILES: &[&str] = &[".DS_Store", "Thumbs.db", ".coverage"];

/// File extensions that are never hashed or shipped
const EXCLUDED_EXTENSIONS: &[&str] = &["pyc", "pyo", "log", "sqlite3", "db", "swp"];

/// A file that belongs to the canonical set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleFile {
    /// Relative path with `/` separators, e.g. `models/base.py`
    pub relative: String,
    /// Path on disk
    pub absolute: PathBuf,
}

/// Whether a relative path falls under the exclusion rules
///
/// The top-level `.signature` is excluded because it is produced from the
/// hash. The packager adds it back explicitly.
pub fn is_excluded(relative: &Path) -> bool {
    let components: Vec<&str> = relative
        .components()
        .filter_map(|c| c.as_os_str().to_str())
        .collect();

    if components.as_slice() == [SIGNATURE_FILE] {
        return true;
    }

    let Some((file_name, parents)) = components.split_last() else {
        return false;
    };

    if parents.iter().any(|dir| EXCLUDED_DIRS.contains(dir)) {
        return true;
    }

    if EXCLUDED_DIRS.contains(file_name) || EXCLUDED_FILES.contains(file_name) {
        return true;
    }

    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| EXCLUDED_EXTENSIONS.contains(&ext))
        .unwrap_or(false)
}

/// Collect the canonical file set of `root`, sorted by relative path
///
/// # Errors
///
/// Returns an IO error if the directory cannot be walked or a path is not
/// valid UTF-8.
pub fn collect_files(root: &Path) -> std::io::Result<Vec<ModuleFile>> {
    let mut files = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .min_depth(1)
        .into_iter()
        .filter_entry(|entry| {
            entry
                .path()
                .strip_prefix(root)
                .map(|rel| !is_excluded(rel))
                .unwrap_or(false)
        });

    for entry in walker {
        let entry = entry.map_err(std::io::Error::other)?;
        if !entry.file_type().is_file() {
            continue;
        }

        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(std::io::Error::other)?;

        let relative = rel
            .components()
            .map(|c| {
                c.as_os_str().to_str().ok_or_else(|| {
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("Non UTF-8 path in module: {}", rel.display()),
                    )
                })
            })
            .collect::<std::io::Result<Vec<_>>>()?
            .join("/");

        files.push(ModuleFile {
            relative,
            absolute: entry.path().to_path_buf(),
        });
    }

    // Byte order of the joined string, independent of the walk order
    files.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok(files)
}

/// Whether `path` resolves to a location under `dir`
pub fn is_within(path: &Path, dir: &Path) -> bool {
    let Ok(dir) = dir.canonicalize() else {
        return false;
    };

    // The target may not exist yet, so resolve its closest existing ancestor
    let mut cursor = path.to_path_buf();
    let mut suffix = Vec::new();
    loop {
        if let Ok(resolved) = cursor.canonicalize() {
            let full = suffix.iter().rev().fold(resolved, |acc: PathBuf, part| acc.join(part));
            return full.starts_with(&dir);
        }
        match (cursor.file_name().map(|n| n.to_os_string()), cursor.parent()) {
            (Some(name), Some(parent)) => {
                suffix.push(name);
                cursor = parent.to_path_buf();
            }
            _ => return false,
        }
    }
}
