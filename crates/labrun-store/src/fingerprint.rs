use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use labrun_core::errors::{ErrorInfo, LabError};
use labrun_core::hash::sha256_hex;
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

/// Single digest summarising the contents of every file below a folder.
///
/// Each file is hashed on its own, the per-file hashes are sorted and fed into
/// one SHA256. [`MergeCache`](crate::MergeCache) fingerprints exactly the
/// partition files it would merge; its own aggregate and marker never
/// contribute.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentFingerprint(String);

impl ContentFingerprint {
    /// Hashes `folder` recursively, skipping files named in `exclude`.
    pub fn compute(folder: &Path, exclude: &[&str]) -> Result<Self, LabError> {
        let mut files = Vec::new();
        if folder.exists() {
            for entry in WalkDir::new(folder) {
                let entry = entry.map_err(|err| {
                    LabError::Storage(
                        ErrorInfo::new("fingerprint_walk", err.to_string()).with_path(folder),
                    )
                })?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy();
                if exclude.iter().any(|skip| *skip == name) {
                    continue;
                }
                files.push(entry.into_path());
            }
        }
        Self::of_files(&files)
    }

    /// Digest over an explicit file list. Order does not matter.
    pub fn of_files(files: &[PathBuf]) -> Result<Self, LabError> {
        let mut hashes = files
            .iter()
            .map(|path| {
                fs::read(path)
                    .map(|bytes| sha256_hex(&bytes))
                    .map_err(|err| LabError::storage("fingerprint_read", path, err))
            })
            .collect::<Result<Vec<_>, _>>()?;
        hashes.sort();
        let mut hasher = Sha256::new();
        for hash in &hashes {
            hasher.update(hash.as_bytes());
        }
        Ok(Self(format!("{:x}", hasher.finalize())))
    }

    /// Wraps a previously stored digest string.
    pub fn from_stored(digest: impl Into<String>) -> Self {
        Self(digest.into().trim().to_string())
    }

    /// Hex representation of the digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
