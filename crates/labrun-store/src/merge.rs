use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use labrun_core::errors::{ErrorInfo, LabError};
use labrun_core::serde::from_json_slice;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument};
use walkdir::WalkDir;

use crate::artifact::{read_json, write_json};
use crate::fingerprint::ContentFingerprint;

/// Name of the consolidated aggregate written next to the partitions.
pub const AGGREGATE_FILE: &str = "all.json";
/// Name of the marker holding the digest of the merged inputs.
pub const DIGEST_FILE: &str = ".folder_hash";

const PARTITION_EXT: &str = "json";

/// How eagerly [`MergeCache::merge`] trusts an existing aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeMode {
    /// Recompute the folder digest; re-merge whenever it differs from the
    /// stored one.
    #[default]
    Verify,
    /// Reuse an existing aggregate without hashing the inputs. Falls back to
    /// [`MergeMode::Verify`] when no aggregate exists yet.
    ForceCache,
}

/// Result of a merge pass.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome<T> {
    /// The folder holds no partition files.
    Empty,
    /// The stored aggregate was still valid and has been loaded.
    Reused(BTreeMap<u64, T>),
    /// The partitions were merged and a new aggregate persisted.
    Merged(BTreeMap<u64, T>),
}

impl<T> MergeOutcome<T> {
    /// Consumes the outcome, returning the aggregate if there is one.
    pub fn into_map(self) -> Option<BTreeMap<u64, T>> {
        match self {
            MergeOutcome::Empty => None,
            MergeOutcome::Reused(map) | MergeOutcome::Merged(map) => Some(map),
        }
    }

    /// True when this pass actually read the partition files.
    pub fn was_merged(&self) -> bool {
        matches!(self, MergeOutcome::Merged(_))
    }
}

/// Consolidates the many small partition files written below a folder into
/// one aggregate, gated by a [`ContentFingerprint`] of the inputs.
///
/// Merges are not mutually exclusive: callers must not run two merges over
/// the same folder at once.
#[derive(Debug, Clone)]
pub struct MergeCache {
    folder: PathBuf,
}

impl MergeCache {
    /// Creates a cache rooted at `folder`.
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
        }
    }

    /// Folder holding the partitions.
    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Path of the consolidated aggregate.
    pub fn aggregate_path(&self) -> PathBuf {
        self.folder.join(AGGREGATE_FILE)
    }

    /// Path of the stored digest marker.
    pub fn digest_path(&self) -> PathBuf {
        self.folder.join(DIGEST_FILE)
    }

    /// Lists every partition file below the folder in path order.
    pub fn input_files(&self) -> Result<Vec<PathBuf>, LabError> {
        let mut files = Vec::new();
        if !self.folder.exists() {
            return Ok(files);
        }
        for entry in WalkDir::new(&self.folder).sort_by_file_name() {
            let entry = entry.map_err(|err| {
                LabError::Storage(
                    ErrorInfo::new("merge_walk", err.to_string()).with_path(&self.folder),
                )
            })?;
            if !entry.file_type().is_file() || entry.depth() == 0 {
                continue;
            }
            let path = entry.path();
            let name = entry.file_name().to_string_lossy();
            if name == AGGREGATE_FILE || name == DIGEST_FILE || name.starts_with('.') {
                continue;
            }
            if path.extension().and_then(|ext| ext.to_str()) != Some(PARTITION_EXT) {
                continue;
            }
            files.push(path.to_path_buf());
        }
        Ok(files)
    }

    /// Digest persisted by the last successful merge, if any.
    pub fn stored_digest(&self) -> Result<Option<ContentFingerprint>, LabError> {
        let path = self.digest_path();
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path)
            .map_err(|err| LabError::storage("digest_read", &path, err))?;
        Ok(Some(ContentFingerprint::from_stored(text)))
    }

    /// Fingerprint of the partition files listed by [`MergeCache::input_files`].
    pub fn current_digest(&self) -> Result<ContentFingerprint, LabError> {
        ContentFingerprint::of_files(&self.input_files()?)
    }

    /// Runs one merge pass.
    #[instrument(skip(self), fields(folder = %self.folder.display()))]
    pub fn merge<T>(&self, mode: MergeMode) -> Result<MergeOutcome<T>, LabError>
    where
        T: Serialize + DeserializeOwned,
    {
        let aggregate = self.aggregate_path();
        if mode == MergeMode::ForceCache && aggregate.exists() {
            debug!("reusing aggregate without hashing");
            return Ok(MergeOutcome::Reused(read_json(&aggregate)?));
        }

        let files = self.input_files()?;
        if files.is_empty() {
            info!("there is nothing to merge because no file has been found");
            return Ok(MergeOutcome::Empty);
        }

        let digest = ContentFingerprint::of_files(&files)?;
        if aggregate.exists() && self.stored_digest()?.as_ref() == Some(&digest) {
            debug!(digest = %digest, "inputs unchanged, reusing aggregate");
            return Ok(MergeOutcome::Reused(read_json(&aggregate)?));
        }

        let merged = merge_files::<T>(&files)?;
        info!(files = files.len(), entries = merged.len(), "merged partitions");
        write_json(&aggregate, &merged)?;
        let marker = self.digest_path();
        fs::write(&marker, digest.as_str())
            .map_err(|err| LabError::storage("digest_write", &marker, err))?;
        Ok(MergeOutcome::Merged(merged))
    }
}

fn merge_files<T: DeserializeOwned>(files: &[PathBuf]) -> Result<BTreeMap<u64, T>, LabError> {
    let mut out = BTreeMap::new();
    let mut origin: BTreeMap<u64, &Path> = BTreeMap::new();
    for path in files {
        for (key, value) in decode_partition::<T>(path)? {
            if let Some(previous) = origin.insert(key, path) {
                return Err(LabError::Merge(
                    ErrorInfo::new("merge_key_collision", "key produced by more than one file")
                        .with_context("key", key.to_string())
                        .with_context("first", previous.display().to_string())
                        .with_path(path)
                        .with_hint("each job or task id must be written by exactly one file"),
                ));
            }
            out.insert(key, value);
        }
    }
    Ok(out)
}

/// A partition file holds either an object keyed by numeric ids or a single
/// value keyed by the file's base name.
fn decode_partition<T: DeserializeOwned>(path: &Path) -> Result<Vec<(u64, T)>, LabError> {
    let bytes = fs::read(path).map_err(|err| LabError::storage("partition_read", path, err))?;
    let value: Value = from_json_slice(&bytes)
        .map_err(|err| decode_error(path, err.info().message.clone()))?;
    match value {
        Value::Object(map) if is_id_map(&map) => map
            .into_iter()
            .map(|(key, entry)| {
                let id = key
                    .parse::<u64>()
                    .map_err(|err| decode_error(path, err.to_string()))?;
                let entry = serde_json::from_value(entry)
                    .map_err(|err| decode_error(path, format!("entry {key}: {err}")))?;
                Ok((id, entry))
            })
            .collect(),
        single => {
            let entry = serde_json::from_value(single)
                .map_err(|err| decode_error(path, err.to_string()))?;
            Ok(vec![(key_from_name(path)?, entry)])
        }
    }
}

fn is_id_map(map: &serde_json::Map<String, Value>) -> bool {
    !map.is_empty() && map.keys().all(|key| key.parse::<u64>().is_ok())
}

fn decode_error(path: &Path, message: String) -> LabError {
    LabError::Merge(ErrorInfo::new("partition_decode", message).with_path(path))
}

fn key_from_name(path: &Path) -> Result<u64, LabError> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .and_then(|stem| stem.split('.').next())
        .and_then(|stem| stem.parse().ok())
        .ok_or_else(|| {
            LabError::Merge(
                ErrorInfo::new("partition_key", "file name is not a numeric id").with_path(path),
            )
        })
}
