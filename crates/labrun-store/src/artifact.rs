use std::fs;
use std::path::{Path, PathBuf};

use labrun_core::errors::LabError;
use labrun_core::serde::{from_json_slice, to_canonical_json_bytes};
use serde::{de::DeserializeOwned, Serialize};

/// Writes `value` as canonical JSON, creating parent folders as needed.
///
/// The payload lands in a sibling temporary file first and is renamed into
/// place, so concurrent readers never observe a half written artifact.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), LabError> {
    ensure_parent(path)?;
    let bytes = to_canonical_json_bytes(value)?;
    let tmp = temp_sibling(path);
    fs::write(&tmp, bytes).map_err(|err| LabError::storage("artifact_write", &tmp, err))?;
    fs::rename(&tmp, path).map_err(|err| LabError::storage("artifact_rename", path, err))
}

/// Reads and decodes a JSON artifact.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, LabError> {
    let bytes = fs::read(path).map_err(|err| LabError::storage("artifact_read", path, err))?;
    from_json_slice(&bytes).map_err(|err| match err {
        LabError::Serde(info) => LabError::Serde(info.with_path(path)),
        other => other,
    })
}

/// Creates an empty marker file (or leaves an existing one untouched).
pub fn touch(path: &Path) -> Result<(), LabError> {
    ensure_parent(path)?;
    fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map(|_| ())
        .map_err(|err| LabError::storage("marker_touch", path, err))
}

/// Recursively deletes `path`; a missing folder is not an error.
pub fn remove_dir(path: &Path) -> Result<(), LabError> {
    if !path.exists() {
        return Ok(());
    }
    fs::remove_dir_all(path).map_err(|err| LabError::storage("folder_remove", path, err))
}

/// Creates every missing parent of `path`.
pub fn ensure_parent(path: &Path) -> Result<(), LabError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| LabError::storage("folder_create", parent, err))?;
    }
    Ok(())
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.{}.tmp", std::process::id()))
}
