use std::path::{Path, PathBuf};

/// Number of ids stored per shard directory.
pub const SHARD_SIZE: u64 = 1000;

/// Returns the shard bucket holding `id`.
pub fn shard_of(id: u64) -> u64 {
    id / SHARD_SIZE
}

/// Builds `<base>/<id div 1000>/<id>.<ext>`.
pub fn sharded_path(base: &Path, id: u64, ext: &str) -> PathBuf {
    base.join(shard_of(id).to_string())
        .join(format!("{id}.{ext}"))
}
