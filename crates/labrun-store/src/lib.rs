#![deny(missing_docs)]
#![doc = "Flat-file persistence for labrun: sharded artifacts, folder fingerprints and the merge cache."]

/// JSON artifact and marker file helpers.
pub mod artifact;
/// Recursive folder content hashing.
pub mod fingerprint;
/// Content-hash gated consolidation of partition files.
pub mod merge;
/// Directory sharding by id.
pub mod shard;

pub use artifact::{read_json, remove_dir, touch, write_json};
pub use fingerprint::ContentFingerprint;
pub use merge::{MergeCache, MergeMode, MergeOutcome, AGGREGATE_FILE, DIGEST_FILE};
pub use shard::{shard_of, sharded_path, SHARD_SIZE};
