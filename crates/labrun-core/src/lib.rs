#![deny(missing_docs)]
#![doc = "Core error, serialization and hashing primitives shared by the labrun crates."]

pub mod errors;
/// Stable content hashing helpers.
pub mod hash;
pub mod rng;
/// Canonical JSON serde helpers.
pub mod serde;

pub use errors::{ErrorInfo, LabError};
pub use hash::{sha256_hex, stable_hash_string};
pub use rng::{seeded_shuffle, SUBMISSION_SEED};
pub use serde::{from_json_slice, to_canonical_json_bytes};

/// Convenience alias used throughout labrun.
pub type Result<T, E = LabError> = std::result::Result<T, E>;
