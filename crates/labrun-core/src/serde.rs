//! JSON encoding shared by every labrun artifact: task and job stores, result
//! partitions, merge aggregates and cluster ledgers. Object keys are written
//! in sorted order so identical content always yields identical bytes, which
//! is what the merge cache fingerprints rely on.

use std::collections::BTreeMap;
use std::iter::FromIterator;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

use crate::errors::{ErrorInfo, LabError};

fn serde_error(code: &str, err: impl ToString) -> LabError {
    LabError::Serde(ErrorInfo::new(code, err.to_string()))
}

/// Rebuilds every object with its keys in sorted order, recursing into arrays.
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let ordered = map
                .into_iter()
                .map(|(key, value)| (key, canonicalize(value)))
                .collect::<BTreeMap<_, _>>();
            Value::Object(Map::from_iter(ordered))
        }
        Value::Array(values) => {
            let canonical_values = values.into_iter().map(canonicalize).collect();
            Value::Array(canonical_values)
        }
        other => other,
    }
}

/// Encodes `value` as compact JSON with sorted object keys.
pub fn to_canonical_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, LabError> {
    let value = serde_json::to_value(value).map_err(|err| serde_error("json_serialize", err))?;
    let canonical = canonicalize(value);
    let mut bytes = Vec::new();
    serde_json::to_writer(&mut bytes, &canonical).map_err(|err| serde_error("json_write", err))?;
    Ok(bytes)
}

/// Decodes JSON bytes, reporting failures as [`LabError::Serde`] with code
/// `json_deserialize`.
pub fn from_json_slice<T: DeserializeOwned>(data: &[u8]) -> Result<T, LabError> {
    serde_json::from_slice(data).map_err(|err| serde_error("json_deserialize", err))
}
