//! Structured error types shared across labrun crates.

use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured payload attached to every [`LabError`] variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable machine readable error code.
    pub code: String,
    /// Human readable diagnostic message.
    pub message: String,
    /// Contextual key value pairs (identifiers, paths, etc.).
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    /// Optional hint that may help the caller resolve the issue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorInfo {
    /// Creates a new error payload with the provided code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            context: BTreeMap::new(),
            hint: None,
        }
    }

    /// Adds a context entry to the payload.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Adds the offending filesystem path as context.
    pub fn with_path(self, path: &Path) -> Self {
        self.with_context("path", path.display().to_string())
    }

    /// Sets a human readable hint for remediation.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Canonical error type for labrun.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "family", content = "detail")]
pub enum LabError {
    /// Missing experiment definitions, unreadable configuration.
    #[error("configuration error: {0}")]
    Config(ErrorInfo),
    /// Staged setup failures such as an empty job set.
    #[error("setup error: {0}")]
    Setup(ErrorInfo),
    /// Merge cache failures (colliding keys, undecodable partitions).
    #[error("merge error: {0}")]
    Merge(ErrorInfo),
    /// Filesystem failures while reading or writing artifacts.
    #[error("storage error: {0}")]
    Storage(ErrorInfo),
    /// Failures reported by the external cluster collaborator.
    #[error("cluster error: {0}")]
    Cluster(ErrorInfo),
    /// Serialization and schema errors.
    #[error("serde error: {0}")]
    Serde(ErrorInfo),
}

impl Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code: {})", self.message, self.code)?;
        if !self.context.is_empty() {
            write!(f, " | context: [")?;
            for (idx, (key, value)) in self.context.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{key}={value}")?;
            }
            write!(f, "]")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, " | hint: {hint}")?;
        }
        Ok(())
    }
}

impl LabError {
    /// Returns a reference to the payload describing the error.
    pub fn info(&self) -> &ErrorInfo {
        match self {
            LabError::Config(info)
            | LabError::Setup(info)
            | LabError::Merge(info)
            | LabError::Storage(info)
            | LabError::Cluster(info)
            | LabError::Serde(info) => info,
        }
    }

    /// Shorthand for an I/O failure on `path`.
    pub fn storage(code: &str, path: &Path, err: impl ToString) -> Self {
        LabError::Storage(ErrorInfo::new(code, err.to_string()).with_path(path))
    }
}
