use std::fs;
use std::path::{Path, PathBuf};

use labrun_core::errors::{ErrorInfo, LabError};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Environment variable overriding [`LabConfig::root_dir`].
pub const ROOT_ENV: &str = "LABRUN_ROOT";
/// Environment variable overriding [`LabConfig::program`].
pub const PROGRAM_ENV: &str = "LABRUN_PROGRAM";

/// Process level configuration: where workspaces live and how jobs call back
/// into labrun.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabConfig {
    /// Folder holding one sub-folder per workspace.
    #[serde(default = "default_root")]
    pub root_dir: PathBuf,
    /// Executable placed at the head of every job command line.
    #[serde(default = "default_program")]
    pub program: String,
    /// Ledger folder for the local cluster backend.
    #[serde(default)]
    pub cluster_dir: Option<PathBuf>,
}

fn default_root() -> PathBuf {
    PathBuf::from("labrun-root")
}

fn default_program() -> String {
    "labrun".to_string()
}

impl Default for LabConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root(),
            program: default_program(),
            cluster_dir: None,
        }
    }
}

impl LabConfig {
    /// Config rooted at `root` with every other field defaulted.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root.into(),
            ..Self::default()
        }
    }

    /// Location of the user config file, `<config dir>/labrun/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("labrun").join("config.toml"))
    }

    /// Loads the user config file (if present) and applies env overrides.
    pub fn load() -> Result<Self, LabError> {
        let mut config = match Self::default_path() {
            Some(path) if path.exists() => Self::from_path(&path)?,
            _ => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parses a TOML config file.
    pub fn from_path(path: &Path) -> Result<Self, LabError> {
        let text =
            fs::read_to_string(path).map_err(|err| LabError::storage("config_read", path, err))?;
        debug!(path = %path.display(), "loading config");
        Self::from_toml_str(&text).map_err(|err| match err {
            LabError::Config(info) => LabError::Config(info.with_path(path)),
            other => other,
        })
    }

    /// Parses TOML config text.
    pub fn from_toml_str(text: &str) -> Result<Self, LabError> {
        toml::from_str(text)
            .map_err(|err| LabError::Config(ErrorInfo::new("config_parse", err.to_string())))
    }

    /// Applies `LABRUN_*` overrides resolved through `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(root) = lookup(ROOT_ENV).filter(|value| !value.is_empty()) {
            self.root_dir = PathBuf::from(root);
        }
        if let Some(program) = lookup(PROGRAM_ENV).filter(|value| !value.is_empty()) {
            self.program = program;
        }
    }

    /// Ledger folder used by the local cluster backend.
    pub fn cluster_dir(&self) -> PathBuf {
        self.cluster_dir
            .clone()
            .unwrap_or_else(|| self.root_dir.join(".cluster"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_fills_defaults() {
        let config = LabConfig::from_toml_str("root_dir = \"/data/exp\"\n").expect("parse");
        assert_eq!(config.root_dir, PathBuf::from("/data/exp"));
        assert_eq!(config.program, "labrun");
        assert_eq!(config.cluster_dir(), PathBuf::from("/data/exp/.cluster"));
    }

    #[test]
    fn env_overrides_win() {
        let mut config = LabConfig::default();
        config.apply_overrides(|key| match key {
            ROOT_ENV => Some("/scratch".into()),
            PROGRAM_ENV => Some(String::new()),
            _ => None,
        });
        assert_eq!(config.root_dir, PathBuf::from("/scratch"));
        assert_eq!(config.program, "labrun");
    }

    #[test]
    fn bad_toml_is_a_config_error() {
        let err = LabConfig::from_toml_str("root_dir = [").expect_err("invalid");
        assert!(matches!(err, LabError::Config(_)));
    }
}
