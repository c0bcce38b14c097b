//! Experiment definition callables and how they are discovered.
//!
//! A script is anything a [`ScriptLoader`] can turn into a list of named
//! callables. Every callable named `auto_run_<name>` defines the experiment
//! `<name>`; other names are ignored.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use labrun_core::errors::{ErrorInfo, LabError};
use tracing::{debug, warn};

use crate::experiment::Experiment;

/// Naming convention marking a callable as an experiment definition.
pub const AUTO_RUN_PREFIX: &str = "auto_run_";

/// Populates an empty experiment: job count, resources and its family.
pub type Definition = Arc<dyn Fn(&mut Experiment) -> Result<(), LabError> + Send + Sync>;

/// Turns a script path into the callables it declares, in declaration order.
///
/// Loaders return a plain list and must not register anything globally.
pub trait ScriptLoader: Send + Sync {
    fn load(&self, script: &Path) -> Result<Vec<(String, Definition)>, LabError>;
}

/// Loader over callables compiled into the binary, keyed by the script's file
/// stem: `scripts/sweeps.rs`, `sweeps.py` and `sweeps` all resolve to the
/// `sweeps` entry.
#[derive(Clone, Default)]
pub struct Catalog {
    scripts: BTreeMap<String, Vec<(String, Definition)>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares `callable` in `script`.
    pub fn with(
        mut self,
        script: &str,
        callable: &str,
        definition: impl Fn(&mut Experiment) -> Result<(), LabError> + Send + Sync + 'static,
    ) -> Self {
        self.scripts
            .entry(script.to_string())
            .or_default()
            .push((callable.to_string(), Arc::new(definition)));
        self
    }

    pub fn script_names(&self) -> impl Iterator<Item = &str> {
        self.scripts.keys().map(String::as_str)
    }
}

impl fmt::Debug for Catalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listing: BTreeMap<&str, Vec<&str>> = self
            .scripts
            .iter()
            .map(|(script, items)| {
                (
                    script.as_str(),
                    items.iter().map(|(name, _)| name.as_str()).collect(),
                )
            })
            .collect();
        f.debug_struct("Catalog").field("scripts", &listing).finish()
    }
}

impl ScriptLoader for Catalog {
    fn load(&self, script: &Path) -> Result<Vec<(String, Definition)>, LabError> {
        let stem = script
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or_default();
        self.scripts.get(stem).cloned().ok_or_else(|| {
            LabError::Config(
                ErrorInfo::new("unknown_script", "no definitions are registered for script")
                    .with_path(script)
                    .with_context("stem", stem),
            )
        })
    }
}

/// Experiment definitions found in a list of scripts.
#[derive(Clone, Default)]
pub struct DefinitionRegistry {
    definitions: BTreeMap<String, (PathBuf, Definition)>,
    order: Vec<String>,
}

impl DefinitionRegistry {
    /// Loads every script and keeps its `auto_run_*` callables. A name
    /// declared by several scripts resolves to the last one.
    pub fn scan(loader: &dyn ScriptLoader, scripts: &[PathBuf]) -> Result<Self, LabError> {
        let mut registry = Self::default();
        for script in scripts {
            for (callable, definition) in loader.load(script)? {
                let Some(name) = experiment_name(&callable) else {
                    continue;
                };
                debug!(script = %script.display(), experiment = name, "found definition");
                let previous = registry
                    .definitions
                    .insert(name.to_string(), (script.clone(), definition));
                match previous {
                    Some((first, _)) => warn!(
                        experiment = name,
                        first = %first.display(),
                        second = %script.display(),
                        "definition declared twice, keeping the later one"
                    ),
                    None => registry.order.push(name.to_string()),
                }
            }
        }
        Ok(registry)
    }

    pub fn get(&self, experiment_id: &str) -> Option<&Definition> {
        self.definitions.get(experiment_id).map(|(_, def)| def)
    }

    /// Script declaring `experiment_id`.
    pub fn script_of(&self, experiment_id: &str) -> Option<&Path> {
        self.definitions
            .get(experiment_id)
            .map(|(script, _)| script.as_path())
    }

    /// Experiment names in discovery order.
    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl fmt::Debug for DefinitionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefinitionRegistry")
            .field("names", &self.order)
            .finish()
    }
}

fn experiment_name(callable: &str) -> Option<&str> {
    callable
        .strip_prefix(AUTO_RUN_PREFIX)
        .filter(|name| !name.is_empty())
}
