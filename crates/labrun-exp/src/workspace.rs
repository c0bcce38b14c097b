//! Workspaces: named collections of experiments sharing a storage folder and
//! a set of definition scripts.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use labrun_core::errors::{ErrorInfo, LabError};
use labrun_store::{read_json, remove_dir};
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::cluster::{Cluster, SubmittedBatch};
use crate::config::LabConfig;
use crate::experiment::{Experiment, SubmitOpts};
use crate::registry::{DefinitionRegistry, ScriptLoader};

const PROPERTIES_FILE: &str = "properties.json";
const AUTO_RUN_FILE: &str = "auto_run.json";

/// One workspace. Experiments are built on first access and kept for the
/// lifetime of this value; the definition scan is done at most once.
pub struct Workspace {
    workspace_id: String,
    folder: PathBuf,
    program: String,
    loader: Arc<dyn ScriptLoader>,
    definitions: Option<DefinitionRegistry>,
    experiments: BTreeMap<String, Experiment>,
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("workspace_id", &self.workspace_id)
            .field("folder", &self.folder)
            .field("experiments", &self.experiments.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Workspace {
    pub fn new(workspace_id: &str, config: &LabConfig, loader: Arc<dyn ScriptLoader>) -> Self {
        Self {
            workspace_id: workspace_id.to_string(),
            folder: config.root_dir.join(workspace_id),
            program: config.program.clone(),
            loader,
            definitions: None,
            experiments: BTreeMap::new(),
        }
    }

    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn experiment_folder(&self, experiment_id: &str) -> PathBuf {
        self.folder.join(experiment_id)
    }

    /// Free-form property bag from `properties.json`; empty when absent.
    pub fn properties(&self) -> Result<Value, LabError> {
        let path = self.folder.join(PROPERTIES_FILE);
        if !path.exists() {
            return Ok(Value::Object(Default::default()));
        }
        read_json(&path)
    }

    /// Definition scripts listed in `auto_run.json`, relative entries
    /// resolved against the workspace folder.
    pub fn script_paths(&self) -> Result<Vec<PathBuf>, LabError> {
        let path = self.folder.join(AUTO_RUN_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let listed: Vec<PathBuf> = read_json(&path)?;
        Ok(listed
            .into_iter()
            .map(|script| {
                if script.is_absolute() {
                    script
                } else {
                    self.folder.join(script)
                }
            })
            .collect())
    }

    /// Scans the definition scripts on first use.
    pub fn definitions(&mut self) -> Result<&DefinitionRegistry, LabError> {
        if self.definitions.is_none() {
            let scripts = self.script_paths()?;
            let registry = DefinitionRegistry::scan(self.loader.as_ref(), &scripts)?;
            info!(
                workspace = %self.workspace_id,
                scripts = scripts.len(),
                definitions = registry.len(),
                "definitions loaded"
            );
            self.definitions = Some(registry);
        }
        Ok(self.definitions.get_or_insert_with(DefinitionRegistry::default))
    }

    /// Experiment ids with a folder on disk.
    pub fn experiment_ids(&self) -> Result<Vec<String>, LabError> {
        list_dirs(&self.folder)
    }

    /// Returns the experiment, building it on first access: an empty
    /// experiment is handed to its definition and then set up.
    pub fn get_experiment(&mut self, experiment_id: &str) -> Result<&mut Experiment, LabError> {
        if !self.experiments.contains_key(experiment_id) {
            let experiment = self.build_experiment(experiment_id)?;
            self.experiments.insert(experiment_id.to_string(), experiment);
        }
        self.experiments.get_mut(experiment_id).ok_or_else(|| {
            LabError::Config(ErrorInfo::new("unknown_experiment", "experiment vanished"))
        })
    }

    #[instrument(skip(self), fields(workspace = %self.workspace_id))]
    fn build_experiment(&mut self, experiment_id: &str) -> Result<Experiment, LabError> {
        let properties = self.properties()?;
        let folder = self.experiment_folder(experiment_id);
        let program = self.program.clone();
        let workspace_id = self.workspace_id.clone();
        let registry = self.definitions()?;
        let definition = registry.get(experiment_id).cloned().ok_or_else(|| {
            LabError::Config(
                ErrorInfo::new("unknown_experiment", "no auto_run definition for experiment")
                    .with_context("workspace", workspace_id.clone())
                    .with_context("experiment", experiment_id)
                    .with_hint("declare an auto_run_<name> callable in a script listed in auto_run.json"),
            )
        })?;
        let script = registry.script_of(experiment_id).map(Path::to_path_buf);

        let mut experiment = Experiment::new(&workspace_id, experiment_id, folder)
            .with_properties(properties)
            .with_program(program);
        if let Some(script) = script {
            experiment.set_script(script);
        }
        definition(&mut experiment)?;
        experiment.setup()?;
        Ok(experiment)
    }

    /// Kills the experiment's jobs, then deletes its folder.
    pub fn rm_experiment(&mut self, experiment_id: &str, cluster: &dyn Cluster) -> Result<(), LabError> {
        let experiment = self.get_experiment(experiment_id)?;
        experiment.kill_jobs(cluster)?;
        let folder = experiment.folder().to_path_buf();
        remove_dir(&folder)?;
        self.experiments.remove(experiment_id);
        info!(folder = %folder.display(), "experiment removed");
        Ok(())
    }

    /// Deletes the experiment folder without building the experiment and,
    /// with `jobs_too`, kills its whole submission group. Returns false when
    /// there was nothing to remove.
    pub fn remove(
        &mut self,
        experiment_id: &str,
        jobs_too: bool,
        cluster: &dyn Cluster,
    ) -> Result<bool, LabError> {
        if experiment_id.is_empty() {
            info!("nothing to remove");
            return Ok(false);
        }
        let folder = self.experiment_folder(experiment_id);
        remove_dir(&folder)?;
        self.experiments.remove(experiment_id);
        if jobs_too {
            cluster.kill_group(&format!("/{}/{}", self.workspace_id, experiment_id))?;
        }
        info!(folder = %folder.display(), jobs_too, "experiment removed");
        Ok(true)
    }

    /// Submits one experiment's jobs. A failed dry run deletes the
    /// experiment folder before returning the error.
    pub fn submit_experiment(
        &mut self,
        experiment_id: &str,
        cluster: &dyn Cluster,
        opts: &SubmitOpts,
    ) -> Result<SubmittedBatch, LabError> {
        self.submit_with_rollback(experiment_id, cluster, opts, opts.dryrun)
    }

    fn submit_with_rollback(
        &mut self,
        experiment_id: &str,
        cluster: &dyn Cluster,
        opts: &SubmitOpts,
        rollback_on_error: bool,
    ) -> Result<SubmittedBatch, LabError> {
        let experiment = self.get_experiment(experiment_id)?;
        match experiment.submit_jobs(cluster, opts) {
            Ok(ack) => Ok(ack),
            Err(err) => {
                if rollback_on_error {
                    let folder = experiment.folder().to_path_buf();
                    warn!(folder = %folder.display(), error = %err, "submission failed, removing experiment folder");
                    self.experiments.remove(experiment_id);
                    remove_dir(&folder)?;
                }
                Err(err)
            }
        }
    }

    /// Sets up and submits every experiment defined by the workspace's
    /// scripts. Any submission error deletes that experiment's folder; a dry
    /// run deletes it afterwards as well.
    #[instrument(skip(self, cluster, opts), fields(workspace = %self.workspace_id, dryrun = opts.dryrun))]
    pub fn auto_run(
        &mut self,
        cluster: &dyn Cluster,
        opts: &SubmitOpts,
    ) -> Result<Vec<(String, SubmittedBatch)>, LabError> {
        let names = self.definitions()?.names().to_vec();
        let mut submitted = Vec::with_capacity(names.len());
        for experiment_id in names {
            let ack = self.submit_with_rollback(&experiment_id, cluster, opts, true)?;
            if opts.dryrun {
                let folder = self.experiment_folder(&experiment_id);
                self.experiments.remove(&experiment_id);
                remove_dir(&folder)?;
            }
            submitted.push((experiment_id, ack));
        }
        Ok(submitted)
    }
}

/// Explicit owner of every workspace touched by one process.
pub struct WorkspaceRegistry {
    config: LabConfig,
    loader: Arc<dyn ScriptLoader>,
    workspaces: BTreeMap<String, Workspace>,
}

impl WorkspaceRegistry {
    pub fn new(config: LabConfig, loader: Arc<dyn ScriptLoader>) -> Self {
        Self {
            config,
            loader,
            workspaces: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &LabConfig {
        &self.config
    }

    pub fn root_dir(&self) -> &Path {
        &self.config.root_dir
    }

    pub fn exists(&self, workspace_id: &str) -> bool {
        self.config.root_dir.join(workspace_id).is_dir()
    }

    /// Workspace folders under the root, dot-folders excluded.
    pub fn workspace_ids(&self) -> Result<Vec<String>, LabError> {
        list_dirs(&self.config.root_dir)
    }

    /// Returns the workspace, failing with a configuration error when its
    /// folder does not exist.
    pub fn workspace(&mut self, workspace_id: &str) -> Result<&mut Workspace, LabError> {
        if !self.exists(workspace_id) {
            return Err(LabError::Config(
                ErrorInfo::new("unknown_workspace", "there is no workspace with this id")
                    .with_context("workspace", workspace_id)
                    .with_path(&self.config.root_dir.join(workspace_id)),
            ));
        }
        let config = &self.config;
        let loader = &self.loader;
        Ok(self
            .workspaces
            .entry(workspace_id.to_string())
            .or_insert_with(|| Workspace::new(workspace_id, config, Arc::clone(loader))))
    }

    pub fn experiment(
        &mut self,
        workspace_id: &str,
        experiment_id: &str,
    ) -> Result<&mut Experiment, LabError> {
        self.workspace(workspace_id)?.get_experiment(experiment_id)
    }
}

fn list_dirs(folder: &Path) -> Result<Vec<String>, LabError> {
    if !folder.exists() {
        return Ok(Vec::new());
    }
    let entries = fs::read_dir(folder).map_err(|err| LabError::storage("folder_list", folder, err))?;
    let mut ids = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| LabError::storage("folder_list", folder, err))?;
        if !entry.path().is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with('.') {
            ids.push(name);
        }
    }
    ids.sort();
    Ok(ids)
}
