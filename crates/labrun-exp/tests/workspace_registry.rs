mod common;

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use common::{points, Ratio};
use labrun_core::LabError;
use labrun_exp::{
    Catalog, Definition, LabConfig, MemoryCluster, ScriptLoader, SubmitOpts, WorkspaceRegistry,
};

struct CountingLoader {
    inner: Catalog,
    loads: Arc<AtomicUsize>,
}

impl ScriptLoader for CountingLoader {
    fn load(&self, script: &Path) -> Result<Vec<(String, Definition)>, LabError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.inner.load(script)
    }
}

fn catalog(family: &Ratio) -> Catalog {
    let small = family.clone();
    let large = family.clone();
    Catalog::new()
        .with("sweeps", "auto_run_small", move |exp| {
            exp.install(small.clone());
            exp.set_njobs(2);
            Ok(())
        })
        .with("sweeps", "auto_run_large", move |exp| {
            exp.install(large.clone());
            exp.set_job_memory_mb(512);
            Ok(())
        })
}

fn seed_workspace(root: &Path, scripts: &[&str]) {
    let folder = root.join("ws");
    fs::create_dir_all(&folder).expect("workspace folder");
    fs::write(
        folder.join("auto_run.json"),
        serde_json::to_vec(scripts).expect("json"),
    )
    .expect("auto_run.json");
}

fn registry(root: &Path, loader: impl ScriptLoader + 'static) -> WorkspaceRegistry {
    WorkspaceRegistry::new(LabConfig::with_root(root), Arc::new(loader))
}

#[test]
fn experiment_is_built_from_its_definition() {
    let dir = tempfile::tempdir().expect("tmp");
    seed_workspace(dir.path(), &["scripts/sweeps.rs"]);
    let family = Ratio::new(points(5));
    let mut registry = registry(dir.path(), catalog(&family));

    let exp = registry.experiment("ws", "small").expect("experiment");
    assert_eq!(exp.njobs().expect("njobs"), 2);
    assert_eq!(exp.group(), "/ws/small");
    assert_eq!(exp.script(), Some(dir.path().join("ws/scripts/sweeps.rs").as_path()));
    assert!(dir.path().join("ws/small/.init_jobs_files_generated").exists());

    // Cached for the registry's lifetime: no second generation.
    registry.experiment("ws", "small").expect("again");
    assert_eq!(family.generate_calls(), 1);
}

#[test]
fn unknown_experiment_is_a_configuration_error() {
    let dir = tempfile::tempdir().expect("tmp");
    seed_workspace(dir.path(), &["sweeps"]);
    let family = Ratio::new(points(1));
    let mut registry = registry(dir.path(), catalog(&family));
    let err = registry.experiment("ws", "nope").expect_err("unknown");
    assert!(matches!(err, LabError::Config(_)));
    assert_eq!(err.info().code, "unknown_experiment");
}

#[test]
fn unknown_workspace_is_a_configuration_error() {
    let dir = tempfile::tempdir().expect("tmp");
    let mut registry = registry(dir.path(), Catalog::new());
    let err = registry.experiment("ghost", "exp").expect_err("unknown");
    assert_eq!(err.info().code, "unknown_workspace");
}

#[test]
fn definitions_are_scanned_once_per_workspace() {
    let dir = tempfile::tempdir().expect("tmp");
    seed_workspace(dir.path(), &["sweeps"]);
    let family = Ratio::new(points(3));
    let loads = Arc::new(AtomicUsize::new(0));
    let loader = CountingLoader {
        inner: catalog(&family),
        loads: Arc::clone(&loads),
    };
    let mut registry = registry(dir.path(), loader);
    registry.experiment("ws", "small").expect("small");
    registry.experiment("ws", "large").expect("large");
    assert_eq!(loads.load(Ordering::SeqCst), 1);
}

#[test]
fn properties_default_to_empty_and_are_handed_over() {
    let dir = tempfile::tempdir().expect("tmp");
    seed_workspace(dir.path(), &["sweeps"]);
    let family = Ratio::new(points(2));
    let mut registry = registry(dir.path(), catalog(&family));
    let workspace = registry.workspace("ws").expect("workspace");
    assert_eq!(workspace.properties().expect("props"), serde_json::json!({}));

    fs::write(
        dir.path().join("ws/properties.json"),
        br#"{"ratio": {"label": "Ratio"}}"#,
    )
    .expect("properties");
    let exp = registry.experiment("ws", "small").expect("experiment");
    assert_eq!(exp.properties()["ratio"]["label"], "Ratio");
}

#[test]
fn dryrun_auto_run_leaves_no_folders() {
    let dir = tempfile::tempdir().expect("tmp");
    seed_workspace(dir.path(), &["sweeps"]);
    let family = Ratio::new(points(4));
    let mut registry = registry(dir.path(), catalog(&family));
    let cluster = MemoryCluster::new();
    let opts = SubmitOpts {
        dryrun: true,
        ..SubmitOpts::default()
    };
    let submitted = registry
        .workspace("ws")
        .expect("workspace")
        .auto_run(&cluster, &opts)
        .expect("auto run");
    let names: Vec<&str> = submitted.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, vec!["small", "large"]);
    assert!(cluster.submissions().iter().all(|(_, dryrun)| *dryrun));
    assert!(!dir.path().join("ws/small").exists());
    assert!(!dir.path().join("ws/large").exists());
}

#[test]
fn failed_submission_rolls_back_the_experiment_folder() {
    let dir = tempfile::tempdir().expect("tmp");
    seed_workspace(dir.path(), &["sweeps"]);
    let family = Ratio::new(points(4));
    let mut registry = registry(dir.path(), catalog(&family));
    let cluster = MemoryCluster::new();
    cluster.fail_next_submit("scheduler unavailable");
    let opts = SubmitOpts {
        dryrun: true,
        ..SubmitOpts::default()
    };
    let err = registry
        .workspace("ws")
        .expect("workspace")
        .submit_experiment("small", &cluster, &opts)
        .expect_err("submit fails");
    assert_eq!(err.info().code, "submit_failed");
    assert!(!dir.path().join("ws/small").exists());
}

fn cancelled(dryrun: bool) -> SubmitOpts {
    SubmitOpts {
        dryrun,
        cancel: Some(Arc::new(AtomicBool::new(true))),
        ..SubmitOpts::default()
    }
}

#[test]
fn interrupted_dryrun_removes_the_experiment_folder() {
    let dir = tempfile::tempdir().expect("tmp");
    seed_workspace(dir.path(), &["sweeps"]);
    let family = Ratio::new(points(4));
    let mut registry = registry(dir.path(), catalog(&family));
    let cluster = MemoryCluster::new();
    let err = registry
        .workspace("ws")
        .expect("workspace")
        .submit_experiment("small", &cluster, &cancelled(true))
        .expect_err("interrupted");
    assert_eq!(err.info().code, "submission_interrupted");
    assert!(cluster.submissions().is_empty());
    assert!(!dir.path().join("ws/small").exists());
}

#[test]
fn interrupted_real_submission_keeps_the_experiment_folder() {
    let dir = tempfile::tempdir().expect("tmp");
    seed_workspace(dir.path(), &["sweeps"]);
    let family = Ratio::new(points(4));
    let mut registry = registry(dir.path(), catalog(&family));
    let cluster = MemoryCluster::new();
    let err = registry
        .workspace("ws")
        .expect("workspace")
        .submit_experiment("small", &cluster, &cancelled(false))
        .expect_err("interrupted");
    assert_eq!(err.info().code, "submission_interrupted");
    assert!(dir.path().join("ws/small/.init_jobs_files_generated").exists());
}

#[test]
fn remove_with_jobs_kills_the_group() {
    let dir = tempfile::tempdir().expect("tmp");
    seed_workspace(dir.path(), &["sweeps"]);
    let family = Ratio::new(points(2));
    let mut registry = registry(dir.path(), catalog(&family));
    let cluster = MemoryCluster::new();
    let workspace = registry.workspace("ws").expect("workspace");
    workspace.get_experiment("small").expect("experiment");
    assert!(!workspace.remove("", true, &cluster).expect("noop"));
    assert!(workspace.remove("small", true, &cluster).expect("remove"));
    assert!(!dir.path().join("ws/small").exists());
    assert!(cluster.killed_groups().contains("/ws/small"));
}

#[test]
fn rm_experiment_kills_runs_and_deletes_folder() {
    let dir = tempfile::tempdir().expect("tmp");
    seed_workspace(dir.path(), &["sweeps"]);
    let family = Ratio::new(points(2));
    let mut registry = registry(dir.path(), catalog(&family));
    let cluster = MemoryCluster::new();
    let workspace = registry.workspace("ws").expect("workspace");
    workspace
        .submit_experiment("large", &cluster, &SubmitOpts::default())
        .expect("submit");
    workspace.rm_experiment("large", &cluster).expect("rm");
    assert!(!dir.path().join("ws/large").exists());
}

#[test]
fn workspace_ids_skip_hidden_folders() {
    let dir = tempfile::tempdir().expect("tmp");
    fs::create_dir_all(dir.path().join("alpha")).expect("alpha");
    fs::create_dir_all(dir.path().join(".cluster")).expect("hidden");
    fs::write(dir.path().join("notes.txt"), b"x").expect("file");
    let registry = registry(dir.path(), Catalog::new());
    assert_eq!(registry.workspace_ids().expect("ids"), vec!["alpha".to_string()]);
    assert!(registry.exists("alpha"));
    assert!(!registry.exists("beta"));
}
