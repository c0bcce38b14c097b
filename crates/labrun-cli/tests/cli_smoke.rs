use std::fs;
use std::path::Path;
use std::process::{Command, Output};

const BIN: &str = env!("CARGO_BIN_EXE_labrun");

fn labrun(root: &Path, args: &[&str]) -> Output {
    Command::new(BIN)
        .args(args)
        .env("LABRUN_ROOT", root)
        .env("LABRUN_PROGRAM", BIN)
        .env("RUST_LOG", "warn")
        .output()
        .expect("spawn labrun")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn seed_workspace(root: &Path) {
    let folder = root.join("ws");
    fs::create_dir_all(&folder).expect("workspace");
    fs::write(folder.join("auto_run.json"), br#"["demo"]"#).expect("auto_run.json");
}

#[test]
fn root_prints_the_configured_folder() {
    let dir = tempfile::tempdir().expect("tmp");
    let output = labrun(dir.path(), &["root"]);
    assert!(output.status.success());
    assert_eq!(stdout(&output).trim(), dir.path().display().to_string());
}

#[test]
fn submitted_jobs_run_locally_and_report_as_finished() {
    let dir = tempfile::tempdir().expect("tmp");
    seed_workspace(dir.path());

    let output = labrun(dir.path(), &["submit-jobs", "ws", "power"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(stdout(&output).contains("Submitted 4 jobs"));

    let output = labrun(
        dir.path(),
        &["exp-info", "ws", "power", "--tasks", "--finished-jobs"],
    );
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("# finished jobs   4"), "{text}");
    assert!(text.contains("# failed jobs     0"), "{text}");
    assert!(text.contains("Finished job IDs: [0, 1, 2, 3]"), "{text}");
    assert!(text.contains("divide by zero"), "{text}");

    let output = labrun(dir.path(), &["run-job", "ws", "power", "0"]);
    assert!(stdout(&output).contains("Job 0 has already finished."));

    let output = labrun(dir.path(), &["job-info", "ws", "power", "1", "--result"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("\"task_id\": 4"));
}

#[test]
fn dryrun_auto_run_leaves_no_experiment_folders() {
    let dir = tempfile::tempdir().expect("tmp");
    seed_workspace(dir.path());
    let output = labrun(dir.path(), &["auto-run", "ws", "--dryrun"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(stdout(&output).contains("power: 4 jobs"));
    assert!(!dir.path().join("ws/power").exists());
    assert!(!dir.path().join("ws/uniform").exists());
}

#[test]
fn unknown_experiment_exits_with_failure() {
    let dir = tempfile::tempdir().expect("tmp");
    seed_workspace(dir.path());
    let output = labrun(dir.path(), &["exp-info", "ws", "missing"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("unknown_experiment"));
}
