mod common;

use std::fs;

use common::{experiment, points, Ratio};
use labrun_core::LabError;
use labrun_exp::Experiment;

#[test]
fn setup_is_idempotent() {
    let dir = tempfile::tempdir().expect("tmp");
    let family = Ratio::new(points(10));

    let mut first = experiment(dir.path(), &family, Some(3));
    let report = first.setup().expect("first setup");
    assert!(report.generated_task_args && report.generated_tasks && report.generated_jobs);
    assert_eq!((report.ntasks, report.njobs), (10, 3));
    let folder = first.folder().to_path_buf();
    let tasks_before = fs::read(folder.join("tasks.json")).expect("tasks");
    let job_before = fs::read(folder.join("job/0/2.json")).expect("job");

    let mut second = experiment(dir.path(), &family, Some(3));
    let report = second.setup().expect("second setup");
    assert!(!report.generated_task_args && !report.generated_tasks && !report.generated_jobs);
    assert_eq!(family.generate_calls(), 1);
    assert_eq!(fs::read(folder.join("tasks.json")).expect("tasks"), tasks_before);
    assert_eq!(fs::read(folder.join("job/0/2.json")).expect("job"), job_before);
    assert_eq!(second.jobs().expect("jobs").len(), 3);
}

#[test]
fn njobs_defaults_to_one_job_per_task_and_is_capped() {
    let dir = tempfile::tempdir().expect("tmp");
    let family = Ratio::new(points(4));
    let mut uncapped = experiment(dir.path(), &family, None);
    assert_eq!(uncapped.setup().expect("setup").njobs, 4);

    let other = tempfile::tempdir().expect("tmp");
    let mut capped = experiment(other.path(), &family, Some(50));
    assert_eq!(capped.setup().expect("setup").njobs, 4);
}

#[test]
fn zero_tasks_is_a_setup_error() {
    let dir = tempfile::tempdir().expect("tmp");
    let family = Ratio::new(Vec::new());
    let mut exp = experiment(dir.path(), &family, Some(2));
    let err = exp.setup().expect_err("no jobs");
    assert!(matches!(err, LabError::Setup(_)));
    assert_eq!(err.info().code, "no_jobs");
}

#[test]
fn missing_family_is_a_setup_error() {
    let dir = tempfile::tempdir().expect("tmp");
    let mut exp = Experiment::new("ws", "bare", dir.path().join("ws/bare"));
    let err = exp.setup().expect_err("no family");
    assert_eq!(err.info().code, "no_family");
}

#[test]
fn task_summary_lists_distinct_values() {
    let dir = tempfile::tempdir().expect("tmp");
    let family = Ratio::new(vec![(3, 1), (1, 2), (3, 2), (10, 1)]);
    let mut exp = experiment(dir.path(), &family, None);
    exp.setup().expect("setup");
    let summary = exp.task_summary().expect("summary");
    let num: Vec<i64> = summary["num"].iter().filter_map(|v| v.as_i64()).collect();
    let den: Vec<i64> = summary["den"].iter().filter_map(|v| v.as_i64()).collect();
    assert_eq!(num, vec![1, 3, 10]);
    assert_eq!(den, vec![1, 2]);
}

#[test]
fn job_task_ids_follow_the_partition() {
    let dir = tempfile::tempdir().expect("tmp");
    let family = Ratio::new(points(10));
    let mut exp = experiment(dir.path(), &family, Some(3));
    exp.setup().expect("setup");
    assert_eq!(exp.job_task_ids(0).expect("ids"), 0..4);
    assert_eq!(exp.job_task_ids(2).expect("ids"), 7..10);
    let err = exp.get_job(3).expect_err("out of range");
    assert_eq!(err.info().code, "job_out_of_range");
}
