mod common;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use common::{experiment, points, Ratio};
use labrun_exp::{Cluster, ClusterStatus, MemoryCluster, RunJobOpts, SubmitOpts};

fn submitted_order(batch: &labrun_exp::SubmissionBatch) -> Vec<String> {
    batch
        .commands
        .iter()
        .map(|command| command[4].clone())
        .collect()
}

#[test]
fn submission_order_is_shuffled_deterministically() {
    let family = Ratio::new(points(12));
    let mut orders = Vec::new();
    for _ in 0..2 {
        let dir = tempfile::tempdir().expect("tmp");
        let mut exp = experiment(dir.path(), &family, None);
        exp.setup().expect("setup");
        let cluster = MemoryCluster::new();
        exp.submit_jobs(&cluster, &SubmitOpts::default()).expect("submit");
        let (batch, dryrun) = cluster.submissions().remove(0);
        assert!(!dryrun);
        orders.push(submitted_order(&batch));
    }
    assert_eq!(orders[0], orders[1]);
    let sorted: Vec<String> = (0..12).map(|i| i.to_string()).collect();
    assert_ne!(orders[0], sorted);
    let mut seen = orders[0].clone();
    seen.sort_by_key(|id| id.parse::<u64>().unwrap_or(u64::MAX));
    assert_eq!(seen, sorted);
}

#[test]
fn batch_carries_group_resources_and_command_lines() {
    let dir = tempfile::tempdir().expect("tmp");
    let family = Ratio::new(points(2));
    let mut exp = experiment(dir.path(), &family, None);
    exp.set_job_memory_mb(2048);
    exp.set_nthreads(4);
    exp.setup().expect("setup");
    let cluster = MemoryCluster::new();
    let opts = SubmitOpts {
        dryrun: true,
        requests: vec!["gpu".into()],
        queue: Some("long".into()),
        cancel: None,
    };
    exp.submit_jobs(&cluster, &opts).expect("submit");

    let (batch, dryrun) = cluster.submissions().remove(0);
    assert!(dryrun);
    assert_eq!(batch.group, "/ws/exp");
    assert_eq!(batch.queue.as_deref(), Some("long"));
    assert_eq!(batch.requests, vec!["gpu".to_string()]);
    assert_eq!(batch.resources.memory_mb, Some(2048));
    assert_eq!(batch.resources.nthreads, 4);
    for command in &batch.commands {
        assert_eq!(&command[..4], ["labrun", "run-job", "ws", "exp"]);
        assert_eq!(command.last().map(String::as_str), Some("--dryrun"));
    }
}

#[test]
fn dryrun_submission_keeps_jobs_unsubmitted() {
    let dir = tempfile::tempdir().expect("tmp");
    let family = Ratio::new(points(3));
    let mut exp = experiment(dir.path(), &family, None);
    exp.setup().expect("setup");
    let cluster = MemoryCluster::new();
    let opts = SubmitOpts {
        dryrun: true,
        ..SubmitOpts::default()
    };
    exp.submit_jobs(&cluster, &opts).expect("submit");
    assert!(exp.jobs().expect("jobs").iter().all(|job| !job.submitted));
    assert_eq!(exp.runid().expect("runid"), None);
}

#[test]
fn real_submission_records_handles_and_runid() {
    let dir = tempfile::tempdir().expect("tmp");
    let family = Ratio::new(points(3));
    let mut exp = experiment(dir.path(), &family, None);
    exp.setup().expect("setup");
    let cluster = MemoryCluster::new();
    let ack = exp.submit_jobs(&cluster, &SubmitOpts::default()).expect("submit");
    assert_eq!(exp.runid().expect("runid").as_deref(), Some(ack.run_id.as_str()));
    for job in exp.jobs().expect("jobs") {
        assert!(job.submitted);
        let handle = job.handle.expect("handle");
        let command = cluster.command(&handle).expect("command");
        assert_eq!(command[4], job.jobid.to_string());
    }

    let summary = exp.summary(&cluster).expect("summary");
    assert_eq!((summary.njobs, summary.submitted, summary.pending), (3, 3, 3));
    assert!(summary.to_string().contains("max used memory"));
}

#[test]
fn resubmit_keeps_jobid_and_replaces_handle() {
    let dir = tempfile::tempdir().expect("tmp");
    let family = Ratio::new(points(2));
    let mut exp = experiment(dir.path(), &family, None);
    exp.setup().expect("setup");
    let cluster = MemoryCluster::new();
    exp.submit_jobs(&cluster, &SubmitOpts::default()).expect("submit");

    let before = exp.get_job(1).expect("job").handle.expect("handle");
    cluster.finish(&before, 1, None);
    let fresh = exp.resubmit(&cluster, 1).expect("resubmit");
    assert_eq!(fresh.run_id, before.run_id);
    assert_ne!(fresh.job_id, before.job_id);
    let job = exp.get_job(1).expect("job");
    assert_eq!(job.jobid, 1);
    assert_eq!(job.handle, Some(fresh));
    assert!(exp.failed_job_ids(&cluster).expect("failed").is_empty());
}

#[test]
fn unsubmitted_job_cannot_be_resubmitted() {
    let dir = tempfile::tempdir().expect("tmp");
    let family = Ratio::new(points(1));
    let mut exp = experiment(dir.path(), &family, None);
    exp.setup().expect("setup");
    let err = exp
        .resubmit(&MemoryCluster::new(), 0)
        .expect_err("not submitted");
    assert_eq!(err.info().code, "job_not_submitted");
}

#[test]
fn kill_jobs_stops_the_submitted_run() {
    let dir = tempfile::tempdir().expect("tmp");
    let family = Ratio::new(points(2));
    let mut exp = experiment(dir.path(), &family, None);
    exp.setup().expect("setup");
    let cluster = MemoryCluster::new();
    exp.submit_jobs(&cluster, &SubmitOpts::default()).expect("submit");
    assert_eq!(exp.kill_jobs(&cluster).expect("kill"), 1);
    for job in exp.jobs().expect("jobs") {
        let handle = job.handle.expect("handle");
        assert_eq!(cluster.status(&handle).expect("status"), ClusterStatus::Exited);
    }
}

#[test]
fn cancelled_submission_dispatches_nothing() {
    let dir = tempfile::tempdir().expect("tmp");
    let family = Ratio::new(points(2));
    let mut exp = experiment(dir.path(), &family, None);
    exp.setup().expect("setup");
    let cluster = MemoryCluster::new();
    let opts = SubmitOpts {
        cancel: Some(Arc::new(AtomicBool::new(true))),
        ..SubmitOpts::default()
    };
    let err = exp.submit_jobs(&cluster, &opts).expect_err("cancelled");
    assert_eq!(err.info().code, "submission_interrupted");
    assert!(cluster.submissions().is_empty());
}

#[test]
fn job_run_before_handle_storage_stays_finished() {
    let dir = tempfile::tempdir().expect("tmp");
    let family = Ratio::new(points(1));
    let mut exp = experiment(dir.path(), &family, None);
    exp.setup().expect("setup");
    exp.run_job(0, &RunJobOpts::default()).expect("run");
    exp.submit_jobs(&MemoryCluster::new(), &SubmitOpts::default())
        .expect("submit");
    let job = exp.get_job(0).expect("job");
    assert!(job.finished && job.submitted);
}
