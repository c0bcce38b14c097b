//! The external cluster collaborator and an in-process backend.

use std::collections::{BTreeMap, BTreeSet};

use labrun_core::errors::{ErrorInfo, LabError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Opaque reference to a job held by the cluster.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClusterHandle {
    pub run_id: String,
    pub job_id: String,
}

/// Per-job resources requested from the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceProfile {
    #[serde(default)]
    pub memory_mb: Option<u64>,
    #[serde(default = "one")]
    pub nthreads: u32,
    #[serde(default = "one")]
    pub nprocs: u32,
}

fn one() -> u32 {
    1
}

impl Default for ResourceProfile {
    fn default() -> Self {
        Self {
            memory_mb: None,
            nthreads: 1,
            nprocs: 1,
        }
    }
}

/// One named group of command lines submitted together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionBatch {
    pub group: String,
    #[serde(default)]
    pub queue: Option<String>,
    pub resources: ResourceProfile,
    #[serde(default)]
    pub requests: Vec<String>,
    pub commands: Vec<Vec<String>>,
}

/// Acknowledgement of a batch: one handle per command, in submission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedBatch {
    pub run_id: String,
    pub handles: Vec<ClusterHandle>,
}

/// Scheduler side view of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterStatus {
    Pending,
    Running,
    /// Ended with exit code zero.
    Done,
    /// Ended with a non-zero exit code or was killed.
    Exited,
    /// The cluster no longer (or never) knew the job.
    Unknown,
}

impl ClusterStatus {
    pub fn is_active(self) -> bool {
        matches!(self, ClusterStatus::Pending | ClusterStatus::Running)
    }
}

/// Memory accounting reported for a job, in megabytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceInfo {
    pub max_memory_mb: Option<u64>,
    pub req_memory_mb: Option<u64>,
}

/// Everything labrun needs from a cluster scheduler.
pub trait Cluster {
    /// Submits a batch. With `dryrun` the batch is acknowledged without
    /// dispatching any execution.
    fn submit(&self, batch: &SubmissionBatch, dryrun: bool) -> Result<SubmittedBatch, LabError>;

    fn status(&self, handle: &ClusterHandle) -> Result<ClusterStatus, LabError>;

    /// Exit code once the job has ended, `None` while undetermined.
    fn exit_status(&self, handle: &ClusterHandle) -> Result<Option<i32>, LabError>;

    fn resource_info(&self, handle: &ClusterHandle) -> Result<Option<ResourceInfo>, LabError>;

    fn kill(&self, handle: &ClusterHandle) -> Result<(), LabError>;

    /// Kills every job of one submission run.
    fn kill_run(&self, run_id: &str) -> Result<(), LabError>;

    /// Kills every job submitted under `group`.
    fn kill_group(&self, group: &str) -> Result<(), LabError>;

    /// Dispatches the job again within its run and returns the new handle.
    fn resubmit(&self, handle: &ClusterHandle) -> Result<ClusterHandle, LabError>;
}

pub(crate) fn unknown_handle(handle: &ClusterHandle) -> LabError {
    LabError::Cluster(
        ErrorInfo::new("unknown_handle", "cluster has no record of this job")
            .with_context("run_id", handle.run_id.clone())
            .with_context("job_id", handle.job_id.clone()),
    )
}

#[derive(Debug, Clone)]
struct MemoryJob {
    command: Vec<String>,
    status: ClusterStatus,
    exit: Option<i32>,
    max_memory_mb: Option<u64>,
}

#[derive(Debug, Clone)]
struct MemoryRun {
    batch: SubmissionBatch,
    dryrun: bool,
    jobs: BTreeMap<String, MemoryJob>,
}

#[derive(Debug, Default)]
struct MemoryState {
    runs: BTreeMap<String, MemoryRun>,
    killed_groups: BTreeSet<String>,
    fail_next_submit: Option<String>,
}

/// In-process cluster that records submissions and lets callers script job
/// outcomes. Nothing is ever executed.
#[derive(Debug, Default)]
pub struct MemoryCluster {
    state: Mutex<MemoryState>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every batch submitted so far with its dry-run flag, oldest first.
    pub fn submissions(&self) -> Vec<(SubmissionBatch, bool)> {
        let state = self.state.lock();
        let mut runs: Vec<_> = state.runs.iter().collect();
        runs.sort_by_key(|(run_id, _)| run_sort_key(run_id));
        runs.into_iter()
            .map(|(_, run)| (run.batch.clone(), run.dryrun))
            .collect()
    }

    /// Command line recorded for `handle`.
    pub fn command(&self, handle: &ClusterHandle) -> Option<Vec<String>> {
        let state = self.state.lock();
        state
            .runs
            .get(&handle.run_id)
            .and_then(|run| run.jobs.get(&handle.job_id))
            .map(|job| job.command.clone())
    }

    /// Marks a job as ended with `code`.
    pub fn finish(&self, handle: &ClusterHandle, code: i32, max_memory_mb: Option<u64>) {
        self.update(handle, |job| {
            job.exit = Some(code);
            job.status = if code == 0 {
                ClusterStatus::Done
            } else {
                ClusterStatus::Exited
            };
            job.max_memory_mb = max_memory_mb;
        });
    }

    pub fn set_status(&self, handle: &ClusterHandle, status: ClusterStatus) {
        self.update(handle, |job| job.status = status);
    }

    /// Makes the next `submit` call fail with `message`.
    pub fn fail_next_submit(&self, message: impl Into<String>) {
        self.state.lock().fail_next_submit = Some(message.into());
    }

    pub fn killed_groups(&self) -> BTreeSet<String> {
        self.state.lock().killed_groups.clone()
    }

    fn update(&self, handle: &ClusterHandle, apply: impl FnOnce(&mut MemoryJob)) {
        let mut state = self.state.lock();
        if let Some(job) = state
            .runs
            .get_mut(&handle.run_id)
            .and_then(|run| run.jobs.get_mut(&handle.job_id))
        {
            apply(job);
        }
    }

    fn with_job<T>(
        &self,
        handle: &ClusterHandle,
        read: impl FnOnce(&MemoryRun, &MemoryJob) -> T,
    ) -> Result<T, LabError> {
        let state = self.state.lock();
        state
            .runs
            .get(&handle.run_id)
            .and_then(|run| run.jobs.get(&handle.job_id).map(|job| read(run, job)))
            .ok_or_else(|| unknown_handle(handle))
    }
}

fn run_sort_key(run_id: &str) -> u64 {
    run_id
        .trim_start_matches("run-")
        .parse()
        .unwrap_or(u64::MAX)
}

impl Cluster for MemoryCluster {
    fn submit(&self, batch: &SubmissionBatch, dryrun: bool) -> Result<SubmittedBatch, LabError> {
        let mut state = self.state.lock();
        if let Some(message) = state.fail_next_submit.take() {
            return Err(LabError::Cluster(
                ErrorInfo::new("submit_failed", message).with_context("group", batch.group.clone()),
            ));
        }
        let run_id = format!("run-{}", state.runs.len());
        let mut jobs = BTreeMap::new();
        let mut handles = Vec::with_capacity(batch.commands.len());
        for (idx, command) in batch.commands.iter().enumerate() {
            let job_id = idx.to_string();
            jobs.insert(
                job_id.clone(),
                MemoryJob {
                    command: command.clone(),
                    status: ClusterStatus::Pending,
                    exit: None,
                    max_memory_mb: None,
                },
            );
            handles.push(ClusterHandle {
                run_id: run_id.clone(),
                job_id,
            });
        }
        state.runs.insert(
            run_id.clone(),
            MemoryRun {
                batch: batch.clone(),
                dryrun,
                jobs,
            },
        );
        Ok(SubmittedBatch { run_id, handles })
    }

    fn status(&self, handle: &ClusterHandle) -> Result<ClusterStatus, LabError> {
        self.with_job(handle, |_, job| job.status)
    }

    fn exit_status(&self, handle: &ClusterHandle) -> Result<Option<i32>, LabError> {
        self.with_job(handle, |_, job| job.exit)
    }

    fn resource_info(&self, handle: &ClusterHandle) -> Result<Option<ResourceInfo>, LabError> {
        self.with_job(handle, |run, job| {
            Some(ResourceInfo {
                max_memory_mb: job.max_memory_mb,
                req_memory_mb: run.batch.resources.memory_mb,
            })
        })
    }

    fn kill(&self, handle: &ClusterHandle) -> Result<(), LabError> {
        self.with_job(handle, |_, _| ())?;
        self.update(handle, |job| {
            if job.status.is_active() {
                job.status = ClusterStatus::Exited;
                job.exit = Some(130);
            }
        });
        Ok(())
    }

    fn kill_run(&self, run_id: &str) -> Result<(), LabError> {
        let mut state = self.state.lock();
        if let Some(run) = state.runs.get_mut(run_id) {
            for job in run.jobs.values_mut().filter(|job| job.status.is_active()) {
                job.status = ClusterStatus::Exited;
                job.exit = Some(130);
            }
        }
        Ok(())
    }

    fn kill_group(&self, group: &str) -> Result<(), LabError> {
        let mut state = self.state.lock();
        state.killed_groups.insert(group.to_string());
        for run in state.runs.values_mut().filter(|run| run.batch.group == group) {
            for job in run.jobs.values_mut().filter(|job| job.status.is_active()) {
                job.status = ClusterStatus::Exited;
                job.exit = Some(130);
            }
        }
        Ok(())
    }

    fn resubmit(&self, handle: &ClusterHandle) -> Result<ClusterHandle, LabError> {
        let mut state = self.state.lock();
        let run = state
            .runs
            .get_mut(&handle.run_id)
            .ok_or_else(|| unknown_handle(handle))?;
        let command = run
            .jobs
            .get(&handle.job_id)
            .map(|job| job.command.clone())
            .ok_or_else(|| unknown_handle(handle))?;
        let job_id = run.jobs.len().to_string();
        run.jobs.insert(
            job_id.clone(),
            MemoryJob {
                command,
                status: ClusterStatus::Pending,
                exit: None,
                max_memory_mb: None,
            },
        );
        Ok(ClusterHandle {
            run_id: handle.run_id.clone(),
            job_id,
        })
    }
}
