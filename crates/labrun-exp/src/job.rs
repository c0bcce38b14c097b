use std::fmt;
use std::ops::Range;

use labrun_core::errors::LabError;
use serde::{Deserialize, Serialize};

use crate::cluster::{Cluster, ClusterHandle, ClusterStatus};
use crate::partition::task_range;

/// A batch of tasks dispatched to the cluster as one unit.
///
/// Task membership is never stored; it is re-derived from the experiment's
/// `(ntasks, njobs)` through [`crate::partition`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub jobid: u64,
    pub workspace_id: String,
    pub experiment_id: String,
    #[serde(default)]
    pub submitted: bool,
    #[serde(default)]
    pub finished: bool,
    #[serde(default)]
    pub handle: Option<ClusterHandle>,
}

/// Lifecycle position of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Created,
    /// Submitted, but the cluster reports neither pending nor running and the
    /// job has not recorded completion.
    Submitted,
    Pending,
    Running,
    Finished,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            JobState::Created => "created",
            JobState::Submitted => "submitted",
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Finished => "finished",
        };
        f.write_str(label)
    }
}

impl Job {
    pub fn new(workspace_id: &str, experiment_id: &str, jobid: u64) -> Self {
        Self {
            jobid,
            workspace_id: workspace_id.to_string(),
            experiment_id: experiment_id.to_string(),
            submitted: false,
            finished: false,
            handle: None,
        }
    }

    /// Task indices this job runs.
    pub fn task_ids(&self, ntasks: u64, njobs: u64) -> Range<u64> {
        task_range(self.jobid, ntasks, njobs)
    }

    pub fn mark_submitted(&mut self, handle: ClusterHandle) {
        self.handle = Some(handle);
        self.submitted = true;
    }

    /// A submitted job failed when the cluster reports a non-zero exit code.
    /// Individual task failures do not count.
    pub fn failed(&self, cluster: &dyn Cluster) -> Result<bool, LabError> {
        match (&self.handle, self.submitted) {
            (Some(handle), true) => {
                Ok(matches!(cluster.exit_status(handle)?, Some(code) if code != 0))
            }
            _ => Ok(false),
        }
    }

    /// Cluster status, `None` when the job was never submitted.
    pub fn cluster_status(&self, cluster: &dyn Cluster) -> Result<Option<ClusterStatus>, LabError> {
        match (&self.handle, self.submitted) {
            (Some(handle), true) => cluster.status(handle).map(Some),
            _ => Ok(None),
        }
    }

    pub fn state(&self, cluster: &dyn Cluster) -> Result<JobState, LabError> {
        if self.finished {
            return Ok(JobState::Finished);
        }
        Ok(match self.cluster_status(cluster)? {
            None => JobState::Created,
            Some(ClusterStatus::Pending) => JobState::Pending,
            Some(ClusterStatus::Running) => JobState::Running,
            Some(_) => JobState::Submitted,
        })
    }
}
