//! Parameter-sweep orchestration: workspaces, experiments, jobs and tasks.

pub mod cluster;
pub mod config;
pub mod experiment;
pub mod job;
pub mod local;
pub mod partition;
pub mod registry;
pub mod task;
pub mod workspace;

pub use cluster::{
    Cluster, ClusterHandle, ClusterStatus, MemoryCluster, ResourceInfo, ResourceProfile,
    SubmissionBatch, SubmittedBatch,
};
pub use config::LabConfig;
pub use experiment::{
    Experiment, ExperimentFamily, ExperimentSummary, JobInfo, RunJobOpts, RunOutcome,
    SetupReport, SubmitOpts,
};
pub use job::{Job, JobState};
pub use local::LocalCluster;
pub use partition::{job_of_task, job_sizes, resolve_njobs, task_range};
pub use registry::{Catalog, Definition, DefinitionRegistry, ScriptLoader, AUTO_RUN_PREFIX};
pub use task::{
    GridParameter, MethodTally, ResultPayload, Task, TaskArgs, TaskFactory, TaskResult,
    TASK_METHOD,
};
pub use workspace::{Workspace, WorkspaceRegistry};
