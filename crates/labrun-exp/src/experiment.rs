//! One experiment: its staged setup pipeline, submission, job execution and
//! result aggregation.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::ops::Range;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use labrun_core::errors::{ErrorInfo, LabError};
use labrun_core::rng::{seeded_shuffle, SUBMISSION_SEED};
use labrun_store::{read_json, sharded_path, touch, write_json, MergeCache, MergeMode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::cluster::{
    Cluster, ClusterHandle, ClusterStatus, ResourceProfile, SubmissionBatch, SubmittedBatch,
};
use crate::job::{Job, JobState};
use crate::partition::{resolve_njobs, task_range};
use crate::task::{
    method_errors, summarize_tasks, tally_methods, MethodTally, Task, TaskArgs, TaskFactory,
    TaskResult, TASK_METHOD,
};

const TASKS_FILE: &str = "tasks.json";
const TASK_ARGS_FILE: &str = "task_args.json";
const RUNID_FILE: &str = ".runid";
const JOBS_MARKER: &str = ".init_jobs_files_generated";
const JOB_DIR: &str = "job";
const RESULT_DIR: &str = "result";

/// Behaviour supplied by an experiment definition: which arguments matter,
/// how tasks are generated and how one task is computed.
pub trait ExperimentFamily: Send + Sync {
    fn define_task_args(&self, args: &mut TaskArgs);

    /// Generates every task. Ids must come from `factory` so they are dense.
    fn generate_tasks(&self, factory: &mut TaskFactory) -> Result<Vec<Task>, LabError>;

    /// Computes one task. An `Err` (or a panic) is recorded in the task's
    /// result and does not stop the remaining tasks of the job.
    fn do_task(&self, task: &Task) -> Result<TaskResult, LabError>;
}

/// What [`Experiment::setup`] had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupReport {
    pub generated_task_args: bool,
    pub generated_tasks: bool,
    pub generated_jobs: bool,
    pub ntasks: u64,
    pub njobs: u64,
}

#[derive(Debug, Clone, Default)]
pub struct SubmitOpts {
    pub dryrun: bool,
    /// Extra scheduler requests passed through verbatim.
    pub requests: Vec<String>,
    pub queue: Option<String>,
    /// Raised by the caller (e.g. on SIGINT) to abandon the submission.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl SubmitOpts {
    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunJobOpts {
    /// Run the tasks without persisting the job or its results.
    pub dryrun: bool,
    /// Run even if the job already finished.
    pub force: bool,
}

/// Outcome of [`Experiment::run_job`].
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    AlreadyFinished { jobid: u64 },
    Ran { jobid: u64, results: Vec<TaskResult> },
}

/// Counters shown by `exp-info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentSummary {
    pub njobs: u64,
    pub ntasks: u64,
    pub submitted: usize,
    pub pending: usize,
    pub running: usize,
    pub finished: usize,
    pub failed_job_ids: Vec<u64>,
    pub max_memory_mb: Option<u64>,
    pub req_memory_mb: Option<u64>,
}

impl fmt::Display for ExperimentSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let memory = |value: Option<u64>| match value {
            Some(mb) => format!("{mb} MB"),
            None => "n/a".to_string(),
        };
        writeln!(f, "{:<18}{}", "# jobs", self.njobs)?;
        writeln!(f, "{:<18}{}", "# tasks", self.ntasks)?;
        writeln!(f, "{:<18}{}", "# submitted jobs", self.submitted)?;
        writeln!(f, "{:<18}{}", "# pending jobs", self.pending)?;
        writeln!(f, "{:<18}{}", "# running jobs", self.running)?;
        writeln!(f, "{:<18}{}", "# finished jobs", self.finished)?;
        writeln!(f, "{:<18}{}", "# failed jobs", self.failed_job_ids.len())?;
        writeln!(f, "{:<18}{}", "max used memory", memory(self.max_memory_mb))?;
        write!(f, "{:<18}{}", "max req. memory", memory(self.req_memory_mb))?;
        if !self.failed_job_ids.is_empty() {
            write!(f, "\nFailed jobs: {:?}", self.failed_job_ids)?;
        }
        Ok(())
    }
}

/// Everything `job-info` reports about one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInfo {
    pub job: Job,
    pub state: JobState,
    pub task_ids: Vec<u64>,
    pub cluster_status: Option<ClusterStatus>,
    pub exit_status: Option<i32>,
}

impl fmt::Display for JobInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<18}{}", "Job ID", self.job.jobid)?;
        writeln!(f, "{:<18}{}", "Submitted", self.job.submitted)?;
        writeln!(f, "{:<18}{}", "Finished", self.job.finished)?;
        writeln!(f, "{:<18}{}", "State", self.state)?;
        writeln!(f, "{:<18}{}", "# tasks", self.task_ids.len())?;
        writeln!(f, "{:<18}{:?}", "Task IDs", self.task_ids)?;
        let status = self
            .cluster_status
            .map(|status| format!("{status:?}").to_lowercase())
            .unwrap_or_else(|| "n/a".into());
        let exit = self
            .exit_status
            .map(|code| code.to_string())
            .unwrap_or_else(|| "n/a".into());
        let handle = self
            .job
            .handle
            .as_ref()
            .map(|handle| format!("{}:{}", handle.run_id, handle.job_id))
            .unwrap_or_else(|| "n/a".into());
        writeln!(f, "{:<18}{}", "Cluster status", status)?;
        writeln!(f, "{:<18}{}", "Exit status", exit)?;
        write!(f, "{:<18}{}", "Cluster handle", handle)
    }
}

/// A named computation: task schema, tasks, jobs and results, all persisted
/// below one folder.
pub struct Experiment {
    workspace_id: String,
    experiment_id: String,
    folder: PathBuf,
    program: String,
    properties: Value,
    script: Option<PathBuf>,
    njobs: Option<usize>,
    resources: ResourceProfile,
    family: Option<Arc<dyn ExperimentFamily>>,
    tasks: Option<BTreeMap<u64, Task>>,
    jobs: Option<BTreeMap<u64, Job>>,
    results: Option<BTreeMap<u64, TaskResult>>,
    result_merges: usize,
}

impl fmt::Debug for Experiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Experiment")
            .field("workspace_id", &self.workspace_id)
            .field("experiment_id", &self.experiment_id)
            .field("folder", &self.folder)
            .field("njobs", &self.njobs)
            .field("resources", &self.resources)
            .field("has_family", &self.family.is_some())
            .finish()
    }
}

impl Experiment {
    pub fn new(workspace_id: &str, experiment_id: &str, folder: impl Into<PathBuf>) -> Self {
        Self {
            workspace_id: workspace_id.to_string(),
            experiment_id: experiment_id.to_string(),
            folder: folder.into(),
            program: "labrun".to_string(),
            properties: Value::Object(Default::default()),
            script: None,
            njobs: None,
            resources: ResourceProfile::default(),
            family: None,
            tasks: None,
            jobs: None,
            results: None,
            result_merges: 0,
        }
    }

    pub fn with_properties(mut self, properties: Value) -> Self {
        self.properties = properties;
        self
    }

    /// Executable placed at the head of every job command line.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn properties(&self) -> &Value {
        &self.properties
    }

    pub fn script(&self) -> Option<&Path> {
        self.script.as_deref()
    }

    pub fn set_script(&mut self, script: impl Into<PathBuf>) {
        self.script = Some(script.into());
    }

    pub fn install(&mut self, family: impl ExperimentFamily + 'static) {
        self.family = Some(Arc::new(family));
    }

    /// Caps the number of jobs; unset means one job per task.
    pub fn set_njobs(&mut self, njobs: usize) {
        self.njobs = Some(njobs);
    }

    pub fn set_job_memory_mb(&mut self, memory_mb: u64) {
        self.resources.memory_mb = Some(memory_mb);
    }

    pub fn set_nthreads(&mut self, nthreads: u32) {
        self.resources.nthreads = nthreads;
    }

    pub fn set_nprocs(&mut self, nprocs: u32) {
        self.resources.nprocs = nprocs;
    }

    pub fn resources(&self) -> &ResourceProfile {
        &self.resources
    }

    /// Submission group shared by every job of this experiment.
    pub fn group(&self) -> String {
        format!("/{}/{}", self.workspace_id, self.experiment_id)
    }

    pub fn exists(&self) -> bool {
        self.folder.exists()
    }

    fn family(&self) -> Result<Arc<dyn ExperimentFamily>, LabError> {
        self.family.clone().ok_or_else(|| {
            LabError::Setup(
                ErrorInfo::new("no_family", "experiment definition installed no family")
                    .with_context("experiment", self.group())
                    .with_hint("call Experiment::install from the auto_run definition"),
            )
        })
    }

    fn job_path(&self, jobid: u64) -> PathBuf {
        sharded_path(&self.folder.join(JOB_DIR), jobid, "json")
    }

    fn result_path(&self, jobid: u64) -> PathBuf {
        sharded_path(&self.folder.join(RESULT_DIR), jobid, "json")
    }

    // ---- staged setup -------------------------------------------------

    /// Runs the four setup stages, skipping each one whose artifact already
    /// exists on disk.
    #[instrument(skip(self), fields(experiment = %self.group()))]
    pub fn setup(&mut self) -> Result<SetupReport, LabError> {
        fs::create_dir_all(&self.folder)
            .map_err(|err| LabError::storage("folder_create", &self.folder, err))?;

        let args_path = self.folder.join(TASK_ARGS_FILE);
        let generated_task_args = !args_path.exists();
        if generated_task_args {
            let mut args = TaskArgs::default();
            self.family()?.define_task_args(&mut args);
            write_json(&args_path, &args)?;
            debug!(names = ?args.names(), "declared task arguments");
        }

        let tasks_path = self.folder.join(TASKS_FILE);
        let generated_tasks = !tasks_path.exists();
        if generated_tasks {
            let mut factory = TaskFactory::new(&self.workspace_id, &self.experiment_id);
            let tasks = self.family()?.generate_tasks(&mut factory)?;
            let tasks = index_tasks(tasks)?;
            write_json(&tasks_path, &tasks)?;
            info!(ntasks = tasks.len(), "generated tasks");
            self.tasks = Some(tasks);
        }

        let ntasks = self.ntasks()?;
        let njobs = self.njobs()?;

        let marker = self.folder.join(JOBS_MARKER);
        let generated_jobs = !marker.exists();
        if generated_jobs {
            if njobs == 0 {
                return Err(LabError::Setup(
                    ErrorInfo::new("no_jobs", "no job has been generated")
                        .with_context("experiment", self.group())
                        .with_context("ntasks", ntasks.to_string()),
                ));
            }
            for jobid in 0..njobs {
                let job = Job::new(&self.workspace_id, &self.experiment_id, jobid);
                write_json(&self.job_path(jobid), &job)?;
            }
            touch(&marker)?;
            self.jobs = None;
            info!(njobs, "generated jobs");
        }

        Ok(SetupReport {
            generated_task_args,
            generated_tasks,
            generated_jobs,
            ntasks,
            njobs,
        })
    }

    // ---- tasks --------------------------------------------------------

    pub fn task_args(&self) -> Result<TaskArgs, LabError> {
        read_json(&self.folder.join(TASK_ARGS_FILE))
    }

    /// Every task keyed by id, loaded once per experiment instance.
    pub fn tasks(&mut self) -> Result<&BTreeMap<u64, Task>, LabError> {
        if self.tasks.is_none() {
            let tasks: BTreeMap<u64, Task> = read_json(&self.folder.join(TASKS_FILE))?;
            self.tasks = Some(tasks);
        }
        Ok(self.tasks.get_or_insert_with(BTreeMap::new))
    }

    pub fn get_task(&mut self, task_id: u64) -> Result<Task, LabError> {
        let group = self.group();
        self.tasks()?.get(&task_id).cloned().ok_or_else(|| {
            LabError::Setup(
                ErrorInfo::new("task_out_of_range", "no task with this id")
                    .with_context("experiment", group)
                    .with_context("task_id", task_id.to_string()),
            )
        })
    }

    pub fn ntasks(&mut self) -> Result<u64, LabError> {
        Ok(self.tasks()?.len() as u64)
    }

    /// Resolved job count: the configured cap bounded by the task count.
    pub fn njobs(&mut self) -> Result<u64, LabError> {
        let ntasks = self.ntasks()? as usize;
        Ok(resolve_njobs(self.njobs, ntasks) as u64)
    }

    /// Task ids executed by `jobid`.
    pub fn job_task_ids(&mut self, jobid: u64) -> Result<Range<u64>, LabError> {
        let ntasks = self.ntasks()?;
        let njobs = self.njobs()?;
        Ok(task_range(jobid, ntasks, njobs))
    }

    /// Distinct values of every declared task argument.
    pub fn task_summary(&mut self) -> Result<BTreeMap<String, Vec<Value>>, LabError> {
        let args = self.task_args()?;
        Ok(summarize_tasks(&args, self.tasks()?.values()))
    }

    // ---- jobs ---------------------------------------------------------

    /// Reads one job straight from its file.
    pub fn get_job(&mut self, jobid: u64) -> Result<Job, LabError> {
        let path = self.job_path(jobid);
        if !path.exists() {
            let njobs = self.njobs()?;
            return Err(LabError::Setup(
                ErrorInfo::new("job_out_of_range", "no job with this id")
                    .with_context("experiment", self.group())
                    .with_context("jobid", jobid.to_string())
                    .with_context("njobs", njobs.to_string()),
            ));
        }
        read_json(&path)
    }

    fn store_job(&mut self, job: &Job) -> Result<(), LabError> {
        write_json(&self.job_path(job.jobid), job)?;
        self.jobs = None;
        Ok(())
    }

    /// Every job ordered by id, consolidated through the merge cache.
    pub fn jobs(&mut self) -> Result<Vec<Job>, LabError> {
        if self.jobs.is_none() {
            let cache = MergeCache::new(self.folder.join(JOB_DIR));
            let jobs = cache
                .merge::<Job>(MergeMode::Verify)?
                .into_map()
                .unwrap_or_default();
            self.jobs = Some(jobs);
        }
        Ok(self
            .jobs
            .as_ref()
            .map(|jobs| jobs.values().cloned().collect())
            .unwrap_or_default())
    }

    pub fn finished_job_ids(&mut self) -> Result<Vec<u64>, LabError> {
        Ok(self
            .jobs()?
            .into_iter()
            .filter(|job| job.finished)
            .map(|job| job.jobid)
            .collect())
    }

    /// Jobs whose cluster process exited non-zero. Failed tasks inside a job
    /// do not make the job fail.
    pub fn failed_job_ids(&mut self, cluster: &dyn Cluster) -> Result<Vec<u64>, LabError> {
        let mut failed = Vec::new();
        for job in self.jobs()? {
            if job.failed(cluster)? {
                failed.push(job.jobid);
            }
        }
        Ok(failed)
    }

    pub fn job_info(&mut self, cluster: &dyn Cluster, jobid: u64) -> Result<JobInfo, LabError> {
        let job = self.get_job(jobid)?;
        let task_ids = self.job_task_ids(jobid)?.collect();
        let state = job.state(cluster)?;
        let cluster_status = job.cluster_status(cluster)?;
        let exit_status = match (&job.handle, job.submitted) {
            (Some(handle), true) => cluster.exit_status(handle)?,
            _ => None,
        };
        Ok(JobInfo {
            job,
            state,
            task_ids,
            cluster_status,
            exit_status,
        })
    }

    // ---- submission ---------------------------------------------------

    /// Run id of the last real submission.
    pub fn runid(&self) -> Result<Option<String>, LabError> {
        let path = self.folder.join(RUNID_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let text =
            fs::read_to_string(&path).map_err(|err| LabError::storage("runid_read", &path, err))?;
        Ok(Some(text.trim().to_string()).filter(|runid| !runid.is_empty()))
    }

    fn store_runid(&self, runid: &str) -> Result<(), LabError> {
        let path = self.folder.join(RUNID_FILE);
        fs::write(&path, runid).map_err(|err| LabError::storage("runid_write", &path, err))
    }

    fn job_command(&self, jobid: u64, dryrun: bool) -> Vec<String> {
        let mut command = vec![
            self.program.clone(),
            "run-job".to_string(),
            self.workspace_id.clone(),
            self.experiment_id.clone(),
            jobid.to_string(),
        ];
        if dryrun {
            command.push("--dryrun".to_string());
        }
        command
    }

    /// Submits every job as one batch under [`Experiment::group`], in a
    /// shuffled but reproducible order. Handles are persisted unless
    /// `dryrun`.
    #[instrument(skip(self, cluster, opts), fields(experiment = %self.group(), dryrun = opts.dryrun))]
    pub fn submit_jobs(
        &mut self,
        cluster: &dyn Cluster,
        opts: &SubmitOpts,
    ) -> Result<SubmittedBatch, LabError> {
        let mut jobids: Vec<u64> = self.jobs()?.iter().map(|job| job.jobid).collect();
        seeded_shuffle(&mut jobids, SUBMISSION_SEED);

        let batch = SubmissionBatch {
            group: self.group(),
            queue: opts.queue.clone(),
            resources: self.resources.clone(),
            requests: opts.requests.clone(),
            commands: jobids
                .iter()
                .map(|jobid| self.job_command(*jobid, opts.dryrun))
                .collect(),
        };

        if opts.cancelled() {
            return Err(interrupted(&batch.group));
        }
        let ack = cluster.submit(&batch, opts.dryrun)?;
        if ack.handles.len() != jobids.len() {
            return Err(LabError::Cluster(
                ErrorInfo::new("handle_count", "cluster acknowledged a different job count")
                    .with_context("expected", jobids.len().to_string())
                    .with_context("received", ack.handles.len().to_string()),
            ));
        }
        info!(run_id = %ack.run_id, njobs = jobids.len(), "batch acknowledged");

        if !opts.dryrun {
            self.store_runid(&ack.run_id)?;
            for (jobid, handle) in jobids.iter().zip(&ack.handles) {
                // Re-read: a job may already have run and recorded completion.
                let mut job = self.get_job(*jobid)?;
                job.mark_submitted(handle.clone());
                self.store_job(&job)?;
            }
        }
        if opts.cancelled() {
            return Err(interrupted(&batch.group));
        }
        Ok(ack)
    }

    /// Dispatches `jobid` again, keeping its id and replacing its handle.
    pub fn resubmit(&mut self, cluster: &dyn Cluster, jobid: u64) -> Result<ClusterHandle, LabError> {
        let mut job = self.get_job(jobid)?;
        let handle = match (&job.handle, job.submitted) {
            (Some(handle), true) => handle.clone(),
            _ => {
                return Err(LabError::Setup(
                    ErrorInfo::new("job_not_submitted", "only submitted jobs can be resubmitted")
                        .with_context("experiment", self.group())
                        .with_context("jobid", jobid.to_string()),
                ))
            }
        };
        let fresh = cluster.resubmit(&handle)?;
        info!(jobid, run_id = %fresh.run_id, job_id = %fresh.job_id, "job resubmitted");
        job.mark_submitted(fresh.clone());
        self.store_job(&job)?;
        Ok(fresh)
    }

    /// Kills every run this experiment's jobs were submitted in. Returns the
    /// number of runs addressed.
    pub fn kill_jobs(&mut self, cluster: &dyn Cluster) -> Result<usize, LabError> {
        let mut runs: BTreeSet<String> = self
            .jobs()?
            .into_iter()
            .filter(|job| job.submitted)
            .filter_map(|job| job.handle.map(|handle| handle.run_id))
            .collect();
        runs.extend(self.runid()?);
        for run_id in &runs {
            cluster.kill_run(run_id)?;
        }
        info!(runs = runs.len(), "killed submitted runs");
        Ok(runs.len())
    }

    // ---- execution ----------------------------------------------------

    /// Runs every task of `jobid` in sequence, then marks the job finished
    /// and writes its result file (both skipped with `dryrun`).
    #[instrument(skip(self, opts), fields(experiment = %self.group(), dryrun = opts.dryrun))]
    pub fn run_job(&mut self, jobid: u64, opts: &RunJobOpts) -> Result<RunOutcome, LabError> {
        let mut job = self.get_job(jobid)?;
        if job.finished && !opts.force {
            info!("job {jobid} has already finished");
            return Ok(RunOutcome::AlreadyFinished { jobid });
        }

        let family = self.family()?;
        let range = self.job_task_ids(jobid)?;
        let mut tasks = Vec::with_capacity((range.end - range.start) as usize);
        for task_id in range {
            tasks.push(self.get_task(task_id)?);
        }

        let mut results = Vec::with_capacity(tasks.len());
        for task in &tasks {
            let start = Instant::now();
            let mut result = run_task(family.as_ref(), task);
            result.total_elapsed = Some(start.elapsed().as_secs_f64());
            debug!(task_id = task.task_id, ok = result.is_success(), "task done");
            results.push(result);
        }
        job.finished = true;

        if !opts.dryrun {
            let by_task: BTreeMap<u64, &TaskResult> =
                results.iter().map(|result| (result.task_id, result)).collect();
            write_json(&self.result_path(jobid), &by_task)?;
            self.store_job(&job)?;
            self.results = None;
        }
        info!(ntasks = results.len(), "job finished");
        Ok(RunOutcome::Ran { jobid, results })
    }

    // ---- results ------------------------------------------------------

    /// Consolidated results keyed by task id. The merge runs once per
    /// experiment instance; later calls reuse it until a job run
    /// invalidates it.
    pub fn task_results(&mut self) -> Result<&BTreeMap<u64, TaskResult>, LabError> {
        if self.results.is_none() {
            let cache = MergeCache::new(self.folder.join(RESULT_DIR));
            let outcome = cache.merge::<TaskResult>(MergeMode::Verify)?;
            self.result_merges += 1;
            self.results = Some(outcome.into_map().unwrap_or_default());
        }
        Ok(self.results.get_or_insert_with(BTreeMap::new))
    }

    pub fn get_task_results(&mut self) -> Result<Vec<TaskResult>, LabError> {
        Ok(self.task_results()?.values().cloned().collect())
    }

    pub fn get_task_result(&mut self, task_id: u64) -> Result<Option<TaskResult>, LabError> {
        Ok(self.task_results()?.get(&task_id).cloned())
    }

    pub fn has_task_result(&mut self, task_id: u64) -> Result<bool, LabError> {
        Ok(self.task_results()?.contains_key(&task_id))
    }

    /// A task is finished exactly when a result for it has been collected.
    pub fn task_finished(&mut self, task_id: u64) -> Result<bool, LabError> {
        self.get_task(task_id)?;
        self.has_task_result(task_id)
    }

    /// Drops the memoized results so the next access re-consults the merge
    /// cache.
    pub fn invalidate_results(&mut self) {
        self.results = None;
    }

    /// How many times this instance consulted the result merge cache.
    pub fn result_merges(&self) -> usize {
        self.result_merges
    }

    pub fn method_errors(&mut self) -> Result<BTreeMap<String, BTreeSet<String>>, LabError> {
        Ok(method_errors(self.task_results()?.values()))
    }

    pub fn method_tallies(&mut self) -> Result<BTreeMap<String, MethodTally>, LabError> {
        Ok(tally_methods(self.task_results()?.values()))
    }

    // ---- reporting ----------------------------------------------------

    pub fn summary(&mut self, cluster: &dyn Cluster) -> Result<ExperimentSummary, LabError> {
        let njobs = self.njobs()?;
        let ntasks = self.ntasks()?;
        let jobs = self.jobs()?;
        let mut summary = ExperimentSummary {
            njobs,
            ntasks,
            submitted: 0,
            pending: 0,
            running: 0,
            finished: 0,
            failed_job_ids: Vec::new(),
            max_memory_mb: None,
            req_memory_mb: None,
        };
        for job in &jobs {
            if job.finished {
                summary.finished += 1;
            }
            if job.failed(cluster)? {
                summary.failed_job_ids.push(job.jobid);
            }
            let Some(handle) = job.handle.as_ref().filter(|_| job.submitted) else {
                continue;
            };
            summary.submitted += 1;
            match cluster.status(handle) {
                Ok(ClusterStatus::Pending) => summary.pending += 1,
                Ok(ClusterStatus::Running) => summary.running += 1,
                Ok(_) => {}
                Err(err) => warn!(jobid = job.jobid, error = %err, "cluster status unavailable"),
            }
            if job.finished {
                match cluster.resource_info(handle) {
                    Ok(Some(usage)) => {
                        summary.max_memory_mb = summary.max_memory_mb.max(usage.max_memory_mb);
                        summary.req_memory_mb = summary.req_memory_mb.max(usage.req_memory_mb);
                    }
                    Ok(None) => {}
                    Err(err) => {
                        warn!(jobid = job.jobid, error = %err, "resource usage unavailable")
                    }
                }
            }
        }
        Ok(summary)
    }
}

fn run_task(family: &dyn ExperimentFamily, task: &Task) -> TaskResult {
    match panic::catch_unwind(AssertUnwindSafe(|| family.do_task(task))) {
        Ok(Ok(result)) => result,
        Ok(Err(err)) => {
            warn!(task_id = task.task_id, error = %err, "task failed");
            let mut result = TaskResult::for_task(task);
            result.record_failure(TASK_METHOD, err.info().message.clone());
            result
        }
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|text| text.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "task panicked".to_string());
            warn!(task_id = task.task_id, message = %message, "task panicked");
            let mut result = TaskResult::for_task(task);
            result.record_failure(TASK_METHOD, message);
            result
        }
    }
}

fn index_tasks(tasks: Vec<Task>) -> Result<BTreeMap<u64, Task>, LabError> {
    let total = tasks.len() as u64;
    let mut indexed = BTreeMap::new();
    for task in tasks {
        let task_id = task.task_id;
        if task_id >= total || indexed.insert(task_id, task).is_some() {
            return Err(LabError::Setup(
                ErrorInfo::new("task_ids_not_dense", "task ids must be exactly 0..ntasks")
                    .with_context("task_id", task_id.to_string())
                    .with_context("ntasks", total.to_string())
                    .with_hint("create tasks through the TaskFactory passed to generate_tasks"),
            ));
        }
    }
    Ok(indexed)
}

fn interrupted(group: &str) -> LabError {
    LabError::Cluster(
        ErrorInfo::new("submission_interrupted", "submission was interrupted")
            .with_context("group", group),
    )
}
