//! Cluster backend that runs jobs as child processes of the submitting
//! process and keeps a ledger per run so other processes can look them up.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

use labrun_core::errors::{ErrorInfo, LabError};
use labrun_core::hash::stable_hash_string;
use labrun_store::{read_json, write_json};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cluster::{
    unknown_handle, Cluster, ClusterHandle, ClusterStatus, ResourceInfo, ResourceProfile,
    SubmissionBatch, SubmittedBatch,
};

/// Exit code recorded when a command cannot be spawned at all.
const SPAWN_FAILURE: i32 = 127;
/// Exit code recorded for jobs killed before they ran.
const KILLED: i32 = 130;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct LedgerJob {
    command: Vec<String>,
    status: ClusterStatus,
    #[serde(default)]
    exit: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Ledger {
    run_id: String,
    group: String,
    dryrun: bool,
    resources: ResourceProfile,
    jobs: BTreeMap<String, LedgerJob>,
}

/// Runs every command of a batch sequentially on this machine.
///
/// There is no scheduler behind it: a batch's queue and extra requests are
/// logged and otherwise ignored. Only the thread count reaches the jobs.
#[derive(Debug, Clone)]
pub struct LocalCluster {
    dir: PathBuf,
}

impl LocalCluster {
    /// Backend keeping its ledgers in `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn ledger_path(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{run_id}.json"))
    }

    fn load(&self, run_id: &str) -> Result<Option<Ledger>, LabError> {
        let path = self.ledger_path(run_id);
        if !path.exists() {
            return Ok(None);
        }
        read_json(&path).map(Some)
    }

    fn store(&self, ledger: &Ledger) -> Result<(), LabError> {
        write_json(&self.ledger_path(&ledger.run_id), ledger)
    }

    fn job(&self, handle: &ClusterHandle) -> Result<(Ledger, LedgerJob), LabError> {
        let ledger = self
            .load(&handle.run_id)?
            .ok_or_else(|| unknown_handle(handle))?;
        let job = ledger
            .jobs
            .get(&handle.job_id)
            .cloned()
            .ok_or_else(|| unknown_handle(handle))?;
        Ok((ledger, job))
    }

    fn run_ids(&self) -> Result<Vec<String>, LabError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let entries =
            fs::read_dir(&self.dir).map_err(|err| LabError::storage("ledger_list", &self.dir, err))?;
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| LabError::storage("ledger_list", &self.dir, err))?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                if !stem.starts_with('.') {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Executes one ledger job and records its outcome.
    fn execute(&self, ledger: &mut Ledger, job_id: &str) -> Result<(), LabError> {
        let threads = ledger.resources.nthreads.to_string();
        let Some(command) = ledger.jobs.get(job_id).map(|job| job.command.clone()) else {
            return Ok(());
        };
        let code = match command.split_first() {
            Some((program, args)) => {
                debug!(run_id = %ledger.run_id, job_id, program = %program, "starting job");
                let outcome = Command::new(program)
                    .args(args)
                    .env("MKL_NUM_THREADS", &threads)
                    .env("OMP_NUM_THREADS", &threads)
                    .status();
                match outcome {
                    Ok(status) => status.code().unwrap_or(KILLED),
                    Err(err) => {
                        warn!(program = %program, error = %err, "could not spawn job");
                        SPAWN_FAILURE
                    }
                }
            }
            None => SPAWN_FAILURE,
        };
        if let Some(job) = ledger.jobs.get_mut(job_id) {
            job.exit = Some(code);
            job.status = if code == 0 {
                ClusterStatus::Done
            } else {
                ClusterStatus::Exited
            };
        }
        self.store(ledger)
    }

    fn kill_ledger(&self, mut ledger: Ledger) -> Result<(), LabError> {
        let mut changed = false;
        for job in ledger.jobs.values_mut().filter(|job| job.status.is_active()) {
            job.status = ClusterStatus::Exited;
            job.exit = Some(KILLED);
            changed = true;
        }
        if changed {
            self.store(&ledger)?;
        }
        Ok(())
    }
}

/// Short id unique per (group, instant, process).
fn new_run_id(group: &str) -> Result<String, LabError> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let seed = (group, now.as_secs(), now.subsec_nanos(), std::process::id());
    let digest = stable_hash_string(&seed)?;
    Ok(digest.chars().take(12).collect())
}

impl Cluster for LocalCluster {
    fn submit(&self, batch: &SubmissionBatch, dryrun: bool) -> Result<SubmittedBatch, LabError> {
        let run_id = new_run_id(&batch.group)?;
        if batch.queue.is_some() || !batch.requests.is_empty() {
            debug!(
                queue = ?batch.queue,
                requests = ?batch.requests,
                "local backend ignores scheduler requests"
            );
        }
        let jobs = batch
            .commands
            .iter()
            .enumerate()
            .map(|(idx, command)| {
                let job = LedgerJob {
                    command: command.clone(),
                    status: ClusterStatus::Pending,
                    exit: None,
                };
                (idx.to_string(), job)
            })
            .collect::<BTreeMap<_, _>>();
        let mut ledger = Ledger {
            run_id: run_id.clone(),
            group: batch.group.clone(),
            dryrun,
            resources: batch.resources.clone(),
            jobs,
        };
        self.store(&ledger)?;
        let handles: Vec<ClusterHandle> = (0..batch.commands.len())
            .map(|idx| ClusterHandle {
                run_id: run_id.clone(),
                job_id: idx.to_string(),
            })
            .collect();
        info!(run_id = %run_id, group = %batch.group, njobs = handles.len(), dryrun, "run recorded");

        if !dryrun {
            for handle in &handles {
                if let Some(job) = ledger.jobs.get_mut(&handle.job_id) {
                    job.status = ClusterStatus::Running;
                }
                self.execute(&mut ledger, &handle.job_id)?;
            }
        }
        Ok(SubmittedBatch { run_id, handles })
    }

    fn status(&self, handle: &ClusterHandle) -> Result<ClusterStatus, LabError> {
        match self.load(&handle.run_id)? {
            Some(ledger) => Ok(ledger
                .jobs
                .get(&handle.job_id)
                .map(|job| job.status)
                .unwrap_or(ClusterStatus::Unknown)),
            None => Ok(ClusterStatus::Unknown),
        }
    }

    fn exit_status(&self, handle: &ClusterHandle) -> Result<Option<i32>, LabError> {
        match self.load(&handle.run_id)? {
            Some(ledger) => Ok(ledger.jobs.get(&handle.job_id).and_then(|job| job.exit)),
            None => Ok(None),
        }
    }

    fn resource_info(&self, handle: &ClusterHandle) -> Result<Option<ResourceInfo>, LabError> {
        let (ledger, _) = self.job(handle)?;
        Ok(Some(ResourceInfo {
            max_memory_mb: None,
            req_memory_mb: ledger.resources.memory_mb,
        }))
    }

    fn kill(&self, handle: &ClusterHandle) -> Result<(), LabError> {
        let (mut ledger, job) = self.job(handle)?;
        if job.status.is_active() {
            ledger.jobs.insert(
                handle.job_id.clone(),
                LedgerJob {
                    status: ClusterStatus::Exited,
                    exit: Some(KILLED),
                    ..job
                },
            );
            self.store(&ledger)?;
        }
        Ok(())
    }

    fn kill_run(&self, run_id: &str) -> Result<(), LabError> {
        match self.load(run_id)? {
            Some(ledger) => self.kill_ledger(ledger),
            None => Ok(()),
        }
    }

    fn kill_group(&self, group: &str) -> Result<(), LabError> {
        for run_id in self.run_ids()? {
            if let Some(ledger) = self.load(&run_id)? {
                if ledger.group == group {
                    self.kill_ledger(ledger)?;
                }
            }
        }
        Ok(())
    }

    fn resubmit(&self, handle: &ClusterHandle) -> Result<ClusterHandle, LabError> {
        let (mut ledger, job) = self.job(handle)?;
        if ledger.dryrun {
            return Err(LabError::Cluster(
                ErrorInfo::new("dryrun_resubmit", "dry-run batches cannot be resubmitted")
                    .with_context("run_id", handle.run_id.clone()),
            ));
        }
        let job_id = ledger.jobs.len().to_string();
        ledger.jobs.insert(
            job_id.clone(),
            LedgerJob {
                command: job.command,
                status: ClusterStatus::Running,
                exit: None,
            },
        );
        self.store(&ledger)?;
        self.execute(&mut ledger, &job_id)?;
        Ok(ClusterHandle {
            run_id: ledger.run_id,
            job_id,
        })
    }
}
