pub mod auto_run;
pub mod exp_info;
pub mod job_info;
pub mod resubmit;
pub mod rm_exp;
pub mod run_job;
pub mod submit_jobs;
pub mod work_info;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use labrun_core::{ErrorInfo, LabError};
use labrun_exp::{Catalog, LabConfig, LocalCluster, WorkspaceRegistry};
use signal_hook::consts::SIGINT;

/// Process wide state shared by the subcommands.
pub struct Session {
    pub registry: WorkspaceRegistry,
    pub cluster: LocalCluster,
}

impl Session {
    pub fn open(config: LabConfig, catalog: Catalog) -> Self {
        let cluster = LocalCluster::new(config.cluster_dir());
        Self {
            registry: WorkspaceRegistry::new(config, Arc::new(catalog)),
            cluster,
        }
    }
}

/// Flag raised on SIGINT so a submission can abandon cleanly.
pub fn interrupt_flag() -> Result<Arc<AtomicBool>, LabError> {
    let flag = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(SIGINT, Arc::clone(&flag))
        .map_err(|err| LabError::Cluster(ErrorInfo::new("signal_register", err.to_string())))?;
    Ok(flag)
}

/// Splits a comma separated `--requests` value.
pub fn split_requests(raw: Option<&str>) -> Vec<String> {
    raw.map(|text| {
        text.split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}
