use std::error::Error;

use clap::Args;
use labrun_exp::SubmitOpts;

use super::{interrupt_flag, split_requests, Session};

#[derive(Args, Debug)]
pub struct SubmitJobsArgs {
    pub workspace_id: String,
    pub experiment_id: String,
    /// Comma separated extra scheduler requests.
    #[arg(long)]
    pub requests: Option<String>,
    #[arg(long)]
    pub queue: Option<String>,
    /// Go through the submission without running anything.
    #[arg(long)]
    pub dryrun: bool,
}

pub fn run(session: &mut Session, args: &SubmitJobsArgs) -> Result<(), Box<dyn Error>> {
    let opts = SubmitOpts {
        dryrun: args.dryrun,
        requests: split_requests(args.requests.as_deref()),
        queue: args.queue.clone(),
        cancel: Some(interrupt_flag()?),
    };
    let workspace = session.registry.workspace(&args.workspace_id)?;
    let ack = workspace.submit_experiment(&args.experiment_id, &session.cluster, &opts)?;
    println!("Submitted {} jobs in run {}", ack.handles.len(), ack.run_id);
    Ok(())
}
