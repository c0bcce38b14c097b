use std::error::Error;

use clap::Args;
use labrun_exp::{RunJobOpts, RunOutcome};

use super::Session;

#[derive(Args, Debug)]
pub struct RunJobArgs {
    pub workspace_id: String,
    pub experiment_id: String,
    pub job: u64,
    /// Run the tasks without storing anything.
    #[arg(long)]
    pub dryrun: bool,
    /// Run even if the job already finished.
    #[arg(long)]
    pub force: bool,
}

pub fn run(session: &mut Session, args: &RunJobArgs) -> Result<(), Box<dyn Error>> {
    let experiment = session
        .registry
        .experiment(&args.workspace_id, &args.experiment_id)?;
    let opts = RunJobOpts {
        dryrun: args.dryrun,
        force: args.force,
    };
    match experiment.run_job(args.job, &opts)? {
        RunOutcome::AlreadyFinished { jobid } => println!("Job {jobid} has already finished."),
        RunOutcome::Ran { jobid, results } => {
            let failed = results.iter().filter(|result| !result.is_success()).count();
            println!("Job {jobid}: {} tasks, {failed} with errors", results.len());
        }
    }
    Ok(())
}
