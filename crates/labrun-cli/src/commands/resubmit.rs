use std::error::Error;

use clap::Args;

use super::Session;

#[derive(Args, Debug)]
pub struct ResubmitArgs {
    pub workspace_id: String,
    pub experiment_id: String,
    pub job: u64,
}

pub fn run(session: &mut Session, args: &ResubmitArgs) -> Result<(), Box<dyn Error>> {
    let experiment = session
        .registry
        .experiment(&args.workspace_id, &args.experiment_id)?;
    let handle = experiment.resubmit(&session.cluster, args.job)?;
    println!("Job {} resubmitted as {}:{}", args.job, handle.run_id, handle.job_id);
    Ok(())
}
