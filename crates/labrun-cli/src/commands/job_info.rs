use std::error::Error;

use clap::Args;

use super::Session;

#[derive(Args, Debug)]
pub struct JobInfoArgs {
    pub workspace_id: String,
    pub experiment_id: String,
    pub job: u64,
    /// Also print the results of the job's tasks.
    #[arg(long)]
    pub result: bool,
}

pub fn run(session: &mut Session, args: &JobInfoArgs) -> Result<(), Box<dyn Error>> {
    let experiment = session
        .registry
        .experiment(&args.workspace_id, &args.experiment_id)?;
    let info = experiment.job_info(&session.cluster, args.job)?;
    println!("{info}");
    if args.result {
        for task_id in &info.task_ids {
            match experiment.get_task_result(*task_id)? {
                Some(result) => println!("{}", serde_json::to_string_pretty(&result)?),
                None => println!("task {task_id}: no result"),
            }
        }
    }
    Ok(())
}
