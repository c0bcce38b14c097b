use std::error::Error;

use clap::Args;

use super::Session;

#[derive(Args, Debug)]
pub struct ExpInfoArgs {
    pub workspace_id: String,
    pub experiment_id: String,
    /// Also list the distinct values of every task argument.
    #[arg(long)]
    pub tasks: bool,
    /// Also list the ids of finished jobs.
    #[arg(long)]
    pub finished_jobs: bool,
}

pub fn run(session: &mut Session, args: &ExpInfoArgs) -> Result<(), Box<dyn Error>> {
    let experiment = session
        .registry
        .experiment(&args.workspace_id, &args.experiment_id)?;
    println!("{}", experiment.summary(&session.cluster)?);

    if args.tasks {
        for (name, values) in experiment.task_summary()? {
            let rendered: Vec<String> = values.iter().map(|value| value.to_string()).collect();
            println!("{name}: {}", rendered.join(", "));
        }
        for (method, messages) in experiment.method_errors()? {
            if messages.is_empty() {
                continue;
            }
            println!("Error messages for {method}:");
            for message in messages {
                println!("  {message}");
            }
        }
    }
    if args.finished_jobs {
        println!("Finished job IDs: {:?}", experiment.finished_job_ids()?);
    }
    Ok(())
}
