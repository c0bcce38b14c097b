use std::error::Error;

use clap::Args;
use labrun_exp::SubmitOpts;

use super::{interrupt_flag, Session};

#[derive(Args, Debug)]
pub struct AutoRunArgs {
    pub workspace_id: String,
    /// Validate every definition without keeping anything.
    #[arg(long)]
    pub dryrun: bool,
}

pub fn run(session: &mut Session, args: &AutoRunArgs) -> Result<(), Box<dyn Error>> {
    let opts = SubmitOpts {
        dryrun: args.dryrun,
        cancel: Some(interrupt_flag()?),
        ..SubmitOpts::default()
    };
    let workspace = session.registry.workspace(&args.workspace_id)?;
    for (experiment_id, ack) in workspace.auto_run(&session.cluster, &opts)? {
        println!("{experiment_id}: {} jobs in run {}", ack.handles.len(), ack.run_id);
    }
    Ok(())
}
