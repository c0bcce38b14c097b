use std::error::Error;

use clap::Args;

use super::Session;

#[derive(Args, Debug)]
pub struct RmExpArgs {
    pub workspace_id: String,
    pub experiment_id: String,
}

pub fn run(session: &mut Session, args: &RmExpArgs) -> Result<(), Box<dyn Error>> {
    let workspace = session.registry.workspace(&args.workspace_id)?;
    workspace.rm_experiment(&args.experiment_id, &session.cluster)?;
    Ok(())
}
