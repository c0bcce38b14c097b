use std::error::Error;

use clap::Args;

use super::Session;

#[derive(Args, Debug)]
pub struct WorkInfoArgs {
    pub workspace_id: String,
}

pub fn run(session: &mut Session, args: &WorkInfoArgs) -> Result<(), Box<dyn Error>> {
    let workspace = session.registry.workspace(&args.workspace_id)?;
    println!("{:<14}{}", "Workspace", workspace.workspace_id());
    println!("{:<14}{}", "Folder", workspace.folder().display());
    for script in workspace.script_paths()? {
        println!("{:<14}{}", "Script", script.display());
    }
    let definitions = workspace.definitions()?.names().join(", ");
    println!("{:<14}{}", "Definitions", definitions);
    let experiments = workspace.experiment_ids()?.join(", ");
    println!("{:<14}{}", "Experiments", experiments);
    Ok(())
}
