use std::error::Error;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use commands::{
    auto_run::{self, AutoRunArgs},
    exp_info::{self, ExpInfoArgs},
    job_info::{self, JobInfoArgs},
    resubmit::{self, ResubmitArgs},
    rm_exp::{self, RmExpArgs},
    run_job::{self, RunJobArgs},
    submit_jobs::{self, SubmitJobsArgs},
    work_info::{self, WorkInfoArgs},
    Session,
};
use labrun_exp::config::ROOT_ENV;
use labrun_exp::LabConfig;
use tracing::{debug, trace};
use tracing_subscriber::EnvFilter;

mod catalog;
mod commands;

#[derive(Parser, Debug)]
#[command(name = "labrun", about = "Parameter sweep orchestration over a cluster")]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Workspace root, overriding the config file and LABRUN_ROOT.
    #[arg(long, global = true)]
    root: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the workspace root folder.
    Root,
    /// Describe a workspace: scripts, definitions and experiments on disk.
    WorkInfo(WorkInfoArgs),
    /// Summarise an experiment's jobs and tasks.
    ExpInfo(ExpInfoArgs),
    /// Kill an experiment's jobs and delete its folder.
    RmExp(RmExpArgs),
    /// Execute one job's tasks (invoked by the cluster).
    RunJob(RunJobArgs),
    /// Submit every job of an experiment.
    SubmitJobs(SubmitJobsArgs),
    /// Dispatch one job again.
    Resubmit(ResubmitArgs),
    /// Describe one job.
    JobInfo(JobInfoArgs),
    /// Set up and submit every experiment defined by a workspace.
    AutoRun(AutoRunArgs),
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose >= 2)
        .with_line_number(verbose >= 2)
        .init();
    debug!("labrun started with verbosity level: {verbose}");
    trace!("full CLI args: {:?}", std::env::args().collect::<Vec<_>>());
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = LabConfig::load()?;
    if let Some(root) = cli.root {
        // Jobs run as child processes and must resolve the same root.
        std::env::set_var(ROOT_ENV, &root);
        config.root_dir = root;
    }

    let mut session = Session::open(config, catalog::catalog());
    match cli.command {
        Command::Root => {
            println!("{}", session.registry.root_dir().display());
            Ok(())
        }
        Command::WorkInfo(args) => work_info::run(&mut session, &args),
        Command::ExpInfo(args) => exp_info::run(&mut session, &args),
        Command::RmExp(args) => rm_exp::run(&mut session, &args),
        Command::RunJob(args) => run_job::run(&mut session, &args),
        Command::SubmitJobs(args) => submit_jobs::run(&mut session, &args),
        Command::Resubmit(args) => resubmit::run(&mut session, &args),
        Command::JobInfo(args) => job_info::run(&mut session, &args),
        Command::AutoRun(args) => auto_run::run(&mut session, &args),
    }
}
