mod cmd;
mod executor;
mod output;
mod root;
mod workspace;

use clap::{Parser, Subcommand};
use cmd::{run::RunArgs, worker::WorkerCommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "shep",
    about = "Drive a feature from spec to merged PR with an AI agent, pausing at approval gates",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .shep/ or .git/)
    #[arg(long, global = true, env = "SHEP_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize shep in the current project
    Init,

    /// Start a feature-agent run
    Run(RunArgs),

    /// List runs, or show one run in detail
    Status {
        /// Run id (omit to list all runs)
        run_id: Option<String>,

        /// Include phase timings and the execution step log
        #[arg(long)]
        steps: bool,
    },

    /// Approve the gate a run is waiting at and continue it
    Approve {
        run_id: String,

        /// Run the worker in this process instead of detaching it
        #[arg(long)]
        foreground: bool,
    },

    /// Reject the gate a run is waiting at; the phase is redone with the feedback
    Reject {
        run_id: String,

        /// What to change
        #[arg(long, short = 'f')]
        feedback: String,

        /// Run the worker in this process instead of detaching it
        #[arg(long)]
        foreground: bool,
    },

    /// Resume a failed or interrupted run from its last checkpoint
    Resume {
        run_id: String,

        /// Run the worker in this process instead of detaching it
        #[arg(long)]
        foreground: bool,
    },

    /// Execute one run to its next stop (spawned by the other commands)
    #[command(hide = true)]
    Worker(WorkerCommand),
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Worker(_) => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init => cmd::init::run(&root),
        Commands::Run(args) => cmd::run::run(&root, args, cli.json),
        Commands::Status { run_id, steps } => {
            cmd::status::run(&root, run_id.as_deref(), steps, cli.json)
        }
        Commands::Approve { run_id, foreground } => {
            cmd::approve::run(&root, &run_id, foreground, cli.json)
        }
        Commands::Reject {
            run_id,
            feedback,
            foreground,
        } => cmd::reject::run(&root, &run_id, &feedback, foreground, cli.json),
        Commands::Resume { run_id, foreground } => {
            cmd::resume::run(&root, &run_id, foreground, cli.json)
        }
        Commands::Worker(args) => cmd::worker::run(&root, args),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
