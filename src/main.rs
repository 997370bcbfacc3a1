use anyhow::{bail, Context, Result};
use chrono::Datelike;
use clap::{Args, Parser, Subcommand};
use icarus::db::{Credentials, MysqlConnector};
use icarus::state::StateManager;
use icarus::store::OutputLayout;
use icarus::upload::OutboxPublisher;
use icarus::workflow::{self, Orchestrator, RunOptions, Step};
use std::fs::File;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "icarus")]
#[command(about = "Collect and rank Wikipedia editor contributions for WikiProject Medicine")]
struct Cli {
    /// Logging level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Optional log file path (logs go to stderr otherwise)
    #[arg(long, global = true)]
    log_file: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the workflow, resuming from the last checkpoint
    Run(RunArgs),
    /// Show step completion status and logged errors
    Status(StatusArgs),
    /// Reset workflow state, optionally from a specific step onwards
    Reset(ResetArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Year to analyze
    #[arg(long, default_value_t = default_year())]
    year: String,

    /// Specific languages to process (default: all with retrieved titles)
    #[arg(long, num_args = 1..)]
    languages: Option<Vec<String>>,

    /// Step numbers to skip (1=titles, 2=languages, 3=reports, 4=upload)
    #[arg(long, num_args = 1.., value_name = "STEP")]
    skip_steps: Vec<u32>,

    /// Titles per editors query for batched languages
    #[arg(long, default_value_t = icarus::config::BATCH_SIZE)]
    batch_size: usize,

    /// Process languages in code order instead of largest-first
    #[arg(long)]
    no_sort: bool,

    /// Discard checkpoints from this step onwards and re-run
    #[arg(long, value_name = "STEP")]
    force_from_step: Option<u32>,

    /// Discard all workflow state and start over
    #[arg(long)]
    fresh: bool,

    /// Output directory for artifacts, reports, and state
    #[arg(short, long, default_value = "output")]
    output: String,

    /// Replica credential file (default: ~/replica.my.cnf)
    #[arg(long)]
    credentials: Option<PathBuf>,
}

#[derive(Args)]
struct StatusArgs {
    /// Output directory holding the workflow state
    #[arg(short, long, default_value = "output")]
    output: String,
}

#[derive(Args)]
struct ResetArgs {
    /// Output directory holding the workflow state
    #[arg(short, long, default_value = "output")]
    output: String,

    /// Reset from this step onwards, keeping earlier progress
    #[arg(long, value_name = "STEP")]
    from_step: Option<u32>,
}

/// Reports cover the last full year.
fn default_year() -> String {
    (chrono::Utc::now().year() - 1).to_string()
}

fn run_workflow(args: RunArgs) -> Result<()> {
    for step in args.skip_steps.iter().chain(args.force_from_step.iter()) {
        if Step::from_number(*step).is_none() {
            bail!("Invalid step number: {step} (valid steps are 1-4)");
        }
    }

    let layout = OutputLayout::new(&args.output);
    let state = StateManager::load(layout.state_file())?;

    let credential_path = args.credentials.unwrap_or_else(Credentials::default_path);
    let connector = MysqlConnector::new(credential_path);
    let publisher = OutboxPublisher::new(layout.outbox_dir());

    let opts = RunOptions {
        year: args.year,
        languages: args.languages,
        skip_steps: args.skip_steps,
        batch_size: args.batch_size,
        sort_descending: !args.no_sort,
        force_from_step: args.force_from_step,
        fresh: args.fresh,
    };

    info!(year = %opts.year, output = %args.output, "Starting workflow");

    let mut orchestrator =
        Orchestrator::new(layout, state, Box::new(connector), Box::new(publisher));
    orchestrator.run(&opts)
}

fn show_status(args: StatusArgs) -> Result<()> {
    let layout = OutputLayout::new(&args.output);
    let state = StateManager::load(layout.state_file())?;
    workflow::print_status(&state);
    Ok(())
}

fn reset_state(args: ResetArgs) -> Result<()> {
    let layout = OutputLayout::new(&args.output);
    let mut state = StateManager::load(layout.state_file())?;

    match args.from_step {
        Some(step) => {
            if Step::from_number(step).is_none() {
                bail!("Invalid step number: {step} (valid steps are 1-4)");
            }
            state.reset_from_step(step)?;
            println!("Reset from step {step}");
        }
        None => {
            state.reset()?;
            println!("Full reset completed");
        }
    }
    Ok(())
}

fn init_logging(level: &str, log_file: Option<&str>) -> Result<()> {
    let level: Level = level
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid log level: {level}"))?;

    match log_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create log file: {path}"))?;
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_target(false)
                .with_ansi(false)
                .with_writer(Arc::new(file))
                .finish();
            tracing::subscriber::set_global_default(subscriber)
                .context("Failed to set tracing subscriber")?;
        }
        None => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_target(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)
                .context("Failed to set tracing subscriber")?;
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(&cli.log_level, cli.log_file.as_deref()) {
        eprintln!("Error: {e:#}");
        return ExitCode::FAILURE;
    }

    let result = match cli.command {
        Commands::Run(args) => run_workflow(args),
        Commands::Status(args) => show_status(args),
        Commands::Reset(args) => reset_state(args),
    };

    match result {
        Ok(()) => {
            info!("Completed successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Error: {:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
