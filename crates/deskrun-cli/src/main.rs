//! DeskRun CLI - run desktop automation tasks in parallel sessions.

mod console;
mod flights;
mod summary;

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Datelike;
use clap::{Args, Parser, Subcommand, ValueEnum};
use deskrun_agent::{ActionMode, DesktopEngine, Script, ScriptedEngine};
use deskrun_core::{AggregateResult, TaskDescriptor};
use deskrun_worker::{ConflictPolicy, PoolConfig, WorkerPool};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::console::ConsoleHandler;
use crate::flights::FlightSearch;
use crate::summary::{render_best, render_table, FailOn, Report};

/// DeskRun - parallel desktop automation
#[derive(Parser)]
#[command(name = "deskrun")]
#[command(about = "Run automation tasks in parallel isolated desktops", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Find the cheapest weekend to fly in a month
    Flights {
        /// Starting location
        #[arg(long)]
        origin: String,

        /// Destination
        #[arg(long)]
        destination: String,

        /// Month number (1 - January, ..., 12 - December)
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..=12))]
        month: u32,

        /// Year (defaults to the current year)
        #[arg(long)]
        year: Option<i32>,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Run copies of one prompt
    Run {
        /// Instructions for the agent
        #[arg(short, long)]
        prompt: String,

        /// Number of parallel copies
        #[arg(short = 'n', long, default_value = "1")]
        copies: u32,

        /// Ask on the terminal when the agent pauses (default: auto mode)
        #[arg(short, long)]
        interactive: bool,

        #[command(flatten)]
        common: CommonArgs,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PolicyArg {
    Fail,
    NextFree,
}

#[derive(Args)]
struct CommonArgs {
    /// Engine script (JSON) to replay
    #[arg(short, long)]
    script: PathBuf,

    /// Maximum concurrent sessions
    #[arg(short = 'w', long, default_value = "5")]
    max_workers: usize,

    /// Per-task timeout in seconds (0 disables it)
    #[arg(short, long, default_value = "600")]
    timeout_secs: u64,

    /// What to do when a task's ports are already in use
    #[arg(long, value_enum, default_value = "fail")]
    conflict_policy: PolicyArg,

    /// Slots to try under the next-free policy
    #[arg(long, default_value = "5")]
    max_port_attempts: u32,

    /// When to exit non-zero
    #[arg(long, value_enum, default_value = "total")]
    fail_on: FailOn,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

impl CommonArgs {
    fn pool_config(&self, session_prefix: &str) -> PoolConfig {
        let policy = match self.conflict_policy {
            PolicyArg::Fail => ConflictPolicy::Fail,
            PolicyArg::NextFree => ConflictPolicy::NextFree {
                max_attempts: self.max_port_attempts,
            },
        };
        let timeout = (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs));

        PoolConfig::default()
            .with_max_workers(self.max_workers)
            .with_conflict_policy(policy)
            .with_task_timeout(timeout)
            .with_session_prefix(session_prefix)
    }

    async fn engine(&self) -> Result<Arc<dyn DesktopEngine>, Box<dyn Error>> {
        let json = tokio::fs::read_to_string(&self.script).await?;
        let script = Script::from_json(&json)?;
        info!(script = %self.script.display(), "Loaded engine script");
        Ok(Arc::new(ScriptedEngine::new(script)))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Logs go to stderr so the report on stdout stays clean
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Flights {
            origin,
            destination,
            month,
            year,
            common,
        } => {
            let search = FlightSearch {
                origin,
                destination,
                year: year.unwrap_or_else(|| chrono::Local::now().year()),
                month,
            };
            run_flights(search, common).await?
        }
        Commands::Run {
            prompt,
            copies,
            interactive,
            common,
        } => run_prompt(prompt, copies, interactive, common).await?,
    };

    std::process::exit(code);
}

async fn run_flights(search: FlightSearch, common: CommonArgs) -> Result<i32, Box<dyn Error>> {
    let month = flights::month_name(search.month).unwrap_or("?");
    println!(
        "\nChecking the best weekend to fly from {} to {} in {} {}...\n",
        search.origin, search.destination, month, search.year
    );

    let pool = WorkerPool::new(common.engine().await?, common.pool_config("weekend_flight"));
    let aggregate = pool.run_to_completion(search.tasks(), ActionMode::Auto).await?;

    let heading = format!("Flight prices for {} {}", month, search.year);
    report(&pool, &aggregate, &common, &heading, "Cheapest weekend", "$")
}

async fn run_prompt(
    prompt: String,
    copies: u32,
    interactive: bool,
    common: CommonArgs,
) -> Result<i32, Box<dyn Error>> {
    let mode = if interactive {
        ActionMode::Interactive(Arc::new(ConsoleHandler::stdio()))
    } else {
        ActionMode::Auto
    };
    let tasks: Vec<TaskDescriptor> = (1..=copies)
        .map(|i| TaskDescriptor::new(i, format!("copy {}", i), prompt.clone()))
        .collect();

    let pool = WorkerPool::new(common.engine().await?, common.pool_config("deskrun"));
    let aggregate = pool.run_to_completion(tasks, mode).await?;

    report(&pool, &aggregate, &common, "Results", "Lowest result", "")
}

fn report(
    pool: &WorkerPool,
    aggregate: &AggregateResult,
    common: &CommonArgs,
    heading: &str,
    best_label: &str,
    prefix: &str,
) -> Result<i32, Box<dyn Error>> {
    let summary = aggregate.summary();

    if common.json {
        let report = Report::new(aggregate, pool.stats());
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render_table(aggregate, heading, prefix));
        println!("\n{}", render_best(aggregate.best(), best_label, prefix));
        println!(
            "\n{} of {} tasks succeeded (peak {} concurrent sessions)",
            summary.succeeded,
            summary.total,
            pool.stats().peak_live
        );
    }

    Ok(common.fail_on.exit_code(&summary))
}
