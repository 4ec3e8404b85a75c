//! Flock CLI - swarm coordination from the command line
//!
//! Usage:
//!   flock init [path]          Write default configuration
//!   flock run <goal>           Run one swarm to completion and print the result
//!   flock capabilities         Print the swarm tier's capabilities

mod workers;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use flock_core::{
    ExecutionOptions, FlockConfig, ResourceAmounts, RetryPolicy, TierExecutor, TierRequest,
};
use flock_swarm::{BudgetedEngine, OodaDriver, Services, SwarmManager, SwarmTier};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::workers::LocalWorkers;

#[derive(Parser)]
#[command(name = "flock")]
#[command(author, version, about = "Goal-directed agent swarms under a budget")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Directory holding .flock/config.toml
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default configuration
    Init {
        /// Target directory (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Run one swarm toward a goal
    Run {
        /// Goal description
        goal: String,

        /// Credit budget (defaults to the configured budget)
        #[arg(long)]
        budget: Option<u64>,

        /// Milliseconds between OODA ticks
        #[arg(long, default_value = "200")]
        interval_ms: u64,

        /// Tasks needed to reach the goal
        #[arg(long, default_value = "3")]
        tasks: u64,

        /// Initial team, comma separated
        #[arg(long, value_delimiter = ',')]
        agents: Vec<String>,

        /// Give up after this many milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Delegation retries per routine
        #[arg(long, default_value = "1")]
        retries: u32,
    },

    /// Print the swarm tier's capabilities
    Capabilities,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init { path } => cmd_init(path),
        Commands::Run {
            goal,
            budget,
            interval_ms,
            tasks,
            agents,
            timeout_ms,
            retries,
        } => {
            let config = load_config(&cli.root)?;
            let run = RunArgs {
                goal,
                budget,
                interval_ms,
                tasks,
                agents,
                timeout_ms,
                retries,
            };
            cmd_run(config, run).await
        }
        Commands::Capabilities => {
            let config = load_config(&cli.root)?;
            cmd_capabilities(config)
        }
    }
}

struct RunArgs {
    goal: String,
    budget: Option<u64>,
    interval_ms: u64,
    tasks: u64,
    agents: Vec<String>,
    timeout_ms: Option<u64>,
    retries: u32,
}

fn load_config(root: &Path) -> Result<FlockConfig> {
    FlockConfig::load_or_default(root)
        .with_context(|| format!("Failed to load configuration under {:?}", root))
}

fn cmd_init(path: PathBuf) -> Result<()> {
    info!("Initializing Flock in {:?}", path);
    FlockConfig::write_default(&path)
        .with_context(|| format!("Failed to write configuration under {:?}", path))?;

    println!("Initialized Flock in {:?}", path);
    println!("Created:");
    println!("  .flock/config.toml");
    Ok(())
}

/// Build the swarm tier with the default strategy and local workers below it
fn build_tier(config: FlockConfig, retries: u32) -> SwarmTier {
    let engine = Arc::new(BudgetedEngine::new(config.tier.routine_cost));
    let services = Services::in_memory(engine).with_subordinate(Arc::new(LocalWorkers::new()));
    let driver = OodaDriver::new(services.clone(), config.tier.routine_cost).with_retry(RetryPolicy {
        max_retries: retries,
        backoff_ms: 50,
    });
    SwarmTier::new(SwarmManager::with_driver(services, config, driver))
}

async fn cmd_run(config: FlockConfig, args: RunArgs) -> Result<()> {
    let tier = build_tier(config, args.retries);
    let listener = tier.manager().spawn_event_listener();

    let execution_id = format!("run-{}", Uuid::new_v4());
    let request = TierRequest::new(
        execution_id.clone(),
        serde_json::json!({
            "goal": args.goal,
            "agents": args.agents,
            "constraints": {
                "tasks_total": args.tasks,
                "adaptation_interval_ms": args.interval_ms,
            },
        }),
        ResourceAmounts::credits(args.budget.unwrap_or(0)),
    )
    .with_options(ExecutionOptions {
        timeout_ms: args.timeout_ms,
        ..Default::default()
    });

    info!("Starting execution {}", execution_id);
    let result = tier.execute(request).await;

    tier.manager().shutdown().await;
    listener.abort();

    println!("{}", serde_json::to_string_pretty(&result)?);
    if let Some(error) = result.error {
        bail!("Execution {} failed: {}", execution_id, error);
    }
    Ok(())
}

fn cmd_capabilities(config: FlockConfig) -> Result<()> {
    let tier = build_tier(config, 0);
    println!("{}", serde_json::to_string_pretty(&tier.get_capabilities())?);
    Ok(())
}
