use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use flowdag_core::storage::{ExecutionStore, RedbExecutionStore};
use flowdag_core::workflow::{GraphValidator, Optimization, WorkflowEngine, WorkflowOptimizer};
use flowdag_core::{
    AgentExecutor, EchoExecutor, ExecutionId, ExecutionStrategy, InputContext,
};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

mod command_executor;
mod config;

use command_executor::CommandExecutor;
use config::{load_definition, CliConfig};

#[derive(Parser, Debug)]
#[command(name = "flowdag")]
#[command(about = "DAG workflow scheduler for agent pipelines", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "flowdag.toml", env = "FLOWDAG_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check a definition for cycles and dangling references
    Validate { definition: PathBuf },

    /// Print a flow diagram of a definition
    Visualize { definition: PathBuf },

    /// Score a definition and optionally write an optimized copy
    Optimize {
        definition: PathBuf,

        /// Optimizations to apply (retry_policy, parallel_hints)
        #[arg(long = "apply")]
        apply: Vec<String>,

        /// Where to write the optimized definition
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Execute a definition and record the run
    Run {
        definition: PathBuf,

        /// sequential, parallel or priority
        #[arg(short, long, default_value = "parallel")]
        strategy: String,

        /// Input entries as key=value; values are parsed as JSON when possible
        #[arg(short, long = "input")]
        input: Vec<String>,

        /// Use the built-in echo executor instead of configured commands
        #[arg(long)]
        echo: bool,
    },

    /// Show a recorded run
    Status { execution_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flowdag=info,flowdag_core=info".into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = CliConfig::load(&args.config)?;

    match args.command {
        Commands::Validate { definition } => validate(definition),
        Commands::Visualize { definition } => visualize(definition),
        Commands::Optimize {
            definition,
            apply,
            output,
        } => optimize(definition, apply, output),
        Commands::Run {
            definition,
            strategy,
            input,
            echo,
        } => run(&config, definition, &strategy, input, echo).await,
        Commands::Status { execution_id } => status(&config, &execution_id),
    }
}

fn validate(path: PathBuf) -> Result<()> {
    let definition = load_definition(&path)?;
    let analysis = GraphValidator::analyze(&definition);

    print_json(&serde_json::json!({
        "workflow": definition.id,
        "valid": analysis.is_valid(),
        "metrics": analysis.metrics,
        "issues": analysis.issues,
    }))?;

    if !analysis.is_valid() {
        return Err(anyhow!("Workflow {} is not a valid DAG", definition.id));
    }
    Ok(())
}

fn visualize(path: PathBuf) -> Result<()> {
    let definition = load_definition(&path)?;
    if !GraphValidator::issues(&definition).is_empty() {
        tracing::warn!("Workflow {} is not a valid DAG", definition.id);
    }
    println!("{}", flowdag_core::workflow::visualize::render(&definition));
    Ok(())
}

fn optimize(path: PathBuf, apply: Vec<String>, output: Option<PathBuf>) -> Result<()> {
    let definition = load_definition(&path)?;
    let optimizations = apply
        .iter()
        .map(|name| name.parse::<Optimization>().map_err(|e| anyhow!(e)))
        .collect::<Result<Vec<_>>>()?;

    let mut optimizer = WorkflowOptimizer::new();
    let report = optimizer.optimize_workflow(&definition);
    print_json(&report)?;

    if let Some(output) = output {
        let optimized = optimizer
            .generate_optimized(&definition, &optimizations)
            .context("Failed to generate optimized workflow")?;
        let content =
            toml::to_string_pretty(&optimized).context("Failed to serialize optimized workflow")?;
        std::fs::write(&output, content)
            .with_context(|| format!("Failed to write {}", output.display()))?;
        tracing::info!("Wrote {} to {}", optimized.id, output.display());
    }

    Ok(())
}

async fn run(
    config: &CliConfig,
    path: PathBuf,
    strategy: &str,
    input: Vec<String>,
    echo: bool,
) -> Result<()> {
    let definition = load_definition(&path)?;
    let strategy: ExecutionStrategy = strategy.parse().map_err(|e: String| anyhow!(e))?;
    let input = parse_input(&input)?;

    let executor: Arc<dyn AgentExecutor> = if echo {
        Arc::new(EchoExecutor)
    } else {
        Arc::new(CommandExecutor::new(config.agents.clone()))
    };
    let engine = WorkflowEngine::new(config.engine.clone(), executor);

    engine.try_register(&definition).await?;

    let execution = engine
        .execute_workflow(&definition.id, input, strategy)
        .await?;

    let store = RedbExecutionStore::new(config.storage.store_file.clone())
        .context("Failed to open execution store")?;
    store.save(&execution)?;
    tracing::info!(
        "Recorded execution {} in {}",
        execution.execution_id,
        config.storage.store_file.display()
    );

    print_json(&execution)
}

fn status(config: &CliConfig, execution_id: &str) -> Result<()> {
    let execution_id: ExecutionId = execution_id
        .parse()
        .with_context(|| format!("Invalid execution id {}", execution_id))?;
    let store = RedbExecutionStore::new(config.storage.store_file.clone())
        .context("Failed to open execution store")?;

    match store.get(&execution_id)? {
        Some(execution) => print_json(&execution),
        None => Err(anyhow!("Execution {} not found", execution_id)),
    }
}

/// Parse `key=value` pairs into a run input
fn parse_input(entries: &[String]) -> Result<InputContext> {
    let mut input = InputContext::new();
    for entry in entries {
        let (key, raw) = entry
            .split_once('=')
            .ok_or_else(|| anyhow!("Input {:?} is not in key=value form", entry))?;
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        input.insert(key.trim(), value);
    }
    Ok(input)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize output")?
    );
    Ok(())
}
