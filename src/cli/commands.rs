//! CLI command definitions for benchflow.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tracing::info;

use crate::benchmarks::BenchmarkRegistry;
use crate::bridge::{Agent, HttpAgent};
use crate::config::{ConfigValue, Params, Settings};
use crate::orchestrator::{BatchRequest, Orchestrator, OrchestratorContext};
use crate::results::{AgentRequirements, ResultStore, RunResult};
use crate::scheduler::TaskRequest;

/// Run containerized benchmarks against remote agents.
#[derive(Parser)]
#[command(name = "benchflow")]
#[command(about = "Run containerized benchmarks against remote agents")]
#[command(version)]
#[command(
    long_about = "benchflow runs benchmark containers, relays every turn between the benchmark and an HTTP agent, and stores one standardized result per run.\n\nExample usage:\n  benchflow run taubench -t 0 -t 1 -a http://localhost:9000 --secret OPENAI_API_KEY=sk-..."
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// Root directory for results and scratch space.
    #[arg(short = 'w', long, env = "BENCHFLOW_WORK_DIR", global = true)]
    pub work_dir: Option<PathBuf>,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run tasks of a benchmark against one or more agents.
    Run(RunArgs),

    /// Print stored results for run ids.
    Results(ResultsArgs),

    /// List the task ids of a benchmark split.
    Tasks(TasksArgs),

    /// Remove stored results, scratch directories and leftover containers.
    Cleanup(CleanupArgs),

    /// List registered benchmarks.
    Benchmarks,
}

/// Arguments for `benchflow run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Benchmark name (see `benchflow benchmarks`).
    pub benchmark: String,

    /// Task id to run; repeatable.
    #[arg(short = 't', long = "task", required = true)]
    pub tasks: Vec<String>,

    /// Agent endpoint URL; repeatable. Every agent runs every task.
    #[arg(short = 'a', long = "agent-url", required = true)]
    pub agent_urls: Vec<String>,

    /// Benchmark parameter as KEY=VALUE; repeatable.
    #[arg(short = 'p', long = "param", value_parser = parse_key_value)]
    pub params: Vec<(String, ConfigValue)>,

    /// YAML mapping of benchmark parameters, applied before --param.
    #[arg(long)]
    pub params_file: Option<PathBuf>,

    /// API secret as KEY=VALUE; repeatable. Explicit params win.
    #[arg(short = 's', long = "secret", value_parser = parse_key_value)]
    pub secrets: Vec<(String, ConfigValue)>,

    /// Agent requirements.txt recorded with each run.
    #[arg(long)]
    pub requirements: Option<PathBuf>,

    /// Agent install.sh recorded with each run.
    #[arg(long)]
    pub install_sh: Option<PathBuf>,

    /// Maximum concurrent runs.
    #[arg(short = 'j', long, env = "BENCHFLOW_MAX_WORKERS")]
    pub max_workers: Option<usize>,

    /// Wall-clock budget per run in seconds.
    #[arg(long, env = "BENCHFLOW_RUN_TIMEOUT_SECS")]
    pub timeout_secs: Option<u64>,

    /// Maximum observation/action turns per run.
    #[arg(long, env = "BENCHFLOW_MAX_STEPS")]
    pub max_steps: Option<usize>,

    /// Print results as JSON instead of a summary.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `benchflow results`.
#[derive(Parser, Debug)]
pub struct ResultsArgs {
    /// Benchmark name.
    pub benchmark: String,

    /// Run ids; all stored runs when omitted.
    pub run_ids: Vec<String>,
}

/// Arguments for `benchflow tasks`.
#[derive(Parser, Debug)]
pub struct TasksArgs {
    /// Benchmark name.
    pub benchmark: String,

    /// Dataset split.
    #[arg(long, default_value = "test")]
    pub split: String,
}

/// Arguments for `benchflow cleanup`.
#[derive(Parser, Debug)]
pub struct CleanupArgs {
    /// Benchmark name.
    pub benchmark: String,
}

/// Parses `KEY=VALUE`. The value may contain `=`.
pub fn parse_key_value(raw: &str) -> Result<(String, ConfigValue), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{raw}'"));
    }
    Ok((key.to_string(), ConfigValue::from(value)))
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let mut settings = Settings::from_env()?;
    if let Some(dir) = cli.work_dir {
        settings.work_dir = dir;
    }

    match cli.command {
        Commands::Run(args) => run_batch_command(args, settings).await,
        Commands::Results(args) => run_results_command(args, &settings),
        Commands::Tasks(args) => run_tasks_command(args).await,
        Commands::Cleanup(args) => run_cleanup_command(args, settings).await,
        Commands::Benchmarks => {
            for name in BenchmarkRegistry::with_builtin().names() {
                println!("{name}");
            }
            Ok(())
        }
    }
}

fn lookup_benchmark(name: &str) -> anyhow::Result<Arc<dyn crate::benchmarks::Benchmark>> {
    let registry = BenchmarkRegistry::with_builtin();
    registry.get(name).with_context(|| {
        format!(
            "unknown benchmark '{name}' (available: {})",
            registry.names().collect::<Vec<_>>().join(", ")
        )
    })
}

fn read_optional(path: Option<&Path>) -> anyhow::Result<Option<String>> {
    path.map(|p| {
        std::fs::read_to_string(p).with_context(|| format!("failed to read {}", p.display()))
    })
    .transpose()
}

async fn run_batch_command(args: RunArgs, mut settings: Settings) -> anyhow::Result<()> {
    let benchmark = lookup_benchmark(&args.benchmark)?;

    if let Some(max_steps) = args.max_steps {
        settings.max_steps = max_steps;
    }
    if let Some(secs) = args.timeout_secs {
        settings.run_timeout = Some(Duration::from_secs(secs));
    }
    if let Some(max_workers) = args.max_workers {
        settings.max_workers = max_workers;
    }
    settings.validate()?;

    let mut params = Params::new();
    if let Some(path) = &args.params_file {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let from_file: Params = serde_yaml::from_str(&text)
            .with_context(|| format!("invalid params file {}", path.display()))?;
        params.extend(from_file);
    }
    params.extend(args.params);
    let secrets: Params = args.secrets.into_iter().collect();

    let requirements = AgentRequirements {
        requirements_txt: read_optional(args.requirements.as_deref())?,
        install_sh: read_optional(args.install_sh.as_deref())?,
    };

    let agents = args
        .agent_urls
        .iter()
        .map(|url| {
            HttpAgent::new(url, settings.agent_timeout)
                .map(|a| Arc::new(a.with_max_retries(settings.agent_max_retries)) as Arc<dyn Agent>)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let ctx = OrchestratorContext::with_docker(settings)?;
    let orchestrator = Orchestrator::new(ctx, benchmark);

    let request = BatchRequest::new(args.tasks.iter().map(|t| TaskRequest::new(t)), agents)
        .with_params(params)
        .with_api_secrets(secrets)
        .with_requirements(requirements);

    let run_ids: Vec<String> = orchestrator.run(request).await?.into_iter().collect();
    let results = orchestrator.get_results(&run_ids);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        print_summary(&results);
    }
    Ok(())
}

fn run_results_command(args: ResultsArgs, settings: &Settings) -> anyhow::Result<()> {
    let benchmark = lookup_benchmark(&args.benchmark)?;
    let store = ResultStore::new(settings.benchmark_dir(benchmark.name()));
    let run_ids = if args.run_ids.is_empty() {
        store.run_ids()?
    } else {
        args.run_ids
    };
    let results = store.load_many(&run_ids);
    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}

async fn run_tasks_command(args: TasksArgs) -> anyhow::Result<()> {
    let benchmark = lookup_benchmark(&args.benchmark)?;
    let listing = benchmark.get_all_tasks(&args.split).await;
    if let Some(err) = &listing.error_message {
        anyhow::bail!("failed to list tasks for {}: {err}", benchmark.name());
    }
    for id in &listing.task_ids {
        println!("{id}");
    }
    Ok(())
}

async fn run_cleanup_command(args: CleanupArgs, settings: Settings) -> anyhow::Result<()> {
    let benchmark = lookup_benchmark(&args.benchmark)?;
    let ctx = OrchestratorContext::with_docker(settings)?;
    Orchestrator::new(ctx, benchmark).cleanup().await;
    Ok(())
}

#[derive(Debug, Serialize)]
struct BatchSummary {
    runs: usize,
    resolved: usize,
    failed: usize,
    mean_score: f64,
}

impl BatchSummary {
    fn from_results<'a>(results: impl IntoIterator<Item = &'a RunResult>) -> Self {
        let mut summary = Self {
            runs: 0,
            resolved: 0,
            failed: 0,
            mean_score: 0.0,
        };
        let mut total_score = 0.0;
        for result in results {
            summary.runs += 1;
            total_score += result.score();
            if result.is_resolved() {
                summary.resolved += 1;
            }
            if result.error().is_some() {
                summary.failed += 1;
            }
        }
        if summary.runs > 0 {
            summary.mean_score = total_score / summary.runs as f64;
        }
        summary
    }
}

fn print_summary(results: &std::collections::BTreeMap<String, RunResult>) {
    for (run_id, result) in results {
        let status = if result.is_resolved() { "PASS" } else { "FAIL" };
        match result.error() {
            Some(err) => println!("{run_id}  {status}  score={:.3}  {err}", result.score()),
            None => println!("{run_id}  {status}  score={:.3}", result.score()),
        }
    }
    let summary = BatchSummary::from_results(results.values());
    info!(
        runs = summary.runs,
        resolved = summary.resolved,
        failed = summary.failed,
        mean_score = summary.mean_score,
        "Batch summary"
    );
    println!(
        "\n{} runs, {} resolved, {} failed, mean score {:.3}",
        summary.runs, summary.resolved, summary.failed, summary.mean_score
    );
}
