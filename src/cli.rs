use crate::config::settings::RunnerConfig;
use crate::config::types::{ExecutionRecord, ExecutionRequest, ExecutionStatus, SandboxError};
use crate::config::validator::validate_config;
use crate::context::build_script;
use crate::exec::{CancelToken, Coordinator};
use crate::observability::get_metrics;
use crate::runtime::{ContainerRuntime, DockerCli};
use crate::store::{ExecutionStore, FileStore, MemoryStore};
use crate::validate::validate_request;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(200);
const RESUBMIT_BACKOFF: Duration = Duration::from_millis(250);

#[derive(Parser)]
#[command(author, version, about = "Build and run untrusted test suites in throwaway containers", long_about = None)]
struct Cli {
    /// Runner configuration file (defaults to ./testbox.json, then built-in defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Persist execution records as JSON files in this directory
    #[arg(long, global = true)]
    store: Option<PathBuf>,
    /// Print Prometheus metrics to stderr when the command finishes
    #[arg(long, global = true)]
    metrics: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one request and wait for the result
    Run {
        /// Execution request JSON file
        #[arg(long)]
        request: PathBuf,
    },
    /// Submit several requests concurrently and wait for all of them
    Batch {
        /// Execution request JSON files
        #[arg(long, num_args = 1.., required = true)]
        request: Vec<PathBuf>,
    },
    /// Show a stored execution record
    Status {
        /// Execution id
        #[arg(long)]
        id: String,
    },
    /// Print the build script generated for a request
    Render {
        /// Execution request JSON file
        #[arg(long)]
        request: PathBuf,
    },
    /// Check that the container runtime is reachable
    Check,
}

pub fn run() -> Result<ExitCode> {
    env_logger::init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    let code = match cli.command {
        Commands::Run { request } => run_one(&config, cli.store.as_deref(), &request)?,
        Commands::Batch { request } => run_batch(&config, cli.store.as_deref(), &request)?,
        Commands::Status { id } => show_status(cli.store.as_deref(), &id)?,
        Commands::Render { request } => render(&config, &request)?,
        Commands::Check => check(&config)?,
    };

    if cli.metrics {
        eprint!("{}", get_metrics().export_prometheus());
    }
    Ok(code)
}

fn load_config(path: Option<&Path>) -> Result<RunnerConfig> {
    let config = match path {
        Some(path) => RunnerConfig::load_from_file(path)?,
        None => RunnerConfig::load_default()?,
    };
    validate_config(&config)?;
    Ok(config)
}

fn open_store(dir: Option<&Path>) -> Result<Arc<dyn ExecutionStore>> {
    let store: Arc<dyn ExecutionStore> = match dir {
        Some(dir) => Arc::new(FileStore::open(dir)?),
        None => Arc::new(MemoryStore::new()),
    };
    Ok(store)
}

fn read_request(path: &Path) -> Result<ExecutionRequest> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read request {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("failed to parse request {}", path.display()))
}

fn build_coordinator(config: &RunnerConfig, store: Option<&Path>) -> Result<Coordinator> {
    let runtime = Arc::new(DockerCli::from_config(config));
    Ok(Coordinator::new(config.clone(), runtime, open_store(store)?)?)
}

fn exit_code_for(failed: bool) -> ExitCode {
    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn run_one(config: &RunnerConfig, store: Option<&Path>, request: &Path) -> Result<ExitCode> {
    let request = read_request(request)?;
    let coordinator = build_coordinator(config, store)?;

    let response = coordinator.execute_sync(&request, &CancelToken::new())?;
    coordinator.shutdown();

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(exit_code_for(response.status == ExecutionStatus::Failed))
}

fn run_batch(config: &RunnerConfig, store: Option<&Path>, paths: &[PathBuf]) -> Result<ExitCode> {
    let requests = paths
        .iter()
        .map(|p| read_request(p))
        .collect::<Result<Vec<_>>>()?;
    let coordinator = build_coordinator(config, store)?;

    let mut ids = Vec::with_capacity(requests.len());
    for request in &requests {
        // A full queue is backpressure, not a reason to drop part of the batch
        let submitted = loop {
            match coordinator.submit_async(request, CancelToken::new()) {
                Err(SandboxError::Saturated { .. }) => thread::sleep(RESUBMIT_BACKOFF),
                other => break other?,
            }
        };
        log::info!("Submitted {} ({})", submitted.execution_id, submitted.status);
        ids.push(submitted.execution_id);
    }

    let records = loop {
        let records = ids
            .iter()
            .map(|id| {
                coordinator
                    .poll(id)?
                    .ok_or_else(|| SandboxError::Store(format!("unknown record {}", id)))
            })
            .collect::<std::result::Result<Vec<ExecutionRecord>, SandboxError>>()?;
        if records.iter().all(|r| r.status.is_terminal()) {
            break records;
        }
        thread::sleep(POLL_INTERVAL);
    };
    coordinator.shutdown();

    println!("{}", serde_json::to_string_pretty(&records)?);
    let any_failed = records.iter().any(|r| r.status == ExecutionStatus::Failed);
    Ok(exit_code_for(any_failed))
}

fn show_status(store: Option<&Path>, id: &str) -> Result<ExitCode> {
    let dir = store.context("status needs --store pointing at a record directory")?;
    let store = FileStore::open(dir)?;
    let record = store
        .get(id)?
        .with_context(|| format!("no execution {} in {}", id, dir.display()))?;

    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(ExitCode::SUCCESS)
}

fn render(config: &RunnerConfig, request: &Path) -> Result<ExitCode> {
    let request = read_request(request)?;
    let validated = validate_request(&request, config.unknown_language)?;
    print!("{}", build_script(&validated)?.render());
    Ok(ExitCode::SUCCESS)
}

fn check(config: &RunnerConfig) -> Result<ExitCode> {
    let runtime = DockerCli::from_config(config);
    runtime.probe()?;
    println!("{} is reachable", runtime.name());
    Ok(ExitCode::SUCCESS)
}
