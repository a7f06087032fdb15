mod artifacts;
mod config;
mod engine;
mod error;
mod evaluator;
mod executor;
mod script;
mod workspace;


use anyhow::{Context, Result};
use astra_common::catalog::{JsonCatalog, TestbenchCatalog};
use astra_common::types::{JobSpec, Language, RunnerResult};
use clap::{Parser, Subcommand};
use config::RunnerConfig;
use executor::Runner;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "astra-worker")]
#[command(about = "Astra runner - build and simulate HDL submissions in a sandbox", long_about = None)]
struct Cli {
    /// Runner configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Testbench catalog file (JSON)
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single submission from source files
    Run {
        /// HDL language (verilog, vhdl)
        #[arg(short, long)]
        language: Language,

        /// Student design source file
        #[arg(short, long)]
        student: PathBuf,

        /// Testbench source file (otherwise looked up in the catalog)
        #[arg(short, long)]
        testbench: Option<PathBuf>,

        /// Problem identifier used for catalog lookup
        #[arg(short, long, default_value = "adhoc")]
        problem_id: String,

        /// Submission identifier (defaults to a fresh UUID)
        #[arg(long)]
        submission_id: Option<String>,

        /// Wall-clock limit in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Run a JSON job description from a file, or `-` for stdin
    Job {
        path: String,
    },

    /// Verify the sandbox backend is usable
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout is reserved for the JSON result
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .init();

    let Cli {
        config: config_path,
        catalog: catalog_path,
        command,
    } = Cli::parse();

    let config = RunnerConfig::load_or_default(config_path.as_deref())
        .and_then(RunnerConfig::apply_env)
        .map_err(|e| {
            error!("Failed to load runner configuration: {}", e);
            e
        })?;

    info!(
        backend = ?config.backend,
        image = %config.image,
        storage = %config.storage_root.display(),
        "Astra worker configured"
    );

    let job = match command {
        Commands::Run {
            language,
            student,
            testbench,
            problem_id,
            submission_id,
            timeout_ms,
        } => {
            let student_code = tokio::fs::read_to_string(&student)
                .await
                .with_context(|| format!("Failed to read student source {}", student.display()))?;
            let testbench = match testbench {
                Some(path) => Some(
                    tokio::fs::read_to_string(&path)
                        .await
                        .with_context(|| format!("Failed to read testbench {}", path.display()))?,
                ),
                None => None,
            };

            JobSpec {
                submission_id: submission_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
                problem_id,
                language,
                student_code,
                testbench,
                timeout_ms,
            }
        }
        Commands::Job { path } => read_job(&path).await?,
        Commands::Check => {
            let sandbox = engine::create_sandbox(&config)?;
            sandbox.check().await?;
            info!(backend = sandbox.name(), "Sandbox backend ready");
            return Ok(());
        }
    };

    let result = execute_job(config, catalog_path.as_deref(), &job).await;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn build_runner(config: RunnerConfig, catalog_path: Option<&Path>) -> Result<Runner> {
    let catalog = load_catalog(catalog_path)?;
    let sandbox = engine::create_sandbox(&config)?;
    Ok(Runner::new(config, sandbox, catalog))
}

/// Run `job`, reporting an unusable sandbox or catalog as a runtime_error result
async fn execute_job(config: RunnerConfig, catalog_path: Option<&Path>, job: &JobSpec) -> RunnerResult {
    match build_runner(config, catalog_path) {
        Ok(runner) => runner.run_job(job).await,
        Err(e) => {
            error!(job_id = %job.submission_id, error = %e, "Runner setup failed");
            RunnerResult::runtime_error(&job.submission_id, format!("{:#}", e))
        }
    }
}

fn load_catalog(path: Option<&Path>) -> Result<Arc<dyn TestbenchCatalog>> {
    let catalog = match path {
        Some(path) => {
            let catalog = JsonCatalog::load(path)?;
            if catalog.is_empty() {
                warn!(path = %path.display(), "Testbench catalog has no records");
            } else {
                info!(records = catalog.len(), "Loaded testbench catalog");
            }
            catalog
        }
        None => JsonCatalog::default(),
    };
    Ok(Arc::new(catalog))
}

async fn read_job(path: &str) -> Result<JobSpec> {
    let raw = if path == "-" {
        let mut buf = String::new();
        tokio::io::stdin()
            .read_to_string(&mut buf)
            .await
            .context("Failed to read job from stdin")?;
        buf
    } else {
        tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read job file {}", path))?
    };

    serde_json::from_str(&raw).context("Invalid job description")
}
