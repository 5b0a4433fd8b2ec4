//! CLI binary for running the survey ETL pipeline.

use std::io::Write;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use survey_etl_pipeline::{EtlConfig, PipelineEvent, PipelineExecutor, PipelineResult, Stage};

#[derive(Parser)]
#[command(
    name = "survey-etl",
    version,
    about = "Bronze/silver/gold ETL for survey responses"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file
    #[arg(short, long, global = true, env = "SURVEY_ETL_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(flatten)]
    overrides: Overrides,
}

/// Settings that take precedence over the configuration file.
#[derive(Args)]
struct Overrides {
    /// Survey API key (sent as `x-api-key`)
    #[arg(long, global = true, env = "SURVEY_ETL_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Survey whose responses are collected
    #[arg(long, global = true, env = "SURVEY_ETL_SURVEY_ID")]
    survey_id: Option<String>,

    /// Responses endpoint URL
    #[arg(long, global = true, env = "SURVEY_ETL_ENDPOINT")]
    endpoint: Option<String>,

    /// Directory holding the stage artifacts
    #[arg(long, global = true)]
    artifact_dir: Option<PathBuf>,

    /// Keep bronze/silver/gold in memory only
    #[arg(long, global = true)]
    no_persist: bool,

    /// Retries per failed stage
    #[arg(long, global = true)]
    retries: Option<usize>,

    /// Seconds to wait before retrying a failed stage
    #[arg(long, global = true)]
    retry_delay_secs: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every stage: collect, clean, analyze, export
    Run,

    /// Run one stage against the artifacts on disk
    Stage {
        /// One of: collect, clean, analyze, export
        stage: Stage,
    },

    /// Print the effective configuration (API key masked)
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup tracing; RUST_LOG wins over --verbose
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    let config = load_config(cli.config.as_deref(), cli.overrides)?;

    match cli.command {
        Commands::Run => {
            let executor = PipelineExecutor::from_config(config)?;
            let result = run_with_progress(executor, &Stage::SEQUENCE, std::io::stdout()).await?;
            print_summary(&result);
        }
        Commands::Stage { stage } => {
            if matches!(stage, Stage::Start | Stage::End) {
                anyhow::bail!("'{stage}' is a boundary marker, not a runnable stage");
            }
            let executor = PipelineExecutor::from_config(config)?;
            let result = run_with_progress(executor, &[stage], std::io::stdout()).await?;
            print_summary(&result);
        }
        Commands::Config => {
            print!("{}", config.redacted().to_toml_string()?);
        }
    }

    Ok(())
}

/// Run `stages`, writing progress lines to `out` until every event has been shown.
async fn run_with_progress<W: Write + Send + 'static>(
    executor: PipelineExecutor,
    stages: &[Stage],
    out: W,
) -> anyhow::Result<PipelineResult> {
    let progress = report_progress(&executor, out);
    let result = executor.run_stages(stages).await;
    // Closing the emitter ends the printer once it has drained the channel.
    drop(executor);
    progress.await?;
    Ok(result?)
}

fn load_config(
    path: Option<&std::path::Path>,
    overrides: Overrides,
) -> anyhow::Result<EtlConfig> {
    let mut config = match path {
        Some(p) => EtlConfig::load(p)?,
        None => EtlConfig::default(),
    };

    if let Some(key) = overrides.api_key {
        config.api.api_key = key;
    }
    if let Some(id) = overrides.survey_id {
        config.api.survey_id = id;
    }
    if let Some(endpoint) = overrides.endpoint {
        config.api.endpoint = endpoint;
    }
    if let Some(dir) = overrides.artifact_dir {
        config.artifacts.dir = dir;
    }
    if overrides.no_persist {
        config.artifacts.persist = false;
    }
    if let Some(retries) = overrides.retries {
        config.retry.max_retries = retries;
    }
    if let Some(delay) = overrides.retry_delay_secs {
        config.retry.delay_secs = delay;
    }
    Ok(config)
}

/// Write one line per stage transition while the run is in progress.
fn report_progress<W: Write + Send + 'static>(
    executor: &PipelineExecutor,
    mut out: W,
) -> JoinHandle<()> {
    let mut rx = executor.events().subscribe();
    tokio::spawn(async move {
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Progress output fell behind");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            let line = match event {
                PipelineEvent::StageStarted { stage } => format!("[{stage}] started"),
                PipelineEvent::StageCompleted {
                    stage,
                    status,
                    duration_ms,
                } => format!("[{stage}] {status} ({duration_ms} ms)"),
                PipelineEvent::StageRetrying {
                    stage,
                    attempt,
                    delay_ms,
                } => format!("[{stage}] retry {attempt} in {delay_ms} ms"),
                PipelineEvent::StageFailed { stage, error } => format!("[{stage}] failed: {error}"),
                _ => continue,
            };
            if writeln!(out, "{line}").and_then(|()| out.flush()).is_err() {
                break;
            }
        }
    })
}

fn print_summary(result: &PipelineResult) {
    println!("\nRun {} completed", result.run_id);
    for stage in &result.completed_stages {
        if let Some(outcome) = result.stage_outcomes.get(stage) {
            println!("  {:<8} {:<16} {}", stage, outcome.status.as_str(), outcome.notes);
        }
    }
    let elapsed = result.finished_at - result.started_at;
    println!("Elapsed: {} ms", elapsed.num_milliseconds());
}
