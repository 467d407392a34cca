use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use lifted_core::{JobId, LogSink, ProviderRegistry, UploadRequest};
use lifted_engine::{EngineConfig, ProcessExecutor, UploadQueue};
use lifted_store::JobStore;
use tokio::io::AsyncWriteExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "lifted_worker=info,lifted_engine=info,lifted_core=info";

#[derive(Debug, Parser)]
#[command(name = "lifted-worker", about = "Image upload queue daemon")]
struct Cli {
    /// Upload queue directory.
    #[arg(long, global = true, env = "LIFTED_QUEUE_DIR")]
    queue_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Recover abandoned uploads and dispatch queued ones until Ctrl-C.
    Serve,
    /// Run a single upload and stream its log to stdout.
    #[command(name = "run-job")]
    RunJob { id: JobId },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(matches!(cli.command, Command::RunJob { .. }));

    let mut config = EngineConfig::from_env()?;
    if let Some(dir) = cli.queue_dir {
        config.queue_dir = dir;
    }

    match cli.command {
        Command::Serve => serve(config).await,
        Command::RunJob { id } => {
            if let Err(e) = run_job(&config, id).await {
                // The parent reads the last stderr line as the failure reason.
                eprintln!("{}", format!("{e:#}").replace('\n', " "));
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

/// Child mode keeps stdout for the job log, so diagnostics go to stderr.
fn init_tracing(child: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());

    if child {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(false),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn serve(config: EngineConfig) -> anyhow::Result<()> {
    let registry = ProviderRegistry::discover(&config.provider_options()).with_context(|| {
        format!("Failed to read providers from {}", config.providers_dir.display())
    })?;
    tracing::info!(providers = ?registry.names(), "Providers loaded");

    let store = JobStore::open(&config.queue_dir)
        .with_context(|| format!("Failed to open queue at {}", config.queue_dir.display()))?;
    let program = std::env::current_exe().context("Failed to locate the worker binary")?;
    let executor = Arc::new(ProcessExecutor::new(program, &config.queue_dir));

    let queue = UploadQueue::new(
        store,
        registry,
        executor,
        config.max_concurrent_uploads,
        config.poll_interval,
    );
    let engine = queue.start()?;
    tracing::info!(queue_dir = %config.queue_dir.display(), "Upload queue running");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Shutting down");
    engine.shutdown().await;
    Ok(())
}

async fn run_job(config: &EngineConfig, id: JobId) -> anyhow::Result<()> {
    let store = JobStore::open(&config.queue_dir)?;
    let record = store.get(id)?;
    let registry = ProviderRegistry::discover(&config.provider_options())?;
    let task = registry.get(record.provider())?;
    let request = UploadRequest::from_record(&record)?;

    let (sink, mut lines) = LogSink::channel(id);
    let printer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = lines.recv().await {
            let written = async {
                stdout.write_all(line.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await
            };
            if written.await.is_err() {
                break;
            }
        }
    });

    let result = task.run(&request, &sink).await;
    drop(sink);
    let _ = printer.await;
    Ok(result?)
}
