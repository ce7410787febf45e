//! Roundtable service entry point

use clap::{Parser, Subcommand};
use roundtable::api;
use roundtable::config::{RoundtableConfig, StoreBackend};
use roundtable::llm::{LlmProvider, ModelCaller, OpenAiProvider};
use roundtable::observability::{init_default_logging, init_logging, LogFormat, PipelineMetrics};
use roundtable::pipeline::{PipelineEngine, PipelineHost, StepExecutor};
use roundtable::retry::RetryPolicy;
use roundtable::store::{FileRunStore, InMemoryRunStore, RunStore};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn, Level};

/// Multi-stage idea evaluation service
#[derive(Parser)]
#[command(name = "roundtable")]
#[command(about = "Run ideas past a five-stage model panel")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(
        short,
        long,
        value_name = "FILE",
        env = "ROUNDTABLE_CONFIG",
        default_value = "roundtable.toml"
    )]
    config: PathBuf,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API and resume unfinished runs
    Serve,
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Evaluate one idea in-process and print the final run document
    Evaluate {
        /// Idea text, 10 to 5000 characters
        idea: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.verbose {
        0 => init_default_logging(),
        1 => init_logging(Level::DEBUG, LogFormat::Compact, false),
        _ => init_logging(Level::TRACE, LogFormat::Compact, true),
    }

    info!("Starting roundtable v{}", env!("CARGO_PKG_VERSION"));

    let config = match RoundtableConfig::load_from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!(path = %cli.config.display(), "Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Serve => serve(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
        Commands::Evaluate { idea } => evaluate(config, idea).await,
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Shutdown complete");
}

/// Wire provider, store, executor and engine from configuration
async fn build_host(config: &RoundtableConfig) -> Result<PipelineHost, Box<dyn std::error::Error>> {
    let api_key = config.get_llm_api_key()?;
    let provider = OpenAiProvider::new(config.provider_config(api_key))?;
    info!(
        provider = %config.llm.provider,
        model = %config.llm.model,
        "LLM provider configured"
    );
    if let Err(e) = provider.health_check().await {
        warn!(error = %e, "LLM provider health check failed");
    }

    let store: Arc<dyn RunStore> = match config.store.backend {
        StoreBackend::Memory => Arc::new(InMemoryRunStore::new()),
        StoreBackend::File => {
            let path = config
                .store
                .path
                .clone()
                .ok_or("file store backend requires store.path")?;
            info!(path = %path.display(), "using file run store");
            Arc::new(FileRunStore::open(path).await?)
        }
    };

    let metrics = Arc::new(PipelineMetrics::new());
    let executor = StepExecutor::new(
        ModelCaller::new(Arc::new(provider), config.llm.model.clone()),
        RetryPolicy::from(&config.retry),
        Arc::clone(&metrics),
    );
    let engine = PipelineEngine::new(executor, store, metrics);

    Ok(PipelineHost::new(Arc::new(engine), config.store.run_ttl_secs))
}

async fn serve(config: RoundtableConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = config.listen_addr()?;
    let host = build_host(&config).await?;

    let resumed = host.resume_unfinished().await?;
    if !resumed.is_empty() {
        info!(count = resumed.len(), "unfinished runs resumed");
    }

    api::serve(addr, host, shutdown_signal()).await?;
    Ok(())
}

async fn evaluate(config: RoundtableConfig, idea: String) -> Result<(), Box<dyn std::error::Error>> {
    let host = build_host(&config).await?;
    let (run, handle) = host.submit(idea, None).await?;
    info!(run_id = %run.id, "evaluating idea");

    if let Err(e) = handle.await? {
        error!(run_id = %run.id, "evaluation failed: {}", e);
    }

    let finished = host
        .engine()
        .store()
        .read(&run.id)
        .await?
        .ok_or("run disappeared from the store")?;
    println!("{}", serde_json::to_string_pretty(&finished)?);
    Ok(())
}

fn handle_config_command(
    config: &RoundtableConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let (mut sigint, mut sigterm) = match (
        signal::unix::signal(signal::unix::SignalKind::interrupt()),
        signal::unix::signal(signal::unix::SignalKind::terminate()),
    ) {
        (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
        _ => {
            error!("Failed to install signal handlers, falling back to ctrl-c");
            let _ = signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully..."),
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully..."),
    }
}
