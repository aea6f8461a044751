mod config;

use crate::config::{CommonConfig, Config, ConfigError};
use aggregator::errors::BffError;
use clap::{Parser, Subcommand};
use metrics_exporter_statsd::StatsdBuilder;
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const MIN_WORKER_THREADS: usize = 4;
const METRICS_PREFIX: &str = "bff";

#[derive(Parser)]
#[command(name = "bff", about = "Aggregates posts, authors and comments from an upstream API")]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Run the service
    Serve {
        #[arg(long, short, default_value = "config.yaml")]
        config: PathBuf,
    },
    /// Load and validate a config file, then exit
    ValidateConfig {
        #[arg(long, short)]
        config: PathBuf,
    },
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("could not start runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error("could not set up metrics: {0}")]
    Metrics(String),
    #[error(transparent)]
    Service(#[from] BffError),
}

fn main() -> Result<(), CliError> {
    let cli = Cli::parse();

    match cli.command {
        CliCommand::ValidateConfig { config } => {
            Config::from_file(&config)?;
            println!("{} is valid", config.display());
            Ok(())
        }
        CliCommand::Serve { config } => serve(Config::from_file(&config)?),
    }
}

fn serve(config: Config) -> Result<(), CliError> {
    // Held for the lifetime of the process so queued events are flushed on exit
    let _sentry = init_sentry(&config.common);
    init_logging();
    init_metrics(&config.common)?;

    let workers = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .max(MIN_WORKER_THREADS);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(workers)
        .thread_name("bff-worker")
        .enable_all()
        .build()?;

    tracing::info!(workers, "Starting bff");
    let handle = runtime.handle().clone();
    runtime.block_on(aggregator::run(config.bff, handle))?;
    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry::integrations::tracing::layer())
        .init();
}

fn init_sentry(common: &CommonConfig) -> Option<sentry::ClientInitGuard> {
    let logging = common.logging.as_ref()?;
    let dsn = logging.sentry_dsn.as_deref().filter(|d| !d.is_empty())?;

    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: logging.environment.clone().map(Into::into),
            ..Default::default()
        },
    )))
}

fn init_metrics(common: &CommonConfig) -> Result<(), CliError> {
    let Some(metrics_config) = &common.metrics else {
        return Ok(());
    };

    let recorder = StatsdBuilder::from(metrics_config.statsd_host.as_str(), metrics_config.statsd_port)
        .build(Some(METRICS_PREFIX))
        .map_err(|e| CliError::Metrics(e.to_string()))?;
    metrics::set_global_recorder(recorder).map_err(|e| CliError::Metrics(e.to_string()))?;

    tracing::info!(
        host = %metrics_config.statsd_host,
        port = metrics_config.statsd_port,
        "Reporting metrics to statsd"
    );
    Ok(())
}
