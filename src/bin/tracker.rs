//! Binary entry point for the deposit tracker daemon.

use clap::{Parser, Subcommand};
use deposit_tracker::config::{LogFormat, Settings};
use deposit_tracker::coordinator::{check_all, Coordinator};
use deposit_tracker::error::Error;
use deposit_tracker::storage::postgres::PostgresStorage;

/// Multi-chain deposit tracker.
#[derive(Debug, Parser)]
#[command(name = "tracker", version)]
struct Cli {
    /// Path to a TOML configuration file. Overridden by `TRACKER_*`
    /// environment variables.
    #[arg(long, env = "TRACKER_CONFIG")]
    config: Option<String>,

    /// Override the configured log output format.
    #[arg(long, value_enum)]
    log_format: Option<CliLogFormat>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum CliLogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Probe every configured chain's RPC endpoint and exit. Intended for
    /// container health/readiness probes.
    Check,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(format) = cli.log_format {
        settings.log_format = match format {
            CliLogFormat::Pretty => LogFormat::Pretty,
            CliLogFormat::Json => LogFormat::Json,
        };
    }
    init_tracing(settings.log_format);

    match cli.command {
        Some(Command::Check) => run_check(&settings).await,
        None => run_daemon(settings).await,
    }
}

fn init_tracing(format: LogFormat) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(env_filter);
    match format {
        LogFormat::Pretty => subscriber.init(),
        LogFormat::Json => subscriber.json().init(),
    }
}

async fn run_check(settings: &Settings) -> Result<(), Error> {
    let results = check_all(settings).await;
    let mut any_failed = false;
    for (target, result) in results {
        match result {
            Ok(status) => println!("{target}: ok, block {}", status.block_number),
            Err(error) => {
                any_failed = true;
                eprintln!("{target}: FAILED, {error}");
            }
        }
    }
    if any_failed {
        std::process::exit(1);
    }
    Ok(())
}

async fn run_daemon(settings: Settings) -> Result<(), Error> {
    let storage = PostgresStorage::connect(&settings.database_url).await?;

    if settings.metrics_enabled {
        let addr: std::net::SocketAddr = "0.0.0.0:9000".parse().expect("hardcoded address is valid");
        deposit_tracker::metrics::install_recorder(addr)?;
    }

    let mut coordinator = Coordinator::new(settings, storage);
    coordinator.start().await;

    tokio::signal::ctrl_c().await?;
    tracing::info!("received ctrl-c, shutting down");
    coordinator.stop().await;

    Ok(())
}
