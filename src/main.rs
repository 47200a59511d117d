//! pickup-dl daemon entrypoint

use clap::{Parser, ValueEnum};
use pickup_dl::{Config, shutdown_on_signal, start};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Folder-driven media download daemon
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a JSON configuration file; environment variables override it
    #[arg(short, long, env = "PICKUP_DL_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging (including external tool output)
    #[arg(short, long)]
    verbose: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, env = "LOG_FORMAT")]
    log_format: LogFormat,

    /// Run a single poll iteration and exit
    #[arg(long)]
    once: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn init_tracing(verbose: bool, format: LogFormat) {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(fmt::layer().with_target(true))
            .with(env_filter)
            .init(),
    }
}

fn load_config(args: &Args) -> pickup_dl::Result<Config> {
    let config = match &args.config {
        Some(path) => {
            let mut config = Config::load(path)?;
            config.apply_overrides(|key| std::env::var(key).ok())?;
            config
        }
        None => Config::from_env()?,
    };
    config.validate()?;
    Ok(config)
}

async fn run(args: Args) -> pickup_dl::Result<ExitCode> {
    let config = load_config(&args)?;

    tracing::info!(
        downloader_dir = %config.dirs.downloader_dir.display(),
        landing_dir = %config.dirs.landing_dir.display(),
        interval_secs = config.poll.interval.as_secs(),
        max_attempts = config.retry.max_attempts,
        notifications = config.notifications.enabled,
        "pickup-dl starting"
    );

    let mut poll = start(config).await?;

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_on_signal(cancel.clone()));

    if args.once {
        let summary = poll.run_once(&cancel).await?;
        return Ok(if summary.failed > 0 {
            ExitCode::FAILURE
        } else {
            ExitCode::SUCCESS
        });
    }

    poll.run(&cancel).await?;
    Ok(ExitCode::SUCCESS)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_tracing(args.verbose, args.log_format);

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, error_code = e.error_code(), "pickup-dl stopped");
            ExitCode::FAILURE
        }
    }
}
