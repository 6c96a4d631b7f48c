//! Resync CLI - drive the recovery engine from a terminal.
//!
//! `watch` runs the engine against a real probe endpoint and logs every
//! transition until Ctrl-C. `backoff` prints the reconnect delay schedule a
//! configuration produces, and `config` prints the effective configuration.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use resync_core::BackoffStrategy;
use std::path::PathBuf;
use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "resync")]
#[command(about = "Network recovery and request replay engine")]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// JSON configuration file (missing fields take their defaults)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the engine and log connectivity changes until Ctrl-C
    Watch {
        /// Endpoint probed for connectivity and link quality
        #[arg(long)]
        probe_url: Option<String>,

        /// Queue a request for replay, written as "METHOD URL" (repeatable)
        #[arg(short, long = "request", value_name = "METHOD URL")]
        requests: Vec<String>,

        /// Print a status snapshot every N seconds (0 disables)
        #[arg(long, default_value = "30")]
        status_every: u64,
    },

    /// Print the reconnect delay schedule
    Backoff {
        /// Number of attempts to print
        #[arg(short, long, default_value = "8")]
        attempts: u32,

        #[arg(long, value_enum)]
        strategy: Option<StrategyArg>,

        /// Attempts before the delay is pinned to the maximum
        #[arg(long)]
        max_retries: Option<u32>,

        #[arg(long)]
        initial_ms: Option<u64>,

        #[arg(long)]
        max_ms: Option<u64>,

        #[arg(long)]
        multiplier: Option<f64>,
    },

    /// Print the effective configuration as JSON
    Config,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum StrategyArg {
    Exponential,
    Immediate,
    Linear,
}

impl From<StrategyArg> for BackoffStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Exponential => BackoffStrategy::Exponential,
            StrategyArg::Immediate => BackoffStrategy::Immediate,
            StrategyArg::Linear => BackoffStrategy::Linear,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging; stdout is reserved for command output
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let config = commands::load_config(args.config.as_deref())?;
    debug!("Effective configuration: {:?}", config);

    match args.command {
        Command::Watch {
            probe_url,
            requests,
            status_every,
        } => commands::watch(config, probe_url, &requests, status_every).await,
        Command::Backoff {
            attempts,
            strategy,
            max_retries,
            initial_ms,
            max_ms,
            multiplier,
        } => {
            let overrides = commands::BackoffOverrides {
                strategy: strategy.map(Into::into),
                max_retries,
                initial_ms,
                max_ms,
                multiplier,
            };
            commands::backoff(&config, &overrides, attempts)
        }
        Command::Config => commands::show_config(&config),
    }
}
