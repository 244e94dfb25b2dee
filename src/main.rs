//! Strategy tuner - main entry point
//!
//! This binary provides three subcommands:
//! - optimize: Bayesian search on recent history, validation, persistence
//! - validate: Re-run persisted parameters on a later window
//! - trade: Evaluate the persisted strategy on the latest candles

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use strategy_tuner::objective::ObjectiveMetric;
use strategy_tuner::strategies::StrategyVariant;
use strategy_tuner::Side;

mod commands;

#[derive(Parser, Debug)]
#[command(name = "strategy-tuner")]
#[command(about = "Bayesian parameter tuning with out-of-sample validation", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a JSON configuration file (env vars and flags override it)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Optimize strategy parameters, validate them and save the result
    Optimize {
        /// Strategy: larry_williams, macd or macd_crossover
        #[arg(short, long, default_value = "larry_williams")]
        strategy: StrategyVariant,

        /// Days of history to search
        #[arg(long)]
        days: Option<u32>,

        /// Number of optimizer iterations
        #[arg(long)]
        n_iter: Option<usize>,

        /// Days held out for validation
        #[arg(long)]
        validation_days: Option<u32>,

        /// Seed for a reproducible search
        #[arg(long)]
        seed: Option<u64>,

        /// Candidates evaluated in parallel per round
        #[arg(long)]
        batch_size: Option<usize>,

        /// Metric to maximise (sharpe, return, calmar, win_rate, profit_factor)
        #[arg(long)]
        metric: Option<ObjectiveMetric>,

        /// Read candles from a CSV file instead of Bybit
        #[arg(long)]
        candles: Option<PathBuf>,

        /// Output artifact path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate persisted parameters on the window after their in-sample period
    Validate {
        /// Days of data after the in-sample window
        #[arg(long)]
        validation_days: Option<u32>,

        /// Read candles from a CSV file instead of Bybit
        #[arg(long)]
        candles: Option<PathBuf>,

        /// Artifact to validate
        #[arg(short, long)]
        params: Option<PathBuf>,
    },

    /// Evaluate the persisted strategy on the latest candles
    Trade {
        /// Artifact to load
        #[arg(short, long)]
        params: Option<PathBuf>,

        /// Read candles from a CSV file instead of Bybit
        #[arg(long)]
        candles: Option<PathBuf>,

        /// Current position (long or short); flat when omitted
        #[arg(long)]
        position: Option<Side>,
    },
}

fn setup_logging(verbose: bool, command_name: &str, file_only: bool) -> Result<()> {
    std::fs::create_dir_all("logs")?;

    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = PathBuf::from("logs").join(&log_filename);

    // Set log level - filter out noisy external crates
    let level = if verbose { "debug" } else { "info" };
    let filter_str = format!(
        "{},hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn,h2=warn",
        level
    );
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    fn make_file_layer<S>(log_filename: &str) -> impl tracing_subscriber::Layer<S>
    where
        S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    {
        let file_appender = tracing_appender::rolling::never("logs", log_filename);
        tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(false)
    }

    if file_only {
        // Optimizer: console is reserved for the progress bar
        tracing_subscriber::registry()
            .with(env_filter)
            .with(make_file_layer(&log_filename))
            .init();
    } else {
        let console_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(make_file_layer(&log_filename))
            .init();

        info!("Log file: {}", log_path.display());
    }

    Ok(())
}

/// Flag raised by Ctrl-C
fn install_cancel_handler() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let handler_flag = flag.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing the current round");
            eprintln!("\nInterrupt received, stopping after the current round...");
            handler_flag.store(true, Ordering::SeqCst);
        }
    });
    flag
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let (command_name, file_only) = match &cli.command {
        Commands::Optimize { .. } => ("optimize", true),
        Commands::Validate { .. } => ("validate", false),
        Commands::Trade { .. } => ("trade", false),
    };
    setup_logging(cli.verbose, command_name, file_only)?;

    let config = strategy_tuner::Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Optimize {
            strategy,
            days,
            n_iter,
            validation_days,
            seed,
            batch_size,
            metric,
            candles,
            output,
        } => {
            let args = commands::optimize::OptimizeArgs {
                strategy,
                days,
                n_iter,
                validation_days,
                seed,
                batch_size,
                metric,
                candles,
                output,
            };
            commands::optimize::run(config, args, install_cancel_handler()).await
        }

        Commands::Validate {
            validation_days,
            candles,
            params,
        } => commands::validate::run(config, validation_days, candles, params).await,

        Commands::Trade {
            params,
            candles,
            position,
        } => commands::trade::run(config, params, candles, position).await,
    }
}
