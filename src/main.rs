//! Slot breakout - main entry point
//!
//! This binary provides three subcommands:
//! - backtest: Simulate slot range breakouts over a bar file and write results
//! - summary: Print stream statistics for a saved result table
//! - instruments: List instrument tick sizes, targets and ladder rungs

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "slot-breakout")]
#[command(about = "Slot range breakout simulation over minute bars", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the breakout simulation
    Backtest {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/default.json")]
        config: String,

        /// Bar CSV file (overrides config file)
        #[arg(short, long)]
        data: Option<String>,

        /// Instruments to run (comma-separated). E.g., "ES,NQ"
        #[arg(short, long)]
        instruments: Option<String>,

        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD, inclusive)
        #[arg(long)]
        end: Option<String>,

        /// Output CSV path (default: results dir with timestamped name)
        #[arg(short, long)]
        output: Option<String>,

        /// Run instruments in parallel
        #[arg(long)]
        parallel: bool,
    },

    /// Summarize a saved result table
    Summary {
        /// Result CSV written by `backtest`
        results: String,

        /// Only this stream, e.g. "ES1"
        #[arg(short, long)]
        stream: Option<String>,
    },

    /// List instrument metadata
    Instruments {
        /// Configuration file with instrument overrides
        #[arg(short, long)]
        config: Option<String>,
    },
}

fn setup_logging(verbose: bool, command_name: &str, file_only: bool) -> Result<()> {
    std::fs::create_dir_all("logs")?;

    // {command}_{date}.log
    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = PathBuf::from("logs").join(&log_filename);

    let level = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let file_appender = tracing_appender::rolling::never("logs", &log_filename);

    if file_only {
        // Keep the console clean for printed tables
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .init();
    } else {
        let console_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(true);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();

        info!("Logging initialized");
        info!("Log file: {}", log_path.display());
    }

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let (command_name, file_only) = match &cli.command {
        Commands::Backtest { .. } => ("backtest", false),
        Commands::Summary { .. } => ("summary", true),
        Commands::Instruments { .. } => ("instruments", true),
    };

    setup_logging(cli.verbose, command_name, file_only)?;

    match cli.command {
        Commands::Backtest {
            config,
            data,
            instruments,
            start,
            end,
            output,
            parallel,
        } => commands::backtest::run(config, data, instruments, start, end, output, parallel),

        Commands::Summary { results, stream } => commands::summary::run(results, stream),

        Commands::Instruments { config } => commands::instruments::run(config),
    }
}
