//! Backtest command implementation

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use slot_breakout::backtest::Backtester;
use slot_breakout::data::{self, BarSource, CsvBarSource};
use slot_breakout::summary::{render_stream_table, summarize_streams, MonthlyProfitMatrix};
use slot_breakout::Config;
use std::path::PathBuf;
use tracing::{debug, info};

pub fn run(
    config_path: String,
    data_override: Option<String>,
    instruments_override: Option<String>,
    start_override: Option<String>,
    end_override: Option<String>,
    output_override: Option<String>,
    parallel: bool,
) -> Result<()> {
    info!("Starting backtest");

    // Load configuration
    let mut config = Config::from_file(&config_path)?;
    info!("Loaded configuration from: {}", config_path);

    // Apply overrides
    if let Some(data_file) = data_override {
        info!("Overriding data file to: {}", data_file);
        config.backtest.data_file = data_file;
    }

    if let Some(instruments) = instruments_override {
        info!("Overriding instruments to: {}", instruments);
        config.run.instruments = instruments
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
    }

    if parallel {
        config.run.parallel = true;
    }

    let tz = config.run.tz()?;
    let start = start_override
        .as_deref()
        .map(|s| data::parse_date(s, tz))
        .transpose()?;
    let end = end_override
        .as_deref()
        .map(|s| data::parse_end_date(s, tz))
        .transpose()?;

    // Load data
    info!("Loading data from: {}", config.backtest.data_file);
    let symbols = config.run.symbols();
    debug!("Instruments: {:?}", symbols);

    let source = CsvBarSource::new(&config.backtest.data_file, tz);
    let table = source.fetch_bars(&symbols, start, end)?;
    if table.is_empty() {
        anyhow::bail!("No bars loaded from {}", config.backtest.data_file);
    }

    let backtester = Backtester::new(&config)?;

    let pb = ProgressBar::new(table.instruments().len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{percent:>3}%|{bar:40}| {pos}/{len} instruments [{elapsed}]")
            .context("Invalid progress bar template")?
            .progress_chars("█░ "),
    );

    info!("Running backtest...");
    let result = backtester.run_with_progress(&table, pb)?;

    let output = match output_override {
        Some(path) => PathBuf::from(path),
        None => PathBuf::from(&config.backtest.results_dir).join(format!(
            "results_{}.csv",
            chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
        )),
    };
    let saved = data::write_results_csv(&result.rows, &output)?;

    // Print results
    println!("\n{}", "=".repeat(100));
    println!("BACKTEST RESULTS");
    println!("{}", "=".repeat(100));
    println!("Bars:               {}", table.len());
    println!("Ranges:             {}", result.ranges);
    println!("Trades:             {}", result.trades);
    println!("Rows:               {}", result.rows.len());
    println!("Ladder:             {:?}", config.run.ladder);
    println!("Output:             {}", saved.display());
    println!("{}", "=".repeat(100));
    print!("{}", render_stream_table(&summarize_streams(&result.rows)));

    if !result.ladder_targets.is_empty() {
        println!("\nFinal ladder targets:");
        for (symbol, target) in &result.ladder_targets {
            println!("  {:<6} {}", symbol, target);
        }
    }

    for matrix in MonthlyProfitMatrix::per_stream(&result.rows) {
        print!("{}", matrix.render());
    }

    info!("Backtest completed successfully");

    Ok(())
}
