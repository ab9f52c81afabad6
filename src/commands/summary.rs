//! Summary command: statistics over a saved result table

use anyhow::Result;
use slot_breakout::data;
use slot_breakout::summary::{render_stream_table, summarize_streams, MonthlyProfitMatrix};
use tracing::info;

pub fn run(results_path: String, stream: Option<String>) -> Result<()> {
    let mut rows = data::load_results_csv(&results_path)?;
    info!("Loaded {} rows from {}", rows.len(), results_path);

    if let Some(stream) = stream {
        let stream = stream.to_uppercase();
        rows.retain(|r| r.stream == stream);
        if rows.is_empty() {
            anyhow::bail!("No rows for stream {}", stream);
        }
    }

    println!("\n{}", "=".repeat(100));
    println!("STREAM SUMMARY: {}", results_path);
    println!("{}", "=".repeat(100));
    print!("{}", render_stream_table(&summarize_streams(&rows)));

    for matrix in MonthlyProfitMatrix::per_stream(&rows) {
        print!("{}", matrix.render());
    }

    Ok(())
}
