//! Instruments command: list tick sizes, targets and ladder rungs

use anyhow::Result;
use slot_breakout::instruments::InstrumentTable;
use slot_breakout::ladder::TargetLadder;
use slot_breakout::Config;
use tracing::info;

pub fn run(config_path: Option<String>) -> Result<()> {
    let table = match config_path {
        Some(path) => {
            let config = Config::from_file(&path)?;
            info!("Loaded instrument overrides from: {}", path);
            config.instrument_table()?
        }
        None => InstrumentTable::builtin(),
    };

    println!("\n{}", "=".repeat(70));
    println!(
        "{:<8} {:>8} {:>10} {:>10} {:>10}  Rungs",
        "Symbol", "Tick", "Base", "Max", "Ignore<"
    );
    println!("{}", "-".repeat(70));
    for spec in table.iter() {
        let ladder = TargetLadder::from_spec(spec);
        println!(
            "{:<8} {:>8} {:>10} {:>10} {:>10}  {:?}",
            spec.symbol,
            spec.tick_size,
            spec.base_target,
            spec.max_target,
            ladder.ignore_below(),
            ladder.rungs()
        );
    }
    println!("{}", "=".repeat(70));

    Ok(())
}
