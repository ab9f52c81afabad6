//! Integration tests for the slot breakout engine
//!
//! These tests drive the full pipeline (ranges, entries, tracking, ladder,
//! assembly) over generated minute bars and through the CSV edges.

use chrono::{Duration, NaiveDate, TimeZone, Weekday};
use chrono_tz::America::Chicago;
use rust_decimal_macros::dec;

use slot_breakout::backtest::Backtester;
use slot_breakout::config::{RunConfig, SessionConfig};
use slot_breakout::data::{self, BarSource, BarTable, CsvBarSource};
use slot_breakout::entry::{BreakoutTie, EntryResolver};
use slot_breakout::instruments::InstrumentTable;
use slot_breakout::ladder::LadderPolicy;
use slot_breakout::precision::is_tick_multiple;
use slot_breakout::range::RangeBuilder;
use slot_breakout::summary::summarize_streams;
use slot_breakout::{Bar, Config, Direction, Session, Symbol, TradeResult};

// =============================================================================
// Test Utilities
// =============================================================================

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
}

fn mock_bar(symbol: &str, date: NaiveDate, h: u32, m: u32, high: f64, low: f64, close: f64) -> Bar {
    let ts = Chicago
        .from_local_datetime(&date.and_hms_opt(h, m, 0).unwrap())
        .unwrap();
    Bar::new(ts, close, high, low, close, Symbol::new(symbol)).unwrap()
}

/// Range 4498-4502 from 08:00 to 09:30, so breakout levels are 4502.25/4497.75
fn range_bars(date: NaiveDate) -> Vec<Bar> {
    vec![
        mock_bar("ES", date, 8, 0, 4502.0, 4498.0, 4500.0),
        mock_bar("ES", date, 9, 30, 4502.0, 4498.0, 4500.0),
    ]
}

/// Long breakout at 09:31 followed by a run of `run_up` points above entry
fn long_run_day(date: NaiveDate, run_up: f64) -> Vec<Bar> {
    let mut bars = range_bars(date);
    bars.push(mock_bar("ES", date, 9, 31, 4503.0, 4499.0, 4502.5));
    let high = 4502.25 + run_up;
    bars.push(mock_bar("ES", date, 9, 35, high, 4502.0, high - 0.25));
    bars
}

/// Single S2 09:30 slot
fn single_slot_run() -> RunConfig {
    RunConfig {
        sessions: vec![SessionConfig {
            id: Session::S2,
            start: "08:00".to_string(),
            slots: vec!["09:30".to_string()],
        }],
        ..RunConfig::default()
    }
}

fn backtester(run: RunConfig) -> Backtester {
    Backtester::with_instruments(run, InstrumentTable::builtin()).unwrap()
}

/// Deterministic oscillating 5-minute bars for several instruments and weekdays
fn generate_wave_table(symbols: &[(&str, f64, f64)], days: &[NaiveDate]) -> BarTable {
    let mut bars = Vec::new();
    for (sym, base, amplitude) in symbols {
        for (d_idx, date) in days.iter().enumerate() {
            let start = Chicago
                .from_local_datetime(&date.and_hms_opt(2, 0, 0).unwrap())
                .unwrap();
            let mut prev = *base;
            for i in 0..160 {
                let t = (i as f64) * 0.11 + d_idx as f64;
                let raw = base + amplitude * t.sin() + (i as f64) * amplitude * 0.002;
                let close = (raw * 4.0).round() / 4.0;
                let open = prev;
                let high = open.max(close) + amplitude * 0.05;
                let low = open.min(close) - amplitude * 0.05;
                let ts = start + Duration::minutes(5 * i);
                bars.push(Bar::new(ts, open, high, low, close, Symbol::new(*sym)).unwrap());
                prev = close;
            }
        }
    }
    BarTable::from_bars(bars).unwrap()
}

// =============================================================================
// Pipeline Outcome Tests
// =============================================================================

#[test]
fn test_pipeline_classifies_each_outcome() {
    let mut bars = Vec::new();

    // Mon: long, target reached
    bars.extend(long_run_day(day(4), 10.25));

    // Tue: short, stop 4 points away is hit
    bars.extend(range_bars(day(5)));
    bars.push(mock_bar("ES", day(5), 9, 31, 4501.0, 4497.5, 4497.75));
    bars.push(mock_bar("ES", day(5), 9, 35, 4502.0, 4497.0, 4501.0));

    // Wed: long, +6.75 arms break-even, then back to entry
    bars.extend(range_bars(day(6)));
    bars.push(mock_bar("ES", day(6), 9, 31, 4503.0, 4499.0, 4502.5));
    bars.push(mock_bar("ES", day(6), 9, 35, 4509.0, 4501.0, 4508.0));
    bars.push(mock_bar("ES", day(6), 9, 40, 4505.0, 4502.0, 4502.5));

    // Thu: long, drifts until the data ends
    bars.extend(range_bars(day(7)));
    bars.push(mock_bar("ES", day(7), 9, 31, 4503.0, 4499.0, 4502.5));
    bars.push(mock_bar("ES", day(7), 9, 35, 4505.0, 4501.0, 4504.0));

    let table = BarTable::from_bars(bars).unwrap();
    let result = backtester(single_slot_run()).run(&table).unwrap();

    let outcomes: Vec<(Direction, TradeResult, Option<f64>)> = result
        .rows
        .iter()
        .map(|r| (r.direction, r.result, r.profit))
        .collect();
    assert_eq!(
        outcomes,
        vec![
            (Direction::Long, TradeResult::Win, Some(10.0)),
            (Direction::Short, TradeResult::Loss, Some(-4.0)),
            (Direction::Long, TradeResult::BreakEven, Some(0.0)),
            (Direction::Long, TradeResult::Time, Some(1.75)),
        ]
    );

    let loss = &result.rows[1];
    assert_eq!(loss.entry_price, Some(4497.75));
    assert_eq!(loss.exit_price, Some(4501.75));
    assert_eq!(loss.stop_loss, Some(4.0));
    assert_eq!(loss.entry_time, "05/03/24 09:31");
    assert_eq!(loss.exit_time, "05/03/24 09:35");
    assert_eq!(loss.stream, "ES2");

    for row in &result.rows {
        let values = [row.profit, row.peak, row.stop_loss, Some(row.target)];
        for value in values.into_iter().flatten() {
            assert!(is_tick_multiple(value, dec!(0.25)), "{} not on tick", value);
        }
    }
}

#[test]
fn test_pipeline_emits_no_trade_and_setup_rows() {
    let mut bars = Vec::new();

    // Mon: range forms, price stays inside
    bars.extend(range_bars(day(4)));
    bars.push(mock_bar("ES", day(4), 9, 45, 4501.0, 4499.0, 4500.0));

    // Tue: data ends on the slot boundary
    bars.extend(range_bars(day(5)));

    let table = BarTable::from_bars(bars).unwrap();
    let result = backtester(single_slot_run()).run(&table).unwrap();

    assert_eq!(result.rows.len(), 2);
    assert_eq!(result.rows[0].result, TradeResult::NoTrade);
    assert_eq!(result.rows[1].result, TradeResult::Setup);
    assert!(result.rows.iter().all(|r| r.direction == Direction::NoTrade));
    assert!(result.rows.iter().all(|r| r.range == 4.0));
}

#[test]
fn test_weekend_ranges_skipped() {
    let mut bars = long_run_day(day(9), 12.0); // Saturday
    bars.extend(long_run_day(day(11), 12.0)); // Monday
    let table = BarTable::from_bars(bars).unwrap();

    let result = backtester(single_slot_run()).run(&table).unwrap();
    assert_eq!(result.ranges, 1);
    assert_eq!(result.rows[0].date, day(11));

    let mut run = single_slot_run();
    run.weekdays.push(Weekday::Sat);
    let result = backtester(run).run(&table).unwrap();
    assert_eq!(result.ranges, 2);
}

// =============================================================================
// Target Ladder Tests
// =============================================================================

#[test]
fn test_streak_ladder_through_pipeline() {
    let mut bars = Vec::new();
    for (d, run_up) in [(4, 22.75), (5, 22.75), (6, 22.75), (7, 22.75), (8, 12.0)] {
        bars.extend(long_run_day(day(d), run_up));
    }
    let table = BarTable::from_bars(bars).unwrap();

    let mut run = single_slot_run();
    run.ladder = LadderPolicy::Streak;
    let result = backtester(run).run(&table).unwrap();

    let targets: Vec<f64> = result.rows.iter().map(|r| r.target).collect();
    assert_eq!(targets, vec![10.0, 10.0, 10.0, 20.0, 20.0]);

    // Day 4 wins at the promoted target; day 5 falls short and demotes
    assert_eq!(result.rows[3].profit, Some(20.0));
    assert_eq!(result.rows[4].result, TradeResult::Time);
    assert_eq!(result.ladder_targets.get(&Symbol::new("ES")), Some(&10.0));
}

#[test]
fn test_ladder_ignores_small_peaks() {
    let mut bars = Vec::new();
    for d in 4..=8 {
        bars.extend(long_run_day(day(d), 9.25));
    }
    let table = BarTable::from_bars(bars).unwrap();

    let mut run = single_slot_run();
    run.ladder = LadderPolicy::Rolling;
    let result = backtester(run).run(&table).unwrap();

    assert!(result.rows.iter().all(|r| r.target == 10.0));
    assert_eq!(result.ladder_targets.get(&Symbol::new("ES")), Some(&10.0));
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_parallel_matches_sequential() {
    let days: Vec<NaiveDate> = (4..=8).map(day).collect();
    let table = generate_wave_table(&[("ES", 4500.0, 6.0), ("NQ", 18000.0, 30.0)], &days);

    for ladder in [LadderPolicy::None, LadderPolicy::Streak, LadderPolicy::Rolling] {
        let mut run = RunConfig {
            ladder,
            target_multipliers: vec![1, 2],
            ..RunConfig::default()
        };
        let sequential = backtester(run.clone()).run(&table).unwrap();
        run.parallel = true;
        let parallel = backtester(run).run(&table).unwrap();

        assert!(!sequential.rows.is_empty());
        assert_eq!(sequential.rows, parallel.rows, "ladder {:?}", ladder);
        assert_eq!(sequential.ladder_targets, parallel.ladder_targets);
    }
}

#[test]
fn test_entries_never_precede_range_end() {
    let days: Vec<NaiveDate> = (4..=8).map(day).collect();
    let table = generate_wave_table(&[("ES", 4500.0, 6.0)], &days);
    let run = RunConfig::default();
    let plans = run.session_plans().unwrap();
    let builder = RangeBuilder::new(&plans, &run.weekdays, Chicago);
    let resolver = EntryResolver::new(dec!(0.25), BreakoutTie::PreferLong);

    let symbol = Symbol::new("ES");
    let bars = table.get(&symbol);
    let ranges = builder.build(&symbol, bars);
    assert_eq!(ranges.len(), 5 * 7);

    for range in &ranges {
        let entry = resolver.resolve_range(range, &bars[range.post_start..]);
        if let Some(time) = entry.entry_time {
            assert!(time >= range.end_ts);
        }
    }
}

// =============================================================================
// I/O Tests
// =============================================================================

#[test]
fn test_csv_in_results_out() {
    let dir = tempfile::tempdir().unwrap();
    let bars_path = dir.path().join("bars.csv");

    let mut csv = String::from("timestamp,open,high,low,close,instrument\n");
    for bar in long_run_day(day(4), 10.25) {
        csv.push_str(&format!(
            "{},{},{},{},{},{}\n",
            bar.timestamp.format("%Y-%m-%d %H:%M:%S"),
            bar.open,
            bar.high,
            bar.low,
            bar.close,
            bar.instrument
        ));
    }
    std::fs::write(&bars_path, csv).unwrap();

    let source = CsvBarSource::new(&bars_path, Chicago);
    let table = source.fetch_bars(&[], None, None).unwrap();
    assert_eq!(table.len(), 4);

    let result = backtester(single_slot_run()).run(&table).unwrap();
    let out_path = dir.path().join("out").join("results.csv");
    data::write_results_csv(&result.rows, &out_path).unwrap();

    let text = std::fs::read_to_string(&out_path).unwrap();
    assert!(text.starts_with(
        "Date,Time,EntryTime,ExitTime,EntryPrice,ExitPrice,StopLoss,Target,Peak,Direction,Result,Range,Stream,Instrument,Session,Profit"
    ));

    let reloaded = data::load_results_csv(&out_path).unwrap();
    assert_eq!(reloaded, result.rows);

    let summaries = summarize_streams(&reloaded);
    assert_eq!(summaries[0].stream, "ES2");
    assert_eq!(summaries[0].wins, 1);
}

#[test]
fn test_config_file_with_overrides() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(
        &path,
        r#"{
            "run": { "instruments": ["ES"], "ladder": "streak", "target_multipliers": [1] },
            "instruments": [{ "symbol": "XYZ", "tick_size": "0.5", "base_target": 4.0, "max_target": 12.0 }]
        }"#,
    )
    .unwrap();

    let config = Config::from_file(&path).unwrap();
    assert_eq!(config.run.ladder, LadderPolicy::Streak);
    let table = config.instrument_table().unwrap();
    assert_eq!(table.get("xyz").unwrap().ladder_rungs(), vec![4.0, 8.0, 12.0]);
    assert!(Backtester::new(&config).is_ok());

    let bad_start = r#"{ "run": { "sessions": [{ "id": "S1", "start": "2am", "slots": [] }] } }"#;
    std::fs::write(&path, bad_start).unwrap();
    assert!(Config::from_file(&path).is_err());
}
