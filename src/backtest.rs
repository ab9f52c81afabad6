//! Backtesting engine
//!
//! Drives ranges -> entries -> trade tracking -> (optional) target ladder ->
//! result assembly over a whole bar table.
//!
//! With `parallel` set, instruments run on the rayon pool; ranges of one
//! instrument also run in parallel unless the ladder is enabled, in which case
//! they run in chronological order against that instrument's ladder state.
//! Sequential and parallel runs produce the same table.

use chrono::Duration;
use chrono_tz::Tz;
use indicatif::ProgressBar;
use itertools::Itertools;
use ordered_float::OrderedFloat;
use rayon::prelude::*;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::assembler::{CoverageKey, RawRow, ResultAssembler, ResultRow};
use crate::config::{Config, RunConfig};
use crate::data::BarTable;
use crate::entry::EntryResolver;
use crate::error::EngineError;
use crate::instruments::{InstrumentSpec, InstrumentTable};
use crate::ladder::{InstrumentLadder, LadderBook, LadderMove};
use crate::range::{RangeBuilder, SessionPlan};
use crate::tracker::{EntryFill, TrackerParams, TradeTracker, TradeWindow};
use crate::{Bar, SlotRange, Symbol, Timestamp, TradeExecution, TradeResult};

/// Backtest engine
pub struct Backtester {
    run: RunConfig,
    tz: Tz,
    plans: Vec<SessionPlan>,
    instruments: InstrumentTable,
    max_hold: Duration,
}

#[derive(Debug, Default)]
pub struct BacktestResult {
    pub rows: Vec<ResultRow>,
    /// Slot ranges formed across all instruments
    pub ranges: usize,
    /// Trades simulated (one per range per target)
    pub trades: usize,
    /// Final ladder target per instrument, when the ladder is enabled
    pub ladder_targets: BTreeMap<Symbol, f64>,
}

#[derive(Debug, Default)]
struct RangeOutcome {
    rows: Vec<RawRow>,
    coverage: Vec<CoverageKey>,
    peaks: Vec<f64>,
}

#[derive(Debug, Default)]
pub struct InstrumentOutcome {
    pub rows: Vec<RawRow>,
    pub coverage: Vec<CoverageKey>,
    pub ranges: usize,
    pub trades: usize,
}

struct Job<'a> {
    symbol: Symbol,
    spec: &'a InstrumentSpec,
    ladder: Option<InstrumentLadder>,
}

impl Backtester {
    pub fn new(config: &Config) -> Result<Self, EngineError> {
        Self::with_instruments(config.run.clone(), config.instrument_table()?)
    }

    pub fn with_instruments(
        run: RunConfig,
        instruments: InstrumentTable,
    ) -> Result<Self, EngineError> {
        run.validate()?;
        let tz = run.tz()?;
        let plans = run.session_plans()?;
        let max_hold = Duration::try_hours(run.max_hold_hours)
            .ok_or_else(|| EngineError::invalid("max_hold_hours", "out of range"))?;

        Ok(Backtester {
            run,
            tz,
            plans,
            instruments,
            max_hold,
        })
    }

    pub fn run_config(&self) -> &RunConfig {
        &self.run
    }

    /// Run on a bar table with fresh ladder state
    pub fn run(&self, table: &BarTable) -> Result<BacktestResult, EngineError> {
        let mut book = LadderBook::new(self.run.ladder);
        self.run_with_book(table, &mut book, None)
    }

    /// Run with a progress bar ticking once per instrument
    pub fn run_with_progress(
        &self,
        table: &BarTable,
        progress_bar: ProgressBar,
    ) -> Result<BacktestResult, EngineError> {
        let mut book = LadderBook::new(self.run.ladder);
        let result = self.run_with_book(table, &mut book, Some(&progress_bar));
        progress_bar.finish_and_clear();
        result
    }

    /// Run against caller-owned ladder state, continuing from whatever it holds
    pub fn run_with_book(
        &self,
        table: &BarTable,
        book: &mut LadderBook,
        progress: Option<&ProgressBar>,
    ) -> Result<BacktestResult, EngineError> {
        if book.policy() != self.run.ladder {
            return Err(EngineError::invalid(
                "ladder",
                format!(
                    "ladder book uses {:?} but the run is configured for {:?}",
                    book.policy(),
                    self.run.ladder
                ),
            ));
        }

        let selected = self.selected_instruments(table)?;
        let ladder_on = self.run.ladder.is_enabled();

        let mut jobs: Vec<Job> = selected
            .into_iter()
            .map(|(symbol, spec)| {
                let ladder = if ladder_on {
                    book.entry(&symbol, spec);
                    book.take(&symbol)
                } else {
                    None
                };
                Job {
                    symbol,
                    spec,
                    ladder,
                }
            })
            .collect();

        info!(
            "Running {} instruments ({}, ladder: {:?})",
            jobs.len(),
            if self.run.parallel { "parallel" } else { "sequential" },
            self.run.ladder
        );

        let outcomes: Vec<InstrumentOutcome> = if self.run.parallel {
            jobs.par_iter_mut()
                .map(|job| {
                    let outcome = self.run_job(table, job);
                    if let Some(pb) = progress {
                        pb.inc(1);
                    }
                    outcome
                })
                .collect()
        } else {
            jobs.iter_mut()
                .map(|job| {
                    let outcome = self.run_job(table, job);
                    if let Some(pb) = progress {
                        pb.inc(1);
                    }
                    outcome
                })
                .collect()
        };

        let mut ladder_targets = BTreeMap::new();
        for job in jobs {
            if let Some(ladder) = job.ladder {
                ladder_targets.insert(job.symbol.clone(), ladder.current_target());
                book.insert(job.symbol, ladder);
            }
        }

        let mut raw = Vec::new();
        let mut coverage = Vec::new();
        let (mut ranges, mut trades) = (0, 0);
        for outcome in outcomes {
            ranges += outcome.ranges;
            trades += outcome.trades;
            raw.extend(outcome.rows);
            coverage.extend(outcome.coverage);
        }

        let rows = ResultAssembler::assemble(raw, &coverage);
        info!(
            "Backtest complete: {} ranges, {} trades, {} rows",
            ranges,
            trades,
            rows.len()
        );

        Ok(BacktestResult {
            rows,
            ranges,
            trades,
            ladder_targets,
        })
    }

    fn run_job(&self, table: &BarTable, job: &mut Job) -> InstrumentOutcome {
        self.run_instrument(
            &job.symbol,
            job.spec,
            table.get(&job.symbol),
            job.ladder.as_mut(),
        )
    }

    /// Instruments to run, each with its metadata; unknown symbols fail the run
    fn selected_instruments(
        &self,
        table: &BarTable,
    ) -> Result<Vec<(Symbol, &InstrumentSpec)>, EngineError> {
        let symbols = if self.run.instruments.is_empty() {
            table.instruments()
        } else {
            self.run
                .symbols()
                .into_iter()
                .map(|s| Symbol::new(s.as_str().to_uppercase()))
                .unique()
                .filter(|s| {
                    let present = !table.get(s).is_empty();
                    if !present {
                        warn!("No bars for {}, skipping", s);
                    }
                    present
                })
                .collect()
        };

        symbols
            .into_iter()
            .map(|s| {
                let spec = self.instruments.get(s.as_str())?;
                Ok((s, spec))
            })
            .collect()
    }

    /// Simulate every range of one instrument
    pub fn run_instrument(
        &self,
        symbol: &Symbol,
        spec: &InstrumentSpec,
        bars: &[Bar],
        ladder: Option<&mut InstrumentLadder>,
    ) -> InstrumentOutcome {
        let builder = RangeBuilder::new(&self.plans, &self.run.weekdays, self.tz);
        let ranges = builder.build(symbol, bars);
        debug!("{}: {} ranges from {} bars", symbol, ranges.len(), bars.len());

        let per_range: Vec<RangeOutcome> = match ladder {
            Some(ladder) => ranges
                .iter()
                .map(|range| {
                    let target = ladder.current_target();
                    let outcome = self.process_range(spec, &builder, bars, range, &[target]);
                    for peak in &outcome.peaks {
                        match ladder.record_peak(*peak) {
                            LadderMove::Promote { from, to } | LadderMove::Demote { from, to } => {
                                debug!(
                                    "{} {} {}: target {} -> {}",
                                    symbol, range.date, range.end_label, from, to
                                )
                            }
                            LadderMove::Hold | LadderMove::Ignored => {}
                        }
                    }
                    outcome
                })
                .collect(),
            None => {
                let targets = self.fixed_targets(spec);
                if self.run.parallel {
                    ranges
                        .par_iter()
                        .map(|range| self.process_range(spec, &builder, bars, range, &targets))
                        .collect()
                } else {
                    ranges
                        .iter()
                        .map(|range| self.process_range(spec, &builder, bars, range, &targets))
                        .collect()
                }
            }
        };

        let mut outcome = InstrumentOutcome {
            ranges: ranges.len(),
            ..Default::default()
        };
        for r in per_range {
            outcome.trades += r.peaks.len();
            outcome.rows.extend(r.rows);
            outcome.coverage.extend(r.coverage);
        }

        info!(
            "{}: {} ranges, {} trades",
            symbol, outcome.ranges, outcome.trades
        );
        outcome
    }

    /// Distinct targets from the configured multipliers
    fn fixed_targets(&self, spec: &InstrumentSpec) -> Vec<f64> {
        self.run
            .target_multipliers
            .iter()
            .map(|m| spec.target_for_multiple(*m))
            .unique_by(|t| OrderedFloat(*t))
            .collect()
    }

    fn process_range(
        &self,
        spec: &InstrumentSpec,
        builder: &RangeBuilder,
        bars: &[Bar],
        range: &SlotRange,
        targets: &[f64],
    ) -> RangeOutcome {
        let next = builder.next_occurrence(range);

        // Entries are searched until the same slot comes round again
        let post_end = match next {
            Some(n) => bars.partition_point(|b| b.timestamp < n),
            None => bars.len(),
        };
        let post = &bars[range.post_start..post_end.max(range.post_start)];

        let resolver = EntryResolver::new(spec.tick_size, self.run.breakout_tie);
        let entry = resolver.resolve_range(range, post);

        let keys: Vec<CoverageKey> = targets
            .iter()
            .map(|target| CoverageKey {
                date: range.date,
                session: range.session,
                slot: range.end_label.clone(),
                slot_ts: Some(range.end_ts),
                instrument: range.instrument.clone(),
                tick: spec.tick_size,
                target: *target,
                range: range.range_size,
            })
            .collect();

        let mut outcome = RangeOutcome::default();
        if self.run.emit_placeholders {
            outcome.coverage = keys.clone();
        }

        match entry.trade() {
            Some((direction, price, time)) => {
                let window = self.trade_window(time, next);
                let fill = if entry.immediate_entry {
                    EntryFill::Immediate
                } else {
                    EntryFill::Breakout
                };
                for key in &keys {
                    let tracker = TradeTracker::new(TrackerParams {
                        tick: spec.tick_size,
                        target_points: key.target,
                        be_trigger_pct: self.run.be_trigger_pct,
                        same_bar: self.run.same_bar_priority,
                    });
                    let exec = tracker.track(
                        direction,
                        price,
                        time,
                        fill,
                        range.range_size,
                        bars,
                        window,
                    );
                    outcome.peaks.push(exec.peak);
                    outcome.rows.push(trade_row(key, &exec));
                }
            }
            None if range.post_start == bars.len() && self.run.emit_placeholders => {
                // Range formed at the end of the data; breakout not yet observable
                outcome.rows = keys
                    .iter()
                    .map(|k| RawRow::placeholder(k, TradeResult::Setup))
                    .collect();
            }
            None => {}
        }

        outcome
    }

    fn trade_window(&self, entry_time: Timestamp, next: Option<Timestamp>) -> TradeWindow {
        // Past the end of the representable range the hold limit no longer binds
        let hold_end = entry_time.checked_add_signed(self.max_hold);
        match (hold_end, next) {
            (Some(hold_end), Some(next)) => {
                let expiry = hold_end.min(next);
                TradeWindow {
                    expiry,
                    mfe_end: next.max(expiry),
                }
            }
            (None, Some(next)) => TradeWindow {
                expiry: next,
                mfe_end: next,
            },
            (Some(hold_end), None) => TradeWindow {
                expiry: hold_end,
                mfe_end: hold_end,
            },
            (None, None) => TradeWindow {
                expiry: entry_time,
                mfe_end: entry_time,
            },
        }
    }
}

fn trade_row(key: &CoverageKey, exec: &TradeExecution) -> RawRow {
    RawRow {
        direction: exec.direction,
        entry_time: Some(exec.entry_time),
        exit_time: Some(exec.exit_time),
        entry_price: Some(exec.entry_price),
        exit_price: Some(exec.exit_price),
        stop_loss: Some(exec.stop_points),
        peak: Some(exec.peak),
        profit: Some(exec.profit),
        ..RawRow::placeholder(key, exec.result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ladder::LadderPolicy;
    use crate::Direction;
    use chrono::{NaiveDate, TimeZone};
    use chrono_tz::America::Chicago;

    fn bar(date: NaiveDate, h: u32, m: u32, high: f64, low: f64, close: f64) -> Bar {
        let ts = Chicago
            .from_local_datetime(&date.and_hms_opt(h, m, 0).unwrap())
            .unwrap();
        Bar::new_unchecked(ts, close, high, low, close, Symbol::new("ES"))
    }

    fn single_slot_run() -> RunConfig {
        let mut run = RunConfig::default();
        run.sessions.truncate(1);
        run.sessions[0].slots = vec!["07:30".to_string()];
        run
    }

    fn backtester(run: RunConfig) -> Backtester {
        Backtester::with_instruments(run, InstrumentTable::builtin()).unwrap()
    }

    #[test]
    fn test_long_breakout_win() {
        let d = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        let table = BarTable::from_bars(vec![
            bar(d, 2, 0, 4501.0, 4495.0, 4500.0),
            bar(d, 7, 30, 4502.0, 4498.0, 4500.0),
            bar(d, 7, 31, 4502.5, 4499.0, 4502.25), // breaks 4502.25
            bar(d, 7, 40, 4512.5, 4502.0, 4512.0),  // target 4512.25
        ])
        .unwrap();

        let result = backtester(single_slot_run()).run(&table).unwrap();
        assert_eq!(result.ranges, 1);
        assert_eq!(result.trades, 1);
        let row = &result.rows[0];
        assert_eq!(row.direction, Direction::Long);
        assert_eq!(row.result, TradeResult::Win);
        assert_eq!(row.entry_price, Some(4502.25));
        assert_eq!(row.exit_price, Some(4512.25));
        assert_eq!(row.target, 10.0);
        assert_eq!(row.stop_loss, Some(7.0));
        assert_eq!(row.profit, Some(10.0));
        assert_eq!(row.stream, "ES1");
    }

    #[test]
    fn test_setup_row_at_end_of_data() {
        let d = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        let table = BarTable::from_bars(vec![
            bar(d, 2, 0, 4501.0, 4495.0, 4500.0),
            bar(d, 7, 30, 4502.0, 4498.0, 4500.0),
        ])
        .unwrap();

        let result = backtester(single_slot_run()).run(&table).unwrap();
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0].result, TradeResult::Setup);

        let mut quiet = single_slot_run();
        quiet.emit_placeholders = false;
        assert!(backtester(quiet).run(&table).unwrap().rows.is_empty());
    }

    #[test]
    fn test_no_trade_placeholder() {
        let d = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        let table = BarTable::from_bars(vec![
            bar(d, 2, 0, 4501.0, 4495.0, 4500.0),
            bar(d, 7, 30, 4502.0, 4498.0, 4500.0),
            bar(d, 7, 31, 4501.0, 4499.0, 4500.0),
        ])
        .unwrap();

        let result = backtester(single_slot_run()).run(&table).unwrap();
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0].result, TradeResult::NoTrade);
        assert_eq!(result.rows[0].direction, Direction::NoTrade);
        assert_eq!(result.trades, 0);
    }

    #[test]
    fn test_multiple_targets_one_row_each() {
        let d = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        let table = BarTable::from_bars(vec![
            bar(d, 2, 0, 4501.0, 4495.0, 4500.0),
            bar(d, 7, 30, 4502.0, 4498.0, 4500.0),
            bar(d, 7, 31, 4503.0, 4499.0, 4502.5),
            bar(d, 7, 32, 4512.5, 4503.0, 4512.0),
        ])
        .unwrap();

        let mut run = single_slot_run();
        run.target_multipliers = vec![1, 2, 2];
        let result = backtester(run).run(&table).unwrap();
        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.rows[0].target, 10.0);
        assert_eq!(result.rows[0].result, TradeResult::Win);
        assert_eq!(result.rows[1].target, 20.0);
        assert_eq!(result.rows[1].result, TradeResult::Time);
    }

    #[test]
    fn test_unknown_instrument_fails() {
        let d = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        let ts = Chicago.from_local_datetime(&d.and_hms_opt(7, 0, 0).unwrap()).unwrap();
        let table = BarTable::from_bars(vec![Bar::new_unchecked(
            ts,
            1.0,
            1.0,
            1.0,
            1.0,
            Symbol::new("ZZZ"),
        )])
        .unwrap();

        let err = backtester(single_slot_run()).run(&table).unwrap_err();
        assert!(matches!(err, EngineError::UnknownInstrument(s) if s == "ZZZ"));
    }

    #[test]
    fn test_ladder_book_survives_run() {
        let d = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        let table = BarTable::from_bars(vec![
            bar(d, 2, 0, 4501.0, 4495.0, 4500.0),
            bar(d, 7, 30, 4502.0, 4498.0, 4500.0),
            bar(d, 7, 31, 4503.0, 4499.0, 4502.5),
            bar(d, 7, 32, 4525.0, 4503.0, 4524.0),
        ])
        .unwrap();

        let mut run = single_slot_run();
        run.ladder = LadderPolicy::Streak;
        let bt = backtester(run);
        let mut book = LadderBook::new(LadderPolicy::Streak);
        bt.run_with_book(&table, &mut book, None).unwrap();

        let es = book.get(&Symbol::new("ES")).unwrap();
        assert_eq!(es.state.streak, 1);
        assert_eq!(es.current_target(), 10.0);
    }

    #[test]
    fn test_ladder_book_policy_must_match_run() {
        let d = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        let table = BarTable::from_bars(vec![
            bar(d, 2, 0, 4501.0, 4495.0, 4500.0),
            bar(d, 7, 30, 4502.0, 4498.0, 4500.0),
        ])
        .unwrap();

        let mut run = single_slot_run();
        run.ladder = LadderPolicy::Streak;
        let bt = backtester(run);

        let mut book = LadderBook::new(LadderPolicy::None);
        let err = bt.run_with_book(&table, &mut book, None).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidParameter { ref name, .. } if name == "ladder"
        ));

        let mut book = LadderBook::new(LadderPolicy::Rolling);
        assert!(bt.run_with_book(&table, &mut book, None).is_err());
    }

    #[test]
    fn test_max_hold_hours_limits() {
        let mut run = single_slot_run();
        run.max_hold_hours = 10_000_000_000;
        assert!(Backtester::with_instruments(run, InstrumentTable::builtin()).is_err());

        let d = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        let table = BarTable::from_bars(vec![
            bar(d, 2, 0, 4501.0, 4495.0, 4500.0),
            bar(d, 7, 30, 4502.0, 4498.0, 4500.0),
            bar(d, 7, 31, 4503.0, 4499.0, 4502.5),
            bar(d, 7, 40, 4505.0, 4501.0, 4504.0),
        ])
        .unwrap();

        let mut run = single_slot_run();
        run.max_hold_hours = crate::config::MAX_HOLD_HOURS_LIMIT;
        let result = backtester(run).run(&table).unwrap();
        assert_eq!(result.rows[0].result, TradeResult::Time);
        assert_eq!(result.rows[0].profit, Some(1.75));
    }

    #[test]
    fn test_breakout_bar_counts_toward_target() {
        let d = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        let table = BarTable::from_bars(vec![
            bar(d, 2, 0, 4501.0, 4495.0, 4500.0),
            bar(d, 7, 30, 4502.0, 4498.0, 4500.0),
            bar(d, 7, 31, 4515.0, 4500.0, 4514.0),
            bar(d, 7, 32, 4514.0, 4490.0, 4491.0),
        ])
        .unwrap();

        let result = backtester(single_slot_run()).run(&table).unwrap();
        let row = &result.rows[0];
        assert_eq!(row.result, TradeResult::Win);
        assert_eq!(row.exit_time, "04/03/24 07:31");
        assert_eq!(row.peak, Some(12.75));
        assert_eq!(row.profit, Some(10.0));
    }
}
