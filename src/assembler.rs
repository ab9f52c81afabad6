//! Result table assembly
//!
//! Turns raw per-range rows into the canonical output table: slot labels are
//! normalized, duplicates collapse to the best-ranked row, prices and points
//! are rounded to the instrument tick, and every covered range without a row
//! gets a NoTrade placeholder. Output order is fully determined by the row
//! keys, so assembling the same rows in any order gives the same table.

use chrono::{NaiveDate, Timelike};
use ordered_float::OrderedFloat;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

use crate::precision::round_to_tick;
use crate::range::{format_slot, parse_slot_label, slot_minutes};
use crate::{Direction, Session, Symbol, Timestamp, TradeResult};

/// Output time format for entry/exit columns
pub const TIME_FORMAT: &str = "%d/%m/%y %H:%M";

pub fn format_time(ts: Option<Timestamp>) -> String {
    ts.map(|t| t.format(TIME_FORMAT).to_string())
        .unwrap_or_default()
}

/// Row as produced by the pipeline, before canonicalization
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub date: NaiveDate,
    /// Slot label as produced; may be `H:MM` or `HH:MM:SS`
    pub slot: String,
    /// Slot end timestamp, used when the label is unusable
    pub slot_ts: Option<Timestamp>,
    pub session: Session,
    pub instrument: Symbol,
    pub tick: Decimal,
    pub target: f64,
    pub range: f64,
    pub direction: Direction,
    pub result: TradeResult,
    pub entry_time: Option<Timestamp>,
    pub exit_time: Option<Timestamp>,
    pub entry_price: Option<f64>,
    pub exit_price: Option<f64>,
    /// Stop distance in points
    pub stop_loss: Option<f64>,
    pub peak: Option<f64>,
    pub profit: Option<f64>,
}

impl RawRow {
    /// Row with no trade fields, for NoTrade and Setup outcomes
    pub fn placeholder(key: &CoverageKey, result: TradeResult) -> Self {
        Self {
            date: key.date,
            slot: key.slot.clone(),
            slot_ts: key.slot_ts,
            session: key.session,
            instrument: key.instrument.clone(),
            tick: key.tick,
            target: key.target,
            range: key.range,
            direction: Direction::NoTrade,
            result,
            entry_time: None,
            exit_time: None,
            entry_price: None,
            exit_price: None,
            stop_loss: None,
            peak: None,
            profit: None,
        }
    }
}

/// A (range, target) pair expected to appear in the output
#[derive(Debug, Clone, PartialEq)]
pub struct CoverageKey {
    pub date: NaiveDate,
    pub session: Session,
    pub slot: String,
    pub slot_ts: Option<Timestamp>,
    pub instrument: Symbol,
    pub tick: Decimal,
    pub target: f64,
    pub range: f64,
}

/// One line of the output table, columns in output order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResultRow {
    pub date: NaiveDate,
    pub time: String,
    pub entry_time: String,
    pub exit_time: String,
    pub entry_price: Option<f64>,
    pub exit_price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub target: f64,
    pub peak: Option<f64>,
    pub direction: Direction,
    pub result: TradeResult,
    pub range: f64,
    pub stream: String,
    pub instrument: Symbol,
    pub session: Session,
    pub profit: Option<f64>,
}

impl ResultRow {
    /// Month bucket `YYYY-MM` used by the summaries
    pub fn month(&self) -> String {
        self.date.format("%Y-%m").to_string()
    }
}

type RowKey = (NaiveDate, u32, Session, Symbol, OrderedFloat<f64>, Direction);
type RangeKey = (NaiveDate, u32, Session, Symbol, OrderedFloat<f64>);

struct Keyed {
    label: String,
    minutes: u32,
}

fn resolve_slot(slot: &str, slot_ts: Option<Timestamp>) -> Option<Keyed> {
    let time = parse_slot_label(slot).or_else(|| {
        slot_ts.and_then(|ts| ts.time().with_second(0)).and_then(|t| t.with_nanosecond(0))
    })?;
    Some(Keyed {
        label: format_slot(time),
        minutes: slot_minutes(time),
    })
}

/// Preference order among rows sharing a key: higher rank, higher peak, then
/// earliest entry and exit, lower entry and exit prices, higher profit,
/// tighter stop, smaller range and label order. Total over the row fields, so
/// the winner does not depend on input order.
fn preference(row: &RawRow) -> impl Ord + '_ {
    let high = |v: Option<f64>| OrderedFloat(v.unwrap_or(f64::NEG_INFINITY));
    let low = |v: Option<f64>| Reverse(OrderedFloat(v.unwrap_or(f64::INFINITY)));
    (
        row.result.rank(),
        high(row.peak),
        Reverse(row.entry_time),
        Reverse(row.exit_time),
        low(row.entry_price),
        low(row.exit_price),
        high(row.profit),
        low(row.stop_loss),
        Reverse(OrderedFloat(row.range)),
        Reverse(row.slot.as_str()),
    )
}

fn outranks(candidate: &RawRow, current: &RawRow) -> bool {
    preference(candidate) > preference(current)
}

pub struct ResultAssembler;

impl ResultAssembler {
    /// Canonicalize raw rows and fill coverage gaps with NoTrade rows
    pub fn assemble(raw: Vec<RawRow>, coverage: &[CoverageKey]) -> Vec<ResultRow> {
        let mut best: BTreeMap<RowKey, (String, RawRow)> = BTreeMap::new();

        for row in raw {
            let Some(slot) = resolve_slot(&row.slot, row.slot_ts) else {
                warn!(
                    "Dropping {} {} row with invalid slot label '{}'",
                    row.instrument, row.date, row.slot
                );
                continue;
            };
            let target = round_to_tick(row.target, row.tick);
            let key = (
                row.date,
                slot.minutes,
                row.session,
                row.instrument.clone(),
                OrderedFloat(target),
                row.direction,
            );

            let replace = best
                .get(&key)
                .map_or(true, |(_, existing)| outranks(&row, existing));
            if replace {
                best.insert(key, (slot.label, row));
            }
        }

        let covered: BTreeSet<RangeKey> = best
            .keys()
            .map(|(d, m, s, i, t, _)| (*d, *m, *s, i.clone(), *t))
            .collect();

        for cov in coverage {
            let Some(slot) = resolve_slot(&cov.slot, cov.slot_ts) else {
                warn!("Skipping coverage key with invalid slot label '{}'", cov.slot);
                continue;
            };
            let target = OrderedFloat(round_to_tick(cov.target, cov.tick));
            let range_key = (
                cov.date,
                slot.minutes,
                cov.session,
                cov.instrument.clone(),
                target,
            );
            if covered.contains(&range_key) {
                continue;
            }
            let key = (
                cov.date,
                slot.minutes,
                cov.session,
                cov.instrument.clone(),
                target,
                Direction::NoTrade,
            );
            best.entry(key)
                .or_insert_with(|| {
                    (slot.label, RawRow::placeholder(cov, TradeResult::NoTrade))
                });
        }

        best.into_values()
            .map(|(label, row)| Self::finish(label, row))
            .collect()
    }

    fn finish(label: String, row: RawRow) -> ResultRow {
        let tick = row.tick;
        let round = |v: Option<f64>| v.map(|x| round_to_tick(x, tick));

        ResultRow {
            date: row.date,
            time: label,
            entry_time: format_time(row.entry_time),
            exit_time: format_time(row.exit_time),
            entry_price: round(row.entry_price),
            exit_price: round(row.exit_price),
            stop_loss: round(row.stop_loss),
            target: round_to_tick(row.target, tick),
            peak: round(row.peak),
            direction: row.direction,
            result: row.result,
            range: round_to_tick(row.range, tick),
            stream: row.session.stream(&row.instrument),
            instrument: row.instrument,
            session: row.session,
            profit: round(row.profit),
        }
    }
}
