//! Trade lifecycle tracking
//!
//! A trade moves `Open -> BeArmed -> Closed`, one bar at a time over the bars
//! after the entry timestamp. A breakout entry also reads the bar that
//! triggered it: its favorable side counts toward peak and target, and its
//! adverse side only matters when the same bar also reaches the target.
//! - exits (stop, target) are checked up to the expiry timestamp; a trade
//!   still open at expiry closes as TIME at the last in-horizon close
//! - reaching `be_trigger_pct` of the target moves the stop to entry from the
//!   next bar on; a later stop-out is BE instead of Loss
//! - peak (MFE) keeps being measured until `mfe_end`, after the exit too

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::precision::round_to_tick;
use crate::{Bar, Direction, Timestamp, TradeExecution, TradeResult};

/// Stop distance never exceeds this multiple of the target
pub const MAX_STOP_TARGET_MULTIPLE: f64 = 3.0;

/// Exit chosen when a single bar spans both stop and target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SameBarPriority {
    #[default]
    StopFirst,
    TpFirst,
}

#[derive(Debug, Clone)]
pub struct TrackerParams {
    pub tick: Decimal,
    pub target_points: f64,
    pub be_trigger_pct: f64,
    pub same_bar: SameBarPriority,
}

/// How the entry was filled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryFill {
    /// At the range end from the freeze close; no bar traded through the level yet
    Immediate,
    /// Intrabar, on the bar stamped with the entry time
    Breakout,
}

/// Time bounds for one trade
#[derive(Debug, Clone, Copy)]
pub struct TradeWindow {
    /// Last timestamp at which exits are evaluated
    pub expiry: Timestamp,
    /// Last timestamp counted toward peak
    pub mfe_end: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TradeState {
    Open,
    BeArmed,
    Closed,
}

struct Exit {
    price: f64,
    time: Timestamp,
    result: TradeResult,
}

pub struct TradeTracker {
    params: TrackerParams,
}

impl TradeTracker {
    pub fn new(params: TrackerParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &TrackerParams {
        &self.params
    }

    /// min(range, 3 x target), tick-rounded, never below one tick
    pub fn stop_distance(&self, range_size: f64) -> f64 {
        let tick = self.params.tick.to_f64().unwrap_or(0.0);
        let raw = range_size.min(MAX_STOP_TARGET_MULTIPLE * self.params.target_points);
        round_to_tick(raw, self.params.tick).max(tick)
    }

    /// Simulate one trade. `bars` must be time-ordered; only bars from the
    /// entry bar (breakout) or after `entry_time` (immediate) up to
    /// `window.mfe_end` are read.
    #[allow(clippy::too_many_arguments)]
    pub fn track(
        &self,
        direction: Direction,
        entry_price: f64,
        entry_time: Timestamp,
        fill: EntryFill,
        range_size: f64,
        bars: &[Bar],
        window: TradeWindow,
    ) -> TradeExecution {
        let p = &self.params;
        let sign = direction.sign();
        let target_points = round_to_tick(p.target_points, p.tick);
        let stop_points = self.stop_distance(range_size);

        let target_level = entry_price + sign * target_points;
        let mut stop_level = entry_price - sign * stop_points;
        let be_trigger = p.be_trigger_pct * target_points;

        let mut state = TradeState::Open;
        let mut exit: Option<Exit> = None;
        let mut last_in_horizon: Option<&Bar> = None;
        let mut excursion = 0.0_f64;
        let mut peak = 0.0_f64;

        let start = match fill {
            EntryFill::Immediate => bars.partition_point(|b| b.timestamp <= entry_time),
            EntryFill::Breakout => bars.partition_point(|b| b.timestamp < entry_time),
        };
        let end = bars.partition_point(|b| b.timestamp <= window.mfe_end);
        let walk = if start < end { &bars[start..end] } else { &[][..] };

        for bar in walk {
            let favorable = match direction {
                Direction::Short => entry_price - bar.low,
                _ => bar.high - entry_price,
            };

            if state != TradeState::Closed && bar.timestamp > window.expiry {
                exit = Some(time_exit(entry_price, entry_time, last_in_horizon));
                state = TradeState::Closed;
            }

            if state != TradeState::Closed {
                last_in_horizon = Some(bar);

                let (mut stop_hit, target_hit) = match direction {
                    Direction::Short => (bar.high >= stop_level, bar.low <= target_level),
                    _ => (bar.low <= stop_level, bar.high >= target_level),
                };
                // The entry bar's adverse extreme may predate the fill
                if bar.timestamp == entry_time && !target_hit {
                    stop_hit = false;
                }
                let stop_result = if state == TradeState::BeArmed {
                    TradeResult::BreakEven
                } else {
                    TradeResult::Loss
                };

                let hit = match (stop_hit, target_hit, p.same_bar) {
                    (true, true, SameBarPriority::TpFirst) | (false, true, _) => {
                        Some((target_level, TradeResult::Win))
                    }
                    (true, _, _) => Some((stop_level, stop_result)),
                    (false, false, _) => None,
                };

                if let Some((price, result)) = hit {
                    exit = Some(Exit {
                        price,
                        time: bar.timestamp,
                        result,
                    });
                    state = TradeState::Closed;
                } else {
                    excursion = excursion.max(favorable);
                    if state == TradeState::Open && excursion >= be_trigger {
                        stop_level = entry_price;
                        state = TradeState::BeArmed;
                    }
                }
            }

            peak = peak.max(favorable);
        }

        let exit = match exit {
            Some(exit) => exit,
            None => time_exit(entry_price, entry_time, last_in_horizon),
        };

        let profit = match exit.result {
            TradeResult::Win => target_points,
            TradeResult::Loss => -stop_points,
            TradeResult::BreakEven => 0.0,
            _ => round_to_tick(sign * (exit.price - entry_price), p.tick),
        };

        let t1_triggered = stop_level == entry_price;

        TradeExecution {
            direction,
            entry_price,
            entry_time,
            exit_price: round_to_tick(exit.price, p.tick),
            exit_time: exit.time,
            result: exit.result,
            peak: round_to_tick(peak, p.tick),
            t1_triggered,
            target_hit: exit.result == TradeResult::Win,
            target_points,
            stop_points,
            profit,
        }
    }
}

fn time_exit(entry_price: f64, entry_time: Timestamp, last: Option<&Bar>) -> Exit {
    match last {
        Some(bar) => Exit {
            price: bar.close,
            time: bar.timestamp,
            result: TradeResult::Time,
        },
        None => Exit {
            price: entry_price,
            time: entry_time,
            result: TradeResult::Time,
        },
    }
}
