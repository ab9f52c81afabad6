//! Breakout entry resolution
//!
//! Decision order for one slot range:
//! 1. Immediate entry when the freeze close already sits beyond a breakout level.
//! 2. Dual-immediate tie: the level closer to the freeze close wins, Long on
//!    an exact tie.
//! 3. Otherwise the first post-range bar whose high/low reaches a level; the
//!    earlier timestamp wins, and a same-timestamp tie follows [`BreakoutTie`].
//! 4. No breakout, or no post-range bars, gives NoTrade.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::precision::{exact_distance, round_to_tick};
use crate::{Bar, Direction, EntryResult, SlotRange, Timestamp};

/// Resolution when long and short breakouts trigger on the same timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakoutTie {
    /// First match after a stable sort; long is checked first
    #[default]
    PreferLong,
    PreferShort,
}

impl BreakoutTie {
    fn pick(self) -> Direction {
        match self {
            BreakoutTie::PreferLong => Direction::Long,
            BreakoutTie::PreferShort => Direction::Short,
        }
    }
}

/// Tick-rounded breakout prices: one tick beyond the range
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BreakoutLevels {
    pub long: f64,
    pub short: f64,
}

impl BreakoutLevels {
    pub fn new(long: f64, short: f64) -> Self {
        Self { long, short }
    }

    pub fn from_range(range: &SlotRange, tick: Decimal) -> Self {
        let tick_f = tick.to_f64().unwrap_or(0.0);
        Self {
            long: round_to_tick(range.range_high + tick_f, tick),
            short: round_to_tick(range.range_low - tick_f, tick),
        }
    }

    fn is_finite(&self) -> bool {
        self.long.is_finite() && self.short.is_finite()
    }

    pub fn price(&self, direction: Direction) -> Option<f64> {
        match direction {
            Direction::Long => Some(self.long),
            Direction::Short => Some(self.short),
            Direction::NoTrade => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EntryResolver {
    tick: Decimal,
    tie: BreakoutTie,
}

impl EntryResolver {
    pub fn new(tick: Decimal, tie: BreakoutTie) -> Self {
        Self { tick, tie }
    }

    /// Resolve the entry for a range given the bars strictly after its end
    pub fn resolve_range(&self, range: &SlotRange, post: &[Bar]) -> EntryResult {
        let levels = BreakoutLevels::from_range(range, self.tick);
        self.resolve(levels, range.freeze_close, range.end_ts, post)
    }

    pub fn resolve(
        &self,
        levels: BreakoutLevels,
        freeze_close: f64,
        end_ts: Timestamp,
        post: &[Bar],
    ) -> EntryResult {
        if !levels.is_finite() || !freeze_close.is_finite() {
            return EntryResult::unresolved();
        }

        if let Some(direction) = immediate_direction(levels, freeze_close) {
            // price() is Some for Long/Short
            let price = levels.price(direction).unwrap_or(freeze_close);
            return EntryResult::entered(direction, price, end_ts, true);
        }

        match self.first_breakout(levels, end_ts, post) {
            Some((direction, time)) => {
                let price = levels.price(direction).unwrap_or(freeze_close);
                EntryResult::entered(direction, price, time, false)
            }
            None => EntryResult::no_trade(),
        }
    }

    /// Earliest breakout bar in timestamp order
    fn first_breakout(
        &self,
        levels: BreakoutLevels,
        end_ts: Timestamp,
        post: &[Bar],
    ) -> Option<(Direction, Timestamp)> {
        let start = post.partition_point(|b| b.timestamp < end_ts);
        let post = &post[start..];

        let first = post
            .iter()
            .position(|b| b.high >= levels.long || b.low <= levels.short)?;
        let ts = post[first].timestamp;

        // Every row sharing the trigger timestamp takes part in the tie
        let same_ts = post[first..].iter().take_while(|b| b.timestamp == ts);
        let (mut long_hit, mut short_hit) = (false, false);
        for bar in same_ts {
            long_hit |= bar.high >= levels.long;
            short_hit |= bar.low <= levels.short;
        }

        let direction = match (long_hit, short_hit) {
            (true, true) => self.tie.pick(),
            (true, false) => Direction::Long,
            _ => Direction::Short,
        };
        Some((direction, ts))
    }
}

fn immediate_direction(levels: BreakoutLevels, freeze_close: f64) -> Option<Direction> {
    let long = freeze_close >= levels.long;
    let short = freeze_close <= levels.short;

    match (long, short) {
        (true, true) => {
            let to_long = exact_distance(freeze_close, levels.long)?;
            let to_short = exact_distance(levels.short, freeze_close)?;
            if to_long <= to_short {
                Some(Direction::Long)
            } else {
                Some(Direction::Short)
            }
        }
        (true, false) => Some(Direction::Long),
        (false, true) => Some(Direction::Short),
        (false, false) => None,
    }
}
