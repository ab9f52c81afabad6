//! Core data types used across the breakout engine

use chrono::{DateTime, NaiveDate};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use thiserror::Error;

/// Exchange-local, zone-aware timestamp
pub type Timestamp = DateTime<Tz>;

/// Validation errors for bar data
#[derive(Debug, Error)]
pub enum BarValidationError {
    #[error("high ({high}) must be >= low ({low})")]
    HighLessThanLow { high: f64, low: f64 },

    #[error("open ({open}) must be between low ({low}) and high ({high})")]
    OpenOutOfRange { open: f64, low: f64, high: f64 },

    #[error("close ({close}) must be between low ({low}) and high ({high})")]
    CloseOutOfRange { close: f64, low: f64, high: f64 },

    #[error("prices must be finite and positive: open={open}, high={high}, low={low}, close={close}")]
    NonPositivePrice {
        open: f64,
        high: f64,
        low: f64,
        close: f64,
    },
}

/// One minute bar for a single instrument
#[derive(Debug, Clone, PartialEq)]
pub struct Bar {
    pub timestamp: Timestamp,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub instrument: Symbol,
}

impl Bar {
    /// Create a new bar with validation
    pub fn new(
        timestamp: Timestamp,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        instrument: Symbol,
    ) -> Result<Self, BarValidationError> {
        let bar = Self::new_unchecked(timestamp, open, high, low, close, instrument);
        bar.validate()?;
        Ok(bar)
    }

    /// Create a bar without validation (for trusted sources or tests)
    pub fn new_unchecked(
        timestamp: Timestamp,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        instrument: Symbol,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            instrument,
        }
    }

    /// Validate OHLC consistency
    pub fn validate(&self) -> Result<(), BarValidationError> {
        let prices = [self.open, self.high, self.low, self.close];
        if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
            return Err(BarValidationError::NonPositivePrice {
                open: self.open,
                high: self.high,
                low: self.low,
                close: self.close,
            });
        }

        if self.high < self.low {
            return Err(BarValidationError::HighLessThanLow {
                high: self.high,
                low: self.low,
            });
        }

        if self.open < self.low || self.open > self.high {
            return Err(BarValidationError::OpenOutOfRange {
                open: self.open,
                low: self.low,
                high: self.high,
            });
        }

        if self.close < self.low || self.close > self.high {
            return Err(BarValidationError::CloseOutOfRange {
                close: self.close,
                low: self.low,
                high: self.high,
            });
        }

        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

/// Instrument symbol using Arc<str> for cheap cloning
///
/// Every bar, range and output row carries its instrument, so clones are frequent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(#[serde(with = "arc_str_serde")] std::sync::Arc<str>);

/// Custom serde for Arc<str>
mod arc_str_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::sync::Arc;

    pub fn serialize<S>(value: &Arc<str>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(value)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Arc<str>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Arc::from(s.as_str()))
    }
}

impl Symbol {
    pub fn new(s: impl AsRef<str>) -> Self {
        Symbol(std::sync::Arc::from(s.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Trading session a slot belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Session {
    S1,
    S2,
}

impl Session {
    pub fn number(self) -> u8 {
        match self {
            Session::S1 => 1,
            Session::S2 => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Session::S1 => "S1",
            Session::S2 => "S2",
        }
    }

    /// Stream label used in the output table, e.g. `ES1`
    pub fn stream(self, instrument: &Symbol) -> String {
        format!("{}{}", instrument, self.number())
    }
}

impl std::fmt::Display for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Session {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "S1" => Ok(Session::S1),
            "S2" => Ok(Session::S2),
            other => Err(format!("Unknown session: {}. Use 'S1' or 'S2'", other)),
        }
    }
}

/// Trade direction as reported in the output table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
    #[serde(rename = "NA")]
    NoTrade,
}

impl Direction {
    /// +1 for Long, -1 for Short, 0 otherwise
    pub fn sign(self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
            Direction::NoTrade => 0.0,
        }
    }

    pub fn is_trade(self) -> bool {
        matches!(self, Direction::Long | Direction::Short)
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Long => f.write_str("Long"),
            Direction::Short => f.write_str("Short"),
            Direction::NoTrade => f.write_str("NA"),
        }
    }
}

/// Outcome classification of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeResult {
    Win,
    Loss,
    #[serde(rename = "BE")]
    BreakEven,
    #[serde(rename = "TIME")]
    Time,
    NoTrade,
    Setup,
}

impl TradeResult {
    /// Dedupe rank: Win > BE > Loss > TIME > Setup > NoTrade
    pub fn rank(self) -> u8 {
        match self {
            TradeResult::Win => 5,
            TradeResult::BreakEven => 4,
            TradeResult::Loss => 3,
            TradeResult::Time => 2,
            TradeResult::Setup => 1,
            TradeResult::NoTrade => 0,
        }
    }

    pub fn is_trade(self) -> bool {
        matches!(
            self,
            TradeResult::Win | TradeResult::Loss | TradeResult::BreakEven | TradeResult::Time
        )
    }
}

impl std::fmt::Display for TradeResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TradeResult::Win => "Win",
            TradeResult::Loss => "Loss",
            TradeResult::BreakEven => "BE",
            TradeResult::Time => "TIME",
            TradeResult::NoTrade => "NoTrade",
            TradeResult::Setup => "Setup",
        };
        f.write_str(s)
    }
}

/// Pre-breakout consolidation window for one (date, session, slot)
#[derive(Debug, Clone, PartialEq)]
pub struct SlotRange {
    pub instrument: Symbol,
    pub date: NaiveDate,
    pub session: Session,
    /// Slot name, `HH:MM`
    pub end_label: String,
    pub end_ts: Timestamp,
    pub range_high: f64,
    pub range_low: f64,
    pub range_size: f64,
    /// Close of the last bar at or before the slot boundary
    pub freeze_close: f64,
    /// Bar indices forming the window
    pub window: Range<usize>,
    /// Index of the first bar strictly after `end_ts`
    pub post_start: usize,
}

/// Entry decision for one slot range
#[derive(Debug, Clone, PartialEq)]
pub struct EntryResult {
    /// `None` when the inputs were unusable
    pub direction: Option<Direction>,
    pub entry_price: Option<f64>,
    pub entry_time: Option<Timestamp>,
    pub immediate_entry: bool,
    pub breakout_time: Option<Timestamp>,
}

impl EntryResult {
    pub fn no_trade() -> Self {
        Self {
            direction: Some(Direction::NoTrade),
            entry_price: None,
            entry_time: None,
            immediate_entry: false,
            breakout_time: None,
        }
    }

    /// Result for degenerate input (non-finite levels or close)
    pub fn unresolved() -> Self {
        Self {
            direction: None,
            ..Self::no_trade()
        }
    }

    pub fn entered(
        direction: Direction,
        price: f64,
        time: Timestamp,
        immediate_entry: bool,
    ) -> Self {
        Self {
            direction: Some(direction),
            entry_price: Some(price),
            entry_time: Some(time),
            immediate_entry,
            breakout_time: Some(time),
        }
    }

    /// Direction, price and time when a trade was entered
    pub fn trade(&self) -> Option<(Direction, f64, Timestamp)> {
        match (self.direction, self.entry_price, self.entry_time) {
            (Some(d), Some(p), Some(t)) if d.is_trade() => Some((d, p, t)),
            _ => None,
        }
    }
}

/// Terminal record of one simulated trade
#[derive(Debug, Clone, PartialEq)]
pub struct TradeExecution {
    pub direction: Direction,
    pub entry_price: f64,
    pub entry_time: Timestamp,
    pub exit_price: f64,
    pub exit_time: Timestamp,
    pub result: TradeResult,
    /// Maximum favorable excursion in points
    pub peak: f64,
    /// Break-even stop was armed
    pub t1_triggered: bool,
    pub target_hit: bool,
    pub target_points: f64,
    pub stop_points: f64,
    pub profit: f64,
}
