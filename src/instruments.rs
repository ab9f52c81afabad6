//! Per-instrument tick size and target metadata
//!
//! Built-in defaults cover the common CME index, energy and metals futures
//! plus their micro contracts. The `instruments` section of the config can add
//! symbols or replace any default.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::EngineError;
use crate::precision::floor_to_tick;

/// Highest ladder multiple of the base target
pub const MAX_LADDER_MULTIPLE: u32 = 4;

/// Tick and target metadata for one instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSpec {
    pub symbol: String,
    pub tick_size: Decimal,
    /// Base profit target in points
    pub base_target: f64,
    /// Ceiling for any ladder rung, in points
    pub max_target: f64,
}

impl InstrumentSpec {
    pub fn new(symbol: &str, tick_size: Decimal, base_target: f64, max_target: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            tick_size,
            base_target,
            max_target,
        }
    }

    pub fn tick(&self) -> f64 {
        self.tick_size.to_f64().unwrap_or(0.0)
    }

    /// Target for a fixed multiple of base, floored to tick and capped at the ceiling
    pub fn target_for_multiple(&self, multiple: u32) -> f64 {
        let raw = floor_to_tick(self.base_target * multiple as f64, self.tick_size);
        raw.min(floor_to_tick(self.max_target, self.tick_size))
    }

    /// Ladder rungs: base x1..x4, floored to tick, dropping rungs above the ceiling
    pub fn ladder_rungs(&self) -> Vec<f64> {
        let base = floor_to_tick(self.base_target, self.tick_size);
        let mut rungs = vec![base];
        for multiple in 2..=MAX_LADDER_MULTIPLE {
            let rung = floor_to_tick(self.base_target * multiple as f64, self.tick_size);
            if rung <= self.max_target && rung > base {
                rungs.push(rung);
            }
        }
        rungs
    }

    fn validate(&self) -> Result<(), EngineError> {
        if self.tick_size <= Decimal::ZERO {
            return Err(EngineError::invalid(
                format!("{}.tick_size", self.symbol),
                "must be positive",
            ));
        }
        if !(self.base_target.is_finite() && self.base_target > 0.0) {
            return Err(EngineError::invalid(
                format!("{}.base_target", self.symbol),
                "must be positive",
            ));
        }
        if self.max_target < self.base_target {
            return Err(EngineError::invalid(
                format!("{}.max_target", self.symbol),
                "must be >= base_target",
            ));
        }
        Ok(())
    }
}

/// Lookup table keyed by upper-case symbol
#[derive(Debug, Clone)]
pub struct InstrumentTable {
    specs: BTreeMap<String, InstrumentSpec>,
}

impl InstrumentTable {
    pub fn builtin() -> Self {
        let defaults = [
            ("ES", dec!(0.25), 10.0, 40.0),
            ("MES", dec!(0.25), 10.0, 40.0),
            ("NQ", dec!(0.25), 50.0, 200.0),
            ("MNQ", dec!(0.25), 50.0, 200.0),
            ("YM", dec!(1.0), 100.0, 400.0),
            ("MYM", dec!(1.0), 100.0, 400.0),
            ("RTY", dec!(0.1), 10.0, 40.0),
            ("M2K", dec!(0.1), 10.0, 40.0),
            ("CL", dec!(0.01), 0.5, 2.0),
            ("MCL", dec!(0.01), 0.5, 2.0),
            ("NG", dec!(0.001), 0.05, 0.2),
            ("GC", dec!(0.1), 5.0, 20.0),
            ("MGC", dec!(0.1), 5.0, 20.0),
        ];

        let specs = defaults
            .into_iter()
            .map(|(sym, tick, base, max)| {
                (sym.to_string(), InstrumentSpec::new(sym, tick, base, max))
            })
            .collect();

        Self { specs }
    }

    /// Built-in table with config overrides applied on top
    pub fn with_overrides(overrides: &[InstrumentSpec]) -> Result<Self, EngineError> {
        let mut table = Self::builtin();
        for spec in overrides {
            spec.validate()?;
            let mut spec = spec.clone();
            spec.symbol = spec.symbol.to_uppercase();
            table.specs.insert(spec.symbol.clone(), spec);
        }
        Ok(table)
    }

    pub fn get(&self, symbol: &str) -> Result<&InstrumentSpec, EngineError> {
        self.specs
            .get(&symbol.to_uppercase())
            .ok_or_else(|| EngineError::UnknownInstrument(symbol.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &InstrumentSpec> {
        self.specs.values()
    }
}

impl Default for InstrumentTable {
    fn default() -> Self {
        Self::builtin()
    }
}
