//! Per-instrument target ladder
//!
//! The profit target for an instrument steps between rungs (base x1..x4)
//! based on the peaks of its recent trades. A trade whose peak falls below
//! 95% of the base target says nothing about the target and is ignored.
//!
//! State is held in a [`LadderBook`] owned by the caller and must be fed
//! trades strictly in chronological order per instrument.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use tracing::debug;

use crate::instruments::InstrumentSpec;
use crate::precision::floor_to_tick;
use crate::Symbol;

/// Consecutive qualifying peaks at or above the next rung needed to promote
pub const PROMOTION_STREAK: u32 = 3;

/// Peaks kept by the rolling policy
pub const ROLLING_WINDOW: usize = 3;

/// Fraction of base target a peak must reach to count
pub const IGNORE_FRACTION: f64 = 0.95;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LadderPolicy {
    /// Fixed targets from `target_multipliers`
    #[default]
    None,
    Streak,
    Rolling,
}

impl LadderPolicy {
    pub fn is_enabled(self) -> bool {
        self != LadderPolicy::None
    }
}

/// Rung targets for one instrument
#[derive(Debug, Clone, PartialEq)]
pub struct TargetLadder {
    rungs: Vec<f64>,
    ignore_below: f64,
}

impl TargetLadder {
    pub fn from_spec(spec: &InstrumentSpec) -> Self {
        Self {
            rungs: spec.ladder_rungs(),
            ignore_below: floor_to_tick(IGNORE_FRACTION * spec.base_target, spec.tick_size),
        }
    }

    pub fn rungs(&self) -> &[f64] {
        &self.rungs
    }

    pub fn target(&self, rung: usize) -> f64 {
        self.rungs[rung.min(self.rungs.len() - 1)]
    }

    pub fn next(&self, rung: usize) -> Option<f64> {
        self.rungs.get(rung + 1).copied()
    }

    pub fn top(&self) -> usize {
        self.rungs.len() - 1
    }

    pub fn ignore_below(&self) -> f64 {
        self.ignore_below
    }

    pub fn qualifies(&self, peak: f64) -> bool {
        peak.is_finite() && peak >= self.ignore_below
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LadderState {
    pub rung: usize,
    pub streak: u32,
    pub recent_peaks: VecDeque<f64>,
}

/// Outcome of feeding one trade peak to a ladder
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LadderMove {
    /// Peak below the ignore threshold; state untouched
    Ignored,
    Hold,
    Promote { from: f64, to: f64 },
    Demote { from: f64, to: f64 },
}

/// Ladder, its state and the policy driving it
#[derive(Debug, Clone)]
pub struct InstrumentLadder {
    pub ladder: TargetLadder,
    pub state: LadderState,
    pub policy: LadderPolicy,
}

impl InstrumentLadder {
    pub fn new(spec: &InstrumentSpec, policy: LadderPolicy) -> Self {
        Self {
            ladder: TargetLadder::from_spec(spec),
            state: LadderState::default(),
            policy,
        }
    }

    pub fn current_target(&self) -> f64 {
        self.ladder.target(self.state.rung)
    }

    /// Update state with the peak of a completed trade
    pub fn record_peak(&mut self, peak: f64) -> LadderMove {
        if !self.ladder.qualifies(peak) {
            return LadderMove::Ignored;
        }

        match self.policy {
            LadderPolicy::None => LadderMove::Hold,
            LadderPolicy::Streak => self.apply_streak(peak),
            LadderPolicy::Rolling => self.apply_rolling(peak),
        }
    }

    fn apply_streak(&mut self, peak: f64) -> LadderMove {
        let current = self.current_target();

        if peak <= current {
            self.state.streak = 0;
            return self.demote();
        }

        match self.ladder.next(self.state.rung) {
            Some(next) if peak >= next => {
                self.state.streak += 1;
                if self.state.streak >= PROMOTION_STREAK {
                    self.state.streak = 0;
                    return self.promote();
                }
                LadderMove::Hold
            }
            _ => {
                self.state.streak = 0;
                LadderMove::Hold
            }
        }
    }

    fn apply_rolling(&mut self, peak: f64) -> LadderMove {
        let peaks = &mut self.state.recent_peaks;
        peaks.push_back(peak);
        while peaks.len() > ROLLING_WINDOW {
            peaks.pop_front();
        }
        if peaks.len() < ROLLING_WINDOW {
            return LadderMove::Hold;
        }

        let current = self.current_target();
        if let Some(next) = self.ladder.next(self.state.rung) {
            if self.state.recent_peaks.iter().all(|p| *p >= next) {
                return self.promote();
            }
        }
        if self.state.rung > 0 && self.state.recent_peaks.iter().all(|p| *p <= current) {
            return self.demote();
        }
        LadderMove::Hold
    }

    fn promote(&mut self) -> LadderMove {
        let from = self.current_target();
        if self.state.rung >= self.ladder.top() {
            return LadderMove::Hold;
        }
        self.state.rung += 1;
        LadderMove::Promote {
            from,
            to: self.current_target(),
        }
    }

    fn demote(&mut self) -> LadderMove {
        let from = self.current_target();
        if self.state.rung == 0 {
            return LadderMove::Hold;
        }
        self.state.rung -= 1;
        LadderMove::Demote {
            from,
            to: self.current_target(),
        }
    }
}

/// Ladder state for every instrument in a run
#[derive(Debug, Clone, Default)]
pub struct LadderBook {
    policy: LadderPolicy,
    entries: BTreeMap<Symbol, InstrumentLadder>,
}

impl LadderBook {
    pub fn new(policy: LadderPolicy) -> Self {
        Self {
            policy,
            entries: BTreeMap::new(),
        }
    }

    pub fn policy(&self) -> LadderPolicy {
        self.policy
    }

    pub fn entry(&mut self, symbol: &Symbol, spec: &InstrumentSpec) -> &mut InstrumentLadder {
        let policy = self.policy;
        self.entries.entry(symbol.clone()).or_insert_with(|| {
            debug!("{}: ladder rungs {:?}", symbol, spec.ladder_rungs());
            InstrumentLadder::new(spec, policy)
        })
    }

    pub fn get(&self, symbol: &Symbol) -> Option<&InstrumentLadder> {
        self.entries.get(symbol)
    }

    /// Move an instrument's ladder out, e.g. to hand it to a worker thread
    pub fn take(&mut self, symbol: &Symbol) -> Option<InstrumentLadder> {
        self.entries.remove(symbol)
    }

    pub fn insert(&mut self, symbol: Symbol, ladder: InstrumentLadder) {
        self.entries.insert(symbol, ladder);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Symbol, &InstrumentLadder)> {
        self.entries.iter()
    }
}
