//! Configuration management
//!
//! Handles loading and parsing of JSON run configuration files, with `.env`
//! and environment variable overrides for the input and output locations.

use anyhow::{Context, Result};
use chrono::Weekday;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::entry::BreakoutTie;
use crate::error::EngineError;
use crate::instruments::{InstrumentSpec, InstrumentTable};
use crate::ladder::LadderPolicy;
use crate::range::{parse_slot_label, SessionPlan, SlotSpec};
use crate::tracker::SameBarPriority;
use crate::{Session, Symbol};

/// Upper bound on `max_hold_hours`: one leap year
pub const MAX_HOLD_HOURS_LIMIT: i64 = 24 * 366;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub backtest: BacktestConfig,
    /// Additional instruments or replacements for the built-in table
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instruments: Vec<InstrumentSpec>,
}

impl Config {
    /// Load configuration from JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents =
            fs::read_to_string(path.as_ref()).context("Failed to read config file")?;
        let mut config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;

        config.apply_env_overrides();
        config.run.validate()?;

        Ok(config)
    }

    /// Override data/results locations from `.env` or the process environment
    pub fn apply_env_overrides(&mut self) {
        dotenv::dotenv().ok();

        if let Ok(data_file) = std::env::var("BREAKOUT_DATA_FILE") {
            self.backtest.data_file = data_file;
        }
        if let Ok(results_dir) = std::env::var("BREAKOUT_RESULTS_DIR") {
            self.backtest.results_dir = results_dir;
        }
    }

    pub fn instrument_table(&self) -> Result<InstrumentTable, EngineError> {
        InstrumentTable::with_overrides(&self.instruments)
    }
}

/// Session definition as written in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub id: Session,
    /// Range start time-of-day, `HH:MM`
    pub start: String,
    /// Enabled slot end-times, `HH:MM`
    pub slots: Vec<String>,
}

/// Simulation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Instruments to process; empty means every instrument in the data
    #[serde(default)]
    pub instruments: Vec<String>,

    /// IANA zone of the exchange clock (default: America/Chicago)
    #[serde(default = "default_timezone")]
    pub timezone: String,

    #[serde(default = "default_sessions")]
    pub sessions: Vec<SessionConfig>,

    #[serde(default = "default_weekdays")]
    pub weekdays: Vec<Weekday>,

    /// Which exit wins when one bar spans both stop and target
    #[serde(default)]
    pub same_bar_priority: SameBarPriority,

    /// Which direction wins when both breakouts trigger on one timestamp
    #[serde(default)]
    pub breakout_tie: BreakoutTie,

    /// Fraction of target that arms the break-even stop (default: 0.65)
    #[serde(default = "default_be_trigger_pct")]
    pub be_trigger_pct: f64,

    /// Maximum hold time in hours (default: 24)
    #[serde(default = "default_max_hold_hours")]
    pub max_hold_hours: i64,

    /// Fixed target multiples of base, one row per multiple (ladder off)
    #[serde(default = "default_target_multipliers")]
    pub target_multipliers: Vec<u32>,

    #[serde(default)]
    pub ladder: LadderPolicy,

    /// Emit NoTrade/Setup placeholder rows for slots without a trade
    #[serde(default = "default_true")]
    pub emit_placeholders: bool,

    /// Process instruments (and ranges, when the ladder is off) on a thread pool
    #[serde(default)]
    pub parallel: bool,
}

fn default_timezone() -> String {
    "America/Chicago".to_string()
}

fn default_sessions() -> Vec<SessionConfig> {
    vec![
        SessionConfig {
            id: Session::S1,
            start: "02:00".to_string(),
            slots: vec!["07:30".into(), "08:00".into(), "09:00".into()],
        },
        SessionConfig {
            id: Session::S2,
            start: "08:00".to_string(),
            slots: vec![
                "09:30".into(),
                "10:00".into(),
                "10:30".into(),
                "11:00".into(),
            ],
        },
    ]
}

fn default_weekdays() -> Vec<Weekday> {
    vec![
        Weekday::Mon,
        Weekday::Tue,
        Weekday::Wed,
        Weekday::Thu,
        Weekday::Fri,
    ]
}

fn default_be_trigger_pct() -> f64 {
    0.65
}
fn default_max_hold_hours() -> i64 {
    24
}
fn default_target_multipliers() -> Vec<u32> {
    vec![1]
}
fn default_true() -> bool {
    true
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            instruments: Vec::new(),
            timezone: default_timezone(),
            sessions: default_sessions(),
            weekdays: default_weekdays(),
            same_bar_priority: SameBarPriority::default(),
            breakout_tie: BreakoutTie::default(),
            be_trigger_pct: default_be_trigger_pct(),
            max_hold_hours: default_max_hold_hours(),
            target_multipliers: default_target_multipliers(),
            ladder: LadderPolicy::default(),
            emit_placeholders: true,
            parallel: false,
        }
    }
}

impl RunConfig {
    pub fn tz(&self) -> Result<Tz, EngineError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| EngineError::UnknownTimeZone(self.timezone.clone()))
    }

    pub fn symbols(&self) -> Vec<Symbol> {
        self.instruments.iter().map(Symbol::new).collect()
    }

    /// Compile session configs into sorted, parsed plans
    pub fn session_plans(&self) -> Result<Vec<SessionPlan>, EngineError> {
        let mut plans = Vec::with_capacity(self.sessions.len());

        for session in &self.sessions {
            let start = parse_slot_label(&session.start)
                .ok_or_else(|| EngineError::InvalidSlotLabel(session.start.clone()))?;

            let mut slots = Vec::with_capacity(session.slots.len());
            for label in &session.slots {
                let end = parse_slot_label(label)
                    .ok_or_else(|| EngineError::InvalidSlotLabel(label.clone()))?;
                if end <= start {
                    return Err(EngineError::invalid(
                        format!("{}.slots", session.id),
                        format!(
                            "slot {} is not after session start {}",
                            label, session.start
                        ),
                    ));
                }
                slots.push(SlotSpec::new(end));
            }
            slots.sort_by_key(|s| s.end);
            slots.dedup_by_key(|s| s.end);

            plans.push(SessionPlan {
                session: session.id,
                start,
                slots,
            });
        }

        plans.sort_by_key(|p| p.session);
        if plans.windows(2).any(|w| w[0].session == w[1].session) {
            return Err(EngineError::invalid("sessions", "duplicate session id"));
        }

        Ok(plans)
    }

    /// Check every parameter that would make the run semantics undefined
    pub fn validate(&self) -> Result<(), EngineError> {
        self.tz()?;
        self.session_plans()?;

        if !(self.be_trigger_pct > 0.0 && self.be_trigger_pct <= 1.0) {
            return Err(EngineError::invalid(
                "be_trigger_pct",
                format!("{} is outside (0, 1]", self.be_trigger_pct),
            ));
        }
        if !(1..=MAX_HOLD_HOURS_LIMIT).contains(&self.max_hold_hours) {
            return Err(EngineError::invalid(
                "max_hold_hours",
                format!(
                    "{} is outside 1..={}",
                    self.max_hold_hours, MAX_HOLD_HOURS_LIMIT
                ),
            ));
        }
        if self.target_multipliers.is_empty() || self.target_multipliers.contains(&0) {
            return Err(EngineError::invalid(
                "target_multipliers",
                "needs at least one multiple, all >= 1",
            ));
        }
        if self.weekdays.is_empty() {
            return Err(EngineError::invalid("weekdays", "no trading weekday enabled"));
        }
        Ok(())
    }
}

/// Input/output locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub data_file: String,
    pub results_dir: String,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        BacktestConfig {
            data_file: "data/bars.csv".to_string(),
            results_dir: "results".to_string(),
        }
    }
}
