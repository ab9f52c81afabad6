//! Slot Range Breakout Engine
//!
//! Simulates breakout trades off fixed time-of-day consolidation ranges in
//! minute bars for futures instruments, classifies each outcome and assembles
//! a canonical result table, with an optional per-instrument target ladder.

pub mod assembler;
pub mod backtest;
pub mod config;
pub mod data;
pub mod entry;
pub mod error;
pub mod instruments;
pub mod ladder;
pub mod precision;
pub mod range;
pub mod summary;
pub mod tracker;
pub mod types;

pub use config::Config;
pub use error::EngineError;
pub use types::*;
