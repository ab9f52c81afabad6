//! Tick-exact rounding of prices and point values
//!
//! All arithmetic goes through `rust_decimal` so that a value reported as
//! "a multiple of 0.25" really is one after formatting, with no f64 drift.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};

/// Decimal places kept before tick rounding; strips f64 noise like 9.4999999999
const NOISE_DP: u32 = 9;

/// Convert an f64 to its shortest decimal representation.
///
/// Non-finite values map to `None`.
pub fn to_decimal(value: f64) -> Option<Decimal> {
    if !value.is_finite() {
        return None;
    }
    Decimal::from_f64(value).map(|d| d.round_dp(NOISE_DP))
}

fn ticks_to_f64(ticks: Decimal, tick: Decimal) -> f64 {
    (ticks * tick).normalize().to_f64().unwrap_or(0.0)
}

/// Round to the nearest tick (half away from zero)
pub fn round_to_tick(value: f64, tick: Decimal) -> f64 {
    if tick.is_zero() {
        return value;
    }
    match to_decimal(value) {
        Some(v) => {
            let ticks =
                (v / tick).round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
            ticks_to_f64(ticks, tick)
        }
        None => value,
    }
}

/// Round down to a tick multiple (toward negative infinity)
pub fn floor_to_tick(value: f64, tick: Decimal) -> f64 {
    if tick.is_zero() {
        return value;
    }
    match to_decimal(value) {
        Some(v) => ticks_to_f64((v / tick).floor(), tick),
        None => value,
    }
}

/// Whether `value` is an exact multiple of `tick`
pub fn is_tick_multiple(value: f64, tick: Decimal) -> bool {
    match to_decimal(value) {
        Some(v) if !tick.is_zero() => (v % tick).is_zero(),
        _ => false,
    }
}

/// Signed distance between two prices, compared exactly
pub fn exact_distance(a: f64, b: f64) -> Option<Decimal> {
    Some((to_decimal(a)? - to_decimal(b)?).abs())
}
