//! Slot range detection
//!
//! For each enabled (trading day, session, slot) the range window is every bar
//! from the session start through the slot end-time, inclusive. Windows are
//! located by binary search over the read-only bar slice, so a range is just a
//! pair of indices plus its derived high/low/freeze values.

use chrono::{Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Weekday};
use chrono_tz::Tz;
use tracing::debug;

use crate::{Bar, Session, SlotRange, Symbol, Timestamp};

/// Parse `H:MM`, `HH:MM` or `HH:MM:SS` into a time of day
pub fn parse_slot_label(label: &str) -> Option<NaiveTime> {
    let label = label.trim();
    NaiveTime::parse_from_str(label, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(label, "%H:%M:%S"))
        .ok()
}

/// Canonical `HH:MM` form of a slot label
pub fn normalize_slot_label(label: &str) -> Option<String> {
    parse_slot_label(label).map(format_slot)
}

pub fn format_slot(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}

/// Numeric sort key: minutes since midnight
pub fn slot_minutes(time: NaiveTime) -> u32 {
    time.hour() * 60 + time.minute()
}

/// One enabled slot end-time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotSpec {
    pub label: String,
    pub end: NaiveTime,
}

impl SlotSpec {
    pub fn new(end: NaiveTime) -> Self {
        Self {
            label: format_slot(end),
            end,
        }
    }
}

/// Compiled session: range start plus its enabled slots in time order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPlan {
    pub session: Session,
    pub start: NaiveTime,
    pub slots: Vec<SlotSpec>,
}

/// Local wall time to exchange timestamp; `None` inside a DST gap
fn local_ts(tz: Tz, date: NaiveDate, time: NaiveTime) -> Option<Timestamp> {
    tz.from_local_datetime(&date.and_time(time)).earliest()
}

pub struct RangeBuilder<'a> {
    plans: &'a [SessionPlan],
    weekdays: &'a [Weekday],
    tz: Tz,
}

impl<'a> RangeBuilder<'a> {
    pub fn new(plans: &'a [SessionPlan], weekdays: &'a [Weekday], tz: Tz) -> Self {
        Self {
            plans,
            weekdays,
            tz,
        }
    }

    fn is_trading_day(&self, date: NaiveDate) -> bool {
        self.weekdays.contains(&date.weekday())
    }

    /// Build every slot range for one instrument's time-ordered bars.
    ///
    /// Output is ordered by (end timestamp, session) with no duplicates.
    pub fn build(&self, instrument: &Symbol, bars: &[Bar]) -> Vec<SlotRange> {
        let mut dates: Vec<NaiveDate> = bars
            .iter()
            .map(|b| b.timestamp.date_naive())
            .collect();
        dates.sort();
        dates.dedup();

        let mut ranges = Vec::new();
        for date in dates.into_iter().filter(|d| self.is_trading_day(*d)) {
            for plan in self.plans {
                let Some(start_ts) = local_ts(self.tz, date, plan.start) else {
                    debug!(
                        "{} {} {}: session start falls in a DST gap",
                        instrument, date, plan.session
                    );
                    continue;
                };
                for slot in &plan.slots {
                    let Some(end_ts) = local_ts(self.tz, date, slot.end) else {
                        debug!(
                            "{} {} {}: slot falls in a DST gap",
                            instrument, date, slot.label
                        );
                        continue;
                    };
                    if let Some(range) = build_window(
                        instrument,
                        bars,
                        date,
                        plan.session,
                        &slot.label,
                        start_ts,
                        end_ts,
                    ) {
                        ranges.push(range);
                    }
                }
            }
        }

        ranges.sort_by(|a, b| a.end_ts.cmp(&b.end_ts).then(a.session.cmp(&b.session)));
        ranges
    }

    /// Same slot on the next enabled trading day
    pub fn next_occurrence(&self, range: &SlotRange) -> Option<Timestamp> {
        let slot_time = range.end_ts.time();
        (1..=7)
            .map(|offset| range.date + Duration::days(offset))
            .find(|d| self.is_trading_day(*d))
            .and_then(|d| local_ts(self.tz, d, slot_time))
    }
}

fn build_window(
    instrument: &Symbol,
    bars: &[Bar],
    date: NaiveDate,
    session: Session,
    label: &str,
    start_ts: Timestamp,
    end_ts: Timestamp,
) -> Option<SlotRange> {
    let lo = bars.partition_point(|b| b.timestamp < start_ts);
    let hi = bars.partition_point(|b| b.timestamp <= end_ts);
    if lo >= hi {
        return None;
    }

    let window = &bars[lo..hi];
    let range_high = window.iter().map(|b| b.high).fold(f64::MIN, f64::max);
    let range_low = window.iter().map(|b| b.low).fold(f64::MAX, f64::min);
    let freeze_close = window[window.len() - 1].close;

    Some(SlotRange {
        instrument: instrument.clone(),
        date,
        session,
        end_label: label.to_string(),
        end_ts,
        range_high,
        range_low,
        range_size: range_high - range_low,
        freeze_close,
        window: lo..hi,
        post_start: hi,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::America::Chicago;

    fn bar(date: NaiveDate, h: u32, m: u32, high: f64, low: f64, close: f64) -> Bar {
        let ts = Chicago
            .from_local_datetime(&date.and_hms_opt(h, m, 0).unwrap())
            .unwrap();
        Bar::new_unchecked(ts, close, high, low, close, Symbol::new("ES"))
    }

    fn plans() -> Vec<SessionPlan> {
        vec![SessionPlan {
            session: Session::S1,
            start: NaiveTime::from_hms_opt(2, 0, 0).unwrap(),
            slots: vec![
                SlotSpec::new(NaiveTime::from_hms_opt(7, 30, 0).unwrap()),
                SlotSpec::new(NaiveTime::from_hms_opt(8, 0, 0).unwrap()),
            ],
        }]
    }

    const WEEKDAYS: [Weekday; 5] = [
        Weekday::Mon,
        Weekday::Tue,
        Weekday::Wed,
        Weekday::Thu,
        Weekday::Fri,
    ];

    #[test]
    fn test_window_includes_slot_end_bar() {
        let d = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(); // Monday
        let bars = vec![
            bar(d, 1, 59, 200.0, 50.0, 100.0), // before session start
            bar(d, 2, 0, 101.0, 99.0, 100.0),
            bar(d, 5, 0, 103.0, 98.0, 102.0),
            bar(d, 7, 30, 104.0, 100.0, 103.5),
            bar(d, 7, 45, 110.0, 90.0, 105.0),
        ];
        let plans = plans();
        let builder = RangeBuilder::new(&plans, &WEEKDAYS, Chicago);
        let ranges = builder.build(&Symbol::new("ES"), &bars);

        assert_eq!(ranges.len(), 2);
        let r = &ranges[0];
        assert_eq!(r.end_label, "07:30");
        assert_eq!(r.range_high, 104.0);
        assert_eq!(r.range_low, 98.0);
        assert_eq!(r.range_size, 6.0);
        assert_eq!(r.freeze_close, 103.5);
        assert_eq!(r.window, 1..4);
        assert_eq!(r.post_start, 4);

        // 08:00 slot has no bar at 08:00; freeze is the last close before it
        let r = &ranges[1];
        assert_eq!(r.end_label, "08:00");
        assert_eq!(r.freeze_close, 105.0);
        assert_eq!(r.range_high, 110.0);
        assert_eq!(r.post_start, 5);
    }

    #[test]
    fn test_weekend_and_empty_windows_skipped() {
        let sat = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        let mon = NaiveDate::from_ymd_opt(2024, 3, 11).unwrap();
        let bars = vec![
            bar(sat, 3, 0, 101.0, 99.0, 100.0),
            bar(mon, 7, 50, 101.0, 99.0, 100.0),
        ];
        let plans = plans();
        let builder = RangeBuilder::new(&plans, &WEEKDAYS, Chicago);
        let ranges = builder.build(&Symbol::new("ES"), &bars);

        // Only Monday 08:00 has a bar in its window
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].date, mon);
        assert_eq!(ranges[0].end_label, "08:00");
    }

    #[test]
    fn test_next_occurrence_skips_weekend() {
        let fri = NaiveDate::from_ymd_opt(2024, 3, 8).unwrap();
        let bars = vec![bar(fri, 7, 0, 101.0, 99.0, 100.0)];
        let plans = plans();
        let builder = RangeBuilder::new(&plans, &WEEKDAYS, Chicago);
        let ranges = builder.build(&Symbol::new("ES"), &bars);

        let next = builder.next_occurrence(&ranges[0]).unwrap();
        assert_eq!(next.date_naive(), NaiveDate::from_ymd_opt(2024, 3, 11).unwrap());
        assert_eq!(format_slot(next.time()), "07:30");
    }

    #[test]
    fn test_slot_label_helpers() {
        assert_eq!(normalize_slot_label("7:30").as_deref(), Some("07:30"));
        assert_eq!(normalize_slot_label("09:00:00").as_deref(), Some("09:00"));
        assert!(normalize_slot_label("0930").is_none());
        assert_eq!(slot_minutes(parse_slot_label("10:30").unwrap()), 630);
    }
}
