//! Data loading and result output
//!
//! Loads minute bars from CSV files into a per-instrument [`BarTable`] and
//! writes assembled result tables back out. Market-data connectors live
//! outside this crate; they plug in through [`BarSource`].

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::assembler::ResultRow;
use crate::error::EngineError;
use crate::{Bar, Symbol, Timestamp};

// =============================================================================
// Constants
// =============================================================================

/// Columns every bar file must carry (any order, extra columns ignored)
pub const REQUIRED_COLUMNS: [&str; 6] =
    ["timestamp", "open", "high", "low", "close", "instrument"];

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

// =============================================================================
// Bar Table
// =============================================================================

/// Time-ordered bars per instrument
#[derive(Debug, Clone, Default)]
pub struct BarTable {
    bars: BTreeMap<Symbol, Vec<Bar>>,
}

impl BarTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from bars in any order
    pub fn from_bars(bars: impl IntoIterator<Item = Bar>) -> Result<Self, EngineError> {
        let mut table = Self::new();
        for bar in bars {
            table.push(bar)?;
        }
        table.sort();
        Ok(table)
    }

    /// Append a bar; call [`BarTable::sort`] once loading is done
    pub fn push(&mut self, bar: Bar) -> Result<(), EngineError> {
        let rows = self.len() + 1;
        let series = self.bars.entry(bar.instrument.clone()).or_default();
        series.try_reserve(1).map_err(|_| EngineError::Capacity {
            rows,
            bytes: rows.saturating_mul(std::mem::size_of::<Bar>()),
        })?;
        series.push(bar);
        Ok(())
    }

    /// Stable sort by timestamp; duplicate timestamps keep file order
    pub fn sort(&mut self) {
        for series in self.bars.values_mut() {
            series.sort_by_key(|b| b.timestamp);
        }
    }

    pub fn get(&self, symbol: &Symbol) -> &[Bar] {
        self.bars.get(symbol).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn instruments(&self) -> Vec<Symbol> {
        self.bars.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Symbol, &[Bar])> {
        self.bars.iter().map(|(s, b)| (s, b.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.bars.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keep only the given instruments; empty keeps everything
    pub fn retain_instruments(&mut self, symbols: &[Symbol]) {
        if symbols.is_empty() {
            return;
        }
        let wanted: Vec<String> = symbols
            .iter()
            .map(|s| s.as_str().to_uppercase())
            .collect();
        self.bars
            .retain(|s, _| wanted.contains(&s.as_str().to_uppercase()));
    }

    /// Drop bars outside `[start, end]`
    pub fn filter_by_date(&mut self, start: Option<Timestamp>, end: Option<Timestamp>) {
        for series in self.bars.values_mut() {
            series.retain(|b| {
                let after_start = start.map_or(true, |s| b.timestamp >= s);
                let before_end = end.map_or(true, |e| b.timestamp <= e);
                after_start && before_end
            });
        }
        self.bars.retain(|_, series| !series.is_empty());
    }
}

// =============================================================================
// Timestamp Parsing
// =============================================================================

/// RFC 3339 with offset (converted to `tz`) or naive local time in `tz`
pub fn parse_timestamp(s: &str, tz: Tz) -> Option<Timestamp> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&tz));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .and_then(|ndt| tz.from_local_datetime(&ndt).earliest())
}

/// Parse a date string (YYYY-MM-DD or YYYY-MM-DD HH:MM:SS) in the exchange zone
pub fn parse_date(date_str: &str, tz: Tz) -> Result<Timestamp> {
    if let Some(ts) = parse_timestamp(date_str, tz) {
        return Ok(ts);
    }

    // YYYY-MM-DD: start of day
    if let Some(ts) = NaiveDate::parse_from_str(date_str.trim(), "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .and_then(|ndt| tz.from_local_datetime(&ndt).earliest())
    {
        return Ok(ts);
    }

    anyhow::bail!(
        "Failed to parse date: {}. Use YYYY-MM-DD or YYYY-MM-DD HH:MM:SS format",
        date_str
    )
}

/// End-of-day bound for a `--end` date given without a time
pub fn parse_end_date(date_str: &str, tz: Tz) -> Result<Timestamp> {
    if parse_timestamp(date_str, tz).is_some() {
        return parse_date(date_str, tz);
    }
    let start = parse_date(date_str, tz)?;
    Ok(start + chrono::Duration::days(1) - chrono::Duration::seconds(1))
}

// =============================================================================
// CSV Bar Loading
// =============================================================================

/// Load minute bars from a CSV file with a header row
pub fn load_csv(path: impl AsRef<Path>, tz: Tz) -> Result<BarTable> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open CSV file {}", path.display()))?;

    let headers = reader.headers().context("Failed to read CSV header")?.clone();
    let column = |name: &str| -> Result<usize, EngineError> {
        headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(name))
            .ok_or_else(|| EngineError::MissingColumn {
                column: name.to_string(),
                source_name: path.display().to_string(),
            })
    };
    let idx = [
        column("timestamp")?,
        column("open")?,
        column("high")?,
        column("low")?,
        column("close")?,
        column("instrument")?,
    ];

    let mut table = BarTable::new();
    let mut invalid_count = 0usize;

    for (row_idx, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("Failed to read row {}", row_idx + 1))?;
        let line = row_idx + 2; // 1-indexed plus header row

        match parse_record(&record, &idx, tz) {
            Ok(bar) => table.push(bar)?,
            Err(e) => {
                invalid_count += 1;
                warn!(
                    "Skipping invalid bar at row {} in {:?}: {}",
                    line,
                    path.file_name().unwrap_or_default(),
                    e
                );
            }
        }
    }

    if invalid_count > 0 {
        warn!(
            "Skipped {} invalid bars out of {} in {:?}",
            invalid_count,
            invalid_count + table.len(),
            path.file_name().unwrap_or_default()
        );
    }

    table.sort();
    for (symbol, bars) in table.iter() {
        debug!("{}: {} bars", symbol, bars.len());
    }
    Ok(table)
}

fn parse_record(record: &csv::StringRecord, idx: &[usize; 6], tz: Tz) -> Result<Bar> {
    let field = |i: usize| record.get(idx[i]).map(str::trim).unwrap_or("");

    let timestamp = parse_timestamp(field(0), tz)
        .with_context(|| format!("Failed to parse timestamp '{}'", field(0)))?;
    let price = |i: usize, name: &str| -> Result<f64> {
        field(i)
            .parse::<f64>()
            .with_context(|| format!("Failed to parse {} '{}'", name, field(i)))
    };
    let open = price(1, "open")?;
    let high = price(2, "high")?;
    let low = price(3, "low")?;
    let close = price(4, "close")?;

    let instrument = field(5);
    if instrument.is_empty() {
        anyhow::bail!("Empty instrument");
    }

    Ok(Bar::new(timestamp, open, high, low, close, Symbol::new(instrument.to_uppercase()))?)
}

// =============================================================================
// Bar Sources
// =============================================================================

/// Provider of bar tables; market-data connectors implement this
pub trait BarSource {
    /// Bars for the given instruments (all when empty) within `[start, end]`
    fn fetch_bars(
        &self,
        instruments: &[Symbol],
        start: Option<Timestamp>,
        end: Option<Timestamp>,
    ) -> Result<BarTable>;
}

/// Single CSV file holding every instrument
#[derive(Debug, Clone)]
pub struct CsvBarSource {
    path: PathBuf,
    tz: Tz,
}

impl CsvBarSource {
    pub fn new(path: impl Into<PathBuf>, tz: Tz) -> Self {
        Self {
            path: path.into(),
            tz,
        }
    }
}

impl BarSource for CsvBarSource {
    fn fetch_bars(
        &self,
        instruments: &[Symbol],
        start: Option<Timestamp>,
        end: Option<Timestamp>,
    ) -> Result<BarTable> {
        let mut table = load_csv(&self.path, self.tz)?;
        let original_len = table.len();

        table.retain_instruments(instruments);
        table.filter_by_date(start, end);

        info!(
            "Loaded {} bars for {} instruments from {} ({} rows read)",
            table.len(),
            table.instruments().len(),
            self.path.display(),
            original_len
        );
        Ok(table)
    }
}

// =============================================================================
// Result Output
// =============================================================================

/// Write the result table to `path`, creating parent directories
pub fn write_results_csv(rows: &[ResultRow], path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create results directory")?;
    }

    let file = File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = csv::Writer::from_writer(file);
    for row in rows {
        writer.serialize(row).context("Failed to write result row")?;
    }
    writer.flush().context("Failed to flush results")?;

    info!("Saved {} rows to {}", rows.len(), path.display());
    Ok(path.to_path_buf())
}

pub fn results_to_csv_string(rows: &[ResultRow]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer.serialize(row).context("Failed to write result row")?;
    }
    let bytes = writer.into_inner().context("Failed to finish CSV output")?;
    String::from_utf8(bytes).context("Result CSV is not UTF-8")
}

/// Read a result table written by [`write_results_csv`]
pub fn load_results_csv(path: impl AsRef<Path>) -> Result<Vec<ResultRow>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open results file {}", path.display()))?;

    reader
        .deserialize()
        .enumerate()
        .map(|(i, row)| row.with_context(|| format!("Failed to parse result row {}", i + 1)))
        .collect()
}

// =============================================================================
// Tests
// =============================================================================
