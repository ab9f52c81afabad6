//! Result table summaries
//!
//! Per-stream outcome statistics and a month-by-month profit matrix over an
//! assembled result table. Profits are in instrument points, so totals are
//! only meaningful within one instrument; the matrix is rendered per stream.

use chrono::Datelike;
use statrs::statistics::Statistics;
use std::collections::BTreeMap;

use crate::assembler::ResultRow;
use crate::TradeResult;

/// Outcome counts and profit statistics for one stream
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamSummary {
    pub stream: String,
    pub wins: usize,
    pub losses: usize,
    pub break_even: usize,
    pub time_exits: usize,
    pub no_trade: usize,
    pub setup: usize,
    pub total_profit: f64,
    pub mean_profit: f64,
    /// Sample standard deviation of per-trade profit
    pub std_dev_profit: f64,
    pub mean_peak: f64,
}

impl StreamSummary {
    pub fn trades(&self) -> usize {
        self.wins + self.losses + self.break_even + self.time_exits
    }

    /// Wins as a percentage of trades
    pub fn win_rate(&self) -> f64 {
        let trades = self.trades();
        if trades > 0 {
            (self.wins as f64 / trades as f64) * 100.0
        } else {
            0.0
        }
    }

    fn from_rows(stream: &str, rows: &[&ResultRow]) -> Self {
        let mut summary = StreamSummary {
            stream: stream.to_string(),
            ..Default::default()
        };

        let mut profits = Vec::new();
        let mut peaks = Vec::new();
        for row in rows {
            match row.result {
                TradeResult::Win => summary.wins += 1,
                TradeResult::Loss => summary.losses += 1,
                TradeResult::BreakEven => summary.break_even += 1,
                TradeResult::Time => summary.time_exits += 1,
                TradeResult::NoTrade => summary.no_trade += 1,
                TradeResult::Setup => summary.setup += 1,
            }
            if row.result.is_trade() {
                profits.push(row.profit.unwrap_or(0.0));
                if let Some(peak) = row.peak {
                    peaks.push(peak);
                }
            }
        }

        summary.total_profit = profits.iter().sum();
        if !profits.is_empty() {
            summary.mean_profit = profits.iter().mean();
        }
        if profits.len() > 1 {
            summary.std_dev_profit = profits.iter().std_dev();
        }
        if !peaks.is_empty() {
            summary.mean_peak = peaks.iter().mean();
        }
        summary
    }
}

/// Summaries for every stream, in stream order
pub fn summarize_streams(rows: &[ResultRow]) -> Vec<StreamSummary> {
    let mut by_stream: BTreeMap<&str, Vec<&ResultRow>> = BTreeMap::new();
    for row in rows {
        by_stream.entry(row.stream.as_str()).or_default().push(row);
    }
    by_stream
        .into_iter()
        .map(|(stream, rows)| StreamSummary::from_rows(stream, &rows))
        .collect()
}

pub fn render_stream_table(summaries: &[StreamSummary]) -> String {
    let mut output = String::new();
    output.push_str(&format!(
        "{:<8} {:>7} {:>6} {:>6} {:>5} {:>6} {:>8} {:>7} {:>10} {:>9} {:>9} {:>9}\n",
        "Stream",
        "Trades",
        "Win",
        "Loss",
        "BE",
        "TIME",
        "NoTrade",
        "Win%",
        "Profit",
        "Mean",
        "StdDev",
        "MeanPeak"
    ));
    output.push_str(&format!("{}\n", "-".repeat(100)));
    for s in summaries {
        output.push_str(&format!(
            "{:<8} {:>7} {:>6} {:>6} {:>5} {:>6} {:>8} {:>6.1}% {:>10.2} {:>9.2} {:>9.2} {:>9.2}\n",
            s.stream,
            s.trades(),
            s.wins,
            s.losses,
            s.break_even,
            s.time_exits,
            s.no_trade + s.setup,
            s.win_rate(),
            s.total_profit,
            s.mean_profit,
            s.std_dev_profit,
            s.mean_peak
        ));
    }
    output
}

/// Year-Month key for organizing data
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonthlyProfit {
    pub profit: f64,
    pub trades: usize,
    pub wins: usize,
}

/// Monthly profit (points) for one stream, organized by year and month
#[derive(Debug, Clone)]
pub struct MonthlyProfitMatrix {
    stream: String,
    data: BTreeMap<YearMonth, MonthlyProfit>,
}

impl MonthlyProfitMatrix {
    pub fn from_rows<'a>(stream: &str, rows: impl IntoIterator<Item = &'a ResultRow>) -> Self {
        let mut data: BTreeMap<YearMonth, MonthlyProfit> = BTreeMap::new();

        for row in rows.into_iter().filter(|r| r.stream == stream && r.result.is_trade()) {
            let ym = YearMonth {
                year: row.date.year(),
                month: row.date.month(),
            };
            let cell = data.entry(ym).or_default();
            cell.profit += row.profit.unwrap_or(0.0);
            cell.trades += 1;
            if row.result == TradeResult::Win {
                cell.wins += 1;
            }
        }

        Self {
            stream: stream.to_string(),
            data,
        }
    }

    /// One matrix per stream present in `rows`
    pub fn per_stream(rows: &[ResultRow]) -> Vec<Self> {
        let mut streams: Vec<&str> = rows.iter().map(|r| r.stream.as_str()).collect();
        streams.sort();
        streams.dedup();
        streams
            .into_iter()
            .map(|s| Self::from_rows(s, rows))
            .collect()
    }

    fn years(&self) -> Vec<i32> {
        let mut years: Vec<i32> = self.data.keys().map(|ym| ym.year).collect();
        years.dedup();
        years
    }

    pub fn get(&self, year: i32, month: u32) -> Option<&MonthlyProfit> {
        self.data.get(&YearMonth { year, month })
    }

    pub fn yearly_total(&self, year: i32) -> f64 {
        self.data
            .iter()
            .filter(|(ym, _)| ym.year == year)
            .map(|(_, m)| m.profit)
            .sum()
    }

    pub fn total_profit(&self) -> f64 {
        self.data.values().map(|m| m.profit).sum()
    }

    pub fn render(&self) -> String {
        if self.data.is_empty() {
            return format!("{}: no trades to display.\n", self.stream);
        }

        let mut output = String::new();
        output.push_str(&format!("\n{}\n", "=".repeat(112)));
        output.push_str(&format!("MONTHLY PROFIT MATRIX (points) - {}\n", self.stream));
        output.push_str(&format!("{}\n", "=".repeat(112)));

        output.push_str(&format!("{:>6} │", "Year"));
        for name in [
            "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
        ] {
            output.push_str(&format!(" {:>6} │", name));
        }
        output.push_str(&format!(" {:>9}\n", "Total"));
        output.push_str(&format!("{}\n", "-".repeat(112)));

        for year in self.years() {
            output.push_str(&format!("{:>6} │", year));
            for month in 1..=12 {
                match self.get(year, month) {
                    Some(m) => output.push_str(&format!(" {:>6.2} │", m.profit)),
                    None => output.push_str(&format!(" {:>6} │", "")),
                }
            }
            output.push_str(&format!(" {:>9.2}\n", self.yearly_total(year)));
        }

        output.push_str(&format!("{}\n", "=".repeat(112)));

        let profitable = self.data.values().filter(|m| m.profit > 0.0).count();
        let months = self.data.len();
        output.push_str(&format!(
            "Total: {:.2} points, {} profitable of {} months\n",
            self.total_profit(),
            profitable,
            months
        ));

        output
    }
}
