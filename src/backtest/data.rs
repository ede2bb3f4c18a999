//! Historical bar loading and normalization.
//!
//! Raw rows come from a [`BarSource`] (CSV file or in-memory rows); the
//! [`BarSeries`] normalizer tags every bar with its local trading day and an
//! "HH:MM" time-of-day label and groups bars into [`Session`]s.

use crate::error::{BacktestError, Result};
use chrono::{DateTime, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

/// Interpretation of timestamps that carry no offset or zone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NaiveTimestampPolicy {
    /// Naive strings are UTC instants.
    #[default]
    Utc,
    /// Naive strings are wall-clock times in the configured local zone.
    Local,
}

/// A bar record as delivered by a bar source, before normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawBar {
    /// Timestamp text: RFC 3339, offset-qualified, or naive wall clock
    pub timestamp: String,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Option<Decimal>,
}

/// A normalized bar tagged with its local trading day and time-of-day label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub day: NaiveDate,
    /// Canonical local "HH:MM" label
    pub time_label: String,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// All bars of one local trading day, ordered by timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub day: NaiveDate,
    pub bars: Vec<Bar>,
}

impl Session {
    /// First bar carrying the given time-of-day label.
    pub fn bar_at(&self, label: &str) -> Option<&Bar> {
        self.bars.iter().find(|b| b.time_label == label)
    }

    /// Calendar month key ("YYYY-MM") of the trading day.
    pub fn month_key(&self) -> String {
        month_key(self.day)
    }

    /// Bars strictly after `entry` up to and including `deadline`.
    pub fn window<'a>(
        &'a self,
        entry: &'a Bar,
        deadline: &'a Bar,
    ) -> impl Iterator<Item = &'a Bar> + 'a {
        self.bars
            .iter()
            .filter(move |b| b.timestamp > entry.timestamp && b.timestamp <= deadline.timestamp)
    }
}

/// Calendar month key ("YYYY-MM") for a trading day.
pub fn month_key(day: NaiveDate) -> String {
    day.format("%Y-%m").to_string()
}

/// A request to a bar source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarRequest {
    pub symbol: String,
    /// Lookback, e.g. "6 M"
    pub duration: String,
    /// Bar size, e.g. "15 mins"
    pub bar_size: String,
}

impl Default for BarRequest {
    fn default() -> Self {
        Self {
            symbol: "DIA".to_string(),
            duration: "6 M".to_string(),
            bar_size: "15 mins".to_string(),
        }
    }
}

/// Producer of raw bar records.
///
/// Gaps in the returned series are tolerated; they surface later as
/// "missing bars" session skips.
#[cfg_attr(test, mockall::automock)]
pub trait BarSource: Send + Sync {
    /// Fetch the bars for a symbol / duration / bar size.
    fn fetch_bars(&self, request: &BarRequest) -> Result<Vec<RawBar>>;
}

/// CSV bar source for historical backtesting.
///
/// Expected CSV format (column order free, names case-insensitive, volume optional):
/// ```csv
/// date,open,high,low,close,volume
/// 2024-01-02 09:30:00-05:00,376.10,376.80,375.90,376.55,120000
/// ```
#[derive(Debug, Clone)]
pub struct CsvBarSource {
    rows: Vec<RawBar>,
}

const TIMESTAMP_COLUMNS: [&str; 4] = ["date", "datetime", "timestamp", "time"];

impl CsvBarSource {
    /// Load bars from a CSV file.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            BacktestError::data_format(format!("failed to read {}: {e}", path.display()))
        })?;

        Self::from_csv_content(&content)
    }

    /// Load bars from CSV content.
    pub fn from_csv_content(content: &str) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(content.as_bytes());

        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_ascii_lowercase())
            .collect();
        let columns = ColumnMap::resolve(&headers)?;

        let mut rows = Vec::new();
        for (idx, record) in reader.records().enumerate() {
            let record = record?;
            // Header is line 1
            let line = idx + 2;
            if record.iter().all(|field| field.is_empty()) {
                continue;
            }
            rows.push(columns.parse_row(&record, line)?);
        }

        if rows.is_empty() {
            return Err(BacktestError::data_format("CSV contains no data rows"));
        }

        debug!(rows = rows.len(), "Parsed bar CSV");
        Ok(Self { rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl BarSource for CsvBarSource {
    fn fetch_bars(&self, _request: &BarRequest) -> Result<Vec<RawBar>> {
        Ok(self.rows.clone())
    }
}

/// Column positions resolved from a CSV header.
struct ColumnMap {
    timestamp: usize,
    open: usize,
    high: usize,
    low: usize,
    close: usize,
    volume: Option<usize>,
}

impl ColumnMap {
    fn resolve(headers: &[String]) -> Result<Self> {
        let find = |name: &str| headers.iter().position(|h| h == name);

        let timestamp = TIMESTAMP_COLUMNS.iter().find_map(|name| find(*name));
        let mut missing = Vec::new();
        if timestamp.is_none() {
            missing.push("date");
        }
        let mut price = |name: &'static str| {
            let pos = find(name);
            if pos.is_none() {
                missing.push(name);
            }
            pos
        };
        let (open, high, low, close) = (price("open"), price("high"), price("low"), price("close"));

        match (timestamp, open, high, low, close) {
            (Some(timestamp), Some(open), Some(high), Some(low), Some(close)) => Ok(Self {
                timestamp,
                open,
                high,
                low,
                close,
                volume: find("volume"),
            }),
            _ => Err(BacktestError::data_format(format!(
                "missing required columns: {}",
                missing.join(", ")
            ))),
        }
    }

    fn parse_row(&self, record: &csv::StringRecord, line: usize) -> Result<RawBar> {
        let field = |idx: usize| record.get(idx).unwrap_or("");

        let timestamp = field(self.timestamp);
        if timestamp.is_empty() {
            return Err(BacktestError::data_format(format!(
                "line {line}: empty timestamp"
            )));
        }

        let volume = match self.volume.map(field) {
            Some(v) if !v.is_empty() => Some(parse_decimal(v, "volume", line)?),
            _ => None,
        };

        Ok(RawBar {
            timestamp: timestamp.to_string(),
            open: parse_decimal(field(self.open), "open", line)?,
            high: parse_decimal(field(self.high), "high", line)?,
            low: parse_decimal(field(self.low), "low", line)?,
            close: parse_decimal(field(self.close), "close", line)?,
            volume,
        })
    }
}

fn parse_decimal(text: &str, column: &str, line: usize) -> Result<Decimal> {
    Decimal::from_str(text)
        .or_else(|_| Decimal::from_scientific(text))
        .map_err(|_| {
            BacktestError::data_format(format!("line {line}: invalid {column} value '{text}'"))
        })
}

const OFFSET_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S%:z",
    "%Y-%m-%d %H:%M:%S%z",
    "%Y-%m-%d %H:%M%:z",
    "%Y%m%d %H:%M:%S%:z",
];

const NAIVE_FORMATS: [&str; 7] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y%m%d %H:%M:%S",
];

/// Parse a timestamp string into an absolute instant.
///
/// Offset-qualified strings keep their offset. Naive strings are resolved by
/// `policy`; a local wall-clock time inside a DST gap is rejected and an
/// ambiguous one resolves to the earlier instant.
pub fn parse_timestamp(text: &str, tz: Tz, policy: NaiveTimestampPolicy) -> Result<DateTime<Utc>> {
    // Collapse the double space some brokers emit ("20240102  09:30:00")
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");

    if let Ok(dt) = DateTime::parse_from_rfc3339(&text) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(&text, fmt) {
            return Ok(dt.with_timezone(&Utc));
        }
    }

    let (naive_text, policy) = match text.strip_suffix(" UTC") {
        Some(stripped) => (stripped, NaiveTimestampPolicy::Utc),
        None => (text.as_str(), policy),
    };
    for fmt in NAIVE_FORMATS {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(naive_text, fmt) {
            return localize(ndt, tz, policy, &text);
        }
    }

    Err(BacktestError::data_format(format!(
        "unparseable timestamp '{text}'"
    )))
}

fn localize(
    ndt: NaiveDateTime,
    tz: Tz,
    policy: NaiveTimestampPolicy,
    original: &str,
) -> Result<DateTime<Utc>> {
    match policy {
        NaiveTimestampPolicy::Utc => Ok(ndt.and_utc()),
        NaiveTimestampPolicy::Local => match tz.from_local_datetime(&ndt) {
            LocalResult::Single(dt) => Ok(dt.with_timezone(&Utc)),
            LocalResult::Ambiguous(earliest, _) => Ok(earliest.with_timezone(&Utc)),
            LocalResult::None => Err(BacktestError::data_format(format!(
                "timestamp '{original}' does not exist in {tz}"
            ))),
        },
    }
}

/// Normalized bars sorted ascending by absolute timestamp.
#[derive(Debug, Clone, Default)]
pub struct BarSeries {
    bars: Vec<Bar>,
}

impl BarSeries {
    /// Normalize raw rows into local-day / time-label tagged bars.
    ///
    /// Fails on the first unparseable timestamp. Prices are passed through
    /// unvalidated.
    pub fn normalize(raw: Vec<RawBar>, tz: Tz, policy: NaiveTimestampPolicy) -> Result<Self> {
        let mut bars = Vec::with_capacity(raw.len());

        for row in raw {
            let timestamp = parse_timestamp(&row.timestamp, tz, policy)?;
            let local = timestamp.with_timezone(&tz);

            bars.push(Bar {
                timestamp,
                day: local.date_naive(),
                time_label: local.format("%H:%M").to_string(),
                open: row.open,
                high: row.high,
                low: row.low,
                close: row.close,
                volume: row.volume.unwrap_or(Decimal::ZERO),
            });
        }

        bars.sort_by_key(|b| b.timestamp);
        Ok(Self { bars })
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// First and last bar timestamps.
    pub fn available_range(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        match (self.bars.first(), self.bars.last()) {
            (Some(first), Some(last)) => Some((first.timestamp, last.timestamp)),
            _ => None,
        }
    }

    /// Group bars by local trading day, in chronological order.
    pub fn sessions(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = Vec::new();

        for bar in &self.bars {
            match sessions.last_mut() {
                Some(session) if session.day == bar.day => session.bars.push(bar.clone()),
                _ => sessions.push(Session {
                    day: bar.day,
                    bars: vec![bar.clone()],
                }),
            }
        }

        sessions
    }
}
