//! Data loading and management
//!
//! Candle sources for the optimizer: CSV files for offline runs and the
//! [`CandleProvider`] seam implemented by the Bybit client. Also splits a
//! history into the in-sample and later out-of-sample windows.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::Candle;

// =============================================================================
// Intervals
// =============================================================================

/// Kline intervals accepted by Bybit
pub const INTERVALS: &[&str] = &[
    "1", "3", "5", "15", "30", "60", "120", "240", "360", "720", "D", "W", "M",
];

const MINUTES_PER_YEAR: f64 = 365.0 * 24.0 * 60.0;

/// Minutes per bar for a Bybit interval
pub fn interval_minutes(interval: &str) -> Result<i64> {
    let minutes = match interval {
        "D" => 1440,
        "W" => 10_080,
        "M" => 43_200,
        other if INTERVALS.contains(&other) => other
            .parse::<i64>()
            .context(format!("Invalid interval: {}", other))?,
        other => anyhow::bail!(
            "Unsupported interval '{}': expected one of {}",
            other,
            INTERVALS.join(", ")
        ),
    };
    Ok(minutes)
}

/// Bars per year, the Sharpe annualisation factor
pub fn periods_per_year(interval: &str) -> Result<f64> {
    Ok(MINUTES_PER_YEAR / interval_minutes(interval)? as f64)
}

// =============================================================================
// Provider seam
// =============================================================================

/// Source of a time-ordered candle series
#[async_trait]
pub trait CandleProvider: Send + Sync {
    /// Candles of `symbol` opening in `[start, end)`, oldest first
    async fn fetch(
        &self,
        symbol: &str,
        timeframe: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>>;
}

/// Serves candles from a CSV file
pub struct CsvProvider {
    path: PathBuf,
}

impl CsvProvider {
    pub fn new(path: impl AsRef<Path>) -> Self {
        CsvProvider {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl CandleProvider for CsvProvider {
    async fn fetch(
        &self,
        symbol: &str,
        timeframe: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let mut candles = load_csv(&self.path)?;
        candles.retain(|c| c.datetime >= start && c.datetime < end);
        debug!(
            "{} {} candles for {} {} from {}",
            candles.len(),
            timeframe,
            symbol,
            start.format("%Y-%m-%d"),
            self.path.display()
        );
        Ok(candles)
    }
}

// =============================================================================
// CSV Data Loading
// =============================================================================

fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
    s.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // Try parsing without timezone and assume UTC
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .map(|ndt| DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc))
        })
        .context(format!("Failed to parse datetime: {}", s))
}

fn parse_field(record: &csv::StringRecord, idx: usize, name: &str) -> Result<f64> {
    record
        .get(idx)
        .context(format!("Missing {} column", name))?
        .trim()
        .parse()
        .context(format!("Failed to parse {}", name))
}

/// Load OHLCV data from CSV file (`datetime,open,high,low,close,volume`)
pub fn load_csv(path: impl AsRef<Path>) -> Result<Vec<Candle>> {
    let mut reader = csv::Reader::from_path(path.as_ref())
        .context(format!("Failed to open CSV file {}", path.as_ref().display()))?;

    let mut candles = Vec::new();

    for (row_idx, result) in reader.records().enumerate() {
        let record = result.context(format!("Failed to read row {}", row_idx + 1))?;

        let datetime = parse_datetime(record.get(0).context("Missing datetime column")?)?;
        let candle = Candle::new(
            datetime,
            parse_field(&record, 1, "open")?,
            parse_field(&record, 2, "high")?,
            parse_field(&record, 3, "low")?,
            parse_field(&record, 4, "close")?,
            parse_field(&record, 5, "volume")?,
        )
        .context(format!("Invalid candle at row {}", row_idx + 1))?;

        candles.push(candle);
    }

    Ok(candles)
}

/// Save candles to CSV file
pub fn save_csv(path: impl AsRef<Path>, candles: &[Candle]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path.as_ref())
        .context(format!("Failed to create {}", path.as_ref().display()))?;

    writer.write_record(["datetime", "open", "high", "low", "close", "volume"])?;
    for candle in candles {
        writer.write_record([
            candle.datetime.format("%Y-%m-%d %H:%M:%S").to_string(),
            candle.open.to_string(),
            candle.high.to_string(),
            candle.low.to_string(),
            candle.close.to_string(),
            candle.volume.to_string(),
        ])?;
    }
    writer.flush()?;

    info!("Saved {} rows to {}", candles.len(), path.as_ref().display());
    Ok(())
}

// =============================================================================
// Windows
// =============================================================================

/// Half-open time range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        t >= self.start && t < self.end
    }

    /// Candles of a sorted series that open inside the range
    pub fn slice<'a>(&self, candles: &'a [Candle]) -> &'a [Candle] {
        let from = candles.partition_point(|c| c.datetime < self.start);
        let to = candles.partition_point(|c| c.datetime < self.end);
        &candles[from..to.max(from)]
    }
}

/// In-sample window followed by a later out-of-sample window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataWindows {
    pub in_sample: TimeRange,
    pub out_of_sample: TimeRange,
}

/// Split the history ending at `end`: the last `validation_days` are held out,
/// the `optimization_days` before them are searched.
pub fn split_windows(end: DateTime<Utc>, optimization_days: u32, validation_days: u32) -> DataWindows {
    let boundary = end - Duration::days(validation_days as i64);
    DataWindows {
        in_sample: TimeRange {
            start: boundary - Duration::days(optimization_days as i64),
            end: boundary,
        },
        out_of_sample: TimeRange {
            start: boundary,
            end,
        },
    }
}

// =============================================================================
// Data Validation
// =============================================================================

/// Validate candle data for consistency
pub fn validate_candles(candles: &[Candle]) -> ValidationResult {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if candles.is_empty() {
        errors.push("No candles provided".to_string());
        return ValidationResult { errors, warnings };
    }

    for (i, candle) in candles.iter().enumerate() {
        if let Err(e) = candle.validate() {
            errors.push(format!("Candle {}: {}", i, e));
        }
        if i > 0 && candle.datetime <= candles[i - 1].datetime {
            warnings.push(format!("Candle {}: not chronological", i));
        }
    }

    ValidationResult { errors, warnings }
}

/// Result of data validation
#[derive(Debug)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn candle(minutes: i64, close: f64) -> Candle {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes);
        Candle::new_unchecked(t, close, close + 1.0, close - 1.0, close, 10.0)
    }

    #[test]
    fn test_interval_minutes() {
        assert_eq!(interval_minutes("5").unwrap(), 5);
        assert_eq!(interval_minutes("240").unwrap(), 240);
        assert_eq!(interval_minutes("D").unwrap(), 1440);
        assert!(interval_minutes("7").is_err());
        assert!(interval_minutes("1h").is_err());
        assert_eq!(periods_per_year("5").unwrap(), 105_120.0);
    }

    #[test]
    fn test_split_windows_disjoint_and_ordered() {
        let end = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let w = split_windows(end, 90, 30);

        assert_eq!(w.out_of_sample.end, end);
        assert_eq!(w.in_sample.end, w.out_of_sample.start);
        assert_eq!(w.out_of_sample.start - w.in_sample.start, Duration::days(90));
        assert!(!w.in_sample.contains(w.out_of_sample.start));
    }

    #[test]
    fn test_slice() {
        let candles: Vec<Candle> = (0..10).map(|i| candle(i * 5, 100.0)).collect();
        let range = TimeRange {
            start: candles[2].datetime,
            end: candles[5].datetime,
        };
        let slice = range.slice(&candles);
        assert_eq!(slice.len(), 3);
        assert_eq!(slice[0].datetime, candles[2].datetime);
    }

    #[test]
    fn test_csv_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("candles.csv");
        let candles: Vec<Candle> = (0..5).map(|i| candle(i * 5, 100.0 + i as f64 * 0.25)).collect();

        save_csv(&path, &candles).unwrap();
        let loaded = load_csv(&path).unwrap();

        assert_eq!(loaded, candles);
    }

    #[tokio::test]
    async fn test_csv_provider_filters_range() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("candles.csv");
        let candles: Vec<Candle> = (0..12).map(|i| candle(i * 5, 100.0)).collect();
        save_csv(&path, &candles).unwrap();

        let provider = CsvProvider::new(&path);
        let fetched = provider
            .fetch("BTCUSDT", "5", candles[3].datetime, candles[9].datetime)
            .await
            .unwrap();

        assert_eq!(fetched.len(), 6);
        assert_eq!(fetched[0].datetime, candles[3].datetime);
    }

    #[test]
    fn test_validate_candles() {
        let mut candles = vec![candle(0, 100.0), candle(5, 101.0)];
        assert!(validate_candles(&candles).is_valid());

        candles.push(candle(5, 102.0));
        let result = validate_candles(&candles);
        assert!(result.is_valid());
        assert_eq!(result.warnings.len(), 1);

        candles[0].high = 90.0;
        assert!(!validate_candles(&candles).is_valid());
        assert!(!validate_candles(&[]).is_valid());
    }
}
