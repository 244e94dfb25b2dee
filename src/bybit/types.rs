//! Types for the Bybit v5 REST API
//!
//! Bybit wraps every payload in `{retCode, retMsg, result}` and encodes
//! numbers as strings.

use anyhow::{Context, Result};
use chrono::DateTime;
use serde::Deserialize;

use crate::Candle;

/// Response envelope
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response<T> {
    pub ret_code: i64,
    pub ret_msg: String,
    pub result: Option<T>,
}

impl<T> Response<T> {
    /// Payload of a successful response
    pub fn into_result(self) -> Result<T> {
        if self.ret_code != 0 {
            anyhow::bail!("Bybit error {}: {}", self.ret_code, self.ret_msg);
        }
        self.result.context("Bybit response has no result")
    }
}

/// Result of `/v5/market/kline`
#[derive(Debug, Clone, Deserialize)]
pub struct KlineResult {
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub category: String,
    /// `[startTime, open, high, low, close, volume, turnover]`, newest first
    #[serde(default)]
    pub list: Vec<Vec<String>>,
}

fn field(row: &[String], idx: usize, name: &str) -> Result<f64> {
    row.get(idx)
        .context(format!("Kline row missing {}", name))?
        .parse()
        .context(format!("Invalid kline {}", name))
}

impl KlineResult {
    /// Candles oldest first
    pub fn candles(&self) -> Result<Vec<Candle>> {
        let mut candles = self
            .list
            .iter()
            .map(|row| parse_kline(row))
            .collect::<Result<Vec<_>>>()?;
        candles.reverse();
        Ok(candles)
    }
}

/// Convert one kline row to a candle
pub fn parse_kline(row: &[String]) -> Result<Candle> {
    let start_ms: i64 = row
        .first()
        .context("Kline row missing start time")?
        .parse()
        .context("Invalid kline start time")?;
    let datetime = DateTime::from_timestamp_millis(start_ms)
        .context(format!("Kline start time out of range: {}", start_ms))?;

    Candle::new(
        datetime,
        field(row, 1, "open")?,
        field(row, 2, "high")?,
        field(row, 3, "low")?,
        field(row, 4, "close")?,
        field(row, 5, "volume")?,
    )
    .context(format!("Invalid kline at {}", datetime))
}
