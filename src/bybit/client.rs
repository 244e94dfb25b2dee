//! HTTP client for Bybit market data

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::time::Duration as StdDuration;
use tracing::{debug, info, warn};

use super::types::{KlineResult, Response};
use crate::config::{Environment, ExchangeConfig};
use crate::data::{interval_minutes, CandleProvider};
use crate::Candle;

const KLINE_PATH: &str = "/v5/market/kline";

/// Maximum klines per request
pub const KLINE_PAGE_LIMIT: usize = 1000;

const REQUEST_DELAY_MS: u64 = 200;

#[derive(Debug, Clone)]
pub struct BybitClient {
    base_url: String,
    category: String,
    client: reqwest::Client,
    request_delay: StdDuration,
}

impl BybitClient {
    pub fn new(environment: Environment, category: &str) -> Result<Self> {
        Self::with_base_url(environment.base_url(), category)
    }

    pub fn from_config(config: &ExchangeConfig) -> Result<Self> {
        Self::new(config.environment, &config.category)
    }

    pub fn with_base_url(base_url: &str, category: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(StdDuration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(BybitClient {
            base_url: base_url.trim_end_matches('/').to_string(),
            category: category.to_string(),
            client,
            request_delay: StdDuration::from_millis(REQUEST_DELAY_MS),
        })
    }

    /// One page of klines ending at `end` (inclusive), oldest first
    pub async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let url = format!("{}{}", self.base_url, KLINE_PATH);
        let query = [
            ("category", self.category.clone()),
            ("symbol", symbol.to_string()),
            ("interval", interval.to_string()),
            ("start", start.timestamp_millis().to_string()),
            ("end", end.timestamp_millis().to_string()),
            ("limit", limit.clamp(1, KLINE_PAGE_LIMIT).to_string()),
        ];

        let response = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .await
            .context("Failed to fetch klines")?;

        if !response.status().is_success() {
            anyhow::bail!("Bybit returned status: {}", response.status());
        }

        let body: Response<KlineResult> =
            response.json().await.context("Failed to parse kline response")?;
        body.into_result()?.candles()
    }

    /// Full history in `[start, end)`, paging backwards from `end`
    pub async fn get_historical_klines(
        &self,
        symbol: &str,
        interval: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let bar = Duration::minutes(interval_minutes(interval)?);

        info!(
            "Fetching {} {} klines from {} to {}",
            symbol,
            interval,
            start.format("%Y-%m-%d %H:%M"),
            end.format("%Y-%m-%d %H:%M")
        );

        let mut all_candles: Vec<Candle> = Vec::new();
        let mut current_end = end - Duration::milliseconds(1);

        while current_end >= start {
            let candles = self
                .get_klines(symbol, interval, start, current_end, KLINE_PAGE_LIMIT)
                .await?;

            let Some(oldest) = candles.first().map(|c| c.datetime) else {
                warn!("No more data available before {}", current_end);
                break;
            };

            debug!(
                "  Fetched {} klines, oldest: {}",
                candles.len(),
                oldest.format("%Y-%m-%d %H:%M")
            );

            let short_page = candles.len() < KLINE_PAGE_LIMIT;
            all_candles.extend(candles);

            if short_page || oldest <= start {
                break;
            }
            current_end = oldest - Duration::milliseconds(1);

            // Rate limiting
            tokio::time::sleep(self.request_delay).await;
        }

        // Sort by time (oldest first) and deduplicate
        all_candles.sort_by_key(|c| c.datetime);
        all_candles.dedup_by_key(|c| c.datetime);
        all_candles.retain(|c| c.datetime >= start && c.datetime < end);

        let expected = ((end - start).num_minutes() / bar.num_minutes().max(1)) as usize;
        info!(
            "Total klines fetched: {} (expected ~{})",
            all_candles.len(),
            expected
        );

        Ok(all_candles)
    }
}

#[async_trait]
impl CandleProvider for BybitClient {
    async fn fetch(
        &self,
        symbol: &str,
        timeframe: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        self.get_historical_klines(symbol, timeframe, start, end).await
    }
}
