//! Subcommands and the glue they share

pub mod optimize;
pub mod trade;
pub mod validate;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use std::path::Path;
use tracing::{info, warn};

use strategy_tuner::bybit::BybitClient;
use strategy_tuner::data::{self, CandleProvider, CsvProvider, TimeRange};
use strategy_tuner::{Candle, Config, PerformanceMetrics};

/// CSV file when given, Bybit otherwise
pub fn candle_provider(config: &Config, csv: Option<&Path>) -> Result<Box<dyn CandleProvider>> {
    let provider: Box<dyn CandleProvider> = match csv {
        Some(path) => {
            info!("Reading candles from {}", path.display());
            Box::new(CsvProvider::new(path))
        }
        None => {
            info!(
                "Fetching candles from Bybit ({})",
                config.exchange.environment
            );
            Box::new(BybitClient::from_config(&config.exchange)?)
        }
    };
    Ok(provider)
}

/// End of the available history: one bar after the last CSV candle, or now
pub fn history_end(config: &Config, csv: Option<&Path>) -> Result<DateTime<Utc>> {
    match csv {
        Some(path) => {
            let candles = data::load_csv(path)?;
            let last = candles
                .last()
                .context(format!("{} contains no candles", path.display()))?;
            let bar = Duration::minutes(data::interval_minutes(&config.market.timeframe)?);
            Ok(last.datetime + bar)
        }
        None => Ok(Utc::now()),
    }
}

/// Fetch and sanity-check the candles of `range`
pub async fn fetch_candles(
    provider: &dyn CandleProvider,
    config: &Config,
    range: TimeRange,
) -> Result<Vec<Candle>> {
    let candles = provider
        .fetch(&config.market.symbol, &config.market.timeframe, range.start, range.end)
        .await
        .context("Failed to load candles")?;

    let check = data::validate_candles(&candles);
    for warning in &check.warnings {
        warn!("{}", warning);
    }
    if !check.is_valid() {
        anyhow::bail!("Invalid candle data: {}", check.errors.join("; "));
    }

    info!(
        "Loaded {} {} candles for {} ({} to {})",
        candles.len(),
        config.market.timeframe,
        config.market.symbol,
        range.start.format("%Y-%m-%d %H:%M"),
        range.end.format("%Y-%m-%d %H:%M")
    );
    Ok(candles)
}

pub fn print_metrics(metrics: &PerformanceMetrics) {
    println!("Total Return:       {:.2}%", metrics.total_return * 100.0);
    println!("Sharpe Ratio:       {:.2}", metrics.sharpe_ratio);
    println!("Calmar Ratio:       {:.2}", metrics.calmar_ratio);
    println!("Max Drawdown:       {:.2}%", metrics.max_drawdown * 100.0);
    println!("Win Rate:           {:.2}%", metrics.win_rate * 100.0);
    println!("Profit Factor:      {:.2}", metrics.profit_factor);
    println!("Total Trades:       {}", metrics.total_trades);
    println!("Winning Trades:     {}", metrics.winning_trades);
    println!("Losing Trades:      {}", metrics.losing_trades);
}
