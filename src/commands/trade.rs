//! Trade command: evaluate the persisted strategy on the latest candles.
//!
//! Prints the signal and the trailing stop that would protect a new position.
//! Order placement belongs to the execution engine.

use anyhow::{Context, Result};
use chrono::Duration;
use std::path::PathBuf;
use tracing::info;

use strategy_tuner::backtest::Backtester;
use strategy_tuner::data::{interval_minutes, TimeRange};
use strategy_tuner::indicators::latest_atr;
use strategy_tuner::store;
use strategy_tuner::strategies::Strategy;
use strategy_tuner::trailing_stop::TrailingStop;
use strategy_tuner::{Config, Side, Signal};

use super::{candle_provider, fetch_candles, history_end};

pub async fn run(
    mut config: Config,
    params: Option<PathBuf>,
    candles: Option<PathBuf>,
    position: Option<Side>,
) -> Result<()> {
    let params_file = params.unwrap_or_else(|| config.params_file.clone());
    let set = store::load(&params_file)
        .context(format!("Failed to load {}", params_file.display()))?;
    config.market.symbol = set.symbol.clone();
    config.market.timeframe = set.timeframe.clone();

    let backtester = Backtester::new(
        config.backtest_settings()?,
        &set.strategy,
        &set.trailing_stop,
    );
    let window = backtester.strategy_window();

    let bar = Duration::minutes(interval_minutes(&config.market.timeframe)?);
    let end = history_end(&config, candles.as_deref())?;
    let range = TimeRange {
        start: end - bar * (window as i32 + 1),
        end,
    };
    let provider = candle_provider(&config, candles.as_deref())?;
    let recent = fetch_candles(provider.as_ref(), &config, range).await?;

    if recent.len() < backtester.warmup_bars() {
        anyhow::bail!(
            "Need at least {} candles, got {}",
            backtester.warmup_bars(),
            recent.len()
        );
    }
    let tail = &recent[recent.len().saturating_sub(window)..];
    let last = tail.last().context("No candles")?;

    let strategy = set.strategy.build();
    let signal = strategy.generate_signal(tail, position);
    info!(
        signal = ?signal,
        close = last.close,
        "Evaluated {} at {}",
        strategy.name(),
        last.datetime
    );

    let highs: Vec<f64> = tail.iter().map(|c| c.high).collect();
    let lows: Vec<f64> = tail.iter().map(|c| c.low).collect();
    let closes: Vec<f64> = tail.iter().map(|c| c.close).collect();
    let atr = latest_atr(&highs, &lows, &closes, set.trailing_stop.atr_period);

    println!("\n{}", "=".repeat(60));
    println!("SIGNAL {} {} ({})", set.strategy_name(), set.symbol, set.timeframe);
    println!("{}", "=".repeat(60));
    println!("Bar:                {}", last.datetime.format("%Y-%m-%d %H:%M"));
    println!("Close:              {:.2}", last.close);
    println!(
        "Position:           {}",
        position.map(|s| s.to_string()).unwrap_or_else(|| "FLAT".to_string())
    );
    println!("Signal:             {:?}", signal);

    let entry_side = match signal {
        Signal::EnterLong => Some(Side::Long),
        Signal::EnterShort => Some(Side::Short),
        Signal::Exit | Signal::Hold => None,
    };
    match (entry_side, atr) {
        (Some(side), Some(atr)) => {
            let stop = TrailingStop::open(side, last.close, atr, set.trailing_stop.atr_multiplier);
            println!("ATR({}):            {:.2}", set.trailing_stop.atr_period, atr);
            println!("Initial stop:       {:.2}", stop.level());
        }
        (Some(_), None) => println!("Initial stop:       unavailable (ATR not ready)"),
        (None, _) => {}
    }
    println!("{}", "=".repeat(60));

    Ok(())
}
