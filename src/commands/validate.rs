//! Validate command: re-run persisted parameters on the window after their
//! in-sample period

use anyhow::{Context, Result};
use chrono::Duration;
use std::path::PathBuf;
use tracing::{info, warn};

use strategy_tuner::backtest::run_backtest;
use strategy_tuner::data::TimeRange;
use strategy_tuner::store::{self, ArtifactMetrics};
use strategy_tuner::validator::OutOfSampleValidator;
use strategy_tuner::Config;

use super::optimize::print_report;
use super::{candle_provider, fetch_candles, history_end};

pub async fn run(
    mut config: Config,
    validation_days: Option<u32>,
    candles: Option<PathBuf>,
    params: Option<PathBuf>,
) -> Result<()> {
    if let Some(days) = validation_days {
        config.validation.days = days;
    }
    let params_file = params.unwrap_or_else(|| config.params_file.clone());

    let set = store::load(&params_file)
        .context(format!("Failed to load {}", params_file.display()))?;
    info!(
        "Loaded {} parameters for {} ({}) from {}",
        set.strategy_name(),
        set.symbol,
        set.timeframe,
        params_file.display()
    );

    if set.symbol != config.market.symbol || set.timeframe != config.market.timeframe {
        info!(
            "Using the artifact's market {} ({}) instead of the configured one",
            set.symbol, set.timeframe
        );
        config.market.symbol = set.symbol.clone();
        config.market.timeframe = set.timeframe.clone();
    }

    let backtest = config.backtest_settings()?;
    let oos_start = set.in_sample.end + Duration::milliseconds(1);
    let oos_end = (oos_start + Duration::days(config.validation.days as i64))
        .min(history_end(&config, candles.as_deref())?);
    if oos_end <= oos_start {
        anyhow::bail!(
            "No data after the in-sample window ending {}",
            set.in_sample.end
        );
    }

    let provider = candle_provider(&config, candles.as_deref())?;
    let all = fetch_candles(
        provider.as_ref(),
        &config,
        TimeRange {
            start: set.in_sample.start,
            end: oos_end,
        },
    )
    .await?;

    let in_sample = TimeRange {
        start: set.in_sample.start,
        end: oos_start,
    }
    .slice(&all);
    let out_of_sample = TimeRange {
        start: oos_start,
        end: oos_end,
    }
    .slice(&all);

    // The in-sample score is recomputed; the artifact stores metrics only
    let replay = run_backtest(in_sample, &set.strategy, &set.trailing_stop, &backtest)?;
    if ArtifactMetrics::from(&replay.metrics) != set.metrics {
        warn!(
            "In-sample replay differs from the stored metrics (data revised or settings changed): {:?} vs {:?}",
            ArtifactMetrics::from(&replay.metrics),
            set.metrics
        );
    }
    let in_sample_score = config.objective.score(&replay.metrics);

    let validator = OutOfSampleValidator::new(
        config.validation_policy(),
        config.objective.clone(),
        backtest,
    );
    let report = validator.validate(
        &set.strategy,
        &set.trailing_stop,
        set.in_sample,
        in_sample_score,
        out_of_sample,
    )?;

    print_report(&report);
    Ok(())
}
