//! Integration tests for the strategy tuner
//!
//! These tests drive the search, validation and persistence path end to end
//! on synthetic candles.

use chrono::{DateTime, Duration, TimeZone, Utc};

use strategy_tuner::backtest::{calculate_metrics, run_backtest, BacktestSettings};
use strategy_tuner::data::{split_windows, TimeRange};
use strategy_tuner::objective::{ObjectivePolicy, WORST_SCORE};
use strategy_tuner::optimizer::{evaluate_candidate, BayesianOptimizer, OptimizerSettings};
use strategy_tuner::space::{bounds_for, ParameterVector};
use strategy_tuner::store::{self, ArtifactMetrics, OptimizedParameterSet};
use strategy_tuner::strategies::{StrategyConfig, StrategyVariant};
use strategy_tuner::trailing_stop::TrailingStopConfig;
use strategy_tuner::validator::{OutOfSampleValidator, ValidationPolicy, WindowSpan};
use strategy_tuner::{Candle, TunerError};
use tempfile::tempdir;

// =============================================================================
// Test Utilities
// =============================================================================

fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// Hourly candles: two superposed cycles on a slow drift
fn generate_wave_candles(count: usize) -> Vec<Candle> {
    let mut prev = 100.0;
    (0..count)
        .map(|i| {
            let t = i as f64;
            let close = 100.0 + 7.0 * (t / 18.0).sin() + 2.5 * (t / 5.0).cos() + 0.004 * t;
            let open = prev;
            prev = close;
            Candle::new_unchecked(
                start_time() + Duration::hours(i as i64),
                open,
                open.max(close) + 0.35,
                open.min(close) - 0.35,
                close,
                1000.0 + (i % 50) as f64,
            )
        })
        .collect()
}

/// Hourly candles of a steady uptrend with regular pullbacks
fn generate_trending_candles(count: usize) -> Vec<Candle> {
    let mut prev = 100.0;
    (0..count)
        .map(|i| {
            let t = i as f64;
            let pullback = if i % 12 >= 9 { -0.6 } else { 0.0 };
            let close = 100.0 + 0.08 * t + 1.5 * (t / 6.0).sin() + pullback;
            let open = prev;
            prev = close;
            Candle::new_unchecked(
                start_time() + Duration::hours(i as i64),
                open,
                open.max(close) + 0.25,
                open.min(close) - 0.25,
                close,
                800.0,
            )
        })
        .collect()
}

fn hourly_settings() -> BacktestSettings {
    BacktestSettings {
        periods_per_year: 365.0 * 24.0,
        ..Default::default()
    }
}

fn lenient_policy() -> ObjectivePolicy {
    ObjectivePolicy {
        min_trades: 1,
        max_drawdown: 1.0,
        ..Default::default()
    }
}

fn optimizer_settings(n_iter: usize, seed: u64) -> OptimizerSettings {
    OptimizerSettings {
        n_iter,
        n_initial_points: 10,
        n_candidates: 300,
        seed: Some(seed),
        ..Default::default()
    }
}

/// 90 in-sample days followed by 30 out-of-sample days of hourly candles
fn scenario_windows(candles: &[Candle]) -> (Vec<Candle>, Vec<Candle>) {
    let end = candles[candles.len() - 1].datetime + Duration::hours(1);
    let windows = split_windows(end, 90, 30);
    (
        windows.in_sample.slice(candles).to_vec(),
        windows.out_of_sample.slice(candles).to_vec(),
    )
}

// =============================================================================
// Parameter Space Tests
// =============================================================================

#[test]
fn test_sampled_vectors_respect_bounds() {
    for variant in StrategyVariant::ALL {
        let space = bounds_for(variant);
        for seed in 0..5 {
            for vector in space.sample(seed, 200) {
                for dim in space.dimensions() {
                    let value = vector.get(dim.name).unwrap();
                    assert!(dim.contains(value), "{} = {} outside bounds", dim.name, value);
                }
                assert!(space.clamp_or_reject(&vector).is_ok());
            }
        }
    }
}

#[test]
fn test_sampling_is_deterministic_per_seed() {
    let space = bounds_for(StrategyVariant::LarryWilliams);
    assert_eq!(space.sample(11, 20), space.sample(11, 20));
    assert_ne!(space.sample(11, 20), space.sample(12, 20));
}

// =============================================================================
// Backtest Tests
// =============================================================================

#[test]
fn test_backtest_determinism() {
    let candles = generate_wave_candles(1500);
    for variant in StrategyVariant::ALL {
        let space = bounds_for(variant);
        let (s, t) = space.split(&space.default_vector());
        let strategy = StrategyConfig::from_params(variant, &s).unwrap();
        let trailing = TrailingStopConfig::from_params(&t).unwrap();

        let a = run_backtest(&candles, &strategy, &trailing, &hourly_settings()).unwrap();
        let b = run_backtest(&candles, &strategy, &trailing, &hourly_settings()).unwrap();

        assert_eq!(a.trades, b.trades);
        assert_eq!(a.metrics, b.metrics);
        assert_eq!(
            a.metrics.sharpe_ratio.to_bits(),
            b.metrics.sharpe_ratio.to_bits()
        );
    }
}

#[test]
fn test_larry_williams_on_trending_market() {
    let candles = generate_trending_candles(1500);
    let strategy = StrategyConfig::LarryWilliams(Default::default());
    let result = run_backtest(
        &candles,
        &strategy,
        &TrailingStopConfig::default(),
        &hourly_settings(),
    )
    .unwrap();

    assert!((0.0..=1.0).contains(&result.metrics.win_rate));
    assert_eq!(result.equity_curve.len(), candles.len());
    assert_eq!(result.metrics.total_trades, result.trades.len());
    for trade in &result.trades {
        assert!(trade.entry_time <= trade.exit_time);
        assert!(trade.entry_time >= candles[0].datetime);
    }
    assert!(result
        .trades
        .windows(2)
        .all(|w| w[0].exit_time <= w[1].entry_time));
}

// =============================================================================
// Optimizer Tests
// =============================================================================

#[test]
fn test_optimizer_monotonic_best_and_bounded_proposals() {
    let candles = generate_wave_candles(1500);
    let space = bounds_for(StrategyVariant::LarryWilliams);
    let outcome = BayesianOptimizer::new(
        space.clone(),
        optimizer_settings(20, 3),
        lenient_policy(),
        hourly_settings(),
    )
    .optimize(&candles)
    .unwrap();

    let history = outcome.run.best_history();
    assert_eq!(history.len(), 20);
    assert!(history.windows(2).all(|w| w[1] >= w[0]));
    assert_eq!(*history.last().unwrap(), outcome.score);

    for record in &outcome.run.records {
        assert!(space.clamp_or_reject(&record.params).is_ok());
    }
}

#[test]
fn test_optimizer_reproducible_with_seed() {
    let candles = generate_wave_candles(1200);
    let run = || {
        BayesianOptimizer::new(
            bounds_for(StrategyVariant::MacdCrossover),
            optimizer_settings(15, 99),
            lenient_policy(),
            hourly_settings(),
        )
        .optimize(&candles)
        .unwrap()
    };

    let a = run();
    let b = run();
    assert_eq!(a.params, b.params);
    assert_eq!(a.result.trades, b.result.trades);
    let scores_a: Vec<f64> = a.run.records.iter().map(|r| r.score).collect();
    let scores_b: Vec<f64> = b.run.records.iter().map(|r| r.score).collect();
    assert_eq!(scores_a, scores_b);
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn test_scenario_a_macd_optimization() {
    let candles = generate_wave_candles(120 * 24);
    let (in_sample, _) = scenario_windows(&candles);
    assert_eq!(in_sample.len(), 90 * 24);

    let outcome = BayesianOptimizer::new(
        bounds_for(StrategyVariant::MacdCrossover),
        optimizer_settings(50, 7),
        lenient_policy(),
        hourly_settings(),
    )
    .optimize(&in_sample)
    .unwrap();

    assert_eq!(outcome.run.records.len(), 50);
    let StrategyConfig::MacdCrossover(cfg) = &outcome.strategy else {
        panic!("expected a MACD configuration");
    };
    assert!((8..=16).contains(&cfg.fast_period));
    assert!((20..=35).contains(&cfg.slow_period));
    assert!(cfg.fast_period < cfg.slow_period);
    assert!((1.0..=4.0).contains(&outcome.trailing_stop.atr_multiplier));
    assert!((10..=20).contains(&outcome.trailing_stop.atr_period));
}

#[test]
fn test_scenario_b_out_of_sample_validation() {
    let candles = generate_wave_candles(120 * 24);
    let (in_sample, out_of_sample) = scenario_windows(&candles);

    let outcome = BayesianOptimizer::new(
        bounds_for(StrategyVariant::MacdCrossover),
        optimizer_settings(15, 21),
        lenient_policy(),
        hourly_settings(),
    )
    .optimize(&in_sample)
    .unwrap();

    let in_span = WindowSpan::of(&in_sample).unwrap();
    let report = OutOfSampleValidator::new(
        ValidationPolicy::default(),
        lenient_policy(),
        hourly_settings(),
    )
    .validate(
        &outcome.strategy,
        &outcome.trailing_stop,
        in_span,
        outcome.score,
        &out_of_sample,
    )
    .unwrap();

    assert!(report.out_of_sample.is_after(&report.in_sample));
    assert_eq!(report.in_sample_score, outcome.score);

    let m = &report.result.metrics;
    assert!((0.0..=1.0).contains(&m.win_rate));

    // Same metric formulas as in-sample
    let recomputed = calculate_metrics(
        &report.result.trades,
        &report.result.equity_curve,
        &hourly_settings(),
    );
    assert_eq!(&recomputed, m);
}

#[test]
fn test_scenario_c_insufficient_data() {
    let candles = generate_wave_candles(20);
    let strategy = StrategyConfig::MacdCrossover(Default::default());

    let result = run_backtest(
        &candles,
        &strategy,
        &TrailingStopConfig::default(),
        &hourly_settings(),
    );
    assert!(matches!(result, Err(TunerError::InsufficientData { available: 20, .. })));

    let failure = BayesianOptimizer::new(
        bounds_for(StrategyVariant::MacdCrossover),
        optimizer_settings(5, 1),
        lenient_policy(),
        hourly_settings(),
    )
    .optimize(&candles)
    .unwrap_err();
    assert!(matches!(failure.error, TunerError::InsufficientData { .. }));
    assert!(failure.run.records.is_empty());
}

#[test]
fn test_scenario_d_fast_not_below_slow_is_rejected() {
    let space = bounds_for(StrategyVariant::MacdCrossover);
    let vector = ParameterVector::new()
        .with("fast_period", 16.0)
        .with("slow_period", 16.0)
        .with("signal_period", 9.0)
        .with("volatility_period", 14.0)
        .with("atr_multiplier", 2.0)
        .with("atr_period", 14.0);

    assert!(matches!(
        space.clamp_or_reject(&vector),
        Err(TunerError::Range { .. })
    ));

    // Far too few candles to simulate: reaching the simulator would be an error
    let candles = generate_wave_candles(5);
    let evaluation = evaluate_candidate(
        &space,
        &candles,
        &vector,
        &lenient_policy(),
        &hourly_settings(),
    )
    .unwrap();

    assert!(evaluation.result.is_none());
    assert_eq!(evaluation.score, WORST_SCORE);
    assert!(evaluation.rejection.unwrap().contains("fast_period"));
}

// =============================================================================
// Window and Persistence Tests
// =============================================================================

#[test]
fn test_validation_window_disjoint_and_later() {
    let candles = generate_wave_candles(120 * 24);
    let (in_sample, out_of_sample) = scenario_windows(&candles);

    let in_span = WindowSpan::of(&in_sample).unwrap();
    let out_span = WindowSpan::of(&out_of_sample).unwrap();
    assert!(out_span.is_after(&in_span));
    assert_eq!(in_sample.len() + out_of_sample.len(), candles.len());

    // Re-using in-sample data for validation is refused
    let validator = OutOfSampleValidator::new(
        ValidationPolicy::default(),
        lenient_policy(),
        hourly_settings(),
    );
    let overlap = TimeRange {
        start: in_span.end - Duration::days(5),
        end: out_span.end,
    };
    let result = validator.validate(
        &StrategyConfig::LarryWilliams(Default::default()),
        &TrailingStopConfig::default(),
        in_span,
        1.0,
        overlap.slice(&candles),
    );
    assert!(matches!(result, Err(TunerError::WindowOverlap(_))));
}

#[test]
fn test_artifact_round_trip_reproduces_metrics() {
    let candles = generate_wave_candles(1500);
    let outcome = BayesianOptimizer::new(
        bounds_for(StrategyVariant::LarryWilliams),
        optimizer_settings(12, 5),
        lenient_policy(),
        hourly_settings(),
    )
    .optimize(&candles)
    .unwrap();

    let set = OptimizedParameterSet {
        strategy: outcome.strategy.clone(),
        trailing_stop: outcome.trailing_stop.clone(),
        symbol: "BTCUSDT".to_string(),
        timeframe: "60".to_string(),
        metrics: ArtifactMetrics::from(&outcome.result.metrics),
        created_at: Utc::now(),
        in_sample: WindowSpan::of(&candles).unwrap(),
    };

    let dir = tempdir().unwrap();
    let path = dir.path().join("optimized_params.json");
    store::save(&path, &set).unwrap();
    let loaded = store::load(&path).unwrap();

    assert_eq!(loaded.strategy, outcome.strategy);
    assert_eq!(loaded.trailing_stop, outcome.trailing_stop);

    let replay = run_backtest(
        &candles,
        &loaded.strategy,
        &loaded.trailing_stop,
        &hourly_settings(),
    )
    .unwrap();
    assert_eq!(ArtifactMetrics::from(&replay.metrics), loaded.metrics);
}
