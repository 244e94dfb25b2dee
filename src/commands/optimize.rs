//! Optimize command: search, validate, persist

use anyhow::{Context, Result};
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{error, info, warn};

use strategy_tuner::data::{split_windows, TimeRange};
use strategy_tuner::objective::ObjectiveMetric;
use strategy_tuner::optimizer::{BayesianOptimizer, OptimizationOutcome, OptimizationRun};
use strategy_tuner::space::bounds_for;
use strategy_tuner::store::{self, ArtifactMetrics, OptimizedParameterSet};
use strategy_tuner::strategies::StrategyVariant;
use strategy_tuner::validator::{OutOfSampleValidator, ValidationReport, WindowSpan};
use strategy_tuner::Config;

use super::{candle_provider, fetch_candles, history_end, print_metrics};

const TOP_RESULTS: usize = 5;

#[derive(Debug)]
pub struct OptimizeArgs {
    pub strategy: StrategyVariant,
    pub days: Option<u32>,
    pub n_iter: Option<usize>,
    pub validation_days: Option<u32>,
    pub seed: Option<u64>,
    pub batch_size: Option<usize>,
    pub metric: Option<ObjectiveMetric>,
    pub candles: Option<PathBuf>,
    pub output: Option<PathBuf>,
}

fn apply_overrides(config: &mut Config, args: &OptimizeArgs) {
    if let Some(days) = args.days {
        config.optimization.days = days;
    }
    if let Some(n_iter) = args.n_iter {
        config.optimization.optimizer.n_iter = n_iter;
    }
    if let Some(days) = args.validation_days {
        config.validation.days = days;
    }
    if let Some(seed) = args.seed {
        config.optimization.optimizer.seed = Some(seed);
    }
    if let Some(batch) = args.batch_size {
        config.optimization.optimizer.batch_size = batch;
    }
    if let Some(metric) = args.metric {
        config.objective.metric = metric;
    }
    if let Some(output) = &args.output {
        config.params_file = output.clone();
    }
}

pub async fn run(mut config: Config, args: OptimizeArgs, cancel: Arc<AtomicBool>) -> Result<()> {
    apply_overrides(&mut config, &args);
    info!("Starting optimization: {:?}", args);

    let backtest = config.backtest_settings()?;
    let space = bounds_for(args.strategy);

    let end = history_end(&config, args.candles.as_deref())?;
    let windows = split_windows(end, config.optimization.days, config.validation.days);
    let provider = candle_provider(&config, args.candles.as_deref())?;
    let candles = fetch_candles(
        provider.as_ref(),
        &config,
        TimeRange {
            start: windows.in_sample.start,
            end: windows.out_of_sample.end,
        },
    )
    .await?;

    let in_sample = windows.in_sample.slice(&candles).to_vec();
    let out_of_sample = windows.out_of_sample.slice(&candles).to_vec();
    let in_sample_span =
        WindowSpan::of(&in_sample).context("No candles in the optimization window")?;

    let settings = &config.optimization.optimizer;
    println!("\n{}", "=".repeat(70));
    println!("OPTIMIZATION SUMMARY");
    println!("{}", "=".repeat(70));
    println!("  Strategy:      {}", args.strategy);
    println!("  Market:        {} ({})", config.market.symbol, config.market.timeframe);
    println!("  In-sample:     {} candles ({} days)", in_sample.len(), config.optimization.days);
    println!("  Out-of-sample: {} candles ({} days)", out_of_sample.len(), config.validation.days);
    println!("  Dimensions:    {}", space.len());
    println!("  Iterations:    {} ({} initial)", settings.n_iter, settings.n_initial_points);
    println!("  Objective:     {}", config.objective.metric);
    println!("{}\n", "=".repeat(70));

    let pb = ProgressBar::new(settings.n_iter as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("⚡ {percent:>3}%|{bar:40}| {pos}/{len} [{elapsed}<{eta}] ✓ {msg}")
            .context("Invalid progress template")?
            .progress_chars("█░ "),
    );

    let optimizer = BayesianOptimizer::new(
        space,
        settings.clone(),
        config.objective.clone(),
        backtest.clone(),
    )
    .with_cancel_flag(cancel)
    .with_progress(pb);

    let search_candles = in_sample.clone();
    let outcome = tokio::task::spawn_blocking(move || optimizer.optimize(&search_candles))
        .await
        .context("Optimizer task panicked")?;

    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(failure) => {
            error!("Optimization aborted: {}", failure);
            print_history(&failure.run);
            return Err(failure.into());
        }
    };

    print_history(&outcome.run);
    print_best(&outcome);
    if outcome.penalized() {
        warn!("Every candidate violated the objective policy, saving the least bad one");
        println!(
            "WARNING: no candidate met the objective policy (min {} trades, max drawdown {:.0}%)",
            config.objective.min_trades,
            config.objective.max_drawdown * 100.0
        );
    }

    let report = if outcome.cancelled() {
        warn!("Run cancelled, skipping validation");
        println!("Run cancelled: saving the best parameters found so far without validation");
        None
    } else if out_of_sample.is_empty() {
        warn!("No out-of-sample candles, skipping validation");
        None
    } else {
        let validator = OutOfSampleValidator::new(
            config.validation_policy(),
            config.objective.clone(),
            backtest,
        );
        match validator.validate(
            &outcome.strategy,
            &outcome.trailing_stop,
            in_sample_span,
            outcome.score,
            &out_of_sample,
        ) {
            Ok(report) => Some(report),
            Err(e) => {
                warn!("Validation failed: {}", e);
                println!("Validation failed: {}", e);
                None
            }
        }
    };

    if let Some(report) = &report {
        print_report(report);
    }

    let set = OptimizedParameterSet {
        strategy: outcome.strategy.clone(),
        trailing_stop: outcome.trailing_stop.clone(),
        symbol: config.market.symbol.clone(),
        timeframe: config.market.timeframe.clone(),
        metrics: ArtifactMetrics::from(&outcome.result.metrics),
        created_at: Utc::now(),
        in_sample: in_sample_span,
    };
    store::save(&config.params_file, &set)?;
    println!("\nSaved parameters to {}", config.params_file.display());

    Ok(())
}

fn print_history(run: &OptimizationRun) {
    let mut ranked: Vec<_> = run.records.iter().filter(|r| !r.is_rejected()).collect();
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.iteration.cmp(&b.iteration)));

    println!("\n{}", "=".repeat(100));
    println!(
        "TOP {} CANDIDATES ({} evaluated, {} rejected)",
        TOP_RESULTS.min(ranked.len()),
        run.records.len(),
        run.rejected
    );
    println!("{}", "=".repeat(100));
    println!(
        "{:<5} {:>10} {:>9} {:>8} {:>7} {:>6} | Parameters",
        "Iter", "Score", "Return%", "MaxDD%", "Win%", "Trades"
    );
    println!("{}", "-".repeat(100));

    for record in ranked.iter().take(TOP_RESULTS) {
        let Some(result) = &record.result else {
            continue;
        };
        let m = &result.metrics;
        println!(
            "{:<5} {:>10.4} {:>9.2} {:>8.2} {:>7.1} {:>6} | {}",
            record.iteration,
            record.score,
            m.total_return * 100.0,
            m.max_drawdown * 100.0,
            m.win_rate * 100.0,
            m.total_trades,
            record.params.describe()
        );
    }
    println!("{}", "=".repeat(100));
}

fn print_best(outcome: &OptimizationOutcome) {
    println!("\n{}", "=".repeat(60));
    println!("BEST PARAMETERS (score {:.4})", outcome.score);
    println!("{}", "=".repeat(60));
    println!("Parameters:         {}", outcome.params.describe());
    print_metrics(&outcome.result.metrics);
    println!("{}", "=".repeat(60));
}

pub fn print_report(report: &ValidationReport) {
    println!("\n{}", "=".repeat(60));
    println!("OUT-OF-SAMPLE VALIDATION");
    println!("{}", "=".repeat(60));
    println!(
        "In-sample:          {} to {}",
        report.in_sample.start.format("%Y-%m-%d %H:%M"),
        report.in_sample.end.format("%Y-%m-%d %H:%M")
    );
    println!(
        "Out-of-sample:      {} to {}",
        report.out_of_sample.start.format("%Y-%m-%d %H:%M"),
        report.out_of_sample.end.format("%Y-%m-%d %H:%M")
    );
    println!("In-sample score:    {:.4}", report.in_sample_score);
    println!("OOS score:          {:.4}", report.out_of_sample_score);
    if let Some(d) = report.degradation {
        println!("Degradation:        {:.1}%", d * 100.0);
    }
    print_metrics(&report.result.metrics);
    if report.overfit_warning {
        println!("WARNING: possible overfitting");
        for reason in &report.reasons {
            println!("  - {}", reason);
        }
    }
    println!("{}", "=".repeat(60));
}
