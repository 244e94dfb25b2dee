//! Bayesian parameter optimization
//!
//! Sequential model-based search: a Gaussian-process surrogate is fitted to
//! every score observed so far and the next candidate maximises expected
//! improvement. The first `n_initial_points` candidates are sampled uniformly.
//!
//! With `batch_size > 1` each round proposes several candidates (constant
//! liar) and backtests them in parallel; results are merged in proposal order
//! by the loop itself, so the run history has a single writer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indicatif::ProgressBar;
use rand::distributions::Distribution;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::distribution::Normal;

use crate::backtest::{run_backtest, BacktestResult, BacktestSettings};
use crate::error::{OptimizationFailure, TunerError};
use crate::gp::{expected_improvement, GaussianProcess};
use crate::objective::{is_penalized, ObjectivePolicy, WORST_SCORE};
use crate::space::{ParameterSpace, ParameterVector};
use crate::strategies::StrategyConfig;
use crate::trailing_stop::TrailingStopConfig;
use crate::Candle;

/// Share of acquisition candidates drawn around the incumbent
const LOCAL_CANDIDATE_SHARE: f64 = 0.2;

/// Std-dev of incumbent perturbations on the unit cube
const LOCAL_CANDIDATE_SIGMA: f64 = 0.05;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerSettings {
    /// Total number of evaluated candidates
    #[serde(default = "default_n_iter")]
    pub n_iter: usize,
    /// Uniformly sampled candidates before the surrogate takes over
    #[serde(default = "default_n_initial_points")]
    pub n_initial_points: usize,
    /// Random points scored by the acquisition function per proposal
    #[serde(default = "default_n_candidates")]
    pub n_candidates: usize,
    /// Exploration margin of expected improvement
    #[serde(default = "default_xi")]
    pub xi: f64,
    /// Fixed seed for reproducible runs
    #[serde(default)]
    pub seed: Option<u64>,
    /// Candidates proposed and evaluated per round
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_n_iter() -> usize {
    50
}

fn default_n_initial_points() -> usize {
    10
}

fn default_n_candidates() -> usize {
    2000
}

fn default_xi() -> f64 {
    0.01
}

fn default_batch_size() -> usize {
    1
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            n_iter: default_n_iter(),
            n_initial_points: default_n_initial_points(),
            n_candidates: default_n_candidates(),
            xi: default_xi(),
            seed: None,
            batch_size: default_batch_size(),
        }
    }
}

/// One evaluated candidate
#[derive(Debug, Clone)]
pub struct OptimizationRecord {
    pub iteration: usize,
    pub params: ParameterVector,
    /// `None` when the candidate was rejected before simulation
    pub result: Option<BacktestResult>,
    pub score: f64,
    pub rejection: Option<String>,
}

impl OptimizationRecord {
    pub fn is_rejected(&self) -> bool {
        self.result.is_none()
    }
}

/// Ordered history of one optimization run
#[derive(Debug, Clone, Default)]
pub struct OptimizationRun {
    pub records: Vec<OptimizationRecord>,
    pub rejected: usize,
    pub cancelled: bool,
    best_index: Option<usize>,
}

impl OptimizationRun {
    pub fn best(&self) -> Option<&OptimizationRecord> {
        self.best_index.and_then(|i| self.records.get(i))
    }

    /// Best score after each iteration; non-decreasing
    pub fn best_history(&self) -> Vec<f64> {
        let mut best = f64::NEG_INFINITY;
        self.records
            .iter()
            .map(|r| {
                if !r.is_rejected() && r.score > best {
                    best = r.score;
                }
                best
            })
            .collect()
    }

    /// Append a record, keeping the earlier vector on ties
    fn push(&mut self, record: OptimizationRecord) {
        if record.is_rejected() {
            self.rejected += 1;
        } else {
            let improves = match self.best() {
                Some(best) => record.score > best.score,
                None => true,
            };
            if improves {
                self.best_index = Some(self.records.len());
            }
        }
        self.records.push(record);
    }
}

/// Best configuration of a finished (or cancelled) run
#[derive(Debug, Clone)]
pub struct OptimizationOutcome {
    pub params: ParameterVector,
    pub strategy: StrategyConfig,
    pub trailing_stop: TrailingStopConfig,
    pub result: BacktestResult,
    pub score: f64,
    pub run: OptimizationRun,
}

impl OptimizationOutcome {
    pub fn cancelled(&self) -> bool {
        self.run.cancelled
    }

    /// Every simulated candidate fell foul of the objective policy
    pub fn penalized(&self) -> bool {
        is_penalized(self.score)
    }
}

/// Result of scoring a single candidate
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub params: ParameterVector,
    pub result: Option<BacktestResult>,
    pub score: f64,
    pub rejection: Option<String>,
}

/// Range-check, simulate and score one candidate.
///
/// Range violations produce a rejected evaluation without simulating; data
/// errors are returned and abort the caller's run.
pub fn evaluate_candidate(
    space: &ParameterSpace,
    candles: &[Candle],
    params: &ParameterVector,
    policy: &ObjectivePolicy,
    settings: &BacktestSettings,
) -> Result<Evaluation, TunerError> {
    let rejected = |reason: String| Evaluation {
        params: params.clone(),
        result: None,
        score: WORST_SCORE,
        rejection: Some(reason),
    };

    let valid = match space.clamp_or_reject(params) {
        Ok(v) => v,
        Err(e @ TunerError::Range { .. }) => return Ok(rejected(e.to_string())),
        Err(e) => return Err(e),
    };

    let (strategy_params, trailing_params) = space.split(&valid);
    let configs = StrategyConfig::from_params(space.variant(), &strategy_params)
        .and_then(|s| TrailingStopConfig::from_params(&trailing_params).map(|t| (s, t)));
    let (strategy, trailing) = match configs {
        Ok(pair) => pair,
        Err(e @ TunerError::Range { .. }) => return Ok(rejected(e.to_string())),
        Err(e) => return Err(e),
    };

    let result = run_backtest(candles, &strategy, &trailing, settings)?;
    let score = policy.score(&result.metrics);

    Ok(Evaluation {
        params: valid,
        result: Some(result),
        score,
        rejection: None,
    })
}

/// Gaussian-process optimizer over one parameter space
pub struct BayesianOptimizer {
    space: ParameterSpace,
    settings: OptimizerSettings,
    policy: ObjectivePolicy,
    backtest: BacktestSettings,
    cancel: Option<Arc<AtomicBool>>,
    progress: Option<ProgressBar>,
}

impl BayesianOptimizer {
    pub fn new(
        space: ParameterSpace,
        settings: OptimizerSettings,
        policy: ObjectivePolicy,
        backtest: BacktestSettings,
    ) -> Self {
        BayesianOptimizer {
            space,
            settings,
            policy,
            backtest,
            cancel: None,
            progress: None,
        }
    }

    /// Stop before the next round once `flag` is set
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn space(&self) -> &ParameterSpace {
        &self.space
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|f| f.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Search the space on `candles`.
    ///
    /// Fatal errors carry the history gathered up to the failure.
    pub fn optimize(&self, candles: &[Candle]) -> Result<OptimizationOutcome, OptimizationFailure> {
        let n_iter = self.settings.n_iter;
        let batch_size = self.settings.batch_size.max(1);
        let mut rng = match self.settings.seed {
            Some(seed) => Pcg64::seed_from_u64(seed),
            None => Pcg64::from_entropy(),
        };

        tracing::info!(
            "Optimizing {} over {} candles: {} iterations, {} initial points, batch {}",
            self.space.variant(),
            candles.len(),
            n_iter,
            self.settings.n_initial_points,
            batch_size
        );

        let mut initial = self
            .space
            .sample_with(&mut rng, self.settings.n_initial_points.min(n_iter))
            .into_iter();
        let mut run = OptimizationRun::default();

        while run.records.len() < n_iter {
            if self.is_cancelled() {
                tracing::warn!(
                    evaluated = run.records.len(),
                    "Optimization cancelled, keeping best result so far"
                );
                run.cancelled = true;
                break;
            }

            let wanted = batch_size.min(n_iter - run.records.len());
            let mut proposals: Vec<ParameterVector> = initial.by_ref().take(wanted).collect();
            if proposals.len() < wanted {
                let extra = self.propose(&run, wanted - proposals.len(), &proposals, &mut rng);
                proposals.extend(extra);
            }

            let evaluations: Vec<Result<Evaluation, TunerError>> = if proposals.len() > 1 {
                proposals
                    .par_iter()
                    .map(|p| evaluate_candidate(&self.space, candles, p, &self.policy, &self.backtest))
                    .collect()
            } else {
                proposals
                    .iter()
                    .map(|p| evaluate_candidate(&self.space, candles, p, &self.policy, &self.backtest))
                    .collect()
            };

            for evaluation in evaluations {
                let evaluation = match evaluation {
                    Ok(e) => e,
                    Err(error) => {
                        tracing::error!("Evaluation failed, aborting run: {}", error);
                        if let Some(pb) = &self.progress {
                            pb.abandon_with_message("failed");
                        }
                        return Err(OptimizationFailure { error, run });
                    }
                };

                let iteration = run.records.len();
                match &evaluation.rejection {
                    Some(reason) => tracing::warn!(iteration, "Candidate rejected: {}", reason),
                    None => tracing::info!(
                        iteration,
                        score = evaluation.score,
                        "Evaluated {}",
                        evaluation.params.describe()
                    ),
                }

                run.push(OptimizationRecord {
                    iteration,
                    params: evaluation.params,
                    result: evaluation.result,
                    score: evaluation.score,
                    rejection: evaluation.rejection,
                });

                if let Some(pb) = &self.progress {
                    pb.inc(1);
                    if let Some(best) = run.best() {
                        pb.set_message(format!("best {:.4}", best.score));
                    }
                }
            }
        }

        if let Some(pb) = &self.progress {
            pb.finish_with_message(match run.best() {
                Some(best) => format!("best {:.4}", best.score),
                None => "no valid candidate".to_string(),
            });
        }

        let best = match run.best() {
            Some(best) => best.clone(),
            None => {
                let error = TunerError::OptimizationDivergence {
                    evaluated: run.records.len(),
                };
                return Err(OptimizationFailure { error, run });
            }
        };

        let (strategy_params, trailing_params) = self.space.split(&best.params);
        let configs = StrategyConfig::from_params(self.space.variant(), &strategy_params)
            .and_then(|s| TrailingStopConfig::from_params(&trailing_params).map(|t| (s, t)));
        let (strategy, trailing_stop) = match configs {
            Ok(pair) => pair,
            Err(error) => return Err(OptimizationFailure { error, run }),
        };
        let result = match best.result {
            Some(result) => result,
            None => {
                let error = TunerError::OptimizationDivergence {
                    evaluated: run.records.len(),
                };
                return Err(OptimizationFailure { error, run });
            }
        };

        tracing::info!(
            score = best.score,
            iteration = best.iteration,
            "Best parameters: {}",
            best.params.describe()
        );
        if is_penalized(best.score) {
            tracing::warn!(
                evaluated = run.records.len(),
                "No candidate met the objective policy; best parameters carry the sentinel score"
            );
        }

        Ok(OptimizationOutcome {
            params: best.params,
            strategy,
            trailing_stop,
            result,
            score: best.score,
            run,
        })
    }

    /// Propose `count` new candidates from the surrogate
    fn propose(
        &self,
        run: &OptimizationRun,
        count: usize,
        pending: &[ParameterVector],
        rng: &mut Pcg64,
    ) -> Vec<ParameterVector> {
        let (mut x, mut y) = self.training_data(run);
        if x.is_empty() {
            return self.space.sample_with(rng, count);
        }

        let mut taken: Vec<ParameterVector> = run
            .records
            .iter()
            .map(|r| r.params.clone())
            .chain(pending.iter().cloned())
            .collect();

        // Pending proposals are known points with a pessimistic score
        let lie = y.iter().copied().fold(f64::INFINITY, f64::min);
        for p in pending {
            x.push(self.space.encode(p));
            y.push(lie);
        }

        let mut proposals = Vec::with_capacity(count);
        for _ in 0..count {
            let proposal = match GaussianProcess::fit(&x, &y) {
                Some(gp) => self.maximize_acquisition(&gp, &x, &y, &taken, rng),
                None => None,
            };
            let proposal = match proposal {
                Some(p) => p,
                None => {
                    tracing::debug!("Surrogate unavailable, sampling uniformly");
                    self.space.sample_with(rng, 1).remove(0)
                }
            };

            x.push(self.space.encode(&proposal));
            y.push(lie);
            taken.push(proposal.clone());
            proposals.push(proposal);
        }
        proposals
    }

    /// Observations for the surrogate. Penalised or rejected candidates are
    /// mapped to the worst regular score so the sentinel does not dominate.
    fn training_data(&self, run: &OptimizationRun) -> (Vec<Vec<f64>>, Vec<f64>) {
        let floor = run
            .records
            .iter()
            .filter(|r| !r.is_rejected() && !is_penalized(r.score))
            .map(|r| r.score)
            .fold(f64::INFINITY, f64::min);

        if !floor.is_finite() {
            return (Vec::new(), Vec::new());
        }

        run.records
            .iter()
            .map(|r| {
                let score = if r.is_rejected() || is_penalized(r.score) {
                    floor
                } else {
                    r.score
                };
                (self.space.encode(&r.params), score)
            })
            .unzip()
    }

    /// Candidate with the highest expected improvement that is not already taken
    fn maximize_acquisition(
        &self,
        gp: &GaussianProcess,
        x: &[Vec<f64>],
        y: &[f64],
        taken: &[ParameterVector],
        rng: &mut Pcg64,
    ) -> Option<ParameterVector> {
        let dims = self.space.len();
        let best_idx = y
            .iter()
            .enumerate()
            .fold(0, |acc, (i, v)| if *v > y[acc] { i } else { acc });
        let incumbent = x.get(best_idx)?.clone();
        let best_y = y[best_idx];

        let n_total = self.settings.n_candidates.max(1);
        let n_local = (n_total as f64 * LOCAL_CANDIDATE_SHARE) as usize;
        let jitter = Normal::new(0.0, LOCAL_CANDIDATE_SIGMA).ok();

        let mut candidates: Vec<ParameterVector> = Vec::with_capacity(n_total);
        for i in 0..n_total {
            let point: Vec<f64> = match (&jitter, i < n_local) {
                (Some(normal), true) => incumbent
                    .iter()
                    .map(|&u| (u + normal.sample(rng)).clamp(0.0, 1.0))
                    .collect(),
                _ => (0..dims).map(|_| rng.gen::<f64>()).collect(),
            };
            candidates.push(self.space.decode(&point));
        }

        let mut scored: Vec<(f64, usize)> = candidates
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let (mean, std) = gp.predict(&self.space.encode(c));
                (expected_improvement(mean, std, best_y, self.settings.xi), i)
            })
            .collect();
        // Highest EI first; equal EI keeps generation order
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));

        scored
            .into_iter()
            .map(|(_, i)| &candidates[i])
            .find(|c| !taken.contains(c))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::bounds_for;
    use crate::strategies::StrategyVariant;
    use chrono::{Duration, TimeZone, Utc};

    fn wave_candles(n: usize) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut prev = 100.0;
        (0..n)
            .map(|i| {
                let t = i as f64;
                let close = 100.0 + 6.0 * (t / 20.0).sin() + 2.0 * (t / 7.0).sin() + 0.005 * t;
                let open = prev;
                prev = close;
                Candle::new_unchecked(
                    start + Duration::minutes(5 * i as i64),
                    open,
                    open.max(close) + 0.3,
                    open.min(close) - 0.3,
                    close,
                    500.0,
                )
            })
            .collect()
    }

    fn small_settings(seed: u64) -> OptimizerSettings {
        OptimizerSettings {
            n_iter: 12,
            n_initial_points: 5,
            n_candidates: 200,
            seed: Some(seed),
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

    #[test]
    fn test_seeded_run_is_reproducible() {
        let candles = wave_candles(1200);
        let space = bounds_for(StrategyVariant::MacdCrossover);
        let make = || {
            BayesianOptimizer::new(
                space.clone(),
                small_settings(42),
                lenient_policy(),
                BacktestSettings::default(),
            )
        };

        let a = make().optimize(&candles).unwrap();
        let b = make().optimize(&candles).unwrap();

        assert_eq!(a.params, b.params);
        assert_eq!(a.score, b.score);
        let pa: Vec<_> = a.run.records.iter().map(|r| r.params.clone()).collect();
        let pb: Vec<_> = b.run.records.iter().map(|r| r.params.clone()).collect();
        assert_eq!(pa, pb);
        assert_eq!(a.run.records.len(), 12);
    }

    #[test]
    fn test_best_history_is_monotonic_and_in_bounds() {
        let candles = wave_candles(1200);
        let space = bounds_for(StrategyVariant::LarryWilliams);
        let outcome = BayesianOptimizer::new(
            space.clone(),
            small_settings(7),
            lenient_policy(),
            BacktestSettings::default(),
        )
        .optimize(&candles)
        .unwrap();

        let history = outcome.run.best_history();
        for pair in history.windows(2) {
            assert!(pair[1] >= pair[0]);
        }
        assert_eq!(history.last().copied(), Some(outcome.score));

        for record in &outcome.run.records {
            for dim in space.dimensions() {
                assert!(dim.contains(record.params.get(dim.name).unwrap()));
            }
        }
    }

    #[test]
    fn test_all_penalized_run_is_flagged() {
        let candles = wave_candles(1200);
        let strict = ObjectivePolicy {
            min_trades: 1_000_000,
            ..Default::default()
        };
        let outcome = BayesianOptimizer::new(
            bounds_for(StrategyVariant::MacdCrossover),
            small_settings(3),
            strict,
            BacktestSettings::default(),
        )
        .optimize(&candles)
        .unwrap();

        assert!(outcome.penalized());
        assert_eq!(outcome.score, WORST_SCORE);

        let fine = BayesianOptimizer::new(
            bounds_for(StrategyVariant::MacdCrossover),
            small_settings(3),
            lenient_policy(),
            BacktestSettings::default(),
        )
        .optimize(&candles)
        .unwrap();
        assert!(!fine.penalized());
    }

    #[test]
    fn test_batch_mode_evaluates_exactly_n_iter() {
        let candles = wave_candles(1000);
        let settings = OptimizerSettings {
            batch_size: 4,
            ..small_settings(3)
        };
        let outcome = BayesianOptimizer::new(
            bounds_for(StrategyVariant::MacdCrossover),
            settings,
            lenient_policy(),
            BacktestSettings::default(),
        )
        .optimize(&candles)
        .unwrap();

        assert_eq!(outcome.run.records.len(), 12);
        for (i, record) in outcome.run.records.iter().enumerate() {
            assert_eq!(record.iteration, i);
        }
    }

    #[test]
    fn test_cancelled_before_start_diverges() {
        let flag = Arc::new(AtomicBool::new(true));
        let failure = BayesianOptimizer::new(
            bounds_for(StrategyVariant::MacdCrossover),
            small_settings(1),
            lenient_policy(),
            BacktestSettings::default(),
        )
        .with_cancel_flag(flag)
        .optimize(&wave_candles(500))
        .unwrap_err();

        assert!(failure.run.cancelled);
        assert!(matches!(
            failure.error,
            TunerError::OptimizationDivergence { evaluated: 0 }
        ));
    }

    #[test]
    fn test_insufficient_data_aborts_with_history() {
        let failure = BayesianOptimizer::new(
            bounds_for(StrategyVariant::MacdCrossover),
            small_settings(1),
            lenient_policy(),
            BacktestSettings::default(),
        )
        .optimize(&wave_candles(20))
        .unwrap_err();

        assert!(matches!(failure.error, TunerError::InsufficientData { .. }));
        assert!(failure.run.records.is_empty());
    }

    #[test]
    fn test_rejected_candidate_never_simulated() {
        let space = bounds_for(StrategyVariant::MacdCrossover);
        let mut params = space.default_vector();
        params.insert("fast_period", 30.0);
        params.insert("slow_period", 25.0);

        // Too few candles for any simulation: a rejected candidate must not reach it
        let evaluation = evaluate_candidate(
            &space,
            &wave_candles(5),
            &params,
            &ObjectivePolicy::default(),
            &BacktestSettings::default(),
        )
        .unwrap();

        assert!(evaluation.result.is_none());
        assert_eq!(evaluation.score, WORST_SCORE);
        assert!(evaluation.rejection.unwrap().contains("slow_period"));
    }

    #[test]
    fn test_tie_keeps_earlier_record() {
        let mut run = OptimizationRun::default();
        let params = |v: f64| ParameterVector::new().with("x", v);
        for (i, score) in [1.0, 2.0, 2.0].into_iter().enumerate() {
            run.push(OptimizationRecord {
                iteration: i,
                params: params(i as f64),
                result: Some(BacktestResult::default()),
                score,
                rejection: None,
            });
        }
        assert_eq!(run.best().unwrap().iteration, 1);
    }
}
