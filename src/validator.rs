//! Out-of-sample validation
//!
//! Re-runs the chosen configuration once on a strictly later window and
//! compares the score with the in-sample one. Degradation only annotates the
//! report; it never blocks persisting the parameters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backtest::{run_backtest, BacktestResult, BacktestSettings};
use crate::error::{Result, TunerError};
use crate::objective::{is_penalized, ObjectivePolicy};
use crate::strategies::StrategyConfig;
use crate::trailing_stop::TrailingStopConfig;
use crate::Candle;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationPolicy {
    /// Warn when the out-of-sample score keeps less than this share of the in-sample score
    #[serde(default = "default_min_retained_ratio")]
    pub min_retained_ratio: f64,
}

fn default_min_retained_ratio() -> f64 {
    0.5
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            min_retained_ratio: default_min_retained_ratio(),
        }
    }
}

/// First and last candle timestamps of a window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WindowSpan {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl WindowSpan {
    pub fn of(candles: &[Candle]) -> Option<Self> {
        Some(WindowSpan {
            start: candles.first()?.datetime,
            end: candles.last()?.datetime,
        })
    }

    /// True when `self` starts strictly after `other` ends
    pub fn is_after(&self, other: &WindowSpan) -> bool {
        self.start > other.end
    }
}

#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub in_sample: WindowSpan,
    pub out_of_sample: WindowSpan,
    pub in_sample_score: f64,
    pub out_of_sample_score: f64,
    /// Relative score loss `(in - out) / |in|`; `None` when the in-sample score is zero
    /// or penalised
    pub degradation: Option<f64>,
    pub overfit_warning: bool,
    pub reasons: Vec<String>,
    pub result: BacktestResult,
}

/// Backtests the chosen configuration on a later window
pub struct OutOfSampleValidator {
    policy: ValidationPolicy,
    objective: ObjectivePolicy,
    backtest: BacktestSettings,
}

impl OutOfSampleValidator {
    pub fn new(
        policy: ValidationPolicy,
        objective: ObjectivePolicy,
        backtest: BacktestSettings,
    ) -> Self {
        OutOfSampleValidator {
            policy,
            objective,
            backtest,
        }
    }

    /// Validate against `candles`, which must start after `in_sample` ends
    pub fn validate(
        &self,
        strategy: &StrategyConfig,
        trailing: &TrailingStopConfig,
        in_sample: WindowSpan,
        in_sample_score: f64,
        candles: &[Candle],
    ) -> Result<ValidationReport> {
        let out_of_sample = WindowSpan::of(candles)
            .ok_or_else(|| TunerError::Data("empty validation window".to_string()))?;

        if !out_of_sample.is_after(&in_sample) {
            return Err(TunerError::WindowOverlap(format!(
                "validation starts {} but in-sample ends {}",
                out_of_sample.start, in_sample.end
            )));
        }

        let result = run_backtest(candles, strategy, trailing, &self.backtest)?;
        let out_of_sample_score = self.objective.score(&result.metrics);

        let (degradation, overfit_warning, reasons) =
            self.assess(in_sample_score, out_of_sample_score);

        if overfit_warning {
            for reason in &reasons {
                tracing::warn!("Possible overfitting: {}", reason);
            }
        } else {
            tracing::info!(
                in_sample = in_sample_score,
                out_of_sample = out_of_sample_score,
                "Validation passed"
            );
        }

        Ok(ValidationReport {
            in_sample,
            out_of_sample,
            in_sample_score,
            out_of_sample_score,
            degradation,
            overfit_warning,
            reasons,
            result,
        })
    }

    fn assess(&self, is_score: f64, oos_score: f64) -> (Option<f64>, bool, Vec<String>) {
        let mut reasons = Vec::new();

        let degradation = if is_score != 0.0 && !is_penalized(is_score) {
            Some((is_score - oos_score) / is_score.abs())
        } else {
            None
        };

        if is_penalized(oos_score) && !is_penalized(is_score) {
            reasons.push("out-of-sample run was penalised (too few trades or excessive drawdown)".to_string());
        } else if is_score > 0.0 && oos_score < 0.0 {
            reasons.push(format!(
                "score turned negative: {:.4} in-sample vs {:.4} out-of-sample",
                is_score, oos_score
            ));
        } else if is_score > 0.0 && oos_score < self.policy.min_retained_ratio * is_score {
            reasons.push(format!(
                "score fell to {:.1}% of in-sample ({:.4} vs {:.4}), below {:.0}%",
                oos_score / is_score * 100.0,
                oos_score,
                is_score,
                self.policy.min_retained_ratio * 100.0
            ));
        }

        (degradation, !reasons.is_empty(), reasons)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objective::WORST_SCORE;
    use chrono::{Duration, TimeZone};

    fn validator() -> OutOfSampleValidator {
        OutOfSampleValidator::new(
            ValidationPolicy::default(),
            ObjectivePolicy::default(),
            BacktestSettings::default(),
        )
    }

    #[test]
    fn test_assess_thresholds() {
        let v = validator();

        let (deg, warn, _) = v.assess(2.0, 1.5);
        assert!(!warn);
        assert!((deg.unwrap() - 0.25).abs() < 1e-12);

        let (_, warn, reasons) = v.assess(2.0, 0.5);
        assert!(warn);
        assert!(reasons[0].contains("below 50%"));

        let (_, warn, reasons) = v.assess(1.0, -0.2);
        assert!(warn);
        assert!(reasons[0].contains("negative"));

        let (_, warn, _) = v.assess(1.0, WORST_SCORE);
        assert!(warn);

        // Nothing to lose when in-sample was already negative
        let (deg, warn, _) = v.assess(-1.0, -1.5);
        assert!(!warn);
        assert!((deg.unwrap() - 0.5).abs() < 1e-12);

        let (deg, _, _) = v.assess(WORST_SCORE, 1.0);
        assert!(deg.is_none());
    }

    #[test]
    fn test_overlapping_window_rejected() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let candles: Vec<Candle> = (0..10)
            .map(|i| {
                Candle::new_unchecked(start + Duration::minutes(5 * i), 100.0, 101.0, 99.0, 100.0, 1.0)
            })
            .collect();
        let in_sample = WindowSpan {
            start: start - Duration::days(1),
            end: start,
        };

        let result = validator().validate(
            &StrategyConfig::LarryWilliams(Default::default()),
            &TrailingStopConfig::default(),
            in_sample,
            1.0,
            &candles,
        );
        assert!(matches!(result, Err(TunerError::WindowOverlap(_))));
    }

    #[test]
    fn test_window_span() {
        let a = WindowSpan {
            start: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 3, 31, 0, 0, 0).unwrap(),
        };
        let b = WindowSpan {
            start: Utc.with_ymd_and_hms(2024, 3, 31, 0, 5, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 4, 30, 0, 0, 0).unwrap(),
        };
        assert!(b.is_after(&a));
        assert!(!a.is_after(&b));
        assert!(WindowSpan::of(&[]).is_none());
    }
}
