//! Objective scoring
//!
//! Reduces a backtest to one comparable fitness value. Pathological runs
//! (too few trades, drawdown beyond the ceiling, zero return variance,
//! non-finite metrics) all score [`WORST_SCORE`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::PerformanceMetrics;

/// Fitness of rejected or pathological candidates
pub const WORST_SCORE: f64 = -1e9;

/// Metric the optimizer maximises
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveMetric {
    #[default]
    Sharpe,
    TotalReturn,
    Calmar,
    WinRate,
    ProfitFactor,
}

impl FromStr for ObjectiveMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sharpe" | "sharpe_ratio" => Ok(ObjectiveMetric::Sharpe),
            "return" | "total_return" => Ok(ObjectiveMetric::TotalReturn),
            "calmar" | "calmar_ratio" => Ok(ObjectiveMetric::Calmar),
            "win_rate" | "winrate" => Ok(ObjectiveMetric::WinRate),
            "profit_factor" | "pf" => Ok(ObjectiveMetric::ProfitFactor),
            _ => Err(format!(
                "unknown metric '{}': expected sharpe, return, calmar, win_rate or profit_factor",
                s
            )),
        }
    }
}

impl fmt::Display for ObjectiveMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObjectiveMetric::Sharpe => "sharpe",
            ObjectiveMetric::TotalReturn => "total_return",
            ObjectiveMetric::Calmar => "calmar",
            ObjectiveMetric::WinRate => "win_rate",
            ObjectiveMetric::ProfitFactor => "profit_factor",
        };
        write!(f, "{}", name)
    }
}

/// Scoring policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectivePolicy {
    #[serde(default)]
    pub metric: ObjectiveMetric,
    #[serde(default = "default_min_trades")]
    pub min_trades: usize,
    /// Drawdown ceiling as a fraction of peak equity
    #[serde(default = "default_max_drawdown")]
    pub max_drawdown: f64,
}

fn default_min_trades() -> usize {
    5
}

fn default_max_drawdown() -> f64 {
    0.5
}

impl Default for ObjectivePolicy {
    fn default() -> Self {
        Self {
            metric: ObjectiveMetric::default(),
            min_trades: default_min_trades(),
            max_drawdown: default_max_drawdown(),
        }
    }
}

impl ObjectivePolicy {
    /// Fitness of a backtest; higher is better
    pub fn score(&self, metrics: &PerformanceMetrics) -> f64 {
        if metrics.total_trades < self.min_trades {
            return WORST_SCORE;
        }
        if !metrics.max_drawdown.is_finite() || metrics.max_drawdown > self.max_drawdown {
            return WORST_SCORE;
        }
        if metrics.return_std <= 0.0 || !metrics.return_std.is_finite() {
            return WORST_SCORE;
        }

        let value = match self.metric {
            ObjectiveMetric::Sharpe => metrics.sharpe_ratio,
            ObjectiveMetric::TotalReturn => metrics.total_return,
            ObjectiveMetric::Calmar => metrics.calmar_ratio,
            ObjectiveMetric::WinRate => metrics.win_rate,
            ObjectiveMetric::ProfitFactor => metrics.profit_factor,
        };

        if value.is_finite() {
            value.max(WORST_SCORE)
        } else {
            WORST_SCORE
        }
    }
}

/// True for the sentinel score
pub fn is_penalized(score: f64) -> bool {
    score <= WORST_SCORE
}
