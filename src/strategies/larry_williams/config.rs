//! Larry Williams Pullback Configuration

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::space::ParameterVector;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LarryWilliamsConfig {
    /// SMA period for the trend filter (default: 10)
    pub ma_period: usize,

    /// Bars inspected for trend strength (default: 20)
    pub lookback_period: usize,

    /// Share of lookback closes that must sit on the trend side of the SMA (default: 0.5)
    pub trend_threshold: f64,

    /// ATR period used to size the minimum pullback (default: 14)
    pub volatility_period: usize,
}

impl Default for LarryWilliamsConfig {
    fn default() -> Self {
        Self {
            ma_period: 10,
            lookback_period: 20,
            trend_threshold: 0.5,
            volatility_period: 14,
        }
    }
}

impl LarryWilliamsConfig {
    pub fn from_params(params: &ParameterVector) -> Result<Self> {
        Ok(Self {
            ma_period: params.get_usize("ma_period")?,
            lookback_period: params.get_usize("lookback_period")?,
            trend_threshold: params.get_f64("trend_threshold")?,
            volatility_period: params.get_usize("volatility_period")?,
        })
    }

    pub fn to_params(&self) -> ParameterVector {
        ParameterVector::new()
            .with("ma_period", self.ma_period as f64)
            .with("lookback_period", self.lookback_period as f64)
            .with("trend_threshold", self.trend_threshold)
            .with("volatility_period", self.volatility_period as f64)
    }

    pub fn warmup_bars(&self) -> usize {
        self.ma_period.max(self.volatility_period) + self.lookback_period
    }
}
