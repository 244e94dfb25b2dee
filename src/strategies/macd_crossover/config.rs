//! MACD Crossover Configuration

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::space::ParameterVector;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MacdCrossoverConfig {
    /// Fast EMA period (default: 12)
    pub fast_period: usize,
    /// Slow EMA period (default: 26)
    pub slow_period: usize,
    /// Signal line EMA period (default: 9)
    pub signal_period: usize,
    /// Bars over which price momentum must confirm a cross (default: 14)
    pub volatility_period: usize,
}

impl Default for MacdCrossoverConfig {
    fn default() -> Self {
        Self {
            fast_period: 12,
            slow_period: 26,
            signal_period: 9,
            volatility_period: 14,
        }
    }
}

impl MacdCrossoverConfig {
    pub fn from_params(params: &ParameterVector) -> Result<Self> {
        Ok(Self {
            fast_period: params.get_usize("fast_period")?,
            slow_period: params.get_usize("slow_period")?,
            signal_period: params.get_usize("signal_period")?,
            volatility_period: params.get_usize("volatility_period")?,
        })
    }

    pub fn to_params(&self) -> ParameterVector {
        ParameterVector::new()
            .with("fast_period", self.fast_period as f64)
            .with("slow_period", self.slow_period as f64)
            .with("signal_period", self.signal_period as f64)
            .with("volatility_period", self.volatility_period as f64)
    }

    pub fn warmup_bars(&self) -> usize {
        (self.slow_period + self.signal_period).max(self.volatility_period) + 1
    }
}
