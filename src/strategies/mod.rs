//! Trading Strategies Module
//!
//! Strategies form a closed set of variants. Each variant owns a typed config,
//! declares its parameter space (see [`crate::space::bounds_for`]) and implements
//! the one capability the simulator needs: [`Strategy::generate_signal`].

pub mod larry_williams;
pub mod macd_crossover;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TunerError};
use crate::space::ParameterVector;
use crate::{Candle, Side, Signal};

pub use larry_williams::{LarryWilliamsConfig, LarryWilliamsStrategy};
pub use macd_crossover::{MacdCrossoverConfig, MacdCrossoverStrategy};

// =============================================================================
// Strategy Trait - The contract all strategies must implement
// =============================================================================

/// Signal-generation capability called by the backtest simulator.
///
/// Implementations are stateless: the same window and position always produce
/// the same signal.
pub trait Strategy: Send + Sync {
    /// Strategy identifier
    fn name(&self) -> &'static str;

    /// Minimum number of candles before a signal can be computed
    fn warmup_bars(&self) -> usize;

    /// Signal for the last candle of `candles`.
    ///
    /// `position` is the simulator's open position side, `None` when flat.
    fn generate_signal(&self, candles: &[Candle], position: Option<Side>) -> Signal;
}

// =============================================================================
// Strategy Variants
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrategyVariant {
    #[serde(rename = "LarryWilliams")]
    LarryWilliams,
    #[serde(rename = "MACDCrossover")]
    MacdCrossover,
}

impl StrategyVariant {
    pub const ALL: [StrategyVariant; 2] =
        [StrategyVariant::LarryWilliams, StrategyVariant::MacdCrossover];

    /// Tag written to the `strategy_name` field of the parameter file
    pub fn tag(self) -> &'static str {
        match self {
            StrategyVariant::LarryWilliams => "LarryWilliams",
            StrategyVariant::MacdCrossover => "MACDCrossover",
        }
    }

    /// Resolve a persisted tag
    pub fn from_tag(tag: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|v| v.tag() == tag)
            .ok_or_else(|| TunerError::UnknownStrategy(tag.to_string()))
    }
}

impl fmt::Display for StrategyVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// Command-line names: `larry_williams`, `macd`, `macd_crossover`
impl FromStr for StrategyVariant {
    type Err = TunerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "larry_williams" | "larrywilliams" => Ok(StrategyVariant::LarryWilliams),
            "macd" | "macd_crossover" | "macdcrossover" => Ok(StrategyVariant::MacdCrossover),
            _ => Err(TunerError::UnknownStrategy(s.to_string())),
        }
    }
}

// =============================================================================
// Strategy Config - tagged union of the per-variant configs
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum StrategyConfig {
    LarryWilliams(LarryWilliamsConfig),
    MacdCrossover(MacdCrossoverConfig),
}

impl StrategyConfig {
    pub fn variant(&self) -> StrategyVariant {
        match self {
            StrategyConfig::LarryWilliams(_) => StrategyVariant::LarryWilliams,
            StrategyConfig::MacdCrossover(_) => StrategyVariant::MacdCrossover,
        }
    }

    /// Build from the strategy parameter group of a vector
    pub fn from_params(variant: StrategyVariant, params: &ParameterVector) -> Result<Self> {
        Ok(match variant {
            StrategyVariant::LarryWilliams => {
                StrategyConfig::LarryWilliams(LarryWilliamsConfig::from_params(params)?)
            }
            StrategyVariant::MacdCrossover => {
                StrategyConfig::MacdCrossover(MacdCrossoverConfig::from_params(params)?)
            }
        })
    }

    pub fn to_params(&self) -> ParameterVector {
        match self {
            StrategyConfig::LarryWilliams(c) => c.to_params(),
            StrategyConfig::MacdCrossover(c) => c.to_params(),
        }
    }

    /// Create the signal generator for this configuration
    pub fn build(&self) -> Box<dyn Strategy> {
        match self {
            StrategyConfig::LarryWilliams(c) => Box::new(LarryWilliamsStrategy::new(c.clone())),
            StrategyConfig::MacdCrossover(c) => Box::new(MacdCrossoverStrategy::new(c.clone())),
        }
    }

    pub fn warmup_bars(&self) -> usize {
        match self {
            StrategyConfig::LarryWilliams(c) => c.warmup_bars(),
            StrategyConfig::MacdCrossover(c) => c.warmup_bars(),
        }
    }
}
