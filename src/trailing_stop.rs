//! ATR trailing stop
//!
//! The stop distance is `atr_multiplier * ATR(atr_period)`, measured from the
//! best close since entry. A stop only ever moves in the position's favour.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::space::ParameterVector;
use crate::{Candle, Side};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrailingStopConfig {
    pub atr_multiplier: f64,
    pub atr_period: usize,
}

impl Default for TrailingStopConfig {
    fn default() -> Self {
        Self {
            atr_multiplier: 2.0,
            atr_period: 14,
        }
    }
}

impl TrailingStopConfig {
    pub fn from_params(params: &ParameterVector) -> Result<Self> {
        Ok(Self {
            atr_multiplier: params.get_f64("atr_multiplier")?,
            atr_period: params.get_usize("atr_period")?,
        })
    }

    pub fn to_params(&self) -> ParameterVector {
        ParameterVector::new()
            .with("atr_multiplier", self.atr_multiplier)
            .with("atr_period", self.atr_period as f64)
    }

    /// Bars needed before the ATR is defined (one extra for the previous close)
    pub fn warmup_bars(&self) -> usize {
        self.atr_period + 1
    }
}

/// Stop state of one open position
#[derive(Debug, Clone, PartialEq)]
pub struct TrailingStop {
    side: Side,
    multiplier: f64,
    best_close: f64,
    stop: f64,
}

impl TrailingStop {
    /// Arm a stop for a position entered at `entry_price`
    pub fn open(side: Side, entry_price: f64, atr: f64, multiplier: f64) -> Self {
        let distance = atr * multiplier;
        TrailingStop {
            side,
            multiplier,
            best_close: entry_price,
            stop: entry_price - side.sign() * distance,
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn level(&self) -> f64 {
        self.stop
    }

    /// Fill price if `candle` trades through the stop.
    ///
    /// A bar that opens beyond the stop fills at its open.
    pub fn breach(&self, candle: &Candle) -> Option<f64> {
        match self.side {
            Side::Long if candle.low <= self.stop => Some(candle.open.min(self.stop)),
            Side::Short if candle.high >= self.stop => Some(candle.open.max(self.stop)),
            _ => None,
        }
    }

    /// Ratchet the stop after a bar closed at `close` with the given ATR
    pub fn update(&mut self, close: f64, atr: f64) -> f64 {
        let distance = atr * self.multiplier;
        match self.side {
            Side::Long => {
                self.best_close = self.best_close.max(close);
                self.stop = self.stop.max(self.best_close - distance);
            }
            Side::Short => {
                self.best_close = self.best_close.min(close);
                self.stop = self.stop.min(self.best_close + distance);
            }
        }
        self.stop
    }
}
