//! Larry Williams Pullback Strategy Implementation
//!
//! ## Entry Logic
//! 1. Close on the trend side of the SMA(ma_period)
//! 2. Trend strength: at least `trend_threshold` of the last `lookback_period`
//!    closes on that same side
//! 3. The previous bar was a pullback against the trend, at least half an
//!    ATR(volatility_period) deep measured from the recent swing extreme
//! 4. The current bar closes beyond the pullback bar's extreme (high for
//!    longs, low for shorts)
//!
//! ## Exit Logic
//! Close crosses the SMA against the open position. The trailing stop is
//! handled by the simulator.

use crate::indicators::{latest_atr, sma};
use crate::strategies::Strategy;
use crate::{Candle, Side, Signal};

use super::config::LarryWilliamsConfig;

/// Fraction of ATR a retracement must cover to count as a pullback
const MIN_PULLBACK_ATR: f64 = 0.5;

pub struct LarryWilliamsStrategy {
    config: LarryWilliamsConfig,
}

impl LarryWilliamsStrategy {
    pub fn new(config: LarryWilliamsConfig) -> Self {
        LarryWilliamsStrategy { config }
    }

    pub fn config(&self) -> &LarryWilliamsConfig {
        &self.config
    }

    /// Share of the last `lookback_period` closes above and below the SMA
    fn trend_shares(&self, closes: &[f64], ma: &[Option<f64>]) -> (f64, f64) {
        let n = closes.len();
        let start = n.saturating_sub(self.config.lookback_period);
        let mut above = 0usize;
        let mut below = 0usize;
        let mut counted = 0usize;

        for i in start..n {
            if let Some(avg) = ma[i] {
                counted += 1;
                if closes[i] > avg {
                    above += 1;
                } else if closes[i] < avg {
                    below += 1;
                }
            }
        }

        if counted == 0 {
            return (0.0, 0.0);
        }
        (above as f64 / counted as f64, below as f64 / counted as f64)
    }

    /// Entry direction when the previous bar completed a qualifying pullback
    fn pullback_entry(&self, candles: &[Candle], trend: Side) -> bool {
        let n = candles.len();
        if n < 3 {
            return false;
        }
        let current = &candles[n - 1];
        let pullback = &candles[n - 2];
        let before = &candles[n - 3];

        let highs: Vec<f64> = candles[..n - 1].iter().map(|c| c.high).collect();
        let lows: Vec<f64> = candles[..n - 1].iter().map(|c| c.low).collect();
        let closes: Vec<f64> = candles[..n - 1].iter().map(|c| c.close).collect();

        let atr = match latest_atr(&highs, &lows, &closes, self.config.volatility_period) {
            Some(v) if v > 0.0 => v,
            _ => return false,
        };

        let swing_start = (n - 2).saturating_sub(self.config.lookback_period);
        let swing = &candles[swing_start..n - 2];
        if swing.is_empty() {
            return false;
        }

        match trend {
            Side::Long => {
                let swing_high = swing.iter().map(|c| c.high).fold(f64::MIN, f64::max);
                let depth = swing_high - pullback.low;
                pullback.close < before.close
                    && depth >= MIN_PULLBACK_ATR * atr
                    && current.close > pullback.high
            }
            Side::Short => {
                let swing_low = swing.iter().map(|c| c.low).fold(f64::MAX, f64::min);
                let depth = pullback.high - swing_low;
                pullback.close > before.close
                    && depth >= MIN_PULLBACK_ATR * atr
                    && current.close < pullback.low
            }
        }
    }
}

impl Strategy for LarryWilliamsStrategy {
    fn name(&self) -> &'static str {
        "larry_williams"
    }

    fn warmup_bars(&self) -> usize {
        self.config.warmup_bars()
    }

    fn generate_signal(&self, candles: &[Candle], position: Option<Side>) -> Signal {
        if candles.len() < self.warmup_bars() {
            return Signal::Hold;
        }

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let ma = sma(&closes, self.config.ma_period);
        let close = closes[closes.len() - 1];
        let avg = match ma.last().copied().flatten() {
            Some(v) => v,
            None => return Signal::Hold,
        };

        match position {
            Some(Side::Long) if close < avg => return Signal::Exit,
            Some(Side::Short) if close > avg => return Signal::Exit,
            Some(_) => return Signal::Hold,
            None => {}
        }

        let (above, below) = self.trend_shares(&closes, &ma);

        if close > avg
            && above >= self.config.trend_threshold
            && self.pullback_entry(candles, Side::Long)
        {
            tracing::debug!(close, sma = avg, trend = above, "Larry Williams long entry");
            return Signal::EnterLong;
        }

        if close < avg
            && below >= self.config.trend_threshold
            && self.pullback_entry(candles, Side::Short)
        {
            tracing::debug!(close, sma = avg, trend = below, "Larry Williams short entry");
            return Signal::EnterShort;
        }

        Signal::Hold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn candle(i: i64, open: f64, high: f64, low: f64, close: f64) -> Candle {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Candle::new_unchecked(start + Duration::minutes(5 * i), open, high, low, close, 100.0)
    }

    /// Steady uptrend, then one down bar and a breakout above its high
    fn uptrend_with_pullback() -> Vec<Candle> {
        let mut candles = Vec::new();
        let mut price = 100.0;
        for i in 0..40 {
            let open = price;
            price += 1.0;
            candles.push(candle(i, open, price + 0.2, open - 0.2, price));
        }
        // Pullback bar
        let open = price;
        price -= 2.5;
        candles.push(candle(40, open, open + 0.1, price - 0.1, price));
        // Resumption closing above the pullback high
        candles.push(candle(41, price, open + 1.5, price - 0.1, open + 1.2));
        candles
    }

    #[test]
    fn test_long_entry_after_pullback() {
        let strategy = LarryWilliamsStrategy::new(LarryWilliamsConfig::default());
        let candles = uptrend_with_pullback();
        assert_eq!(strategy.generate_signal(&candles, None), Signal::EnterLong);
    }

    #[test]
    fn test_no_entry_without_pullback() {
        let strategy = LarryWilliamsStrategy::new(LarryWilliamsConfig::default());
        let candles = uptrend_with_pullback();
        // Stop before the pullback: pure trend, no retracement
        assert_eq!(strategy.generate_signal(&candles[..40], None), Signal::Hold);
    }

    #[test]
    fn test_exit_when_close_crosses_sma() {
        let strategy = LarryWilliamsStrategy::new(LarryWilliamsConfig::default());
        let mut candles = uptrend_with_pullback();
        let last = candles.last().unwrap().clone();
        candles.push(candle(42, last.close, last.close, 100.0, 101.0));

        assert_eq!(strategy.generate_signal(&candles, Some(Side::Long)), Signal::Exit);
        assert_eq!(strategy.generate_signal(&candles, Some(Side::Short)), Signal::Hold);
    }

    #[test]
    fn test_hold_during_warmup() {
        let strategy = LarryWilliamsStrategy::new(LarryWilliamsConfig::default());
        let candles = uptrend_with_pullback();
        assert_eq!(strategy.warmup_bars(), 34);
        assert_eq!(strategy.generate_signal(&candles[..20], None), Signal::Hold);
    }
}
