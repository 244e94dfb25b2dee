//! MACD Crossover Strategy Implementation
//!
//! ## Entry Logic
//! 1. MACD line crosses the signal line on the current bar
//! 2. Price change over `volatility_period` bars agrees with the cross
//!
//! ## Exit Logic
//! An opposite cross without momentum confirmation closes the position; a
//! confirmed opposite cross is reported as an entry and the simulator reverses.

use crate::indicators::{macd, rate_of_change};
use crate::strategies::Strategy;
use crate::{Candle, Side, Signal};

use super::config::MacdCrossoverConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cross {
    Bullish,
    Bearish,
}

pub struct MacdCrossoverStrategy {
    config: MacdCrossoverConfig,
}

impl MacdCrossoverStrategy {
    pub fn new(config: MacdCrossoverConfig) -> Self {
        MacdCrossoverStrategy { config }
    }

    pub fn config(&self) -> &MacdCrossoverConfig {
        &self.config
    }

    fn detect_cross(&self, closes: &[f64]) -> Option<Cross> {
        let (line, signal, _) = macd(
            closes,
            self.config.fast_period,
            self.config.slow_period,
            self.config.signal_period,
        );
        let n = line.len();
        if n < 2 {
            return None;
        }

        let prev = line[n - 2]? - signal[n - 2]?;
        let curr = line[n - 1]? - signal[n - 1]?;

        if prev <= 0.0 && curr > 0.0 {
            Some(Cross::Bullish)
        } else if prev >= 0.0 && curr < 0.0 {
            Some(Cross::Bearish)
        } else {
            None
        }
    }
}

impl Strategy for MacdCrossoverStrategy {
    fn name(&self) -> &'static str {
        "macd_crossover"
    }

    fn warmup_bars(&self) -> usize {
        self.config.warmup_bars()
    }

    fn generate_signal(&self, candles: &[Candle], position: Option<Side>) -> Signal {
        if candles.len() < self.warmup_bars() {
            return Signal::Hold;
        }

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let cross = match self.detect_cross(&closes) {
            Some(c) => c,
            None => return Signal::Hold,
        };

        let momentum = rate_of_change(&closes, self.config.volatility_period)
            .last()
            .copied()
            .flatten()
            .unwrap_or(0.0);

        match cross {
            Cross::Bullish if momentum > 0.0 => {
                if position == Some(Side::Long) {
                    Signal::Hold
                } else {
                    Signal::EnterLong
                }
            }
            Cross::Bearish if momentum < 0.0 => {
                if position == Some(Side::Short) {
                    Signal::Hold
                } else {
                    Signal::EnterShort
                }
            }
            Cross::Bullish if position == Some(Side::Short) => Signal::Exit,
            Cross::Bearish if position == Some(Side::Long) => Signal::Exit,
            _ => Signal::Hold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn candles_from(closes: &[f64]) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                Candle::new_unchecked(
                    start + Duration::minutes(5 * i as i64),
                    c,
                    c + 0.5,
                    c - 0.5,
                    c,
                    100.0,
                )
            })
            .collect()
    }

    /// V-shaped series: decline then a sharper recovery
    fn v_shape() -> Vec<f64> {
        let mut closes: Vec<f64> = (0..60).map(|i| 200.0 - i as f64).collect();
        closes.extend((1..40).map(|i| 141.0 + 2.0 * i as f64));
        closes
    }

    #[test]
    fn test_bullish_cross_enters_long() {
        // Short momentum window so the turn confirms immediately
        let strategy = MacdCrossoverStrategy::new(MacdCrossoverConfig {
            volatility_period: 2,
            ..Default::default()
        });
        let candles = candles_from(&v_shape());

        let entry = (strategy.warmup_bars()..=candles.len())
            .find(|&k| strategy.generate_signal(&candles[..k], None) == Signal::EnterLong);
        let k = entry.expect("recovery should produce a bullish cross");

        // Entry only after the turn
        assert!(k > 60);
        // Already long: nothing to do on the same bar
        assert_eq!(
            strategy.generate_signal(&candles[..k], Some(Side::Long)),
            Signal::Hold
        );
    }

    #[test]
    fn test_no_signal_in_steady_trend() {
        let strategy = MacdCrossoverStrategy::new(MacdCrossoverConfig::default());
        let closes: Vec<f64> = (0..120).map(|i| 100.0 + i as f64).collect();
        let candles = candles_from(&closes);

        for k in strategy.warmup_bars() + 5..=candles.len() {
            assert_eq!(strategy.generate_signal(&candles[..k], None), Signal::Hold);
        }
    }

    #[test]
    fn test_warmup() {
        let config = MacdCrossoverConfig::default();
        assert_eq!(config.warmup_bars(), 36);
        let strategy = MacdCrossoverStrategy::new(config);
        let candles = candles_from(&v_shape());
        assert_eq!(strategy.generate_signal(&candles[..30], None), Signal::Hold);
    }
}
