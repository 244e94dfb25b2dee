//! Technical indicators powered by the `ta` crate
//!
//! Indicators return one value per input bar; bars before the warm-up
//! completes are `None`.
//!
//! Available indicators:
//! - Moving Averages: SMA, EMA
//! - Momentum: MACD, rate of change over N bars
//! - Volatility: True Range, ATR (simple mean of TR)

use ta::indicators::{ExponentialMovingAverage, MovingAverageConvergenceDivergence, SimpleMovingAverage};
use ta::Next;

// =============================================================================
// Type Aliases for Complex Return Types
// =============================================================================

/// Type alias for MACD output (macd line, signal line, histogram)
pub type MacdOutput = (Vec<Option<f64>>, Vec<Option<f64>>, Vec<Option<f64>>);

// =============================================================================
// Moving Averages
// =============================================================================

/// Calculate Simple Moving Average
pub fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if values.is_empty() || period == 0 {
        return vec![];
    }

    let mut indicator = match SimpleMovingAverage::new(period) {
        Ok(i) => i,
        Err(_) => return vec![None; values.len()],
    };

    values
        .iter()
        .enumerate()
        .map(|(i, &value)| {
            let sma_val = indicator.next(value);
            (i + 1 >= period).then_some(sma_val)
        })
        .collect()
}

/// Calculate Exponential Moving Average
pub fn ema(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if values.is_empty() || period == 0 {
        return vec![];
    }

    let mut indicator = match ExponentialMovingAverage::new(period) {
        Ok(i) => i,
        Err(_) => return vec![None; values.len()],
    };

    values
        .iter()
        .enumerate()
        .map(|(i, &value)| {
            let ema_val = indicator.next(value);
            (i + 1 >= period).then_some(ema_val)
        })
        .collect()
}

// =============================================================================
// Momentum Indicators
// =============================================================================

/// Calculate MACD (macd line, signal line, histogram)
///
/// The signal line is only reported once it has seen `signal_period` MACD values.
pub fn macd(
    values: &[f64],
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
) -> MacdOutput {
    if values.is_empty() {
        return (vec![], vec![], vec![]);
    }

    let mut indicator =
        match MovingAverageConvergenceDivergence::new(fast_period, slow_period, signal_period) {
            Ok(i) => i,
            Err(_) => {
                return (
                    vec![None; values.len()],
                    vec![None; values.len()],
                    vec![None; values.len()],
                )
            }
        };

    let warmup = slow_period + signal_period;
    let mut macd_line = Vec::with_capacity(values.len());
    let mut signal_line = Vec::with_capacity(values.len());
    let mut histogram = Vec::with_capacity(values.len());

    for (i, &value) in values.iter().enumerate() {
        let macd_out = indicator.next(value);
        if i + 1 >= warmup {
            macd_line.push(Some(macd_out.macd));
            signal_line.push(Some(macd_out.signal));
            histogram.push(Some(macd_out.histogram));
        } else {
            macd_line.push(None);
            signal_line.push(None);
            histogram.push(None);
        }
    }

    (macd_line, signal_line, histogram)
}

/// Fractional change of `values` over `period` bars
pub fn rate_of_change(values: &[f64], period: usize) -> Vec<Option<f64>> {
    values
        .iter()
        .enumerate()
        .map(|(i, &value)| {
            if period == 0 || i < period {
                return None;
            }
            let base = values[i - period];
            (base != 0.0).then(|| (value - base) / base)
        })
        .collect()
}

// =============================================================================
// Volatility Indicators
// =============================================================================

/// Calculate True Range
pub fn true_range(high: &[f64], low: &[f64], close: &[f64]) -> Vec<f64> {
    let mut tr = Vec::with_capacity(high.len());

    for i in 0..high.len() {
        let tr_value = if i == 0 {
            high[i] - low[i]
        } else {
            let hl = high[i] - low[i];
            let hc = (high[i] - close[i - 1]).abs();
            let lc = (low[i] - close[i - 1]).abs();
            hl.max(hc).max(lc)
        };
        tr.push(tr_value);
    }

    tr
}

/// Calculate Average True Range as the simple mean of the last `period` TR values
pub fn atr(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<Option<f64>> {
    if high.is_empty() || period == 0 || high.len() != low.len() || high.len() != close.len() {
        return vec![];
    }

    let tr = true_range(high, low, close);
    let mut result = Vec::with_capacity(tr.len());
    let mut window_sum = 0.0;

    for i in 0..tr.len() {
        window_sum += tr[i];
        if i >= period {
            window_sum -= tr[i - period];
        }

        if i + 1 < period {
            result.push(None);
        } else {
            // Re-sum periodically so rounding error does not accumulate over long series
            if i % 1024 == 0 {
                window_sum = tr[i + 1 - period..=i].iter().sum();
            }
            result.push(Some(window_sum / period as f64));
        }
    }

    result
}

/// ATR of the last bar in the series, or `None` during warm-up
pub fn latest_atr(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Option<f64> {
    if period == 0 || close.len() < period {
        return None;
    }
    let start = close.len() - period;
    let tr = true_range(
        &high[start.saturating_sub(1)..],
        &low[start.saturating_sub(1)..],
        &close[start.saturating_sub(1)..],
    );
    // The first TR of a sliced window has no previous close; drop it when we have one
    let tail = &tr[tr.len() - period..];
    Some(tail.iter().sum::<f64>() / period as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sma() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let result = sma(&values, 3);

        assert_eq!(result[0], None);
        assert_eq!(result[1], None);
        // SMA of [1,2,3] = 2.0
        assert!((result[2].unwrap() - 2.0).abs() < 0.001);
        // SMA of [3,4,5] = 4.0
        assert!((result[4].unwrap() - 4.0).abs() < 0.001);
    }

    #[test]
    fn test_ema() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let result = ema(&values, 3);

        assert_eq!(result[0], None);
        assert!(result[2].is_some());
        let ema_val = result[4].unwrap();
        assert!(ema_val > 3.0 && ema_val < 5.0);
    }

    #[test]
    fn test_atr_is_simple_mean_of_true_range() {
        let high = vec![10.0, 12.0, 11.0, 13.0];
        let low = vec![9.0, 10.0, 9.5, 11.0];
        let close = vec![9.5, 11.0, 10.0, 12.5];

        // TR = [1.0, 2.5, 1.5, 3.0]
        let result = atr(&high, &low, &close, 2);
        assert_eq!(result[0], None);
        assert!((result[1].unwrap() - 1.75).abs() < 1e-12);
        assert!((result[2].unwrap() - 2.0).abs() < 1e-12);
        assert!((result[3].unwrap() - 2.25).abs() < 1e-12);

        let latest = latest_atr(&high, &low, &close, 2).unwrap();
        assert!((latest - 2.25).abs() < 1e-12);
    }

    #[test]
    fn test_macd_warmup_and_sign() {
        let values: Vec<f64> = (0..60).map(|i| 100.0 + i as f64).collect();
        let (line, signal, hist) = macd(&values, 12, 26, 9);

        assert!(line[33].is_none());
        assert!(line[34].is_some());
        assert!(signal[59].is_some());
        assert!(hist[59].is_some());
        // Steady uptrend keeps the fast EMA above the slow EMA
        assert!(line[59].unwrap() > 0.0);
    }

    #[test]
    fn test_rate_of_change() {
        let values = vec![100.0, 105.0, 110.0];
        let roc = rate_of_change(&values, 2);
        assert_eq!(roc[1], None);
        assert!((roc[2].unwrap() - 0.1).abs() < 1e-12);
    }
}
