//! Backtesting engine
//!
//! Single-pass bar replay of one strategy with an ATR trailing stop. Orders
//! fill at the signal bar's close; stops fill intrabar at the stop level (or
//! the open when the bar gaps through it). Positions use the full equity and
//! pay the taker fee on entry and exit notional.

use chrono::{DateTime, Utc};

use crate::error::{Result, TunerError};
use crate::indicators::atr;
use crate::strategies::{Strategy, StrategyConfig};
use crate::trailing_stop::{TrailingStop, TrailingStopConfig};
use crate::{Candle, ExitReason, PerformanceMetrics, Side, Signal, Trade};

/// Smallest candle window handed to a strategy on each bar
const MIN_STRATEGY_WINDOW: usize = 100;

/// Upper bound reported for the profit factor of a run without losing trades
pub const PROFIT_FACTOR_CAP: f64 = 100.0;

const SECONDS_PER_YEAR: f64 = 365.0 * 24.0 * 3600.0;

/// Account and annualisation settings of a simulation
#[derive(Debug, Clone, PartialEq)]
pub struct BacktestSettings {
    pub initial_capital: f64,
    /// Taker fee as a fraction of notional
    pub fee_rate: f64,
    /// Bars per year, used to annualise the Sharpe ratio
    pub periods_per_year: f64,
}

impl Default for BacktestSettings {
    fn default() -> Self {
        Self {
            initial_capital: 10_000.0,
            fee_rate: 0.00055,
            // 5 minute bars
            periods_per_year: 365.0 * 24.0 * 12.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BacktestResult {
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<(DateTime<Utc>, f64)>,
    pub metrics: PerformanceMetrics,
}

#[derive(Debug, Clone)]
struct OpenPosition {
    side: Side,
    entry_time: DateTime<Utc>,
    entry_price: f64,
    quantity: f64,
    entry_fee: f64,
    stop: TrailingStop,
}

impl OpenPosition {
    fn unrealized(&self, price: f64) -> f64 {
        self.side.sign() * (price - self.entry_price) * self.quantity
    }
}

/// Backtest engine
pub struct Backtester {
    settings: BacktestSettings,
    trailing: TrailingStopConfig,
    strategy: Box<dyn Strategy>,
}

impl Backtester {
    pub fn new(
        settings: BacktestSettings,
        strategy: &StrategyConfig,
        trailing: &TrailingStopConfig,
    ) -> Self {
        Backtester {
            settings,
            trailing: trailing.clone(),
            strategy: strategy.build(),
        }
    }

    /// Candles needed before the first signal can be evaluated
    pub fn warmup_bars(&self) -> usize {
        self.strategy
            .warmup_bars()
            .max(self.trailing.warmup_bars())
    }

    /// Trailing candles passed to the strategy on each bar
    pub fn strategy_window(&self) -> usize {
        (self.warmup_bars() * 3).max(MIN_STRATEGY_WINDOW)
    }

    /// Replay `candles` once, in order.
    ///
    /// Fails without simulating anything when the series is shorter than the
    /// warm-up or its timestamps are not strictly increasing.
    pub fn run(&self, candles: &[Candle]) -> Result<BacktestResult> {
        let warmup = self.warmup_bars();
        if candles.len() < warmup {
            return Err(TunerError::InsufficientData {
                required: warmup,
                available: candles.len(),
            });
        }

        if let Some(w) = candles.windows(2).find(|w| w[1].datetime <= w[0].datetime) {
            return Err(TunerError::Data(format!(
                "candles not strictly increasing at {}",
                w[1].datetime
            )));
        }

        let highs: Vec<f64> = candles.iter().map(|c| c.high).collect();
        let lows: Vec<f64> = candles.iter().map(|c| c.low).collect();
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let atr_values = atr(&highs, &lows, &closes, self.trailing.atr_period);

        let lookback = self.strategy_window();
        let fee = self.settings.fee_rate;

        let mut cash = self.settings.initial_capital;
        let mut position: Option<OpenPosition> = None;
        let mut trades = Vec::new();
        let mut equity_curve = Vec::with_capacity(candles.len());

        for (i, candle) in candles.iter().enumerate() {
            let start_idx = (i + 1).saturating_sub(lookback);
            let current_atr = atr_values.get(i).copied().flatten();

            // ============================================================
            // PHASE 1: Trailing stop against this bar's range
            // ============================================================
            let stopped = position
                .as_ref()
                .and_then(|pos| pos.stop.breach(candle));
            if let Some(fill) = stopped {
                if let Some(pos) = position.take() {
                    let trade = close_position(&pos, fill, candle.datetime, ExitReason::TrailingStop, fee);
                    cash += trade.net_pnl;
                    trades.push(trade);
                }
            }

            // ============================================================
            // PHASE 2: Strategy signal on the bar's close
            // ============================================================
            // A bar that stopped the position out does not open a new one
            if stopped.is_none() && i + 1 >= warmup {
                let side = position.as_ref().map(|p| p.side);
                let signal = self
                    .strategy
                    .generate_signal(&candles[start_idx..=i], side);

                let target = match signal {
                    Signal::EnterLong => Some(Side::Long),
                    Signal::EnterShort => Some(Side::Short),
                    Signal::Exit => {
                        if let Some(pos) = position.take() {
                            let trade =
                                close_position(&pos, candle.close, candle.datetime, ExitReason::Signal, fee);
                            cash += trade.net_pnl;
                            trades.push(trade);
                        }
                        None
                    }
                    Signal::Hold => None,
                };

                if let Some(target) = target {
                    if side == Some(target.opposite()) {
                        if let Some(pos) = position.take() {
                            let trade = close_position(
                                &pos,
                                candle.close,
                                candle.datetime,
                                ExitReason::Reversal,
                                fee,
                            );
                            cash += trade.net_pnl;
                            trades.push(trade);
                        }
                    }

                    if position.is_none() && cash > 0.0 {
                        if let Some(atr_now) = current_atr {
                            let quantity = cash / (candle.close * (1.0 + fee));
                            position = Some(OpenPosition {
                                side: target,
                                entry_time: candle.datetime,
                                entry_price: candle.close,
                                quantity,
                                entry_fee: quantity * candle.close * fee,
                                stop: TrailingStop::open(
                                    target,
                                    candle.close,
                                    atr_now,
                                    self.trailing.atr_multiplier,
                                ),
                            });
                        }
                    }
                }
            }

            // ============================================================
            // PHASE 3: Ratchet the stop and mark to market
            // ============================================================
            let equity = match position.as_mut() {
                Some(pos) => {
                    if let Some(atr_now) = current_atr {
                        pos.stop.update(candle.close, atr_now);
                    }
                    cash - pos.entry_fee + pos.unrealized(candle.close)
                }
                None => cash,
            };
            equity_curve.push((candle.datetime, equity));
        }

        if let (Some(pos), Some(last)) = (position.take(), candles.last()) {
            let trade = close_position(&pos, last.close, last.datetime, ExitReason::EndOfData, fee);
            cash += trade.net_pnl;
            trades.push(trade);
            if let Some(point) = equity_curve.last_mut() {
                point.1 = cash;
            }
        }

        let metrics = calculate_metrics(&trades, &equity_curve, &self.settings);

        tracing::debug!(
            strategy = self.strategy.name(),
            trades = trades.len(),
            total_return = metrics.total_return,
            sharpe = metrics.sharpe_ratio,
            "Backtest complete"
        );

        Ok(BacktestResult {
            trades,
            equity_curve,
            metrics,
        })
    }
}

/// Run one backtest with the given configuration pair
pub fn run_backtest(
    candles: &[Candle],
    strategy: &StrategyConfig,
    trailing: &TrailingStopConfig,
    settings: &BacktestSettings,
) -> Result<BacktestResult> {
    Backtester::new(settings.clone(), strategy, trailing).run(candles)
}

fn close_position(
    pos: &OpenPosition,
    exit_price: f64,
    exit_time: DateTime<Utc>,
    reason: ExitReason,
    fee_rate: f64,
) -> Trade {
    let pnl = pos.unrealized(exit_price);
    // Commission: taker fee on both entry and exit (round-trip cost)
    let commission = pos.entry_fee + pos.quantity * exit_price * fee_rate;
    let net_pnl = pnl - commission;

    tracing::trace!(
        side = %pos.side,
        entry = pos.entry_price,
        exit = exit_price,
        reason = ?reason,
        net_pnl,
        "Position closed"
    );

    Trade {
        side: pos.side,
        entry_time: pos.entry_time,
        entry_price: pos.entry_price,
        exit_time,
        exit_price,
        quantity: pos.quantity,
        pnl,
        commission,
        net_pnl,
        exit_reason: reason,
    }
}

/// Derive performance metrics from a trade log and its equity curve.
///
/// Pure: the same inputs always give the same metrics.
pub fn calculate_metrics(
    trades: &[Trade],
    equity_curve: &[(DateTime<Utc>, f64)],
    settings: &BacktestSettings,
) -> PerformanceMetrics {
    let (first, last) = match (equity_curve.first(), equity_curve.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return PerformanceMetrics::default(),
    };

    let initial_capital = settings.initial_capital;
    let total_return = last.1 / initial_capital - 1.0;

    let winning_trades = trades.iter().filter(|t| t.is_win()).count();
    let losing_trades = trades.len() - winning_trades;
    let win_rate = if trades.is_empty() {
        0.0
    } else {
        winning_trades as f64 / trades.len() as f64
    };

    let gross_profits: f64 = trades.iter().filter(|t| t.is_win()).map(|t| t.net_pnl).sum();
    let gross_losses: f64 = trades
        .iter()
        .filter(|t| !t.is_win())
        .map(|t| t.net_pnl.abs())
        .sum();
    let profit_factor = if gross_losses > 0.0 {
        (gross_profits / gross_losses).min(PROFIT_FACTOR_CAP)
    } else if gross_profits > 0.0 {
        PROFIT_FACTOR_CAP
    } else {
        0.0
    };

    // Calculate max drawdown
    let mut peak = initial_capital;
    let mut max_dd: f64 = 0.0;
    for (_, equity) in equity_curve {
        if *equity > peak {
            peak = *equity;
        }
        if peak > 0.0 {
            max_dd = max_dd.max((peak - equity) / peak);
        }
    }

    // Per-bar returns; mean uses every bar, volatility only the bars in the market
    let all_returns: Vec<f64> = equity_curve
        .windows(2)
        .filter(|w| w[0].1 != 0.0)
        .map(|w| (w[1].1 - w[0].1) / w[0].1)
        .collect();
    let active_returns: Vec<f64> = all_returns.iter().filter(|&&r| r != 0.0).copied().collect();

    let n_total = all_returns.len() as f64;
    let n_active = active_returns.len() as f64;

    let mean_return = if n_total > 0.0 {
        all_returns.iter().sum::<f64>() / n_total
    } else {
        0.0
    };

    let std_dev = if n_active > 1.0 {
        let active_mean = active_returns.iter().sum::<f64>() / n_active;
        let variance = active_returns
            .iter()
            .map(|r| (r - active_mean).powi(2))
            .sum::<f64>()
            / (n_active - 1.0);
        variance.sqrt()
    } else {
        0.0
    };

    let sharpe_ratio = if std_dev > 0.0 {
        mean_return / std_dev * settings.periods_per_year.sqrt()
    } else {
        0.0
    };

    // Calmar ratio (annualized return / max drawdown)
    let calmar_ratio = if max_dd > 0.0 {
        let years = (last.0 - first.0).num_seconds() as f64 / SECONDS_PER_YEAR;
        let growth = 1.0 + total_return;
        let annualized = if years > 0.0 && growth > 0.0 {
            (growth.ln() / years).exp() - 1.0
        } else {
            total_return
        };
        if annualized.is_finite() {
            annualized / max_dd
        } else {
            total_return / max_dd
        }
    } else {
        0.0
    };

    PerformanceMetrics {
        total_return,
        sharpe_ratio,
        max_drawdown: max_dd,
        win_rate,
        calmar_ratio,
        profit_factor,
        return_std: std_dev,
        total_trades: trades.len(),
        winning_trades,
        losing_trades,
    }
}
