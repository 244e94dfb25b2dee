//! Strategy Tuner
//!
//! Bayesian parameter search and out-of-sample validation for trading
//! strategies with an ATR trailing stop. The winning configuration is
//! persisted as a versioned JSON artifact for the trading engine.

pub mod backtest;
pub mod bybit;
pub mod config;
pub mod data;
pub mod error;
pub mod gp;
pub mod indicators;
pub mod objective;
pub mod optimizer;
pub mod space;
pub mod store;
pub mod strategies;
pub mod trailing_stop;
pub mod types;
pub mod validator;

pub use config::Config;
pub use error::{OptimizationFailure, TunerError};
pub use types::*;
