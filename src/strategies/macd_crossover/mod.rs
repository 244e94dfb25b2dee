//! MACD Crossover Strategy Module
//!
//! Enters on MACD / signal-line crosses confirmed by price momentum.

pub mod config;
pub mod strategy;

pub use config::MacdCrossoverConfig;
pub use strategy::MacdCrossoverStrategy;
