//! Larry Williams Pullback Strategy Module
//!
//! Trend-following entries on pullbacks: trade in the direction of the moving
//! average once the trend is established, entering when price resumes after a
//! volatility-sized retracement.

pub mod config;
pub mod strategy;

pub use config::LarryWilliamsConfig;
pub use strategy::LarryWilliamsStrategy;
