//! Bybit v5 public market-data client
//!
//! Only the unauthenticated kline endpoint is used; order placement stays
//! with the trading collaborator.

pub mod client;
pub mod types;

pub use client::BybitClient;
pub use types::{KlineResult, Response};
