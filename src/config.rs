//! Configuration management
//!
//! Handles loading and parsing of JSON configuration files with environment
//! variable overrides (read from `.env` via `dotenv` by the binary).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::backtest::BacktestSettings;
use crate::data::periods_per_year;
use crate::objective::ObjectivePolicy;
use crate::optimizer::OptimizerSettings;
use crate::validator::ValidationPolicy;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub market: MarketConfig,
    #[serde(default)]
    pub optimization: OptimizationConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub objective: ObjectivePolicy,
    #[serde(default)]
    pub backtest: BacktestConfig,
    #[serde(default = "default_params_file")]
    pub params_file: PathBuf,
}

fn default_params_file() -> PathBuf {
    PathBuf::from("optimized_params.json")
}

impl Default for Config {
    fn default() -> Self {
        Config {
            exchange: ExchangeConfig::default(),
            market: MarketConfig::default(),
            optimization: OptimizationConfig::default(),
            validation: ValidationConfig::default(),
            objective: ObjectivePolicy::default(),
            backtest: BacktestConfig::default(),
            params_file: default_params_file(),
        }
    }
}

impl Config {
    /// Load configuration from JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).context("Failed to read config file")?;
        let config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;
        Ok(config)
    }

    /// Defaults, optionally replaced by a JSON file, then overridden from the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Config::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(env) = var("BYBIT_ENVIRONMENT") {
            self.exchange.environment = env
                .parse()
                .map_err(anyhow::Error::msg)
                .context("Invalid BYBIT_ENVIRONMENT")?;
        }
        if let Some(symbol) = var("BYBIT_SYMBOL") {
            self.market.symbol = symbol;
        }
        if let Some(timeframe) = var("BYBIT_TIMEFRAME") {
            self.market.timeframe = timeframe;
        }
        if let Some(days) = var("OPTIMIZATION_DAYS") {
            self.optimization.days = days.parse().context("Invalid OPTIMIZATION_DAYS")?;
        }
        if let Some(n_iter) = var("OPTIMIZATION_N_ITER") {
            self.optimization.optimizer.n_iter =
                n_iter.parse().context("Invalid OPTIMIZATION_N_ITER")?;
        }
        if let Some(days) = var("VALIDATION_DAYS") {
            self.validation.days = days.parse().context("Invalid VALIDATION_DAYS")?;
        }
        if let Some(file) = var("OPTIMIZED_PARAMS_FILE") {
            self.params_file = PathBuf::from(file);
        }
        Ok(())
    }

    /// Simulator settings for the configured timeframe
    pub fn backtest_settings(&self) -> Result<BacktestSettings> {
        Ok(BacktestSettings {
            initial_capital: self.backtest.initial_capital,
            fee_rate: self.backtest.fee_rate,
            periods_per_year: periods_per_year(&self.market.timeframe)?,
        })
    }

    pub fn validation_policy(&self) -> ValidationPolicy {
        ValidationPolicy {
            min_retained_ratio: self.validation.min_retained_ratio,
        }
    }
}

// =============================================================================
// Exchange
// =============================================================================

/// Bybit environment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    #[default]
    Demo,
    Testnet,
}

impl Environment {
    pub fn base_url(self) -> &'static str {
        match self {
            Environment::Production => "https://api.bybit.com",
            Environment::Demo => "https://api-demo.bybit.com",
            Environment::Testnet => "https://api-testnet.bybit.com",
        }
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "production" | "prod" | "mainnet" => Ok(Environment::Production),
            "demo" => Ok(Environment::Demo),
            "testnet" => Ok(Environment::Testnet),
            other => Err(format!(
                "unknown environment '{}': expected production, demo or testnet",
                other
            )),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Environment::Production => "production",
            Environment::Demo => "demo",
            Environment::Testnet => "testnet",
        };
        write!(f, "{}", name)
    }
}

/// Exchange configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    #[serde(default)]
    pub environment: Environment,
    /// Bybit product category for market data
    #[serde(default = "default_category")]
    pub category: String,
}

fn default_category() -> String {
    "linear".to_string()
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        ExchangeConfig {
            environment: Environment::default(),
            category: default_category(),
        }
    }
}

// =============================================================================
// Market / optimization / validation / backtest sections
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    #[serde(default = "default_symbol")]
    pub symbol: String,
    /// Bybit kline interval (`"5"` = 5 minutes)
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
}

fn default_symbol() -> String {
    "BTCUSDT".to_string()
}

fn default_timeframe() -> String {
    "5".to_string()
}

impl Default for MarketConfig {
    fn default() -> Self {
        MarketConfig {
            symbol: default_symbol(),
            timeframe: default_timeframe(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationConfig {
    /// Days of history searched in-sample
    #[serde(default = "default_optimization_days")]
    pub days: u32,
    #[serde(flatten)]
    pub optimizer: OptimizerSettings,
}

fn default_optimization_days() -> u32 {
    90
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        OptimizationConfig {
            days: default_optimization_days(),
            optimizer: OptimizerSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    #[serde(default = "default_validation_days")]
    pub days: u32,
    #[serde(default = "default_min_retained_ratio")]
    pub min_retained_ratio: f64,
}

fn default_validation_days() -> u32 {
    30
}

fn default_min_retained_ratio() -> f64 {
    ValidationPolicy::default().min_retained_ratio
}

impl Default for ValidationConfig {
    fn default() -> Self {
        ValidationConfig {
            days: default_validation_days(),
            min_retained_ratio: default_min_retained_ratio(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    #[serde(default = "default_initial_capital")]
    pub initial_capital: f64,
    /// Taker fee per side as a fraction of notional
    #[serde(default = "default_fee_rate")]
    pub fee_rate: f64,
}

fn default_initial_capital() -> f64 {
    10_000.0
}

fn default_fee_rate() -> f64 {
    0.00055
}

impl Default for BacktestConfig {
    fn default() -> Self {
        BacktestConfig {
            initial_capital: default_initial_capital(),
            fee_rate: default_fee_rate(),
        }
    }
}
