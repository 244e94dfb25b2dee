//! Optimized parameter file
//!
//! The artifact is a versioned JSON document. Loading is strict: unknown or
//! missing fields, an unsupported `schema_version` or an unregistered
//! `strategy_name` are errors. Writes go to a temporary sibling that is synced
//! and renamed over the target, so a failed write never leaves a partial file.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TunerError};
use crate::space::bounds_for;
use crate::strategies::{
    LarryWilliamsConfig, MacdCrossoverConfig, StrategyConfig, StrategyVariant,
};
use crate::trailing_stop::TrailingStopConfig;
use crate::validator::WindowSpan;
use crate::PerformanceMetrics;

pub const SCHEMA_VERSION: u32 = 1;

/// Metrics persisted with the parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArtifactMetrics {
    pub total_return: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    pub win_rate: f64,
}

impl From<&PerformanceMetrics> for ArtifactMetrics {
    fn from(m: &PerformanceMetrics) -> Self {
        ArtifactMetrics {
            total_return: m.total_return,
            sharpe_ratio: m.sharpe_ratio,
            max_drawdown: m.max_drawdown,
            win_rate: m.win_rate,
        }
    }
}

/// Winning configuration of an optimization run
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizedParameterSet {
    pub strategy: StrategyConfig,
    pub trailing_stop: TrailingStopConfig,
    pub symbol: String,
    pub timeframe: String,
    pub metrics: ArtifactMetrics,
    pub created_at: DateTime<Utc>,
    pub in_sample: WindowSpan,
}

/// On-disk layout
#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ArtifactFile {
    schema_version: u32,
    strategy: serde_json::Value,
    strategy_name: String,
    trailing_stop: TrailingStopConfig,
    symbol: String,
    timeframe: String,
    metrics: ArtifactMetrics,
    created_at: DateTime<Utc>,
    in_sample: WindowSpan,
}

fn schema_error(e: serde_json::Error) -> TunerError {
    TunerError::Schema(e.to_string())
}

impl OptimizedParameterSet {
    pub fn strategy_name(&self) -> &'static str {
        self.strategy.variant().tag()
    }

    pub fn to_json(&self) -> Result<String> {
        let strategy = match &self.strategy {
            StrategyConfig::LarryWilliams(c) => serde_json::to_value(c),
            StrategyConfig::MacdCrossover(c) => serde_json::to_value(c),
        }
        .map_err(schema_error)?;

        let file = ArtifactFile {
            schema_version: SCHEMA_VERSION,
            strategy,
            strategy_name: self.strategy_name().to_string(),
            trailing_stop: self.trailing_stop.clone(),
            symbol: self.symbol.clone(),
            timeframe: self.timeframe.clone(),
            metrics: self.metrics,
            created_at: self.created_at,
            in_sample: self.in_sample,
        };
        serde_json::to_string_pretty(&file).map_err(schema_error)
    }

    /// Parse and validate an artifact
    pub fn from_json(json: &str) -> Result<Self> {
        let file: ArtifactFile = serde_json::from_str(json).map_err(schema_error)?;

        if file.schema_version != SCHEMA_VERSION {
            return Err(TunerError::Schema(format!(
                "unsupported schema_version {} (expected {})",
                file.schema_version, SCHEMA_VERSION
            )));
        }

        let variant = StrategyVariant::from_tag(&file.strategy_name)?;
        let strategy = match variant {
            StrategyVariant::LarryWilliams => StrategyConfig::LarryWilliams(
                serde_json::from_value::<LarryWilliamsConfig>(file.strategy).map_err(schema_error)?,
            ),
            StrategyVariant::MacdCrossover => StrategyConfig::MacdCrossover(
                serde_json::from_value::<MacdCrossoverConfig>(file.strategy).map_err(schema_error)?,
            ),
        };

        let space = bounds_for(variant);
        space.clamp_or_reject(&space.join(&strategy.to_params(), &file.trailing_stop.to_params()))?;

        Ok(OptimizedParameterSet {
            strategy,
            trailing_stop: file.trailing_stop,
            symbol: file.symbol,
            timeframe: file.timeframe,
            metrics: file.metrics,
            created_at: file.created_at,
            in_sample: file.in_sample,
        })
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = temp_path(path);
    let result = (|| {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

/// Persist `set` to `path`, replacing any previous file
pub fn save(path: &Path, set: &OptimizedParameterSet) -> Result<()> {
    let json = set.to_json()?;

    if let Err(e) = write_atomic(path, json.as_bytes()) {
        tracing::warn!("Writing {} failed ({}), retrying once", path.display(), e);
        write_atomic(path, json.as_bytes())?;
    }

    tracing::info!("Saved optimized parameters to {}", path.display());
    Ok(())
}

/// Load and validate the artifact at `path`
pub fn load(path: &Path) -> Result<OptimizedParameterSet> {
    let json = fs::read_to_string(path)?;
    OptimizedParameterSet::from_json(&json)
}
