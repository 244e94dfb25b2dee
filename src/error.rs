//! Error taxonomy of the tuning engine
//!
//! Recoverable conditions (rejected candidates, validation warnings) never
//! surface as errors; they are recorded in the run history or the validation
//! report. Everything here aborts the operation that raised it.

use thiserror::Error;

use crate::optimizer::OptimizationRun;

#[derive(Debug, Error)]
pub enum TunerError {
    /// A parameter vector violates declared bounds or a cross-field invariant
    #[error("parameter '{dimension}' out of range: {message}")]
    Range { dimension: String, message: String },

    /// The candle window is shorter than the warm-up the parameters require
    #[error("insufficient data: {required} candles required, {available} available")]
    InsufficientData { required: usize, available: usize },

    /// No candidate passed the range check during a whole run
    #[error("optimization diverged: none of {evaluated} candidates was valid")]
    OptimizationDivergence { evaluated: usize },

    /// A persisted artifact references a strategy tag that is not registered
    #[error("unknown strategy: {0}")]
    UnknownStrategy(String),

    /// The validation window is not strictly later than the in-sample window
    #[error("validation window overlaps in-sample window: {0}")]
    WindowOverlap(String),

    /// The persisted artifact is malformed or has an unsupported version
    #[error("invalid parameter file: {0}")]
    Schema(String),

    /// Writing or reading the artifact failed after retrying
    #[error("persistence failure: {0}")]
    Persistence(#[from] std::io::Error),

    /// The candle series is unusable (empty, unordered)
    #[error("market data error: {0}")]
    Data(String),
}

impl TunerError {
    pub fn range(dimension: impl Into<String>, message: impl Into<String>) -> Self {
        TunerError::Range {
            dimension: dimension.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TunerError>;

/// A fatal optimizer error together with the history gathered before it.
#[derive(Debug, Error)]
#[error("{error} (after {} evaluations)", .run.records.len())]
pub struct OptimizationFailure {
    #[source]
    pub error: TunerError,
    pub run: OptimizationRun,
}
