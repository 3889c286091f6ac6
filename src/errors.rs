//! Typed error taxonomy for the discovery engine.
//!
//! Internal components return `Result<T, EngineError>`; the CLI and job-level
//! orchestration wrap these in `anyhow::Result` to attach operator-facing
//! context (mirrors how the reference system's tool layer wraps typed engine
//! errors in `anyhow` at its boundary).

use thiserror::Error;

/// The five error kinds the engine distinguishes. Each maps to one of the
/// branch-level / job-level propagation rules in the error handling design.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no price file for ticker `{ticker}`")]
    MissingData { ticker: String },

    #[error("ticker `{ticker}` has only {bars} usable bars, fewer than the {required} required by window {window}")]
    DegenerateSeries {
        ticker: String,
        bars: usize,
        required: usize,
        window: usize,
    },

    #[error("family `{family}` produced NaN/Inf for ticker `{ticker}` at bar {index}")]
    NumericAnomaly {
        ticker: String,
        family: String,
        index: usize,
    },

    #[error("invalid job configuration: {0}")]
    ConfigError(String),

    #[error("worker crashed: {0}")]
    WorkerCrash(String),

    #[error("polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// A per-branch failure recorded by a worker. Never propagated as a hard
/// error — accounted locally as described in §7 (errored branches count as
/// completed, not passing, and never reach the Filter).
#[derive(Debug, Clone)]
pub struct BranchError {
    pub ticker: String,
    pub family: String,
    pub window: Option<usize>,
    pub message: String,
}

impl BranchError {
    pub fn from_engine_error(ticker: &str, family: &str, window: Option<usize>, err: &EngineError) -> Self {
        Self {
            ticker: ticker.to_string(),
            family: family.to_string(),
            window,
            message: err.to_string(),
        }
    }
}
