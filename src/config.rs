//! Typed job configuration.
//!
//! The reference system accepts a free-form dictionary for job config; here
//! it is a `garde`-validated record (§9 "Dynamic configuration objects").
//! Unknown fields are rejected by `#[serde(deny_unknown_fields)]`; field
//! ranges are rejected by `garde` before the job is allowed to leave
//! `pending`.

use chrono::NaiveDate;
use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::engine::indicators::Family;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ComparatorSpec {
    Lt,
    Gt,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparator {
    Lt,
    Gt,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "splitStrategy", rename_all = "snake_case")]
pub enum SplitStrategySpec {
    EvenOddMonth,
    EvenOddYear,
    Chronological { oos_start_date: NaiveDate },
}

/// Returns a closure validating that `period_max >= min`, in the style of
/// the reference system's `validate_max_gte_min` (a garde custom-validator
/// factory closing over a sibling field).
fn validate_period_max_gte_min(min: &u32) -> impl FnOnce(&u32, &()) -> garde::Result + '_ {
    move |max, _| {
        if max < min {
            return Err(garde::Error::new(format!(
                "periodMax ({max}) must be >= periodMin ({min})"
            )));
        }
        Ok(())
    }
}

fn validate_threshold_max_gte_min(min: &f64) -> impl FnOnce(&f64, &()) -> garde::Result + '_ {
    move |max, _| {
        if max < min {
            return Err(garde::Error::new(format!(
                "thresholdMax ({max}) must be >= thresholdMin ({min})"
            )));
        }
        Ok(())
    }
}

/// The typed job configuration record (§6 "Job configuration").
#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobConfig {
    #[garde(skip)]
    pub indicator: Family,

    #[garde(range(min = 1))]
    pub period_min: u32,

    #[garde(range(min = 1), custom(validate_period_max_gte_min(&self.period_min)))]
    pub period_max: u32,

    #[garde(length(min = 1))]
    pub tickers: Vec<String>,

    #[garde(skip)]
    pub comparator: ComparatorSpec,

    #[garde(skip)]
    pub threshold_min: f64,

    #[garde(custom(validate_threshold_max_gte_min(&self.threshold_min)))]
    pub threshold_max: f64,

    #[garde(range(min = 1e-12))]
    pub threshold_step: f64,

    #[garde(skip)]
    pub min_tim: f64,

    #[garde(skip)]
    pub min_timar: f64,

    #[garde(skip)]
    pub max_dd: f64,

    #[garde(skip)]
    pub min_trades: u32,

    #[garde(skip)]
    pub min_timardd: f64,

    #[garde(skip)]
    pub split_strategy: SplitStrategySpec,

    #[garde(range(min = 1))]
    pub num_workers: u32,

    #[garde(range(min = 0.0))]
    #[serde(default)]
    pub cost_bps: f64,
}

impl JobConfig {
    /// Parse and validate a `JobConfig` from a JSON document. This is the
    /// "upgrade step" from loosely-typed external input to the typed record
    /// (§9).
    pub fn from_json(raw: &str) -> Result<Self, ConfigLoadError> {
        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| ConfigLoadError::Parse(e.to_string()))?;
        let config: JobConfig =
            serde_json::from_value(value).map_err(|e| ConfigLoadError::Parse(e.to_string()))?;
        config.validate().map_err(|e| ConfigLoadError::Invalid(e.to_string()))?;
        Ok(config)
    }

    /// Parse and validate a `JobConfig` from a TOML document.
    pub fn from_toml(raw: &str) -> Result<Self, ConfigLoadError> {
        let config: JobConfig =
            toml::from_str(raw).map_err(|e| ConfigLoadError::Parse(e.to_string()))?;
        config.validate().map_err(|e| ConfigLoadError::Invalid(e.to_string()))?;
        Ok(config)
    }

    /// `windows = periodMax - periodMin + 1`, or `1` for windowless families.
    pub fn window_count(&self) -> u64 {
        if self.indicator.is_windowless() {
            1
        } else {
            u64::from(self.period_max - self.period_min + 1)
        }
    }

    pub fn comparator_count(&self) -> u64 {
        match self.comparator {
            ComparatorSpec::Both => 2,
            ComparatorSpec::Lt | ComparatorSpec::Gt => 1,
        }
    }

    /// `thresholds = floor((max-min)/step)+1`.
    pub fn threshold_count(&self) -> u64 {
        (((self.threshold_max - self.threshold_min) / self.threshold_step).floor() as u64) + 1
    }

    pub fn total_branches(&self) -> u64 {
        self.tickers.len() as u64 * self.window_count() * self.comparator_count() * self.threshold_count()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("config failed validation: {0}")]
    Invalid(String),
}
