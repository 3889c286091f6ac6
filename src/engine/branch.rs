//! `Branch`/`BranchResult` (§3): one element of the search Cartesian
//! product, and its persisted outcome.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Comparator;
use crate::engine::indicators::Family;
use crate::engine::metrics::MetricTuple;

/// An optional second `(family, window, comparator, threshold)` clause
/// ANDed onto the primary condition before execution-lag (§4.3). Not
/// produced by the `Enumerator` for the simple search space defined in
/// §6's `JobConfig` — this is the interface point a richer "flowchart"
/// variant would plug into (§1, out of scope here).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct L2Clause {
    pub family: Family,
    pub window: Option<u32>,
    pub comparator: Comparator,
    pub threshold: f64,
}

/// One point in the search Cartesian product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub signal_ticker: String,
    pub family: Family,
    pub window: Option<u32>,
    pub comparator: Comparator,
    pub threshold: f64,
    pub l2: Option<L2Clause>,
}

impl Branch {
    /// `investTicker = signalTicker` by default (§6 "Result row").
    pub fn invest_ticker(&self) -> &str {
        &self.signal_ticker
    }
}

/// The Branch plus its IS and OOS `MetricTuple`s plus metadata. Appended
/// once; never mutated (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchResult {
    pub job_id: Uuid,
    pub branch: Branch,
    pub is_metrics: MetricTuple,
    pub oos_metrics: MetricTuple,
    pub created_at: DateTime<Utc>,
}
