//! `Filter` (§4.6): the pass/fail predicate applied to a branch's IS
//! `MetricTuple`. OOS metrics are computed and retained but never
//! consulted here.

use crate::config::JobConfig;
use crate::engine::metrics::MetricTuple;

/// The five quality bars from the job configuration (§6).
#[derive(Debug, Clone, Copy)]
pub struct FilterThresholds {
    pub min_tim: f64,
    pub min_timar: f64,
    pub max_dd: f64,
    pub min_trades: u32,
    pub min_timardd: f64,
}

impl From<&JobConfig> for FilterThresholds {
    fn from(config: &JobConfig) -> Self {
        Self {
            min_tim: config.min_tim,
            min_timar: config.min_timar,
            max_dd: config.max_dd,
            min_trades: config.min_trades,
            min_timardd: config.min_timardd,
        }
    }
}

/// `passes(isMetrics, thresholds) -> bool`.
pub fn passes(metrics: &MetricTuple, thresholds: &FilterThresholds) -> bool {
    metrics.tim >= thresholds.min_tim
        && metrics.timar >= thresholds.min_timar
        && metrics.max_dd.abs() <= thresholds.max_dd
        && metrics.trades >= thresholds.min_trades
        && metrics.timardd >= thresholds.min_timardd
}
