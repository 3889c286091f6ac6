//! `MetricsKernel` (§4.4): one pass per backtest producing the twelve-scalar
//! `MetricTuple` for a single IS or OOS partition.
//!
//! Percentile and dispersion statistics reuse `statrs`'s slice-oriented
//! `Statistics`/`OrderStatistics` traits the same way the closest reference
//! example computes Sharpe/VaR (`(&returns[..]).mean()`, `.std_dev()`,
//! `Data::new(v).percentile(p)`) rather than hand-rolling mean/stddev/
//! quantile math a second time.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, OrderStatistics, Statistics};

use crate::engine::kernel::Trade;

const TRADING_DAYS_PER_YEAR: f64 = 252.0;
const DAYS_PER_YEAR: f64 = 365.25;
const THREE_YEARS_DAYS: i64 = (3.0 * DAYS_PER_YEAR) as i64;

/// The twelve scalars computed per partition (§3 `MetricTuple`, §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricTuple {
    pub tim: f64,
    pub cagr: f64,
    pub timar: f64,
    pub max_dd: f64,
    pub timardd: f64,
    pub trades: u32,
    pub avg_hold: f64,
    pub sharpe: f64,
    pub dd3: f64,
    pub dd50: f64,
    pub dd95: f64,
    pub timar3: f64,
}

impl MetricTuple {
    /// The all-false/no-bars-selected tuple (§3: flat signal invariants).
    pub const ZERO: MetricTuple = MetricTuple {
        tim: 0.0,
        cagr: 0.0,
        timar: 0.0,
        max_dd: 0.0,
        timardd: 0.0,
        trades: 0,
        avg_hold: 0.0,
        sharpe: 0.0,
        dd3: 0.0,
        dd50: 0.0,
        dd95: 0.0,
        timar3: 0.0,
    };
}

/// `compute(position, stratReturns, dates, mask, trades) -> MetricTuple`.
///
/// `position` is the post-lag boolean "currently long" array from the
/// kernel (the contract's "signal" — §4.4 ties `TIM`/trade accounting to
/// time actually held, which is `position`, not the pre-lag `rawSignal`).
/// Operates on the subset selected by `mask`, compacted in temporal order;
/// warm-up bars are never excluded here (that is a property of `mask`
/// itself — see `partition::effective_mask`) but naturally contribute
/// `position=false`/`stratRet=0` and so do not bias any of the twelve
/// scalars.
#[allow(clippy::too_many_lines)]
pub fn compute(
    position: &[bool],
    strategy_returns: &[f64],
    dates: &[NaiveDate],
    mask: &[bool],
    trades: &[Trade],
) -> MetricTuple {
    let n = position.len();
    debug_assert_eq!(strategy_returns.len(), n);
    debug_assert_eq!(dates.len(), n);
    debug_assert_eq!(mask.len(), n);

    let selected: Vec<usize> = (0..n).filter(|&i| mask[i]).collect();
    if selected.is_empty() {
        return MetricTuple::ZERO;
    }

    let count_in_market = selected.iter().filter(|&&i| position[i]).count();
    let tim = 100.0 * count_in_market as f64 / selected.len() as f64;

    // Equity curve over the masked bars in order, and its pointwise
    // drawdown series, in one linear pass.
    let mut equity = Vec::with_capacity(selected.len() + 1);
    equity.push(1.0);
    for &i in &selected {
        let prev = *equity.last().unwrap();
        equity.push(prev * (1.0 + strategy_returns[i]));
    }
    let equity_final = *equity.last().unwrap();

    let mut running_max = f64::MIN;
    let mut drawdowns = Vec::with_capacity(equity.len());
    for &e in &equity {
        running_max = running_max.max(e);
        drawdowns.push(e / running_max - 1.0);
    }
    let max_dd = drawdowns.iter().copied().fold(0.0_f64, f64::min);

    let first_date = dates[selected[0]];
    let last_date = dates[*selected.last().unwrap()];
    let calendar_days = (last_date - first_date).num_days() as f64;
    let years = calendar_days / DAYS_PER_YEAR;
    let cagr = if years > 0.0 && equity_final > 0.0 {
        equity_final.powf(1.0 / years) - 1.0
    } else {
        0.0
    };

    let timar = if tim > 0.0 { 100.0 * cagr / tim } else { 0.0 };
    let timardd = if max_dd.abs() > 0.0 { timar / max_dd.abs() } else { 0.0 };

    let counted_trades: Vec<&Trade> = trades.iter().filter(|t| mask[t.entry]).collect();
    let trade_count = counted_trades.len() as u32;
    let avg_hold = if counted_trades.is_empty() {
        0.0
    } else {
        counted_trades.iter().map(|t| t.hold_days as f64).sum::<f64>() / counted_trades.len() as f64
    };

    let masked_returns: Vec<f64> = selected.iter().map(|&i| strategy_returns[i]).collect();
    let sharpe = sharpe_ratio(&masked_returns);

    let (dd3, dd50, dd95) = drawdown_percentiles(&drawdowns);

    let timar3 = worst_three_year_timar(&selected, dates, position, strategy_returns);

    MetricTuple {
        tim,
        cagr,
        timar,
        max_dd,
        timardd,
        trades: trade_count,
        avg_hold,
        sharpe,
        dd3,
        dd50,
        dd95,
        timar3,
    }
}

fn sharpe_ratio(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let stddev = (returns).std_dev();
    if stddev == 0.0 || stddev.is_nan() {
        return 0.0;
    }
    let mean = (returns).mean();
    TRADING_DAYS_PER_YEAR.sqrt() * mean / stddev
}

/// Linear-interpolated 3rd/50th/95th percentiles of the drawdown series
/// (§9 open question: ties resolved via interpolation, matching `statrs`'s
/// `Data::percentile`).
fn drawdown_percentiles(drawdowns: &[f64]) -> (f64, f64, f64) {
    if drawdowns.is_empty() {
        return (0.0, 0.0, 0.0);
    }
    let mut data = Data::new(drawdowns.to_vec());
    (data.percentile(3), data.percentile(50), data.percentile(95))
}

/// TIMAR on the worst rolling three-year window within the masked period
/// (§9: "TIMAR computed on the worst 3-year window", the spec's own
/// resolution of the ambiguous source behavior). Two-pointer scan over the
/// compacted masked timeline: the window end is monotonic non-decreasing
/// as the start advances, so this is a single linear pass, not quadratic.
fn worst_three_year_timar(
    selected: &[usize],
    dates: &[NaiveDate],
    position: &[bool],
    strategy_returns: &[f64],
) -> f64 {
    let m = selected.len();
    if m == 0 {
        return 0.0;
    }

    let mut prefix_log_equity = vec![0.0_f64; m + 1];
    let mut prefix_in_market = vec![0u32; m + 1];
    for (k, &i) in selected.iter().enumerate() {
        let r = strategy_returns[i];
        let log_growth = if r > -1.0 { (1.0 + r).ln() } else { f64::NEG_INFINITY };
        prefix_log_equity[k + 1] = prefix_log_equity[k] + log_growth;
        prefix_in_market[k + 1] = prefix_in_market[k] + u32::from(position[i]);
    }

    let mut worst: Option<f64> = None;
    let mut end = 0usize;
    for start in 0..m {
        if end < start {
            end = start;
        }
        while end < m && (dates[selected[end]] - dates[selected[start]]).num_days() < THREE_YEARS_DAYS {
            end += 1;
        }
        if end >= m {
            break;
        }
        let window_len = (end + 1 - start) as f64;
        let tim_w = 100.0 * (prefix_in_market[end + 1] - prefix_in_market[start]) as f64 / window_len;
        if tim_w <= 0.0 {
            continue;
        }
        let window_days = (dates[selected[end]] - dates[selected[start]]).num_days() as f64;
        let years_w = window_days / DAYS_PER_YEAR;
        if years_w <= 0.0 {
            continue;
        }
        let equity_ratio = (prefix_log_equity[end + 1] - prefix_log_equity[start]).exp();
        if equity_ratio <= 0.0 {
            continue;
        }
        let cagr_w = equity_ratio.powf(1.0 / years_w) - 1.0;
        let timar_w = 100.0 * cagr_w / tim_w;
        worst = Some(worst.map_or(timar_w, |w: f64| w.min(timar_w)));
    }

    worst.unwrap_or(0.0)
}
