//! `BacktestKernel` (§4.3): one vectorized pass from an indicator array to a
//! signal, position array, and daily strategy returns.

use crate::config::Comparator;
use crate::engine::indicators::IndicatorSeries;

/// One identified trade, `[entry, exit)` half-open on bar index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trade {
    pub entry: usize,
    pub exit: usize,
    pub hold_days: usize,
    pub trade_return: f64,
}

/// Output of one `BacktestKernel::run` call.
pub struct BacktestOutput {
    pub signal: Vec<bool>,
    pub position: Vec<bool>,
    pub strategy_returns: Vec<f64>,
    pub trades: Vec<Trade>,
}

/// One `(family', window', comparator', threshold')` L2 clause, ANDed onto
/// the primary raw signal before execution-lag (§4.3).
pub struct L2Clause<'a> {
    pub indicator: &'a IndicatorSeries,
    pub comparator: Comparator,
    pub threshold: f64,
}

/// Runs the full series in one pass; no per-bar allocation.
pub fn run(
    indicator: &IndicatorSeries,
    comparator: Comparator,
    threshold: f64,
    returns: &[f64],
    cost_bps: f64,
    l2: Option<&L2Clause>,
) -> BacktestOutput {
    let n = returns.len();
    debug_assert_eq!(indicator.values.len(), n);

    let mut raw_signal = vec![false; n];
    for i in 0..n {
        raw_signal[i] = raw(indicator.values[i], comparator, threshold);
    }

    if let Some(clause) = l2 {
        for i in 0..n {
            raw_signal[i] = raw_signal[i] && raw(clause.indicator.values[i], clause.comparator, clause.threshold);
        }
    }

    let mut position = vec![false; n];
    for i in 1..n {
        position[i] = raw_signal[i - 1];
    }

    let mut strategy_returns = vec![0.0; n];
    let mut trades = Vec::new();
    let mut entry: Option<usize> = None;

    for i in 0..n {
        let mut bar_return = if position[i] { returns[i] } else { 0.0 };

        let entered_here = position[i] && (i == 0 || !position[i - 1]);
        if entered_here && cost_bps > 0.0 {
            bar_return -= cost_bps / 10_000.0;
        }
        strategy_returns[i] = bar_return;

        if entered_here {
            entry = Some(i);
        }
        let exited_here = !position[i] && i > 0 && position[i - 1];
        if exited_here {
            if let Some(entry_idx) = entry.take() {
                let trade_return = strategy_returns[entry_idx..i]
                    .iter()
                    .fold(1.0, |acc, r| acc * (1.0 + r))
                    - 1.0;
                trades.push(Trade {
                    entry: entry_idx,
                    exit: i,
                    hold_days: i - entry_idx,
                    trade_return,
                });
            }
        }
    }
    // A position still open at the series end is not closed into a trade:
    // exit requires an observed `false` bar (§4.3 "exit is the first
    // subsequent i with position[i]=false").

    BacktestOutput {
        signal: raw_signal,
        position,
        strategy_returns,
        trades,
    }
}

fn raw(value: f64, comparator: Comparator, threshold: f64) -> bool {
    match comparator {
        Comparator::Gt => value > threshold,
        Comparator::Lt => value < threshold,
    }
}
