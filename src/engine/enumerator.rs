//! `Enumerator` (§4.7): produces the Cartesian product of a job
//! configuration as a restartable, lazily-evaluated sequence of `Branch`es.
//!
//! Iteration order is `ticker` outermost, then `window` (ascending), then
//! `comparator` (`lt` before `gt` under `BOTH`), then `threshold`
//! (ascending by step) — §4.7's ordering contract, exercised directly by
//! scenario S6.

use crate::config::{ComparatorSpec, Comparator, JobConfig};
use crate::engine::branch::Branch;

/// A thin, stateless view over one `JobConfig`. Every method recomputes
/// from the config's closed-form bounds, so the sequence it produces is
/// restartable for free — re-calling `branches()` (or `branches_for_ticker`)
/// simply rebuilds the same iterator.
pub struct Enumerator<'a> {
    config: &'a JobConfig,
}

impl<'a> Enumerator<'a> {
    pub fn new(config: &'a JobConfig) -> Self {
        Self { config }
    }

    /// `T`, the total branch count, in closed form from the range bounds
    /// (§4.7, property 1 in §8).
    pub fn total(&self) -> u64 {
        self.config.total_branches()
    }

    fn windows(&self) -> Vec<Option<u32>> {
        if self.config.indicator.is_windowless() {
            vec![None]
        } else {
            (self.config.period_min..=self.config.period_max).map(Some).collect()
        }
    }

    fn comparators(&self) -> Vec<Comparator> {
        match self.config.comparator {
            ComparatorSpec::Lt => vec![Comparator::Lt],
            ComparatorSpec::Gt => vec![Comparator::Gt],
            ComparatorSpec::Both => vec![Comparator::Lt, Comparator::Gt],
        }
    }

    fn thresholds(&self) -> Vec<f64> {
        let count = self.config.threshold_count();
        (0..count)
            .map(|i| self.config.threshold_min + i as f64 * self.config.threshold_step)
            .collect()
    }

    /// The number of branches produced for a single ticker (i.e. `T /
    /// |tickers|`), used by a worker to size its progress/buffer
    /// accounting without re-deriving the product.
    pub fn branches_per_ticker(&self) -> u64 {
        self.config.window_count() * self.config.comparator_count() * self.config.threshold_count()
    }

    /// `branches(config) -> lazy sequence of Branch`, restricted to one
    /// ticker (the shape a sharded worker actually consumes — see
    /// `scheduler`). Order: window ascending, comparator (`lt` before
    /// `gt`), threshold ascending.
    pub fn branches_for_ticker<'b>(&'b self, ticker: &'b str) -> impl Iterator<Item = Branch> + 'b {
        let windows = self.windows();
        let comparators = self.comparators();
        let thresholds = self.thresholds();
        windows.into_iter().flat_map(move |window| {
            let comparators = comparators.clone();
            let thresholds = thresholds.clone();
            comparators.into_iter().flat_map(move |comparator| {
                thresholds.clone().into_iter().map(move |threshold| Branch {
                    signal_ticker: ticker.to_string(),
                    family: self.config.indicator,
                    window,
                    comparator,
                    threshold,
                    l2: None,
                })
            })
        })
    }

    /// The full product across every ticker, in `ticker`-outermost order.
    pub fn branches(&self) -> impl Iterator<Item = Branch> + '_ {
        self.config
            .tickers
            .iter()
            .flat_map(move |ticker| self.branches_for_ticker(ticker))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SplitStrategySpec;
    use crate::engine::indicators::Family;

    fn config(tickers: Vec<&str>, period_min: u32, period_max: u32, comparator: ComparatorSpec, t_min: f64, t_max: f64, t_step: f64) -> JobConfig {
        JobConfig {
            indicator: Family::Rsi,
            period_min,
            period_max,
            tickers: tickers.into_iter().map(str::to_string).collect(),
            comparator,
            threshold_min: t_min,
            threshold_max: t_max,
            threshold_step: t_step,
            min_tim: 0.0,
            min_timar: 0.0,
            max_dd: 100.0,
            min_trades: 0,
            min_timardd: 0.0,
            split_strategy: SplitStrategySpec::EvenOddMonth,
            num_workers: 1,
            cost_bps: 0.0,
        }
    }

    #[test]
    fn scenario_s6_both_comparator_count_and_order() {
        let cfg = config(vec!["AAPL"], 1, 5, ComparatorSpec::Both, 10.0, 30.0, 5.0);
        let enumerator = Enumerator::new(&cfg);
        assert_eq!(enumerator.total(), 50);

        let branches: Vec<Branch> = enumerator.branches().collect();
        assert_eq!(branches.len(), 50);

        // For a fixed window, every `Lt` branch precedes every `Gt` branch.
        let window1: Vec<&Branch> = branches.iter().filter(|b| b.window == Some(1)).collect();
        assert_eq!(window1.len(), 10);
        let first_gt = window1.iter().position(|b| b.comparator == Comparator::Gt).unwrap();
        assert!(window1[..first_gt].iter().all(|b| b.comparator == Comparator::Lt));
    }

    #[test]
    fn property_total_branch_invariant() {
        let cfg = config(vec!["AAPL", "MSFT", "SPY"], 2, 14, ComparatorSpec::Both, 10.0, 40.0, 5.0);
        let enumerator = Enumerator::new(&cfg);
        let expected = 3 * 13 * 2 * 7;
        assert_eq!(enumerator.total(), expected);
        assert_eq!(enumerator.branches().count() as u64, expected);
    }

    #[test]
    fn windowless_family_has_exactly_one_window() {
        let mut cfg = config(vec!["AAPL"], 2, 14, ComparatorSpec::Gt, 0.0, 0.0, 1.0);
        cfg.indicator = Family::CurrentPrice;
        let enumerator = Enumerator::new(&cfg);
        assert_eq!(enumerator.total(), 1);
        let branches: Vec<Branch> = enumerator.branches().collect();
        assert_eq!(branches[0].window, None);
    }

    #[test]
    fn restartable_yields_the_same_sequence_twice() {
        let cfg = config(vec!["AAPL", "MSFT"], 2, 4, ComparatorSpec::Both, 10.0, 20.0, 5.0);
        let enumerator = Enumerator::new(&cfg);
        let first: Vec<Branch> = enumerator.branches().collect();
        let second: Vec<Branch> = enumerator.branches().collect();
        assert_eq!(first, second);
    }
}
