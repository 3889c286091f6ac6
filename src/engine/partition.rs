//! `Partitioner` (§4.5): a pure function from a date series and a split
//! policy to a complementary pair of IS/OOS boolean masks.
//!
//! The masks produced here know nothing about any particular indicator's
//! warm-up — that is branch-specific, while a `PartitionMask` is shared by
//! every branch for a ticker. Callers AND the relevant mask with
//! `effective_mask` (warm-up exclusion) before handing it to
//! `metrics::compute`, which is what makes property 7 (§8) — "both masks
//! false on every warm-up bar" — hold for the values actually fed to the
//! metrics kernel.

use chrono::Datelike;

use crate::config::SplitStrategySpec;

/// `partition(dates, policy) -> (isMask, oosMask)`.
pub fn partition(dates: &[chrono::NaiveDate], policy: &SplitStrategySpec) -> (Vec<bool>, Vec<bool>) {
    let is_mask: Vec<bool> = dates
        .iter()
        .map(|date| match policy {
            SplitStrategySpec::EvenOddMonth => date.month() % 2 == 1,
            SplitStrategySpec::EvenOddYear => date.year() % 2 != 0,
            SplitStrategySpec::Chronological { oos_start_date } => date < oos_start_date,
        })
        .collect();
    let oos_mask: Vec<bool> = is_mask.iter().map(|&is| !is).collect();
    (is_mask, oos_mask)
}

/// ANDs a partition mask with "not warm-up" (`index >= warmup`). This is
/// the step that makes property 7's warm-up exclusion hold for the masks
/// actually passed into `metrics::compute`.
pub fn effective_mask(mask: &[bool], warmup: usize) -> Vec<bool> {
    mask.iter()
        .enumerate()
        .map(|(i, &m)| m && i >= warmup)
        .collect()
}
