//! Indicator families and the per-worker `IndicatorCache`.
//!
//! SMA and EMA delegate to `rust_ti`'s parameterized moving-average
//! functions, the same crate and call shape the reference system's
//! `signals/overlap.rs` uses (`rust_ti::standard_indicators::bulk::
//! simple_moving_average(&prices, period)` /
//! `exponential_moving_average(&prices, period)`). The remaining families
//! are given their own closed-form implementations: the reference system's
//! `rust_ti`-backed signals (`signals/momentum.rs`, `signals/volatility.rs`,
//! …) hardcode a single period (14-bar RSI, 34-bar MACD) or bake in a fixed
//! smoothing convention, neither of which satisfies an arbitrary-window
//! `RSI(w)`/`ATR(w)`/… search space; the glossary itself calls for
//! "closed-form definitions", so those families are computed directly
//! against the formulas in the component design instead of forcing a
//! mismatched library call.

use std::fmt;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::data::price_store::PriceSeries;
use crate::errors::{EngineError, EngineResult};

/// One indicator family. Variant names double as the `indicator` field's
/// wire representation (title case via serde rename).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Family {
    CurrentPrice,
    Sma,
    Ema,
    Rsi,
    Roc,
    Stddev,
    Bbands,
    Atr,
    WilliamsR,
    Cci,
    StochK,
    StochD,
    Adx,
    MacdHist,
    Aroon,
    Mfi,
    Obv,
}

impl Family {
    /// Families that take no period parameter (§GLOSSARY "Windowless").
    pub fn is_windowless(self) -> bool {
        matches!(self, Family::CurrentPrice | Family::MacdHist | Family::Obv)
    }

    /// Warm-up `w0`: the first index at which the indicator is
    /// participating. Indices below this are non-participating by
    /// definition (§3 IndicatorSeries).
    pub fn warmup(self, window: Option<u32>) -> usize {
        let w = window.unwrap_or(0) as usize;
        match self {
            Family::CurrentPrice => 0,
            Family::Sma | Family::Stddev | Family::Bbands => w.saturating_sub(1),
            Family::Ema => w.saturating_sub(1),
            Family::Rsi => 2 * w,
            Family::Roc => w,
            Family::Atr => w,
            Family::WilliamsR | Family::Cci | Family::StochK => w.saturating_sub(1),
            Family::StochD => w + 1,
            Family::Adx => 2 * w,
            Family::MacdHist => 34,
            Family::Aroon => w,
            Family::Mfi => w,
            Family::Obv => 1,
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// One `(ticker, family, window)` series, aligned 1:1 with its
/// `PriceSeries`. Entries before `warmup` are the sentinel `NaN` — any
/// comparison against `NaN` is `false` under IEEE-754, which is exactly the
/// "non-participating" contract §3 requires, with no branch needed in the
/// kernel's hot loop.
#[derive(Debug, Clone)]
pub struct IndicatorSeries {
    pub family: Family,
    pub window: Option<u32>,
    pub warmup: usize,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    ticker: String,
    family: Family,
    window: Option<u32>,
}

/// Per-worker memoization of `(ticker, family, window) -> IndicatorSeries`.
/// Never shared across workers (§4.2); constructed fresh per worker and
/// lives for the job's duration.
#[derive(Default)]
pub struct IndicatorCache {
    entries: FxHashMap<CacheKey, Arc<IndicatorSeries>>,
    /// `(ticker, family)` pairs already warned about a numeric anomaly —
    /// coarser than `CacheKey` on purpose, since §7 asks for "logged per
    /// family per ticker at most once" regardless of how many windows of
    /// that family get computed.
    logged_anomalies: FxHashSet<(String, Family)>,
}

impl IndicatorCache {
    pub fn new() -> Self {
        Self {
            entries: FxHashMap::default(),
            logged_anomalies: FxHashSet::default(),
        }
    }

    /// `get(ticker, family, window) -> IndicatorSeries`. Computed lazily on
    /// first request, then retained for the cache's lifetime.
    pub fn get(
        &mut self,
        price: &PriceSeries,
        family: Family,
        window: Option<u32>,
    ) -> EngineResult<Arc<IndicatorSeries>> {
        let key = CacheKey {
            ticker: price.ticker.clone(),
            family,
            window,
        };
        if let Some(existing) = self.entries.get(&key) {
            return Ok(Arc::clone(existing));
        }
        let mut computed = compute(price, family, window)?;
        patch_numeric_anomalies(&mut computed, &price.ticker, &mut self.logged_anomalies);
        let series = Arc::new(computed);
        self.entries.insert(key, Arc::clone(&series));
        Ok(series)
    }
}

/// NaN/Inf produced by an indicator on a non-warm-up bar (§7 `NumericAnomaly`):
/// the bar is patched to the `NaN` sentinel, which `BacktestKernel`'s
/// comparator semantics already treat as a non-participating "flat" bar
/// (`signal = false`, `stratRet = 0`), and the first offending index is
/// logged once per `(ticker, family)`.
fn patch_numeric_anomalies(series: &mut IndicatorSeries, ticker: &str, logged: &mut FxHashSet<(String, Family)>) {
    let warmup = series.warmup;
    let mut first_bad = None;
    for (i, v) in series.values.iter_mut().enumerate().skip(warmup) {
        if !v.is_finite() {
            first_bad.get_or_insert(i);
            *v = f64::NAN;
        }
    }
    if let Some(index) = first_bad {
        let key = (ticker.to_string(), series.family);
        if logged.insert(key) {
            tracing::warn!(ticker, family = %series.family, index, "indicator produced a non-finite value past warm-up; bar treated as warm-up");
        }
    }
}

fn compute(price: &PriceSeries, family: Family, window: Option<u32>) -> EngineResult<IndicatorSeries> {
    let n = price.close.len();
    let w = window.unwrap_or(0) as usize;
    let warmup = family.warmup(window).min(n);

    if !family.is_windowless() {
        let required = w + 1;
        if n < required {
            return Err(EngineError::DegenerateSeries {
                ticker: price.ticker.clone(),
                bars: n,
                required,
                window: w,
            });
        }
    }

    let mut values = match family {
        Family::CurrentPrice => price.close.clone(),
        Family::Sma => rust_ti::standard_indicators::bulk::simple_moving_average(&price.close, w),
        Family::Ema => rust_ti::standard_indicators::bulk::exponential_moving_average(&price.close, w),
        Family::Rsi => rsi(&price.close, w),
        Family::Roc => roc(&price.close, w),
        Family::Stddev => rolling_stddev(&price.close, w),
        Family::Bbands => bbands_percent_b(&price.close, w),
        Family::Atr => atr(&price.high, &price.low, &price.close, w),
        Family::WilliamsR => williams_r(&price.high, &price.low, &price.close, w),
        Family::Cci => cci(&price.high, &price.low, &price.close, w),
        Family::StochK => stoch_k(&price.high, &price.low, &price.close, w),
        Family::StochD => stoch_d(&price.high, &price.low, &price.close, w),
        Family::Adx => adx(&price.high, &price.low, &price.close, w),
        Family::MacdHist => macd_hist(&price.close),
        Family::Aroon => aroon_oscillator(&price.high, &price.low, w),
        Family::Mfi => mfi(&price.high, &price.low, &price.close, &price.volume, w),
        Family::Obv => obv(&price.close, &price.volume),
    };

    // rust_ti's bulk functions return arrays shorter than N (one entry per
    // valid window position, no leading padding); align them back onto the
    // full N-length series and sentinel out anything before `warmup`.
    if values.len() < n {
        let offset = n - values.len();
        let mut padded = vec![f64::NAN; n];
        padded[offset..].copy_from_slice(&values);
        values = padded;
    }
    for v in &mut values[..warmup] {
        *v = f64::NAN;
    }

    Ok(IndicatorSeries {
        family,
        window,
        warmup,
        values,
    })
}

fn rolling_mean(series: &[f64], w: usize) -> Vec<f64> {
    if w == 0 || series.len() < w {
        return Vec::new();
    }
    series
        .windows(w)
        .map(|chunk| chunk.iter().sum::<f64>() / w as f64)
        .collect()
}

fn rolling_stddev(series: &[f64], w: usize) -> Vec<f64> {
    if w == 0 || series.len() < w {
        return Vec::new();
    }
    series
        .windows(w)
        .map(|chunk| {
            let mean = chunk.iter().sum::<f64>() / w as f64;
            let var = chunk.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (w as f64 - 1.0).max(1.0);
            var.sqrt()
        })
        .collect()
}

fn roc(close: &[f64], w: usize) -> Vec<f64> {
    if w == 0 || close.len() <= w {
        return Vec::new();
    }
    (w..close.len())
        .map(|i| {
            if close[i - w] == 0.0 {
                f64::NAN
            } else {
                close[i] / close[i - w] - 1.0
            }
        })
        .collect()
}

fn bbands_percent_b(close: &[f64], w: usize) -> Vec<f64> {
    if w == 0 || close.len() < w {
        return Vec::new();
    }
    let means = rolling_mean(close, w);
    let stds = rolling_stddev(close, w);
    (0..means.len())
        .map(|i| {
            let mid = means[i];
            let k = 2.0;
            let upper = mid + k * stds[i];
            let lower = mid - k * stds[i];
            let range = upper - lower;
            if range.abs() < f64::EPSILON {
                0.5
            } else {
                let close_at = close[i + w - 1];
                (close_at - lower) / range
            }
        })
        .collect()
}

/// Wilder's RSI: `RS = avgGain/avgLoss`, `RSI = 100 - 100/(1+RS)`. The
/// initial average is a simple mean of the first `w` gains/losses, then
/// smoothed Wilder-style thereafter.
fn rsi(close: &[f64], w: usize) -> Vec<f64> {
    if w == 0 || close.len() <= w {
        return Vec::new();
    }
    let n = close.len();
    let mut gains = vec![0.0; n];
    let mut losses = vec![0.0; n];
    for i in 1..n {
        let delta = close[i] - close[i - 1];
        gains[i] = delta.max(0.0);
        losses[i] = (-delta).max(0.0);
    }

    let mut avg_gain = gains[1..=w].iter().sum::<f64>() / w as f64;
    let mut avg_loss = losses[1..=w].iter().sum::<f64>() / w as f64;

    let mut out = Vec::with_capacity(n - w);
    out.push(rsi_from_avgs(avg_gain, avg_loss));
    for i in (w + 1)..n {
        avg_gain = (avg_gain * (w as f64 - 1.0) + gains[i]) / w as f64;
        avg_loss = (avg_loss * (w as f64 - 1.0) + losses[i]) / w as f64;
        out.push(rsi_from_avgs(avg_gain, avg_loss));
    }
    out
}

fn rsi_from_avgs(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        if avg_gain == 0.0 {
            50.0
        } else {
            100.0
        }
    } else {
        let rs = avg_gain / avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    }
}

fn true_range(high: &[f64], low: &[f64], close: &[f64]) -> Vec<f64> {
    let n = high.len();
    let mut tr = vec![0.0; n];
    tr[0] = high[0] - low[0];
    for i in 1..n {
        tr[i] = (high[i] - low[i])
            .max((high[i] - close[i - 1]).abs())
            .max((low[i] - close[i - 1]).abs());
    }
    tr
}

/// Wilder-smoothed average true range; warm-up `w` (§4.2).
fn atr(high: &[f64], low: &[f64], close: &[f64], w: usize) -> Vec<f64> {
    if w == 0 || high.len() <= w {
        return Vec::new();
    }
    let tr = true_range(high, low, close);
    let mut avg = tr[0..w].iter().sum::<f64>() / w as f64;
    let mut out = Vec::with_capacity(tr.len() - w);
    out.push(avg);
    for i in w..tr.len() {
        avg = (avg * (w as f64 - 1.0) + tr[i]) / w as f64;
        out.push(avg);
    }
    out
}

fn highest(window: &[f64]) -> f64 {
    window.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

fn lowest(window: &[f64]) -> f64 {
    window.iter().copied().fold(f64::INFINITY, f64::min)
}

fn williams_r(high: &[f64], low: &[f64], close: &[f64], w: usize) -> Vec<f64> {
    if w == 0 || close.len() < w {
        return Vec::new();
    }
    (w - 1..close.len())
        .map(|i| {
            let hh = highest(&high[i + 1 - w..=i]);
            let ll = lowest(&low[i + 1 - w..=i]);
            let range = hh - ll;
            if range.abs() < f64::EPSILON {
                -50.0
            } else {
                -100.0 * (hh - close[i]) / range
            }
        })
        .collect()
}

fn cci(high: &[f64], low: &[f64], close: &[f64], w: usize) -> Vec<f64> {
    if w == 0 || close.len() < w {
        return Vec::new();
    }
    let n = close.len();
    let tp: Vec<f64> = (0..n).map(|i| (high[i] + low[i] + close[i]) / 3.0).collect();
    (w - 1..n)
        .map(|i| {
            let window = &tp[i + 1 - w..=i];
            let sma = window.iter().sum::<f64>() / w as f64;
            let mad = window.iter().map(|v| (v - sma).abs()).sum::<f64>() / w as f64;
            if mad.abs() < f64::EPSILON {
                0.0
            } else {
                (tp[i] - sma) / (0.015 * mad)
            }
        })
        .collect()
}

fn stoch_k(high: &[f64], low: &[f64], close: &[f64], w: usize) -> Vec<f64> {
    if w == 0 || close.len() < w {
        return Vec::new();
    }
    (w - 1..close.len())
        .map(|i| {
            let hh = highest(&high[i + 1 - w..=i]);
            let ll = lowest(&low[i + 1 - w..=i]);
            let range = hh - ll;
            if range.abs() < f64::EPSILON {
                50.0
            } else {
                100.0 * (close[i] - ll) / range
            }
        })
        .collect()
}

fn stoch_d(high: &[f64], low: &[f64], close: &[f64], w: usize) -> Vec<f64> {
    let k = stoch_k(high, low, close, w);
    rolling_mean(&k, 3)
}

/// Wilder-smoothed average directional index, built from +DI/-DI.
fn adx(high: &[f64], low: &[f64], close: &[f64], w: usize) -> Vec<f64> {
    if w == 0 || close.len() <= 2 * w {
        return Vec::new();
    }
    let n = close.len();
    let tr = true_range(high, low, close);
    let mut plus_dm = vec![0.0; n];
    let mut minus_dm = vec![0.0; n];
    for i in 1..n {
        let up_move = high[i] - high[i - 1];
        let down_move = low[i - 1] - low[i];
        if up_move > down_move && up_move > 0.0 {
            plus_dm[i] = up_move;
        }
        if down_move > up_move && down_move > 0.0 {
            minus_dm[i] = down_move;
        }
    }

    let smooth = |series: &[f64]| -> Vec<f64> {
        let mut avg = series[1..=w].iter().sum::<f64>() / w as f64;
        let mut out = Vec::with_capacity(n - w);
        out.push(avg);
        for v in &series[(w + 1)..] {
            avg = (avg * (w as f64 - 1.0) + v) / w as f64;
            out.push(avg);
        }
        out
    };

    let tr_smoothed = smooth(&tr);
    let plus_smoothed = smooth(&plus_dm);
    let minus_smoothed = smooth(&minus_dm);

    let dx: Vec<f64> = tr_smoothed
        .iter()
        .zip(plus_smoothed.iter())
        .zip(minus_smoothed.iter())
        .map(|((&tr_s, &plus_s), &minus_s)| {
            if tr_s.abs() < f64::EPSILON {
                0.0
            } else {
                let plus_di = 100.0 * plus_s / tr_s;
                let minus_di = 100.0 * minus_s / tr_s;
                let sum = plus_di + minus_di;
                if sum.abs() < f64::EPSILON {
                    0.0
                } else {
                    100.0 * (plus_di - minus_di).abs() / sum
                }
            }
        })
        .collect();

    rolling_mean(&dx, w)
}

/// Fixed 12/26/9 MACD histogram; windowless (the `window` parameter is
/// ignored, §4.2.1).
fn macd_hist(close: &[f64]) -> Vec<f64> {
    if close.len() <= 34 {
        return Vec::new();
    }
    let ema12 = ema_full(close, 12);
    let ema26 = ema_full(close, 26);
    let start = 26 - 1;
    let macd_line: Vec<f64> = (start..close.len()).map(|i| ema12[i] - ema26[i]).collect();
    let signal = ema_full(&macd_line, 9);
    let sig_start = 9 - 1;
    (sig_start..macd_line.len())
        .map(|i| macd_line[i] - signal[i])
        .collect()
}

/// EMA seeded by SMA, returned at full input length with leading `NaN`.
fn ema_full(series: &[f64], w: usize) -> Vec<f64> {
    let n = series.len();
    let mut out = vec![f64::NAN; n];
    if n < w {
        return out;
    }
    let alpha = 2.0 / (w as f64 + 1.0);
    let seed = series[0..w].iter().sum::<f64>() / w as f64;
    out[w - 1] = seed;
    for i in w..n {
        out[i] = alpha * series[i] + (1.0 - alpha) * out[i - 1];
    }
    out
}

fn aroon_oscillator(high: &[f64], low: &[f64], w: usize) -> Vec<f64> {
    if w == 0 || high.len() <= w {
        return Vec::new();
    }
    (w..high.len())
        .map(|i| {
            let window_high = &high[i - w..=i];
            let window_low = &low[i - w..=i];
            let bars_since_high = w - argmax(window_high);
            let bars_since_low = w - argmin(window_low);
            let aroon_up = 100.0 * (w as f64 - bars_since_high as f64) / w as f64;
            let aroon_down = 100.0 * (w as f64 - bars_since_low as f64) / w as f64;
            aroon_up - aroon_down
        })
        .collect()
}

fn argmax(series: &[f64]) -> usize {
    series
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
        .map(|(i, _)| i)
        .unwrap_or(0)
}

fn argmin(series: &[f64]) -> usize {
    series
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.partial_cmp(b.1).unwrap())
        .map(|(i, _)| i)
        .unwrap_or(0)
}

fn mfi(high: &[f64], low: &[f64], close: &[f64], volume: &[f64], w: usize) -> Vec<f64> {
    if w == 0 || close.len() <= w {
        return Vec::new();
    }
    let n = close.len();
    let tp: Vec<f64> = (0..n).map(|i| (high[i] + low[i] + close[i]) / 3.0).collect();
    let raw_flow: Vec<f64> = (0..n).map(|i| tp[i] * volume[i]).collect();

    (w..n)
        .map(|i| {
            let mut pos = 0.0;
            let mut neg = 0.0;
            for j in (i - w + 1)..=i {
                if tp[j] > tp[j - 1] {
                    pos += raw_flow[j];
                } else if tp[j] < tp[j - 1] {
                    neg += raw_flow[j];
                }
            }
            if neg.abs() < f64::EPSILON {
                100.0
            } else {
                let ratio = pos / neg;
                100.0 - 100.0 / (1.0 + ratio)
            }
        })
        .collect()
}

fn obv(close: &[f64], volume: &[f64]) -> Vec<f64> {
    let n = close.len();
    if n == 0 {
        return Vec::new();
    }
    let mut out = vec![0.0; n];
    for i in 1..n {
        out[i] = if close[i] > close[i - 1] {
            out[i - 1] + volume[i]
        } else if close[i] < close[i - 1] {
            out[i - 1] - volume[i]
        } else {
            out[i - 1]
        };
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_price(ticker: &str, close: Vec<f64>) -> PriceSeries {
        let n = close.len();
        PriceSeries {
            ticker: ticker.to_string(),
            dates: (0..n as i64).map(|i| chrono::NaiveDate::from_num_days_from_ce_opt(738000 + i).unwrap()).collect(),
            open: close.clone(),
            high: close.iter().map(|c| c + 1.0).collect(),
            low: close.iter().map(|c| c - 1.0).collect(),
            close: close.clone(),
            volume: vec![1000.0; n],
            adj_close: close,
            returns: vec![0.0; n],
        }
    }

    #[test]
    fn current_price_has_no_warmup() {
        let price = sample_price("T", vec![100.0, 101.0, 102.0]);
        let mut cache = IndicatorCache::new();
        let series = cache.get(&price, Family::CurrentPrice, None).unwrap();
        assert_eq!(series.warmup, 0);
        assert_eq!(series.values, vec![100.0, 101.0, 102.0]);
    }

    #[test]
    fn sma_warmup_and_values() {
        let price = sample_price("T", vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        let mut cache = IndicatorCache::new();
        let series = cache.get(&price, Family::Sma, Some(3)).unwrap();
        assert_eq!(series.warmup, 2);
        assert!(series.values[0].is_nan());
        assert!(series.values[1].is_nan());
        assert!((series.values[2] - 2.0).abs() < 1e-9);
        assert!((series.values[4] - 4.0).abs() < 1e-9);
    }

    #[test]
    fn cache_idempotence_same_array_twice() {
        let price = sample_price("T", vec![10.0, 11.0, 9.0, 12.0, 14.0, 13.0, 15.0, 16.0]);
        let mut cache = IndicatorCache::new();
        let first = cache.get(&price, Family::Rsi, Some(2)).unwrap();
        let second = cache.get(&price, Family::Rsi, Some(2)).unwrap();
        assert_eq!(first.values, second.values);
    }

    #[test]
    fn degenerate_series_reports_missing_bars() {
        let price = sample_price("T", vec![1.0, 2.0]);
        let mut cache = IndicatorCache::new();
        let err = cache.get(&price, Family::Sma, Some(10));
        assert!(err.is_err());
    }

    #[test]
    fn rsi_monotonic_never_below_zero_or_above_100() {
        let price = sample_price(
            "T",
            vec![100.0, 101.0, 102.0, 103.0, 104.0, 105.0, 104.0, 103.0, 102.0, 101.0],
        );
        let mut cache = IndicatorCache::new();
        let series = cache.get(&price, Family::Rsi, Some(3)).unwrap();
        for &v in series.values.iter().filter(|v| !v.is_nan()) {
            assert!((0.0..=100.0).contains(&v));
        }
    }

    #[test]
    fn numeric_anomaly_past_warmup_is_patched_to_nan_and_logged_once() {
        // ROC against a zero close past warm-up is the one family whose
        // closed-form divides by a raw price rather than a derived range,
        // so a planted zero produces a genuine NaN without touching the
        // warm-up window itself.
        let price = sample_price("T", vec![10.0, 0.0, 12.0, 13.0, 14.0, 15.0]);
        let mut cache = IndicatorCache::new();
        let series = cache.get(&price, Family::Roc, Some(1)).unwrap();
        assert!(series.values[2].is_nan());
        assert_eq!(cache.logged_anomalies.len(), 1);
        assert!(cache.logged_anomalies.contains(&("T".to_string(), Family::Roc)));

        // A second window of the same family/ticker must not add a second
        // log entry even though it is a distinct cache key.
        let _ = cache.get(&price, Family::Roc, Some(2));
        assert_eq!(cache.logged_anomalies.len(), 1);
    }

    #[test]
    fn obv_accumulates_on_up_closes() {
        let price = sample_price("T", vec![100.0, 102.0, 101.0, 105.0]);
        let mut cache = IndicatorCache::new();
        let series = cache.get(&price, Family::Obv, None).unwrap();
        assert_eq!(series.values[1], 1000.0);
        assert_eq!(series.values[2], 0.0);
        assert_eq!(series.values[3], 1000.0);
    }
}
