//! `PriceSeries` and the per-worker, LRU-bounded `PriceStore` (§4.1).

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use rustc_hash::FxHashMap;

use crate::data::loader::load_price_file;
use crate::errors::EngineResult;

/// Dense, gap-free, per-ticker OHLCV series (§3).
#[derive(Debug, Clone)]
pub struct PriceSeries {
    pub ticker: String,
    pub dates: Vec<NaiveDate>,
    pub open: Vec<f64>,
    pub high: Vec<f64>,
    pub low: Vec<f64>,
    pub close: Vec<f64>,
    pub volume: Vec<f64>,
    pub adj_close: Vec<f64>,
    /// `returns[0] = 0`; `returns[i] = close[i]/close[i-1] - 1`. Derived and
    /// cached once at load time.
    pub returns: Vec<f64>,
}

impl PriceSeries {
    pub fn len(&self) -> usize {
        self.close.len()
    }

    pub fn is_empty(&self) -> bool {
        self.close.is_empty()
    }
}

/// Read-only columnar loader with an LRU of bounded capacity (default 128
/// tickers). One instance per worker; never written to concurrently.
pub struct PriceStore {
    dir: PathBuf,
    capacity: usize,
    cache: FxHashMap<String, Arc<PriceSeries>>,
    recency: VecDeque<String>,
}

impl PriceStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_capacity(dir, 128)
    }

    pub fn with_capacity(dir: impl Into<PathBuf>, capacity: usize) -> Self {
        Self {
            dir: dir.into(),
            capacity: capacity.max(1),
            cache: FxHashMap::default(),
            recency: VecDeque::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `load(ticker) -> PriceSeries | MissingData`.
    pub fn load(&mut self, ticker: &str) -> EngineResult<Arc<PriceSeries>> {
        if let Some(series) = self.cache.get(ticker) {
            self.touch(ticker);
            return Ok(Arc::clone(series));
        }

        let series = Arc::new(load_price_file(&self.dir, ticker)?);
        self.insert(ticker, Arc::clone(&series));
        Ok(series)
    }

    fn insert(&mut self, ticker: &str, series: Arc<PriceSeries>) {
        if self.cache.len() >= self.capacity {
            if let Some(oldest) = self.recency.pop_front() {
                self.cache.remove(&oldest);
            }
        }
        self.cache.insert(ticker.to_string(), series);
        self.recency.push_back(ticker.to_string());
    }

    fn touch(&mut self, ticker: &str) {
        if let Some(pos) = self.recency.iter().position(|t| t == ticker) {
            self.recency.remove(pos);
        }
        self.recency.push_back(ticker.to_string());
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(dir: &Path, ticker: &str) {
        let mut file = std::fs::File::create(dir.join(format!("{ticker}.csv"))).unwrap();
        writeln!(file, "Date,Open,High,Low,Close,Volume").unwrap();
        writeln!(file, "2024-01-01,100,101,99,100,1000").unwrap();
        writeln!(file, "2024-01-02,100,102,99,101,1200").unwrap();
    }

    #[test]
    fn evicts_oldest_ticker_beyond_capacity() {
        let dir = tempfile::tempdir().unwrap();
        for t in ["A", "B", "C"] {
            write_csv(dir.path(), t);
        }
        let mut store = PriceStore::with_capacity(dir.path(), 2);
        store.load("A").unwrap();
        store.load("B").unwrap();
        store.load("C").unwrap();
        assert_eq!(store.cached_len(), 2);
    }

    #[test]
    fn missing_ticker_surfaces_missing_data() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = PriceStore::new(dir.path());
        assert!(store.load("NOPE").is_err());
    }
}
