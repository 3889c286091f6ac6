//! Single-ticker columnar file loading.
//!
//! Mirrors the reference system's `data::parquet` scan-then-collect shape,
//! generalized to accept either a `.parquet` or `.csv` file per ticker
//! (§6 "Input price files") rather than the reference system's
//! options-chain-only parquet format.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use polars::prelude::*;

use crate::data::price_store::PriceSeries;
use crate::errors::{EngineError, EngineResult};

const REQUIRED_COLUMNS: [&str; 5] = ["Date", "High", "Low", "Close", "Volume"];

/// Resolve `<TICKER>.<ext>` inside `dir`, preferring `.parquet` then `.csv`.
fn resolve_path(dir: &Path, ticker: &str) -> Option<PathBuf> {
    for ext in ["parquet", "csv"] {
        let candidate = dir.join(format!("{ticker}.{ext}"));
        if candidate.exists() {
            return Some(candidate);
        }
    }
    None
}

/// Load one ticker's dense OHLCV series from `dir`.
pub fn load_price_file(dir: &Path, ticker: &str) -> EngineResult<PriceSeries> {
    let path = resolve_path(dir, ticker).ok_or_else(|| EngineError::MissingData {
        ticker: ticker.to_string(),
    })?;

    let df = match path.extension().and_then(|e| e.to_str()) {
        Some("parquet") => {
            let path_str = path.to_string_lossy().to_string();
            LazyFrame::scan_parquet(path_str.as_str().into(), ScanArgsParquet::default())?
                .collect()?
        }
        _ => CsvReadOptions::default()
            .with_has_header(true)
            .try_into_reader_with_file_path(Some(path.clone()))?
            .finish()?,
    };

    for column in REQUIRED_COLUMNS {
        if !df.schema().contains(column) {
            return Err(EngineError::MissingData {
                ticker: ticker.to_string(),
            });
        }
    }

    dataframe_to_series(ticker, df)
}

fn dataframe_to_series(ticker: &str, df: DataFrame) -> EngineResult<PriceSeries> {
    let n = df.height();

    let dates = column_to_dates(&df, "Date")?;
    let open = column_to_f64(&df, "Open").unwrap_or_else(|_| column_to_f64(&df, "Close").unwrap_or_default());
    let high = column_to_f64(&df, "High")?;
    let low = column_to_f64(&df, "Low")?;
    let close = column_to_f64(&df, "Close")?;
    let volume = column_to_f64(&df, "Volume")?;
    let adj_close = column_to_f64(&df, "Adj Close").unwrap_or_else(|_| close.clone());

    let mut returns = vec![0.0; n];
    for i in 1..n {
        returns[i] = if close[i - 1] == 0.0 {
            0.0
        } else {
            close[i] / close[i - 1] - 1.0
        };
    }

    Ok(PriceSeries {
        ticker: ticker.to_string(),
        dates,
        open,
        high,
        low,
        close,
        volume,
        adj_close,
        returns,
    })
}

fn column_to_f64(df: &DataFrame, name: &str) -> EngineResult<Vec<f64>> {
    let casted = df
        .clone()
        .lazy()
        .select([col(name).cast(DataType::Float64)])
        .collect()?;
    let ca = casted.column(name)?.f64()?;
    Ok(ca.into_no_null_iter().collect())
}

fn column_to_dates(df: &DataFrame, name: &str) -> EngineResult<Vec<NaiveDate>> {
    let casted = df
        .clone()
        .lazy()
        .select([col(name).cast(DataType::Date)])
        .collect()?;
    let ca = casted.column(name)?.date()?;
    Ok(ca
        .as_date_iter()
        .map(|opt| opt.unwrap_or_default())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(dir: &Path, ticker: &str, rows: &[(&str, f64, f64, f64, f64, f64)]) {
        let mut file = std::fs::File::create(dir.join(format!("{ticker}.csv"))).unwrap();
        writeln!(file, "Date,Open,High,Low,Close,Volume").unwrap();
        for (date, open, high, low, close, volume) in rows {
            writeln!(file, "{date},{open},{high},{low},{close},{volume}").unwrap();
        }
    }

    #[test]
    fn loads_a_csv_price_file() {
        let dir = tempfile::tempdir().unwrap();
        write_csv(
            dir.path(),
            "AAPL",
            &[
                ("2024-01-01", 100.0, 101.0, 99.0, 100.0, 1000.0),
                ("2024-01-02", 100.0, 102.0, 99.5, 101.0, 1200.0),
            ],
        );
        let series = load_price_file(dir.path(), "AAPL").unwrap();
        assert_eq!(series.close, vec![100.0, 101.0]);
        assert_eq!(series.returns[0], 0.0);
        assert!((series.returns[1] - 0.01).abs() < 1e-9);
    }

    #[test]
    fn missing_ticker_file_is_missing_data() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_price_file(dir.path(), "NOPE");
        assert!(matches!(err, Err(EngineError::MissingData { .. })));
    }
}
