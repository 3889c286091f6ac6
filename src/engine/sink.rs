//! `ResultsSink` (§6.1, ambient): the append-only "insert many rows"
//! contract the results database must satisfy. The shipped implementation
//! is a sqlite table managed by `refinery` embedded migrations; tests
//! substitute an in-memory `Vec`-backed sink against the same trait.

use std::sync::Mutex;

use rusqlite::{params, Connection};
use thiserror::Error;

use crate::engine::branch::BranchResult;

mod embedded {
    refinery::embed_migrations!("migrations");
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("migration error: {0}")]
    Migration(#[from] refinery::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// `insert_batch(rows) -> Result<(), SinkError>`. Rows, once inserted, are
/// immutable — no implementation is asked to support update or delete.
pub trait ResultsSink: Send + Sync {
    fn insert_batch(&self, rows: &[BranchResult]) -> Result<(), SinkError>;
}

/// The shipped sqlite-backed sink. A single `Mutex<Connection>` is enough:
/// the `Aggregator` is the only caller, on its own dedicated thread, so
/// this is a correctness backstop rather than a contended lock.
pub struct SqliteSink {
    conn: Mutex<Connection>,
}

impl SqliteSink {
    pub fn open(path: &std::path::Path) -> Result<Self, SinkError> {
        let mut conn = Connection::open(path)?;
        embedded::migrations::runner().run(&mut conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self, SinkError> {
        let mut conn = Connection::open_in_memory()?;
        embedded::migrations::runner().run(&mut conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }
}

impl ResultsSink for SqliteSink {
    fn insert_batch(&self, rows: &[BranchResult]) -> Result<(), SinkError> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock().expect("sink connection poisoned");
        let tx = conn.transaction()?;
        for row in rows {
            let window = row.branch.window.map(i64::from);
            let l2_json = row.branch.l2.map(|l2| serde_json::to_string(&l2)).transpose()?;
            let is_json = serde_json::to_string(&row.is_metrics)?;
            let oos_json = serde_json::to_string(&row.oos_metrics)?;
            tx.execute(
                "INSERT INTO branch_results
                 (job_id, signal_ticker, invest_ticker, family, window, comparator,
                  threshold, l2_json, is_metrics_json, oos_metrics_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    row.job_id.to_string(),
                    row.branch.signal_ticker,
                    row.branch.invest_ticker(),
                    row.branch.family.to_string(),
                    window,
                    format!("{:?}", row.branch.comparator),
                    row.branch.threshold,
                    l2_json,
                    is_json,
                    oos_json,
                    row.created_at.to_rfc3339(),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}

/// In-memory sink for tests and dry-runs (§6.1: "an in-memory `Vec`-backed
/// sink implements the same trait for tests").
#[derive(Default)]
pub struct VecSink {
    rows: Mutex<Vec<BranchResult>>,
}

impl VecSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<BranchResult> {
        self.rows.lock().expect("sink poisoned").clone()
    }
}

impl ResultsSink for VecSink {
    fn insert_batch(&self, rows: &[BranchResult]) -> Result<(), SinkError> {
        self.rows.lock().expect("sink poisoned").extend_from_slice(rows);
        Ok(())
    }
}
