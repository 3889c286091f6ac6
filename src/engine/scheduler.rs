//! `Scheduler` (§4.8): shards tickers across a `rayon::scope` of workers,
//! each running its own `PriceStore`/`IndicatorCache` and streaming
//! progress/results to the `Aggregator` over an `mpsc` channel.
//!
//! The worker-unit shape (one `rayon::Scope::spawn` per shard, a shared
//! `tokio_util::sync::CancellationToken` polled between branches rather
//! than inside one) follows §4.8.1's implementation note directly.

use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::mpsc::Sender;
use std::sync::Mutex;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::JobConfig;
use crate::data::price_store::PriceStore;
use crate::engine::branch::BranchResult;
use crate::engine::enumerator::Enumerator;
use crate::engine::filter::{self, FilterThresholds};
use crate::engine::indicators::IndicatorCache;
use crate::engine::kernel;
use crate::engine::metrics;
use crate::engine::partition;

/// Results are buffered locally and flushed in batches of this size, or on
/// shard completion — whichever comes first (§6.1 batching note).
const RESULT_BUFFER_CAPACITY: usize = 100;

/// Progress deltas are published every this many completed branches
/// (§4.8 "publish cadence"), not after every single branch.
const PROGRESS_PUBLISH_EVERY: u64 = 500;

pub enum WorkerMessage {
    Progress { completed_delta: u64, passing_delta: u64 },
    Results { batch: Vec<BranchResult> },
}

#[derive(Debug, Clone)]
pub enum SchedulerOutcome {
    Completed,
    Cancelled,
    Failed(String),
}

/// Splits tickers round-robin across `worker_count` shards. A shard may be
/// empty if there are fewer tickers than workers (§4.8: "idle workers are
/// allowed").
fn shard_tickers(tickers: &[String], worker_count: usize) -> Vec<Vec<String>> {
    let worker_count = worker_count.max(1);
    let mut shards = vec![Vec::new(); worker_count];
    for (i, ticker) in tickers.iter().enumerate() {
        shards[i % worker_count].push(ticker.clone());
    }
    shards
}

/// Runs every shard to completion (or until cancellation), routing
/// `WorkerMessage`s to `tx`. A panic inside any one worker is caught and
/// turned into `SchedulerOutcome::Failed` rather than unwinding across the
/// `rayon::scope` boundary and taking every other worker down with it.
pub fn run(
    job_id: Uuid,
    config: &JobConfig,
    price_dir: &Path,
    cancel: CancellationToken,
    tx: Sender<WorkerMessage>,
) -> SchedulerOutcome {
    let shards = shard_tickers(&config.tickers, config.num_workers as usize);
    let crashed: Mutex<Option<String>> = Mutex::new(None);

    rayon::scope(|scope| {
        for shard in &shards {
            let tx = tx.clone();
            let cancel = cancel.clone();
            let crashed = &crashed;
            scope.spawn(move |_| {
                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    run_worker(job_id, config, price_dir, shard, &cancel, &tx);
                }));
                if let Err(payload) = result {
                    let message = payload
                        .downcast_ref::<&str>()
                        .map(|s| (*s).to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "worker panicked".to_string());
                    tracing::error!(message, "worker crashed");
                    *crashed.lock().expect("crash flag poisoned") = Some(message);
                }
            });
        }
    });
    drop(tx);

    match crashed.into_inner().expect("crash flag poisoned") {
        Some(message) => SchedulerOutcome::Failed(message),
        None if cancel.is_cancelled() => SchedulerOutcome::Cancelled,
        None => SchedulerOutcome::Completed,
    }
}

#[allow(clippy::too_many_arguments)]
fn run_worker(
    job_id: Uuid,
    config: &JobConfig,
    price_dir: &Path,
    tickers: &[String],
    cancel: &CancellationToken,
    tx: &Sender<WorkerMessage>,
) {
    let mut store = PriceStore::new(price_dir);
    let mut cache = IndicatorCache::new();
    let enumerator = Enumerator::new(config);
    let thresholds = FilterThresholds::from(config);
    let branches_per_ticker = enumerator.branches_per_ticker();

    let mut buffer: Vec<BranchResult> = Vec::with_capacity(RESULT_BUFFER_CAPACITY);
    let mut completed_since_publish = 0u64;
    let mut passing_since_publish = 0u64;

    'tickers: for ticker in tickers {
        if cancel.is_cancelled() {
            break;
        }

        let price = match store.load(ticker) {
            Ok(price) => price,
            Err(err) => {
                tracing::warn!(ticker, error = %err, "skipping ticker");
                completed_since_publish += branches_per_ticker;
                maybe_publish(&mut completed_since_publish, &mut passing_since_publish, tx);
                continue;
            }
        };

        let required = if config.indicator.is_windowless() {
            1
        } else {
            config.period_max as usize + 1
        };
        if price.len() < required {
            tracing::warn!(ticker, bars = price.len(), required, "degenerate series; skipping ticker");
            completed_since_publish += branches_per_ticker;
            maybe_publish(&mut completed_since_publish, &mut passing_since_publish, tx);
            continue;
        }

        let (is_mask_raw, oos_mask_raw) = partition::partition(&price.dates, &config.split_strategy);

        for branch in enumerator.branches_for_ticker(ticker) {
            if cancel.is_cancelled() {
                break 'tickers;
            }

            let indicator = match cache.get(&price, branch.family, branch.window) {
                Ok(indicator) => indicator,
                Err(err) => {
                    tracing::warn!(ticker, family = %branch.family, error = %err, "skipping branch");
                    completed_since_publish += 1;
                    maybe_publish(&mut completed_since_publish, &mut passing_since_publish, tx);
                    continue;
                }
            };

            let l2_indicator = match branch.l2.as_ref() {
                Some(l2) => match cache.get(&price, l2.family, l2.window) {
                    Ok(series) => Some(series),
                    Err(err) => {
                        tracing::warn!(ticker, family = %l2.family, error = %err, "skipping branch (l2)");
                        completed_since_publish += 1;
                        maybe_publish(&mut completed_since_publish, &mut passing_since_publish, tx);
                        continue;
                    }
                },
                None => None,
            };
            let l2_clause = branch.l2.as_ref().zip(l2_indicator.as_deref()).map(|(l2, series)| kernel::L2Clause {
                indicator: series,
                comparator: l2.comparator,
                threshold: l2.threshold,
            });

            let out = kernel::run(
                &indicator,
                branch.comparator,
                branch.threshold,
                &price.returns,
                config.cost_bps,
                l2_clause.as_ref(),
            );

            let is_mask = partition::effective_mask(&is_mask_raw, indicator.warmup);
            let oos_mask = partition::effective_mask(&oos_mask_raw, indicator.warmup);

            let is_metrics = metrics::compute(&out.position, &out.strategy_returns, &price.dates, &is_mask, &out.trades);
            let oos_metrics = metrics::compute(&out.position, &out.strategy_returns, &price.dates, &oos_mask, &out.trades);

            completed_since_publish += 1;
            if filter::passes(&is_metrics, &thresholds) {
                passing_since_publish += 1;
                buffer.push(BranchResult {
                    job_id,
                    branch,
                    is_metrics,
                    oos_metrics,
                    created_at: Utc::now(),
                });
                if buffer.len() >= RESULT_BUFFER_CAPACITY {
                    flush(&mut buffer, tx);
                }
            }

            maybe_publish(&mut completed_since_publish, &mut passing_since_publish, tx);
        }
    }

    flush(&mut buffer, tx);
    if completed_since_publish > 0 || passing_since_publish > 0 {
        publish(&mut completed_since_publish, &mut passing_since_publish, tx);
    }
}

fn maybe_publish(completed: &mut u64, passing: &mut u64, tx: &Sender<WorkerMessage>) {
    if *completed >= PROGRESS_PUBLISH_EVERY {
        publish(completed, passing, tx);
    }
}

fn publish(completed: &mut u64, passing: &mut u64, tx: &Sender<WorkerMessage>) {
    let _ = tx.send(WorkerMessage::Progress {
        completed_delta: *completed,
        passing_delta: *passing,
    });
    *completed = 0;
    *passing = 0;
}

fn flush(buffer: &mut Vec<BranchResult>, tx: &Sender<WorkerMessage>) {
    if buffer.is_empty() {
        return;
    }
    let batch = std::mem::take(buffer);
    let _ = tx.send(WorkerMessage::Results { batch });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_tickers_distributes_round_robin() {
        let tickers = vec!["A".to_string(), "B".to_string(), "C".to_string(), "D".to_string(), "E".to_string()];
        let shards = shard_tickers(&tickers, 2);
        assert_eq!(shards.len(), 2);
        assert_eq!(shards[0], vec!["A", "C", "E"]);
        assert_eq!(shards[1], vec!["B", "D"]);
    }

    #[test]
    fn shard_tickers_allows_idle_workers() {
        let tickers = vec!["A".to_string()];
        let shards = shard_tickers(&tickers, 4);
        assert_eq!(shards.len(), 4);
        assert_eq!(shards.iter().filter(|s| s.is_empty()).count(), 3);
    }
}
