//! `JobController` (§4.10): the lifecycle of one job — `pending → running →
//! {completed, cancelled, failed}`. Terminal states are final; no resume.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::JobConfig;
use crate::engine::aggregator;
use crate::engine::scheduler::{self, SchedulerOutcome};
use crate::engine::sink::ResultsSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Cancelled,
    Completed,
    Failed,
}

/// `{id, config, status, totalBranches, completedBranches, passingBranches,
/// error?}` (§3). Mutated only by `JobController`/`Aggregator`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub config: JobConfig,
    pub status: JobStatus,
    pub total_branches: u64,
    pub completed_branches: u64,
    pub passing_branches: u64,
    pub error: Option<String>,
}

/// Published at the worker publish cadence (§6): `{jobId,
/// completedBranches, totalBranches, passingBranches, status}`, monotonic
/// in the first three fields within a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: Uuid,
    pub completed_branches: u64,
    pub total_branches: u64,
    pub passing_branches: u64,
    pub status: JobStatus,
}

/// Owns one job's lifecycle. `run` blocks the calling thread until the
/// job reaches a terminal state; `cancel` may be called concurrently from
/// another thread (it only sets a flag — see §5 "cooperative,
/// best-effort").
pub struct JobController {
    job: Arc<Mutex<Job>>,
    cancel: CancellationToken,
}

impl JobController {
    pub fn new(config: JobConfig) -> Self {
        let total_branches = config.total_branches();
        let job = Job {
            id: Uuid::new_v4(),
            config,
            status: JobStatus::Pending,
            total_branches,
            completed_branches: 0,
            passing_branches: 0,
            error: None,
        };
        Self {
            job: Arc::new(Mutex::new(job)),
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.job.lock().expect("job poisoned").id
    }

    pub fn snapshot(&self) -> Job {
        self.job.lock().expect("job poisoned").clone()
    }

    /// Best-effort cooperative cancellation (§5): sets the token; in-flight
    /// branches run to completion, and workers only observe it between
    /// branches.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Runs `Scheduler` to completion (or cancellation/failure), driving
    /// the job through `pending → running → {completed, cancelled,
    /// failed}`. `on_progress` is the injected progress sink (§4.8's
    /// `progressSink`); it may be called from the aggregator's thread.
    pub fn run(
        &self,
        price_dir: &Path,
        sink: Arc<dyn ResultsSink>,
        mut on_progress: impl FnMut(ProgressEvent) + Send + 'static,
    ) -> Job {
        let (job_id, total_branches, config) = {
            let mut job = self.job.lock().expect("job poisoned");
            job.status = JobStatus::Running;
            (job.id, job.total_branches, job.config.clone())
        };

        let (tx, rx) = mpsc::channel();
        let completed = Arc::new(AtomicU64::new(0));
        let passing = Arc::new(AtomicU64::new(0));
        let completed_for_agg = Arc::clone(&completed);
        let passing_for_agg = Arc::clone(&passing);

        let agg_handle = std::thread::spawn(move || {
            aggregator::drain(rx, sink, job_id, total_branches, move |event| {
                completed_for_agg.store(event.completed_branches, Ordering::SeqCst);
                passing_for_agg.store(event.passing_branches, Ordering::SeqCst);
                on_progress(event);
            })
        });

        let outcome = scheduler::run(job_id, &config, price_dir, self.cancel.clone(), tx);
        let agg_outcome = agg_handle.join().unwrap_or_else(|_| aggregator::AggregatorOutcome {
            completed: completed.load(Ordering::SeqCst),
            passing: passing.load(Ordering::SeqCst),
            sink_error: None,
        });

        let mut job = self.job.lock().expect("job poisoned");
        job.completed_branches = agg_outcome.completed;
        job.passing_branches = agg_outcome.passing;

        job.status = match (&outcome, &agg_outcome.sink_error) {
            (_, Some(err)) => {
                job.error = Some(format!("results sink failed: {err}"));
                JobStatus::Failed
            }
            (SchedulerOutcome::Failed(msg), _) => {
                job.error = Some(msg.clone());
                JobStatus::Failed
            }
            (SchedulerOutcome::Cancelled, _) => JobStatus::Cancelled,
            (SchedulerOutcome::Completed, _) => JobStatus::Completed,
        };
        drop(job);

        self.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ComparatorSpec, SplitStrategySpec};
    use crate::engine::indicators::Family;
    use crate::engine::sink::VecSink;
    use std::io::Write;

    fn write_csv(dir: &Path, ticker: &str, n: usize) {
        let mut file = std::fs::File::create(dir.join(format!("{ticker}.csv"))).unwrap();
        writeln!(file, "Date,Open,High,Low,Close,Volume").unwrap();
        let mut price = 100.0;
        for i in 0..n {
            let date = chrono::NaiveDate::from_ymd_opt(2020, 1, 1).unwrap() + chrono::Duration::days(i as i64);
            price += if i % 2 == 0 { 1.0 } else { -0.5 };
            writeln!(file, "{date},{price},{price},{price},{price},1000").unwrap();
        }
    }

    fn sample_config(tickers: Vec<&str>) -> JobConfig {
        JobConfig {
            indicator: Family::CurrentPrice,
            period_min: 1,
            period_max: 1,
            tickers: tickers.into_iter().map(str::to_string).collect(),
            comparator: ComparatorSpec::Gt,
            threshold_min: 0.0,
            threshold_max: 0.0,
            threshold_step: 1.0,
            min_tim: 0.0,
            min_timar: 0.0,
            max_dd: 100.0,
            min_trades: 0,
            min_timardd: 0.0,
            split_strategy: SplitStrategySpec::EvenOddMonth,
            num_workers: 2,
            cost_bps: 0.0,
        }
    }

    #[test]
    fn property_completed_equals_total_on_completion() {
        let dir = tempfile::tempdir().unwrap();
        write_csv(dir.path(), "AAPL", 60);
        write_csv(dir.path(), "MSFT", 60);

        let config = sample_config(vec!["AAPL", "MSFT"]);
        let total = config.total_branches();
        let controller = JobController::new(config);
        let sink = Arc::new(VecSink::new());
        let job = controller.run(dir.path(), sink, |_| {});

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.completed_branches, total);
        assert!(job.passing_branches <= job.completed_branches);
    }

    #[test]
    fn missing_ticker_is_errored_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write_csv(dir.path(), "AAPL", 60);

        let config = sample_config(vec!["AAPL", "NOPE"]);
        let total = config.total_branches();
        let controller = JobController::new(config);
        let sink = Arc::new(VecSink::new());
        let job = controller.run(dir.path(), sink, |_| {});

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.completed_branches, total);
    }
}
