//! `Aggregator` (§4.9): the single writer that drains every worker's
//! `WorkerMessage`s, keeps the job's running counters, and batches rows
//! into the `ResultsSink`.
//!
//! Runs on its own thread so workers never block on sink I/O; the
//! `mpsc::Receiver` is the only thing it owns besides the sink, matching
//! §4.9's "one aggregator, many producers" shape.

use std::sync::mpsc::Receiver;
use std::sync::Arc;

use uuid::Uuid;

use crate::engine::branch::BranchResult;
use crate::engine::job::{JobStatus, ProgressEvent};
use crate::engine::scheduler::WorkerMessage;
use crate::engine::sink::{ResultsSink, SinkError};

/// Flush unconditionally once this many rows have accumulated, even if no
/// worker shard has completed yet (§6.1 batching note, mirrored from the
/// worker-side `RESULT_BUFFER_CAPACITY`).
const BATCH_SIZE: usize = 100;

pub struct AggregatorOutcome {
    pub completed: u64,
    pub passing: u64,
    pub sink_error: Option<SinkError>,
}

/// Drains `rx` until every worker's `Sender` has been dropped (i.e. the
/// `Scheduler`'s `rayon::scope` has returned), publishing a `ProgressEvent`
/// on every `Progress` message and batching `Results` into `sink`. The
/// first `insert_batch` failure is recorded and returned, but draining
/// continues — a full channel of un-sunk results is still better
/// accounted for in the final counters than silently dropped.
pub fn drain(
    rx: Receiver<WorkerMessage>,
    sink: Arc<dyn ResultsSink>,
    job_id: Uuid,
    total_branches: u64,
    mut on_progress: impl FnMut(ProgressEvent),
) -> AggregatorOutcome {
    let mut completed = 0u64;
    let mut passing = 0u64;
    let mut buffer: Vec<BranchResult> = Vec::new();
    let mut sink_error: Option<SinkError> = None;

    for message in rx {
        match message {
            WorkerMessage::Progress { completed_delta, passing_delta } => {
                completed += completed_delta;
                passing += passing_delta;
                on_progress(ProgressEvent {
                    job_id,
                    completed_branches: completed,
                    total_branches,
                    passing_branches: passing,
                    status: JobStatus::Running,
                });
            }
            WorkerMessage::Results { batch } => {
                buffer.extend(batch);
                if buffer.len() >= BATCH_SIZE {
                    flush(&sink, &mut buffer, &mut sink_error);
                }
            }
        }
    }
    flush(&sink, &mut buffer, &mut sink_error);

    AggregatorOutcome { completed, passing, sink_error }
}

fn flush(sink: &Arc<dyn ResultsSink>, buffer: &mut Vec<BranchResult>, sink_error: &mut Option<SinkError>) {
    if buffer.is_empty() {
        return;
    }
    if let Err(err) = sink.insert_batch(buffer) {
        if sink_error.is_none() {
            tracing::error!(error = %err, "results sink batch write failed");
            *sink_error = Some(err);
        }
    }
    buffer.clear();
}
