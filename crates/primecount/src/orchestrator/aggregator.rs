//! Per-job aggregation routine.
//!
//! Every submitted job gets exactly one [`run_job`] task. It owns the job's
//! receiving end of the outcome channel, so outcomes for one job are applied
//! strictly one at a time and the completion check runs inside a single
//! writer. Different jobs aggregate in parallel.

use super::Shared;
use crate::{
    error::Error,
    job::{ChunkOutcome, ChunkTask, JobId, JobResult},
    partition::ChunkRange,
    pool::WorkRequest,
};
use std::sync::Arc;
use tokio::{
    sync::mpsc,
    time::{Instant, sleep_until},
};

/// Aggregation state for one job.
pub(crate) struct JobAggregator {
    shared: Arc<Shared>,
    job_id: JobId,
    started: Instant,
    /// Per-chunk prime counts, keyed by chunk index.
    counts: Vec<Option<u64>>,
    terminal: bool,
}

impl JobAggregator {
    pub(crate) fn new(shared: Arc<Shared>, job_id: JobId, chunk_count: usize, started: Instant) -> Self {
        Self {
            shared,
            job_id,
            started,
            counts: vec![None; chunk_count],
            terminal: false,
        }
    }

    pub(crate) const fn is_terminal(&self) -> bool {
        self.terminal
    }

    /// Every chunk has been handed to a worker.
    pub(crate) fn on_dispatched(&self) {
        if self.terminal {
            return;
        }
        self.shared.registry.update(&self.job_id, |job| job.mark_started());
        tracing::debug!(job_id = %self.job_id, "All chunks dispatched");
    }

    pub(crate) async fn on_outcome(&mut self, outcome: ChunkOutcome) {
        match outcome {
            ChunkOutcome::Completed {
                index, prime_count, ..
            } => self.on_chunk_complete(index, prime_count).await,
            ChunkOutcome::Failed { index, cause, .. } => self.on_chunk_failure(index, cause).await,
        }
    }

    /// Records one chunk's contribution.
    ///
    /// A repeated delivery for the same index overwrites the stored count
    /// without touching the progress counter, so the completion barrier only
    /// ever advances once per chunk.
    pub(crate) async fn on_chunk_complete(&mut self, index: usize, prime_count: u64) {
        if self.terminal {
            tracing::debug!(job_id = %self.job_id, chunk = index, "Disregarding outcome for finished job");
            return;
        }
        let Some(slot) = self.counts.get_mut(index) else {
            tracing::warn!(job_id = %self.job_id, chunk = index, "Outcome for unknown chunk index");
            return;
        };

        let first_arrival = slot.is_none();
        *slot = Some(prime_count);
        if !first_arrival {
            tracing::debug!(job_id = %self.job_id, chunk = index, "Duplicate chunk delivery");
            return;
        }

        let job_id = self.job_id;
        let completed = match self.shared.with_tracker(|t| t.increment(job_id)).await {
            Ok(completed) => completed,
            Err(e) => {
                self.fail(e.to_string()).await;
                return;
            }
        };

        self.shared.registry.update(&job_id, |job| {
            job.mark_started();
            job.record_progress(completed);
        });

        let total = self.counts.len() as u64;
        tracing::trace!(job_id = %job_id, chunk = index, completed, total, "Chunk recorded");

        if completed >= total && self.counts.iter().all(Option::is_some) {
            self.succeed().await;
        }
    }

    /// Fails the whole job; a partial prime count has no meaning.
    pub(crate) async fn on_chunk_failure(&mut self, index: usize, cause: String) {
        if self.terminal {
            return;
        }
        if index >= self.counts.len() {
            tracing::warn!(job_id = %self.job_id, chunk = index, "Failure for unknown chunk index");
            return;
        }
        self.fail(Error::ChunkExecution { index, cause }.to_string()).await;
    }

    pub(crate) async fn fail(&mut self, cause: String) {
        if self.terminal {
            return;
        }
        self.terminal = true;
        tracing::error!(job_id = %self.job_id, %cause, "Job failed");
        self.shared.registry.update(&self.job_id, |job| job.fail(cause));
        self.clear_tracker().await;
    }

    async fn succeed(&mut self) {
        self.terminal = true;
        let prime_count = self.counts.iter().flatten().sum();
        let duration_seconds = self.started.elapsed().as_secs_f64();

        self.shared.registry.update(&self.job_id, |job| {
            job.succeed(JobResult {
                prime_count,
                duration_seconds,
            });
        });
        tracing::info!(job_id = %self.job_id, prime_count, duration_seconds, "Job succeeded");
        self.clear_tracker().await;
    }

    async fn clear_tracker(&self) {
        let job_id = self.job_id;
        if let Err(e) = self.shared.with_tracker(|t| t.clear(job_id)).await {
            // The counter self-expires after the retention window.
            tracing::warn!(job_id = %job_id, error = %e, "Failed to clear progress counter");
        }
    }
}

/// Drives one job from dispatch to a terminal state.
pub(crate) async fn run_job(
    shared: Arc<Shared>,
    job_id: JobId,
    ranges: Vec<ChunkRange>,
    started: Instant,
    outcome_tx: mpsc::Sender<ChunkOutcome>,
    mut outcome_rx: mpsc::Receiver<ChunkOutcome>,
) {
    let deadline = started.checked_add(shared.config.job_timeout);
    if deadline.is_none() {
        tracing::warn!(job_id = %job_id, "Job timeout exceeds the clock range; running without a deadline");
    }
    let mut aggregator = JobAggregator::new(Arc::clone(&shared), job_id, ranges.len(), started);

    let dispatch = dispatch_chunks(&shared, job_id, &ranges, outcome_tx);
    tokio::pin!(dispatch);
    let mut dispatching = true;

    while !aggregator.is_terminal() {
        tokio::select! {
            result = &mut dispatch, if dispatching => {
                dispatching = false;
                match result {
                    Ok(()) => aggregator.on_dispatched(),
                    Err(e) => aggregator.fail(e.to_string()).await,
                }
            }
            outcome = outcome_rx.recv() => match outcome {
                Some(outcome) => aggregator.on_outcome(outcome).await,
                None => {
                    let cause = Error::ChannelError {
                        context: "outcome channel closed before the job finished".to_string(),
                    };
                    aggregator.fail(cause.to_string()).await;
                }
            },
            () = sleep_until(deadline.unwrap_or(started)), if deadline.is_some() => {
                let cause = Error::Timeout { after: shared.config.job_timeout };
                aggregator.fail(cause.to_string()).await;
            }
        }
    }

    shared.routes.lock().remove(&job_id);
}

/// Hands every chunk to the worker pool, waiting for queue space as needed.
async fn dispatch_chunks(
    shared: &Shared,
    job_id: JobId,
    ranges: &[ChunkRange],
    outcome_tx: mpsc::Sender<ChunkOutcome>,
) -> crate::Result<()> {
    for range in ranges {
        let task = ChunkTask {
            job_id,
            index: range.index,
            range_start: range.start,
            range_end: range.end,
        };
        shared
            .pool
            .send_to_next_worker(WorkRequest::Chunk {
                task,
                outcome_tx: outcome_tx.clone(),
            })
            .await?;
    }
    Ok(())
}
