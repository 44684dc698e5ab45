use super::WorkRequest;
use crate::{
    job::{ChunkOutcome, ChunkTask},
    sieve::RangeCounter,
};
use core::time::Duration;
use std::{any::Any, sync::Arc};
use tokio::{sync::mpsc, task::JoinError};
use tokio_util::sync::CancellationToken;

/// Retry policy applied to each chunk a worker executes.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Extra attempts after the first failure.
    pub retries: u32,
    /// Pause between attempts.
    pub delay: Duration,
}

/// Worker task responsible for processing [`WorkRequest`] messages.
///
/// The worker executes one chunk at a time. Counting is CPU-bound, so each
/// attempt runs on Tokio's blocking pool; a panic inside the counter is
/// caught at that boundary and turned into a retry or a
/// [`ChunkOutcome::Failed`], never a silently dead worker.
///
/// Runs until a [`WorkRequest::Shutdown`] arrives or every sender is dropped.
pub async fn worker_loop(
    worker_id: usize,
    mut rx: mpsc::Receiver<WorkRequest>,
    counter: Arc<dyn RangeCounter>,
    policy: RetryPolicy,
    shutdown_token: CancellationToken,
) {
    tracing::trace!(worker = worker_id, "Worker started");

    while let Some(work) = rx.recv().await {
        match work {
            WorkRequest::Chunk { task, outcome_tx } => {
                // The job already reached a terminal state.
                if outcome_tx.is_closed() {
                    tracing::trace!(worker = worker_id, job_id = %task.job_id, chunk = task.index, "Skipping chunk of finished job");
                    continue;
                }

                let outcome = if shutdown_token.is_cancelled() {
                    ChunkOutcome::Failed {
                        job_id: task.job_id,
                        index: task.index,
                        cause: "service is shutting down".to_string(),
                    }
                } else {
                    execute_chunk(worker_id, task, &counter, policy, &shutdown_token).await
                };

                if outcome_tx.send(outcome).await.is_err() {
                    tracing::debug!(
                        worker = worker_id,
                        job_id = %task.job_id,
                        chunk = task.index,
                        "Job is no longer listening for outcomes"
                    );
                }
            }
            WorkRequest::Shutdown { response } => {
                tracing::debug!(worker = worker_id, "Worker received shutdown signal");

                // Chunks queued behind the shutdown would otherwise be dropped
                // unanswered and leave their jobs waiting on the deadline.
                rx.close();
                drain_queue(worker_id, &mut rx).await;

                if response.send(()).is_err() {
                    tracing::error!(worker = worker_id, "Worker failed to acknowledge shutdown");
                }
                break;
            }
        }
    }

    tracing::trace!(worker = worker_id, "Worker stopped");
}

/// Fails every request still buffered in a closed queue.
async fn drain_queue(worker_id: usize, rx: &mut mpsc::Receiver<WorkRequest>) {
    while let Some(work) = rx.recv().await {
        match work {
            WorkRequest::Chunk { task, outcome_tx } => {
                let outcome = ChunkOutcome::Failed {
                    job_id: task.job_id,
                    index: task.index,
                    cause: "service is shutting down".to_string(),
                };
                if outcome_tx.send(outcome).await.is_err() {
                    tracing::trace!(worker = worker_id, job_id = %task.job_id, chunk = task.index, "Dropped queued chunk of finished job");
                }
            }
            WorkRequest::Shutdown { response } => {
                let _ = response.send(());
            }
        }
    }
}

/// Counts one chunk, retrying failed attempts according to `policy`.
pub async fn execute_chunk(
    worker_id: usize,
    task: ChunkTask,
    counter: &Arc<dyn RangeCounter>,
    policy: RetryPolicy,
    shutdown_token: &CancellationToken,
) -> ChunkOutcome {
    let mut attempt = 0;

    loop {
        let counter = Arc::clone(counter);
        let (start, end) = (task.range_start, task.range_end);
        let started = std::time::Instant::now();

        match tokio::task::spawn_blocking(move || counter.count(start, end)).await {
            Ok(prime_count) => {
                tracing::debug!(
                    worker = worker_id,
                    job_id = %task.job_id,
                    chunk = task.index,
                    start,
                    end,
                    prime_count,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Chunk counted"
                );
                return ChunkOutcome::Completed {
                    job_id: task.job_id,
                    index: task.index,
                    prime_count,
                };
            }
            Err(err) => {
                let cause = describe_join_error(err);
                if attempt >= policy.retries {
                    tracing::error!(
                        worker = worker_id,
                        job_id = %task.job_id,
                        chunk = task.index,
                        attempts = attempt + 1,
                        %cause,
                        "Chunk failed"
                    );
                    return ChunkOutcome::Failed {
                        job_id: task.job_id,
                        index: task.index,
                        cause,
                    };
                }

                attempt += 1;
                tracing::warn!(
                    worker = worker_id,
                    job_id = %task.job_id,
                    chunk = task.index,
                    attempt,
                    %cause,
                    "Chunk attempt failed, retrying"
                );

                tokio::select! {
                    () = tokio::time::sleep(policy.delay) => {}
                    () = shutdown_token.cancelled() => {
                        return ChunkOutcome::Failed {
                            job_id: task.job_id,
                            index: task.index,
                            cause: "service is shutting down".to_string(),
                        };
                    }
                }
            }
        }
    }
}

fn describe_join_error(err: JoinError) -> String {
    if err.is_panic() {
        format!("chunk task panicked: {}", panic_message(&*err.into_panic()))
    } else {
        "chunk task was cancelled".to_string()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "unknown panic payload"
    }
}
