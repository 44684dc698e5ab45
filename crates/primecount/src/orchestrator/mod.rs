//! Job orchestration: submission, dispatch, aggregation and status.
//!
//! [`Orchestrator`] is the only component that transitions job state. A
//! submission validates its arguments, partitions `[1, n]`, initializes the
//! job's progress counter and then hands the job to a dedicated aggregation
//! routine (see [`aggregator`]) before returning the new [`JobId`]. That
//! routine dispatches every chunk to the [`WorkerPool`], consumes the job's
//! outcome channel and is the single writer of the job's registry entry, so
//! the "last chunk" check can never race with itself.
//!
//! ## Responsibilities
//!
//! - Reject malformed submissions before any job exists.
//! - Route chunk outcomes (including external redeliveries) to their job.
//! - Serve status snapshots from the registry and the progress tracker.
//! - Purge expired records and coordinate graceful shutdown.

mod aggregator;
mod sweeper;
#[cfg(test)]
mod tests;

use crate::{
    config::OrchestratorConfig,
    error::{Error, Result},
    job::{ChunkOutcome, Job, JobId},
    partition::partition,
    pool::{WorkerPool, worker::RetryPolicy},
    progress::{MemoryProgressTracker, ProgressTracker},
    registry::JobRegistry,
    sieve::{RangeCounter, SegmentedSieve},
};
use core::time::Duration;
use parking_lot::Mutex;
use portable_atomic::{AtomicBool, Ordering};
use std::{collections::HashMap, sync::Arc};
use tokio::{
    sync::mpsc,
    time::{Instant, sleep, timeout},
};
use tokio_util::sync::CancellationToken;

/// How long to wait for each worker to acknowledge shutdown.
const WORKER_ACK_TIMEOUT: Duration = Duration::from_secs(3);

/// State shared between the public handle, aggregation routines and the
/// sweeper.
pub(crate) struct Shared {
    pub(crate) config: OrchestratorConfig,
    pub(crate) registry: JobRegistry,
    pub(crate) tracker: Arc<dyn ProgressTracker>,
    pub(crate) pool: WorkerPool,
    /// Outcome channels of jobs whose aggregation routine is still running.
    pub(crate) routes: Mutex<HashMap<JobId, mpsc::Sender<ChunkOutcome>>>,
    accepting: AtomicBool,
    sweeper_token: CancellationToken,
}

impl Shared {
    /// Runs a progress store operation, retrying outages up to
    /// `tracker_retries` times with `retry_delay` between attempts.
    pub(crate) async fn with_tracker<T>(
        &self,
        mut op: impl FnMut(&dyn ProgressTracker) -> Result<T>,
    ) -> Result<T> {
        let mut attempt = 0;
        loop {
            match op(self.tracker.as_ref()) {
                Err(e) if e.is_transient() && attempt < self.config.tracker_retries => {
                    attempt += 1;
                    tracing::warn!(attempt, error = %e, "Progress tracker call failed, retrying");
                    sleep(self.config.retry_delay).await;
                }
                result => return result,
            }
        }
    }
}

/// Handle to the prime counting service.
///
/// Cheap to clone; all clones share the same registry, tracker and worker
/// pool.
#[derive(Clone)]
pub struct Orchestrator {
    shared: Arc<Shared>,
}

impl Orchestrator {
    /// Creates an orchestrator using the [`SegmentedSieve`] counter and an
    /// in-memory progress tracker.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `config` fails validation.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn new(config: OrchestratorConfig) -> Result<Self> {
        let tracker = Arc::new(MemoryProgressTracker::new(config.retention));
        Self::with_parts(config, Arc::new(SegmentedSieve), tracker)
    }

    /// Creates an orchestrator with a custom counting worker and progress
    /// store.
    ///
    /// Spawns `config.num_workers` worker tasks and the retention sweeper on
    /// the current runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `config` fails validation.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn with_parts(
        config: OrchestratorConfig,
        counter: Arc<dyn RangeCounter>,
        tracker: Arc<dyn ProgressTracker>,
    ) -> Result<Self> {
        config.validate()?;

        let pool = WorkerPool::spawn(
            config.num_workers,
            config.worker_queue_depth,
            counter,
            RetryPolicy {
                retries: config.chunk_retries,
                delay: config.retry_delay,
            },
        );

        let shared = Arc::new(Shared {
            registry: JobRegistry::new(config.retention),
            tracker,
            pool,
            routes: Mutex::new(HashMap::new()),
            accepting: AtomicBool::new(true),
            sweeper_token: CancellationToken::new(),
            config,
        });

        sweeper::spawn(
            Arc::downgrade(&shared),
            shared.config.sweep_interval,
            shared.sweeper_token.clone(),
        );

        tracing::info!(
            workers = shared.config.num_workers,
            max_chunks = shared.config.max_chunks,
            "Orchestrator started"
        );

        Ok(Self { shared })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.shared.config
    }

    pub fn num_workers(&self) -> usize {
        self.shared.pool.len()
    }

    /// Number of jobs that have not reached a terminal state.
    pub fn active_jobs(&self) -> usize {
        self.shared.registry.active()
    }

    pub fn is_accepting(&self) -> bool {
        self.shared.accepting.load(Ordering::Acquire)
    }

    /// Submits a job counting the primes in `[1, bound_n]` split into
    /// `chunk_count` chunks.
    ///
    /// Returns as soon as the job is registered and its aggregation routine
    /// is running; it never waits for chunks to execute.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if `bound_n < min_bound` or
    ///   `chunk_count` is outside `[1, max_chunks]`. No job is created.
    /// - [`Error::ServiceShutdown`] once shutdown has begun.
    /// - [`Error::TrackerUnavailable`] if the progress counter could not be
    ///   initialized after retries. No job is created.
    #[tracing::instrument(skip(self), fields(job_id))]
    pub async fn submit(&self, bound_n: u64, chunk_count: usize) -> Result<JobId> {
        if !self.is_accepting() {
            return Err(Error::ServiceShutdown);
        }
        self.validate(bound_n, chunk_count)?;

        let ranges = partition(bound_n, chunk_count)?;
        let job = Job::new(JobId::new(), bound_n, chunk_count);
        let job_id = job.id;
        let started = Instant::now();
        tracing::Span::current().record("job_id", tracing::field::display(job_id));

        self.shared
            .with_tracker(|t| t.init(job_id, chunk_count as u64))
            .await?;

        let (outcome_tx, outcome_rx) = mpsc::channel(chunk_count);
        self.shared.registry.insert(job);
        self.shared
            .routes
            .lock()
            .insert(job_id, outcome_tx.clone());

        tokio::spawn(aggregator::run_job(
            Arc::clone(&self.shared),
            job_id,
            ranges,
            started,
            outcome_tx,
            outcome_rx,
        ));

        tracing::info!(bound_n, chunk_count, "Job submitted");
        Ok(job_id)
    }

    /// Returns a snapshot of the job.
    ///
    /// While the job is running, `progress` reflects the live tracker value
    /// when one is available. Execution failures are reported through the
    /// snapshot's `state` and `error`, never as an `Err`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the job is unknown or has been purged.
    pub fn status(&self, job_id: &JobId) -> Result<Job> {
        let mut job = self
            .shared
            .registry
            .get(job_id)
            .ok_or_else(|| Error::not_found(job_id))?;

        if !job.is_terminal() {
            match self.shared.tracker.read(*job_id) {
                Ok(Some(live)) => {
                    let live = live.completed.min(job.progress.total);
                    job.progress.completed = job.progress.completed.max(live);
                }
                Ok(None) => {}
                Err(e) => tracing::debug!(job_id = %job_id, error = %e, "Live progress unavailable"),
            }
        }

        Ok(job)
    }

    /// Delivers a chunk outcome produced outside the built-in pool, or
    /// redelivered after a lost acknowledgement.
    ///
    /// Outcomes are keyed by chunk index, so repeating a delivery never
    /// changes the aggregate. Outcomes for a job that already reached a
    /// terminal state are disregarded.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the job is unknown or has been purged.
    pub async fn deliver(&self, outcome: ChunkOutcome) -> Result<()> {
        let job_id = outcome.job_id();
        let route = self.shared.routes.lock().get(&job_id).cloned();

        match route {
            Some(tx) => {
                if tx.send(outcome).await.is_err() {
                    tracing::debug!(job_id = %job_id, "Job finished before outcome arrived");
                }
                Ok(())
            }
            None if self.shared.registry.get(&job_id).is_some() => {
                tracing::debug!(job_id = %job_id, "Disregarding outcome for finished job");
                Ok(())
            }
            None => Err(Error::not_found(&job_id)),
        }
    }

    /// Gracefully shuts the service down.
    ///
    /// - Refuses new submissions.
    /// - Waits up to `shutdown_timeout` for in-flight jobs to finish.
    /// - Cancels remaining work; chunks still queued fail their jobs.
    /// - Stops every worker and the retention sweeper.
    pub async fn shutdown(&self) {
        // === Phase 0: Stop accepting new jobs ===
        tracing::info!("Refusing new submissions");
        self.shared.accepting.store(false, Ordering::Release);

        // === Phase 1: Wait for in-flight jobs to drain ===
        tracing::info!(active = self.active_jobs(), "Draining in-flight jobs");
        let drained = timeout(self.shared.config.shutdown_timeout, async {
            while self.active_jobs() > 0 {
                sleep(Duration::from_millis(100)).await;
            }
        })
        .await;

        match drained {
            Ok(()) => tracing::debug!("All in-flight jobs drained"),
            Err(_) => tracing::warn!(
                active = self.active_jobs(),
                "Graceful drain timed out"
            ),
        }

        // === Phase 2: Cancel remaining work and stop workers ===
        self.shared.pool.shutdown(WORKER_ACK_TIMEOUT).await;
        self.shared.sweeper_token.cancel();
    }

    fn validate(&self, bound_n: u64, chunk_count: usize) -> Result<()> {
        let config = &self.shared.config;
        if bound_n < config.min_bound {
            return Err(Error::invalid(format!(
                "n must be >= {}, got {bound_n}",
                config.min_bound
            )));
        }
        if chunk_count == 0 || chunk_count > config.max_chunks {
            return Err(Error::invalid(format!(
                "chunks must be between 1 and {}, got {chunk_count}",
                config.max_chunks
            )));
        }
        Ok(())
    }
}
