use crate::{
    error::{Error, Result},
    partition::MAX_CHUNKS,
};
use core::time::Duration;

/// Upper bound for `job_timeout` and `retention`.
pub const MAX_WINDOW: Duration = Duration::from_secs(30 * 24 * 3600);

/// Runtime configuration for an [`Orchestrator`](crate::Orchestrator).
///
/// The defaults mirror a production deployment: one worker per CPU, a
/// one-hour job deadline and a one-hour retention window for progress and
/// terminal records.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Number of worker tasks executing chunks concurrently.
    pub num_workers: usize,
    /// Capacity of each worker's task queue.
    pub worker_queue_depth: usize,
    /// Smallest bound `n` accepted by `submit`.
    pub min_bound: u64,
    /// Largest chunk count accepted by `submit` (at most 128).
    pub max_chunks: usize,
    /// Wall-clock deadline for a single job.
    pub job_timeout: Duration,
    /// How long progress counters and terminal job records are kept.
    pub retention: Duration,
    /// Interval between retention sweeps.
    pub sweep_interval: Duration,
    /// Extra attempts for a chunk whose execution failed.
    pub chunk_retries: u32,
    /// Pause before re-running a failed chunk or progress store call.
    pub retry_delay: Duration,
    /// Extra attempts for a progress store call that reported an outage.
    pub tracker_retries: u32,
    /// How long `shutdown` waits for in-flight jobs before cancelling them.
    pub shutdown_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            num_workers: num_cpus::get(),
            worker_queue_depth: 32,
            min_bound: 10_000,
            max_chunks: MAX_CHUNKS,
            job_timeout: Duration::from_secs(3600),
            retention: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(60),
            chunk_retries: 3,
            retry_delay: Duration::from_secs(1),
            tracker_retries: 3,
            shutdown_timeout: Duration::from_secs(3),
        }
    }
}

impl OrchestratorConfig {
    /// Checks internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.num_workers == 0 {
            return Err(Error::invalid("num_workers must be greater than 0"));
        }
        if self.worker_queue_depth == 0 {
            return Err(Error::invalid("worker_queue_depth must be greater than 0"));
        }
        if self.min_bound == 0 {
            return Err(Error::invalid("min_bound must be greater than 0"));
        }
        if self.max_chunks == 0 || self.max_chunks > MAX_CHUNKS {
            return Err(Error::invalid(format!(
                "max_chunks must be between 1 and {MAX_CHUNKS}"
            )));
        }
        if self.job_timeout.is_zero() || self.job_timeout > MAX_WINDOW {
            return Err(Error::invalid(format!(
                "job_timeout must be non-zero and at most {MAX_WINDOW:?}"
            )));
        }
        if self.retention.is_zero() || self.retention > MAX_WINDOW {
            return Err(Error::invalid(format!(
                "retention must be non-zero and at most {MAX_WINDOW:?}"
            )));
        }
        // Progress counters must outlive every job that can still report.
        if self.retention < self.job_timeout {
            return Err(Error::invalid("retention must be at least job_timeout"));
        }
        if self.sweep_interval.is_zero() {
            return Err(Error::invalid("sweep_interval must be non-zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        OrchestratorConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_zero_workers_and_oversized_chunks() {
        let config = OrchestratorConfig {
            num_workers: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = OrchestratorConfig {
            max_chunks: MAX_CHUNKS + 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_unbounded_windows() {
        for (job_timeout, retention) in [
            (Duration::MAX, Duration::MAX),
            (MAX_WINDOW + Duration::from_secs(1), MAX_WINDOW),
            (Duration::from_secs(60), Duration::MAX),
        ] {
            let config = OrchestratorConfig {
                job_timeout,
                retention,
                ..Default::default()
            };
            assert!(config.validate().is_err(), "{job_timeout:?} / {retention:?}");
        }

        let config = OrchestratorConfig {
            job_timeout: MAX_WINDOW,
            retention: MAX_WINDOW,
            ..Default::default()
        };
        config.validate().unwrap();
    }

    #[test]
    fn retention_must_cover_the_job_deadline() {
        let config = OrchestratorConfig {
            retention: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = OrchestratorConfig {
            retention: Duration::from_millis(20),
            job_timeout: Duration::from_secs(10),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("retention"), "{err}");
    }
}
