#![doc = include_str!("../README.md")]

mod config;
mod error;
mod job;
mod orchestrator;
mod partition;
mod pool;
mod progress;
mod registry;
mod sieve;

pub use crate::{
    config::{MAX_WINDOW, OrchestratorConfig},
    error::{Error, Result},
    job::{ChunkOutcome, ChunkTask, Job, JobId, JobResult, JobState, Progress},
    orchestrator::Orchestrator,
    partition::{ChunkRange, MAX_CHUNKS, partition},
    pool::{
        WorkRequest, WorkerPool,
        worker::{RetryPolicy, execute_chunk, worker_loop},
    },
    progress::{MemoryProgressTracker, ProgressTracker},
    registry::JobRegistry,
    sieve::{RangeCounter, SegmentedSieve, TrialDivision, count_primes_in_range, is_prime},
};
