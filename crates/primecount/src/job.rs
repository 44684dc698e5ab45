//! # Job and Chunk Types
//!
//! Shared data model for prime counting jobs. A [`Job`] is the externally
//! visible snapshot of one submission; [`ChunkTask`] and [`ChunkOutcome`] are
//! the payloads exchanged with the worker pool.
//!
//! Every field of a [`Job`] that is marked immutable is set once in
//! [`Job::new`]. State transitions are performed only by the orchestrator's
//! per-job aggregation routine through the `pub(crate)` helpers below, which
//! keep the result/error invariant intact: neither is set before a terminal
//! state, exactly one is set after.

use chrono::{DateTime, Utc};
use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque unique identity of a job, assigned at submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Generates a fresh random identity.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Lifecycle state of a job.
///
/// ```text
/// PENDING -> STARTED -> PROGRESS* -> SUCCESS
///    \          \          \
///     +----------+----------+-----> FAILURE
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Pending,
    Started,
    Progress,
    Success,
    Failure,
}

impl JobState {
    /// Returns `true` for `SUCCESS` and `FAILURE`.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Started => "STARTED",
            Self::Progress => "PROGRESS",
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
        };
        f.write_str(s)
    }
}

/// Number of chunks finished out of the job's total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub completed: u64,
    pub total: u64,
}

impl Progress {
    pub const fn new(total: u64) -> Self {
        Self {
            completed: 0,
            total,
        }
    }

    pub const fn is_complete(&self) -> bool {
        self.completed >= self.total
    }
}

/// Final answer of a successful job.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub prime_count: u64,
    pub duration_seconds: f64,
}

/// Snapshot of a job as seen by pollers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub bound_n: u64,
    pub chunk_count: usize,
    pub state: JobState,
    pub progress: Progress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Creates a `PENDING` job with zero progress.
    pub fn new(id: JobId, bound_n: u64, chunk_count: usize) -> Self {
        Self {
            id,
            bound_n,
            chunk_count,
            state: JobState::Pending,
            progress: Progress::new(chunk_count as u64),
            result: None,
            error: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    pub const fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub(crate) fn mark_started(&mut self) {
        if self.state == JobState::Pending {
            self.state = JobState::Started;
        }
    }

    /// Records a new completed count. `completed` never moves backwards and
    /// never exceeds `total`.
    pub(crate) fn record_progress(&mut self, completed: u64) {
        if self.is_terminal() {
            return;
        }
        let completed = completed.min(self.progress.total);
        if completed > self.progress.completed {
            self.progress.completed = completed;
        }
        if matches!(self.state, JobState::Pending | JobState::Started) {
            self.state = JobState::Progress;
        }
    }

    pub(crate) fn succeed(&mut self, result: JobResult) {
        if self.is_terminal() {
            return;
        }
        self.state = JobState::Success;
        self.progress.completed = self.progress.total;
        self.result = Some(result);
        self.finished_at = Some(Utc::now());
    }

    pub(crate) fn fail(&mut self, cause: impl Into<String>) {
        if self.is_terminal() {
            return;
        }
        self.state = JobState::Failure;
        self.error = Some(cause.into());
        self.finished_at = Some(Utc::now());
    }
}

/// Unit of work sent to the worker pool: count the primes in
/// `[range_start, range_end]` on behalf of `job_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkTask {
    pub job_id: JobId,
    pub index: usize,
    pub range_start: u64,
    pub range_end: u64,
}

/// Result of executing one [`ChunkTask`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ChunkOutcome {
    Completed {
        job_id: JobId,
        index: usize,
        prime_count: u64,
    },
    Failed {
        job_id: JobId,
        index: usize,
        cause: String,
    },
}

impl ChunkOutcome {
    pub const fn job_id(&self) -> JobId {
        match self {
            Self::Completed { job_id, .. } | Self::Failed { job_id, .. } => *job_id,
        }
    }

    pub const fn index(&self) -> usize {
        match self {
            Self::Completed { index, .. } | Self::Failed { index, .. } => *index,
        }
    }
}
