//! Error types for the prime counting orchestrator.
//!
//! This module defines the central `Error` enum shared by every component of
//! the crate. Input errors surface synchronously from
//! [`Orchestrator::submit`](crate::Orchestrator::submit); execution errors are
//! captured asynchronously and recorded as the cause of a failed job instead
//! of being returned to the caller that polls the job.
//!
//! ## Error Cases
//! - `InvalidArgument`: The bound or chunk count is outside the accepted range.
//! - `NotFound`: The job identity is unknown or its record has expired.
//! - `ChunkExecution`: A worker could not finish counting its sub-range.
//! - `TrackerUnavailable`: The progress store could not be reached.
//! - `ChannelError`: An internal channel between tasks was closed.
//! - `ServiceShutdown`: Work arrived while the service was shutting down.
//! - `Timeout`: A job exceeded its wall-clock deadline.

use crate::job::JobId;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the prime counting orchestrator.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// The submitted bound or chunk count was rejected.
    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// No job exists under this identity, or its record was purged.
    #[error("Job not found: {job_id}")]
    NotFound { job_id: String },

    /// A chunk could not be counted, even after retries.
    #[error("Chunk {index} failed: {cause}")]
    ChunkExecution { index: usize, cause: String },

    /// The shared progress store did not answer.
    #[error("Progress tracker unavailable: {context}")]
    TrackerUnavailable { context: String },

    /// Internal channel send/receive failure (e.g., closed or full channel).
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// The service is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,

    /// The job did not reach a terminal state before its deadline.
    #[error("Job exceeded its deadline of {after:?}")]
    Timeout { after: core::time::Duration },
}

impl Error {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    pub(crate) fn not_found(job_id: &JobId) -> Self {
        Self::NotFound {
            job_id: job_id.to_string(),
        }
    }

    /// Whether retrying the same operation could succeed.
    ///
    /// Only tracker outages are considered transient; everything else is
    /// either a caller mistake or a terminal execution outcome.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::TrackerUnavailable { .. })
    }
}
