//! Worker pool executing [`ChunkTask`]s.
//!
//! ## Structure
//!
//! - [`manager`] - [`WorkerPool`]: round-robin dispatch and coordinated
//!   shutdown.
//! - [`worker`] - the per-worker receive loop and chunk execution with
//!   retries.

pub mod manager;
pub mod worker;

pub use manager::WorkerPool;

use crate::job::{ChunkOutcome, ChunkTask};
use tokio::sync::{mpsc, oneshot};

/// Message delivered to a worker's queue.
#[derive(Debug)]
pub enum WorkRequest {
    /// Count one chunk and send the outcome on `outcome_tx`.
    Chunk {
        task: ChunkTask,
        outcome_tx: mpsc::Sender<ChunkOutcome>,
    },
    /// Stop the worker loop and acknowledge on `response`.
    Shutdown { response: oneshot::Sender<()> },
}
