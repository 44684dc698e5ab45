//! Per-job completion counters.
//!
//! The [`ProgressTracker`] trait is the seam between the orchestrator and the
//! store that holds `(completed, total)` for each running job. The in-process
//! [`MemoryProgressTracker`] keeps one lock-free counter per job behind a
//! read-mostly map: increments only take the map's read lock and then bump an
//! [`AtomicU64`], so concurrent reporters never lose updates.
//!
//! Entries that are never cleared (crashed or abandoned jobs) expire after a
//! fixed retention window and are dropped by [`ProgressTracker::purge_expired`].

use crate::{
    error::{Error, Result},
    job::{JobId, Progress},
};
use core::time::Duration;
use parking_lot::RwLock;
use portable_atomic::{AtomicU64, Ordering};
use std::{collections::HashMap, sync::Arc, time::Instant};

/// Shared store of per-job progress counters.
///
/// Implementations must make [`increment`](Self::increment) linearizable:
/// `n` concurrent increments on a fresh counter return exactly the values
/// `1..=n`, each once.
pub trait ProgressTracker: Send + Sync + 'static {
    /// Creates (or resets) the counter for `job_id` with `completed = 0`.
    fn init(&self, job_id: JobId, total: u64) -> Result<()>;

    /// Atomically increments `completed` and returns the new value.
    fn increment(&self, job_id: JobId) -> Result<u64>;

    /// Returns a snapshot, or `None` if no live counter exists.
    fn read(&self, job_id: JobId) -> Result<Option<Progress>>;

    /// Removes the counter. Clearing a missing counter is not an error.
    fn clear(&self, job_id: JobId) -> Result<()>;

    /// Drops counters whose retention window has elapsed and returns how many
    /// were removed.
    fn purge_expired(&self) -> usize;
}

struct Counter {
    completed: AtomicU64,
    total: u64,
    /// `None` when the retention window reaches past what `Instant` can
    /// represent; such counters never expire on their own.
    expires_at: Option<Instant>,
}

impl Counter {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    fn snapshot(&self) -> Progress {
        Progress {
            completed: self.completed.load(Ordering::Acquire),
            total: self.total,
        }
    }
}

/// In-process [`ProgressTracker`] backed by atomic counters.
pub struct MemoryProgressTracker {
    counters: RwLock<HashMap<JobId, Arc<Counter>>>,
    retention: Duration,
}

impl MemoryProgressTracker {
    /// Creates a tracker whose counters expire `retention` after `init`.
    pub fn new(retention: Duration) -> Self {
        Self {
            counters: RwLock::new(HashMap::new()),
            retention,
        }
    }

    /// Number of live (possibly expired but not yet purged) counters.
    pub fn len(&self) -> usize {
        self.counters.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn live(&self, job_id: JobId) -> Option<Arc<Counter>> {
        let counter = self.counters.read().get(&job_id).cloned()?;
        (!counter.is_expired(Instant::now())).then_some(counter)
    }
}

impl ProgressTracker for MemoryProgressTracker {
    fn init(&self, job_id: JobId, total: u64) -> Result<()> {
        let counter = Counter {
            completed: AtomicU64::new(0),
            total,
            expires_at: Instant::now().checked_add(self.retention),
        };
        self.counters.write().insert(job_id, Arc::new(counter));
        Ok(())
    }

    fn increment(&self, job_id: JobId) -> Result<u64> {
        let counter = self.live(job_id).ok_or_else(|| Error::TrackerUnavailable {
            context: format!("no live progress counter for job {job_id}"),
        })?;
        Ok(counter.completed.fetch_add(1, Ordering::AcqRel) + 1)
    }

    fn read(&self, job_id: JobId) -> Result<Option<Progress>> {
        Ok(self.live(job_id).map(|counter| counter.snapshot()))
    }

    fn clear(&self, job_id: JobId) -> Result<()> {
        self.counters.write().remove(&job_id);
        Ok(())
    }

    fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut counters = self.counters.write();
        let before = counters.len();
        counters.retain(|_, counter| !counter.is_expired(now));
        before - counters.len()
    }
}
