//! Job registry: identity -> latest [`Job`] snapshot.
//!
//! The registry is written only by the orchestrator (job creation and the
//! per-job aggregation routine) and read by any number of pollers. Terminal
//! records are kept for a bounded retention window measured from
//! `finished_at`, after which they read as absent and are dropped by
//! [`JobRegistry::purge_expired`].

use crate::job::{Job, JobId};
use chrono::{DateTime, TimeDelta, Utc};
use core::time::Duration;
use parking_lot::RwLock;
use std::collections::HashMap;

pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, Job>>,
    retention: TimeDelta,
}

impl JobRegistry {
    pub fn new(retention: Duration) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            retention: TimeDelta::from_std(retention).unwrap_or(TimeDelta::MAX),
        }
    }

    pub fn insert(&self, job: Job) {
        self.jobs.write().insert(job.id, job);
    }

    /// Returns a snapshot of the job, or `None` if it is unknown or expired.
    pub fn get(&self, job_id: &JobId) -> Option<Job> {
        let jobs = self.jobs.read();
        let job = jobs.get(job_id)?;
        (!self.is_expired(job, Utc::now())).then(|| job.clone())
    }

    /// Applies `f` to the stored job under the write lock.
    ///
    /// Returns `None` if the job is not present.
    pub fn update<R>(&self, job_id: &JobId, f: impl FnOnce(&mut Job) -> R) -> Option<R> {
        self.jobs.write().get_mut(job_id).map(f)
    }

    /// Drops terminal records older than the retention window.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut jobs = self.jobs.write();
        let before = jobs.len();
        jobs.retain(|_, job| !self.is_expired(job, now));
        before - jobs.len()
    }

    /// Number of jobs that have not reached a terminal state.
    pub fn active(&self) -> usize {
        self.jobs.read().values().filter(|j| !j.is_terminal()).count()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_expired(&self, job: &Job, now: DateTime<Utc>) -> bool {
        match job.finished_at {
            Some(finished) => finished
                .checked_add_signed(self.retention)
                .is_some_and(|deadline| deadline <= now),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobResult, JobState};
    use std::thread;

    #[test]
    fn insert_update_get() {
        let registry = JobRegistry::new(Duration::from_secs(3600));
        let job = Job::new(JobId::new(), 100, 4);
        let id = job.id;
        registry.insert(job);

        assert_eq!(registry.active(), 1);
        registry.update(&id, Job::mark_started);
        assert_eq!(registry.get(&id).unwrap().state, JobState::Started);
        assert!(registry.update(&JobId::new(), Job::mark_started).is_none());
        assert!(registry.get(&JobId::new()).is_none());
    }

    #[test]
    fn terminal_records_expire() {
        let registry = JobRegistry::new(Duration::from_millis(20));
        let done = Job::new(JobId::new(), 100, 1);
        let running = Job::new(JobId::new(), 100, 1);
        let (done_id, running_id) = (done.id, running.id);
        registry.insert(done);
        registry.insert(running);
        registry.update(&done_id, |job| {
            job.succeed(JobResult {
                prime_count: 25,
                duration_seconds: 0.01,
            });
        });

        thread::sleep(Duration::from_millis(40));

        assert!(registry.get(&done_id).is_none());
        assert!(registry.get(&running_id).is_some());
        assert_eq!(registry.purge_expired(), 1);
        assert_eq!(registry.len(), 1);
    }
}
