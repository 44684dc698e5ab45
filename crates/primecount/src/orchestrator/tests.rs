use super::{aggregator::JobAggregator, *};
use crate::job::{JobState, Progress};
use portable_atomic::AtomicU32;
use std::time::Duration as StdDuration;

fn test_config() -> OrchestratorConfig {
    OrchestratorConfig {
        num_workers: 4,
        min_bound: 1,
        chunk_retries: 0,
        retry_delay: Duration::from_millis(1),
        shutdown_timeout: Duration::from_millis(200),
        ..Default::default()
    }
}

async fn wait_terminal(orchestrator: &Orchestrator, job_id: &JobId) -> Job {
    timeout(Duration::from_secs(10), async {
        loop {
            let job = orchestrator.status(job_id).unwrap();
            if job.is_terminal() {
                return job;
            }
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("job did not finish in time")
}

/// Fails the first `increment_failures` increments, or every `init`.
struct FlakyTracker {
    inner: MemoryProgressTracker,
    increment_failures: AtomicU32,
    fail_init: bool,
}

impl FlakyTracker {
    fn new(increment_failures: u32, fail_init: bool) -> Self {
        Self {
            inner: MemoryProgressTracker::new(Duration::from_secs(60)),
            increment_failures: AtomicU32::new(increment_failures),
            fail_init,
        }
    }

    fn outage() -> Error {
        Error::TrackerUnavailable {
            context: "connection refused".to_string(),
        }
    }
}

impl ProgressTracker for FlakyTracker {
    fn init(&self, job_id: JobId, total: u64) -> Result<()> {
        if self.fail_init {
            return Err(Self::outage());
        }
        self.inner.init(job_id, total)
    }

    fn increment(&self, job_id: JobId) -> Result<u64> {
        let remaining = self.increment_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.increment_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(Self::outage());
        }
        self.inner.increment(job_id)
    }

    fn read(&self, job_id: JobId) -> Result<Option<Progress>> {
        self.inner.read(job_id)
    }

    fn clear(&self, job_id: JobId) -> Result<()> {
        self.inner.clear(job_id)
    }

    fn purge_expired(&self) -> usize {
        self.inner.purge_expired()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn small_job_succeeds() {
    let orchestrator = Orchestrator::new(test_config()).unwrap();
    let job_id = orchestrator.submit(100, 4).await.unwrap();

    let job = wait_terminal(&orchestrator, &job_id).await;
    assert_eq!(job.state, JobState::Success);
    assert_eq!(job.progress, Progress { completed: 4, total: 4 });
    assert_eq!(job.result.as_ref().map(|r| r.prime_count), Some(25));
    assert!(job.result.unwrap().duration_seconds >= 0.0);
    assert!(job.error.is_none());
    assert!(job.finished_at.is_some());

    // Progress counter is cleared on termination.
    timeout(Duration::from_secs(1), async {
        while orchestrator.shared.tracker.read(job_id).unwrap().is_some() {
            sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(orchestrator.active_jobs(), 0);
    orchestrator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn counts_primes_below_one_million() {
    let orchestrator = Orchestrator::new(OrchestratorConfig::default()).unwrap();
    let job_id = orchestrator.submit(1_000_000, 16).await.unwrap();

    let job = wait_terminal(&orchestrator, &job_id).await;
    assert_eq!(job.state, JobState::Success);
    assert_eq!(job.result.unwrap().prime_count, 78_498);
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn invalid_submissions_create_no_job() {
    let orchestrator = Orchestrator::new(OrchestratorConfig {
        min_bound: 10_000,
        ..test_config()
    })
    .unwrap();

    for (n, chunks) in [(10_000, 0), (10_000, 129), (9_999, 4)] {
        let err = orchestrator.submit(n, chunks).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }), "{err}");
    }
    assert!(orchestrator.shared.registry.is_empty());
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn unknown_job_is_not_found() {
    let orchestrator = Orchestrator::new(test_config()).unwrap();
    let job_id = JobId::new();

    assert_eq!(orchestrator.status(&job_id).unwrap_err(), Error::not_found(&job_id));
    let err = orchestrator
        .deliver(ChunkOutcome::Completed {
            job_id,
            index: 0,
            prime_count: 1,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));
    orchestrator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn redelivery_after_success_is_ignored() {
    let orchestrator = Orchestrator::new(test_config()).unwrap();
    let job_id = orchestrator.submit(100, 4).await.unwrap();
    let before = wait_terminal(&orchestrator, &job_id).await;

    orchestrator
        .deliver(ChunkOutcome::Completed {
            job_id,
            index: 0,
            prime_count: 1_000,
        })
        .await
        .unwrap();
    orchestrator
        .deliver(ChunkOutcome::Failed {
            job_id,
            index: 1,
            cause: "late failure".to_string(),
        })
        .await
        .unwrap();

    assert_eq!(orchestrator.status(&job_id).unwrap(), before);
    orchestrator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failing_chunk_fails_the_job() {
    let counter = Arc::new(|start: u64, end: u64| -> u64 {
        if start == 1 {
            panic!("worker crashed");
        }
        SegmentedSieve.count(start, end)
    });
    let tracker = Arc::new(MemoryProgressTracker::new(Duration::from_secs(60)));
    let orchestrator = Orchestrator::with_parts(test_config(), counter, tracker).unwrap();

    let job_id = orchestrator.submit(100, 4).await.unwrap();
    let job = wait_terminal(&orchestrator, &job_id).await;

    assert_eq!(job.state, JobState::Failure);
    assert!(job.result.is_none());
    let error = job.error.unwrap();
    assert!(error.contains("Chunk 0"), "{error}");
    assert!(error.contains("worker crashed"), "{error}");

    // Stragglers never flip the outcome.
    sleep(Duration::from_millis(50)).await;
    assert_eq!(orchestrator.status(&job_id).unwrap().state, JobState::Failure);
    orchestrator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn chunk_retry_recovers_from_transient_panic() {
    let calls = Arc::new(AtomicU32::new(0));
    let seen = Arc::clone(&calls);
    let counter = Arc::new(move |start: u64, end: u64| -> u64 {
        if start == 1 && seen.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("transient");
        }
        SegmentedSieve.count(start, end)
    });
    let tracker = Arc::new(MemoryProgressTracker::new(Duration::from_secs(60)));
    let config = OrchestratorConfig {
        chunk_retries: 2,
        ..test_config()
    };
    let orchestrator = Orchestrator::with_parts(config, counter, tracker).unwrap();

    let job_id = orchestrator.submit(100, 4).await.unwrap();
    let job = wait_terminal(&orchestrator, &job_id).await;
    assert_eq!(job.state, JobState::Success);
    assert_eq!(job.result.unwrap().prime_count, 25);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    orchestrator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reports_progress_while_running() {
    let release = Arc::new(AtomicBool::new(false));
    let gate = Arc::clone(&release);
    let counter = Arc::new(move |start: u64, end: u64| -> u64 {
        if start == 1 {
            while !gate.load(Ordering::Acquire) {
                std::thread::sleep(StdDuration::from_millis(1));
            }
        }
        SegmentedSieve.count(start, end)
    });
    let tracker = Arc::new(MemoryProgressTracker::new(Duration::from_secs(60)));
    let orchestrator = Orchestrator::with_parts(test_config(), counter, tracker).unwrap();

    let job_id = orchestrator.submit(100, 4).await.unwrap();
    let job = timeout(Duration::from_secs(10), async {
        loop {
            let job = orchestrator.status(&job_id).unwrap();
            if job.state == JobState::Progress && job.progress.completed == 3 {
                return job;
            }
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(job.state, JobState::Progress);
    assert_eq!(job.progress.total, 4);
    assert!(job.result.is_none());

    release.store(true, Ordering::Release);
    let job = wait_terminal(&orchestrator, &job_id).await;
    assert_eq!(job.result.unwrap().prime_count, 25);
    orchestrator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn job_fails_after_deadline() {
    let counter = Arc::new(|start: u64, end: u64| -> u64 {
        std::thread::sleep(StdDuration::from_millis(300));
        SegmentedSieve.count(start, end)
    });
    let tracker = Arc::new(MemoryProgressTracker::new(Duration::from_secs(60)));
    let config = OrchestratorConfig {
        job_timeout: Duration::from_millis(50),
        ..test_config()
    };
    let orchestrator = Orchestrator::with_parts(config, counter, tracker).unwrap();

    let job_id = orchestrator.submit(100, 2).await.unwrap();
    let job = wait_terminal(&orchestrator, &job_id).await;
    assert_eq!(job.state, JobState::Failure);
    assert!(job.error.unwrap().contains("deadline"));
    orchestrator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn tracker_outages_are_retried() {
    let tracker = Arc::new(FlakyTracker::new(2, false));
    let config = OrchestratorConfig {
        tracker_retries: 3,
        ..test_config()
    };
    let orchestrator = Orchestrator::with_parts(config, Arc::new(SegmentedSieve), tracker).unwrap();

    let job_id = orchestrator.submit(100, 4).await.unwrap();
    let job = wait_terminal(&orchestrator, &job_id).await;
    assert_eq!(job.state, JobState::Success);
    assert_eq!(job.result.unwrap().prime_count, 25);
    orchestrator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn exhausted_tracker_retries_fail_the_job() {
    let tracker = Arc::new(FlakyTracker::new(10, false));
    let config = OrchestratorConfig {
        tracker_retries: 1,
        ..test_config()
    };
    let orchestrator = Orchestrator::with_parts(config, Arc::new(SegmentedSieve), tracker).unwrap();

    let job_id = orchestrator.submit(100, 4).await.unwrap();
    let job = wait_terminal(&orchestrator, &job_id).await;
    assert_eq!(job.state, JobState::Failure);
    assert!(job.error.unwrap().contains("Progress tracker unavailable"));
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn unavailable_tracker_rejects_submission() {
    let tracker = Arc::new(FlakyTracker::new(0, true));
    let config = OrchestratorConfig {
        tracker_retries: 2,
        ..test_config()
    };
    let orchestrator = Orchestrator::with_parts(config, Arc::new(SegmentedSieve), tracker).unwrap();

    let err = orchestrator.submit(100, 4).await.unwrap_err();
    assert!(err.is_transient());
    assert!(orchestrator.shared.registry.is_empty());
    orchestrator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_jobs_do_not_interfere() {
    let orchestrator = Orchestrator::new(test_config()).unwrap();

    let submissions = (1..=8).map(|i| {
        let orchestrator = orchestrator.clone();
        async move { orchestrator.submit(10_000, i * 8).await.unwrap() }
    });
    let job_ids = futures::future::join_all(submissions).await;

    for job_id in &job_ids {
        let job = wait_terminal(&orchestrator, job_id).await;
        assert_eq!(job.state, JobState::Success);
        assert_eq!(job.result.unwrap().prime_count, 1_229);
        assert_eq!(job.progress.completed, job.chunk_count as u64);
    }
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn aggregation_is_idempotent_per_chunk() {
    let orchestrator = Orchestrator::new(test_config()).unwrap();
    let shared = Arc::clone(&orchestrator.shared);
    let job_id = JobId::new();
    shared.registry.insert(Job::new(job_id, 30, 3));
    shared.tracker.init(job_id, 3).unwrap();

    let mut aggregator = JobAggregator::new(Arc::clone(&shared), job_id, 3, Instant::now());
    aggregator.on_chunk_complete(0, 4).await;
    aggregator.on_chunk_complete(0, 4).await;
    assert_eq!(shared.tracker.read(job_id).unwrap(), Some(Progress { completed: 1, total: 3 }));
    assert_eq!(shared.registry.get(&job_id).unwrap().state, JobState::Progress);

    aggregator.on_chunk_complete(2, 2).await;
    aggregator.on_chunk_complete(1, 4).await;
    assert!(aggregator.is_terminal());

    let job = shared.registry.get(&job_id).unwrap();
    assert_eq!(job.state, JobState::Success);
    assert_eq!(job.result.unwrap().prime_count, 10);

    // A failure arriving after the final chunk changes nothing.
    aggregator.on_chunk_failure(1, "late".to_string()).await;
    assert_eq!(shared.registry.get(&job_id).unwrap().state, JobState::Success);
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn failure_for_unknown_chunk_is_ignored() {
    let orchestrator = Orchestrator::new(test_config()).unwrap();
    let shared = Arc::clone(&orchestrator.shared);
    let job_id = JobId::new();
    shared.registry.insert(Job::new(job_id, 30, 3));
    shared.tracker.init(job_id, 3).unwrap();

    let mut aggregator = JobAggregator::new(Arc::clone(&shared), job_id, 3, Instant::now());
    aggregator.on_chunk_failure(9999, "stray".to_string()).await;
    assert!(!aggregator.is_terminal());
    assert_eq!(shared.registry.get(&job_id).unwrap().state, JobState::Pending);

    aggregator.on_chunk_complete(0, 4).await;
    aggregator.on_chunk_complete(1, 4).await;
    aggregator.on_chunk_complete(2, 2).await;
    let job = shared.registry.get(&job_id).unwrap();
    assert_eq!(job.state, JobState::Success);
    assert_eq!(job.result.unwrap().prime_count, 10);
    orchestrator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unrepresentable_deadline_runs_without_timeout() {
    // Built by hand since `validate` refuses timeouts this large.
    let config = OrchestratorConfig {
        job_timeout: Duration::MAX,
        ..test_config()
    };
    let shared = Arc::new(Shared {
        registry: JobRegistry::new(config.retention),
        tracker: Arc::new(MemoryProgressTracker::new(config.retention)),
        pool: WorkerPool::spawn(
            config.num_workers,
            config.worker_queue_depth,
            Arc::new(SegmentedSieve),
            RetryPolicy {
                retries: 0,
                delay: config.retry_delay,
            },
        ),
        routes: Mutex::new(HashMap::new()),
        accepting: AtomicBool::new(true),
        sweeper_token: CancellationToken::new(),
        config,
    });

    let job_id = JobId::new();
    shared.registry.insert(Job::new(job_id, 100, 4));
    shared.tracker.init(job_id, 4).unwrap();
    let (outcome_tx, outcome_rx) = mpsc::channel(4);
    let run = aggregator::run_job(
        Arc::clone(&shared),
        job_id,
        partition(100, 4).unwrap(),
        Instant::now(),
        outcome_tx,
        outcome_rx,
    );
    timeout(Duration::from_secs(10), run)
        .await
        .expect("job did not finish in time");

    let job = shared.registry.get(&job_id).unwrap();
    assert_eq!(job.state, JobState::Success, "{:?}", job.error);
    assert_eq!(job.result.unwrap().prime_count, 25);
    shared.pool.shutdown(Duration::from_millis(200)).await;
}

#[tokio::test]
async fn shutdown_rejects_new_submissions() {
    let orchestrator = Orchestrator::new(test_config()).unwrap();
    orchestrator.shutdown().await;

    assert!(!orchestrator.is_accepting());
    assert_eq!(orchestrator.submit(100, 4).await.unwrap_err(), Error::ServiceShutdown);
}
