use anyhow::{Context, bail};
use clap::Parser;
use primecount::{MAX_CHUNKS, OrchestratorConfig};
use std::{net::SocketAddr, time::Duration};

/// Runtime configuration for the `primecount-server` binary.
///
/// Every value is parsed from CLI arguments or environment variables (a
/// `.env` file is honored), with defaults suitable for production.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "primecount-server",
    version,
    about = "An HTTP service for chunked, concurrent prime counting jobs"
)]
pub struct CliArgs {
    /// Address to listen on.
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:8000"))]
    pub server_addr: String,

    /// Number of worker tasks counting chunks concurrently. Defaults to the
    /// number of logical CPUs.
    ///
    /// Environment variable: `NUM_WORKERS`
    #[arg(long, env = "NUM_WORKERS")]
    pub num_workers: Option<usize>,

    /// Capacity of each worker's chunk queue.
    ///
    /// Environment variable: `WORKER_QUEUE_DEPTH`
    #[arg(long, env = "WORKER_QUEUE_DEPTH", default_value_t = 32)]
    pub worker_queue_depth: usize,

    /// Smallest `n` a client may submit.
    ///
    /// Environment variable: `MIN_BOUND`
    #[arg(long, env = "MIN_BOUND", default_value_t = 10_000)]
    pub min_bound: u64,

    /// Largest chunk count a client may submit (at most 128).
    ///
    /// Environment variable: `MAX_CHUNKS`
    #[arg(long, env = "MAX_CHUNKS", default_value_t = MAX_CHUNKS)]
    pub max_chunks: usize,

    /// Wall-clock deadline of a single job, in seconds.
    ///
    /// Environment variable: `JOB_TIMEOUT_SECS`
    #[arg(long, env = "JOB_TIMEOUT_SECS", default_value_t = 3600)]
    pub job_timeout_secs: u64,

    /// How long finished jobs and progress counters are kept, in seconds.
    ///
    /// Environment variable: `RETENTION_SECS`
    #[arg(long, env = "RETENTION_SECS", default_value_t = 3600)]
    pub retention_secs: u64,

    /// Interval between retention sweeps, in seconds.
    ///
    /// Environment variable: `SWEEP_INTERVAL_SECS`
    #[arg(long, env = "SWEEP_INTERVAL_SECS", default_value_t = 60)]
    pub sweep_interval_secs: u64,

    /// Extra attempts for a chunk whose execution failed.
    ///
    /// Environment variable: `CHUNK_RETRIES`
    #[arg(long, env = "CHUNK_RETRIES", default_value_t = 3)]
    pub chunk_retries: u32,

    /// Extra attempts for a progress store call that failed.
    ///
    /// Environment variable: `TRACKER_RETRIES`
    #[arg(long, env = "TRACKER_RETRIES", default_value_t = 3)]
    pub tracker_retries: u32,

    /// Pause between retries, in milliseconds.
    ///
    /// Environment variable: `RETRY_DELAY_MS`
    #[arg(long, env = "RETRY_DELAY_MS", default_value_t = 1000)]
    pub retry_delay_ms: u64,

    /// How long shutdown waits for in-flight jobs, in seconds.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT_SECS`
    #[arg(long, env = "SHUTDOWN_TIMEOUT_SECS", default_value_t = 3)]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: SocketAddr,
    pub orchestrator: OrchestratorConfig,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let server_addr = args
            .server_addr
            .parse()
            .with_context(|| format!("SERVER_ADDR ({}) is not a socket address", args.server_addr))?;

        if args.max_chunks == 0 || args.max_chunks > MAX_CHUNKS {
            bail!(
                "MAX_CHUNKS ({}) must be between 1 and {MAX_CHUNKS}",
                args.max_chunks
            );
        }

        let defaults = OrchestratorConfig::default();
        let orchestrator = OrchestratorConfig {
            num_workers: args.num_workers.unwrap_or(defaults.num_workers),
            worker_queue_depth: args.worker_queue_depth,
            min_bound: args.min_bound,
            max_chunks: args.max_chunks,
            job_timeout: Duration::from_secs(args.job_timeout_secs),
            retention: Duration::from_secs(args.retention_secs),
            sweep_interval: Duration::from_secs(args.sweep_interval_secs),
            chunk_retries: args.chunk_retries,
            retry_delay: Duration::from_millis(args.retry_delay_ms),
            tracker_retries: args.tracker_retries,
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout_secs),
        };
        orchestrator
            .validate()
            .context("invalid orchestrator configuration")?;

        Ok(Self {
            server_addr,
            orchestrator,
        })
    }
}
