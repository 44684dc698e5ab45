//! HTTP handlers over the [`Orchestrator`].
//!
//! Submissions return `202 Accepted` as soon as the job is registered;
//! clients poll `GET /api/jobs/{job_id}` for progress and the result.

use super::error::ApiError;
use crate::server::telemetry::{
    increment_jobs_submitted, increment_submissions_rejected, record_submit_duration,
};
use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};
use primecount::{Job, JobId, JobState, Orchestrator, Progress};
use serde::{Deserialize, Serialize};
use std::time::Instant;

#[derive(Debug, Deserialize)]
#[cfg_attr(test, derive(Serialize))]
pub struct CountPrimesRequest {
    pub n: u64,
    pub chunks: usize,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub struct CountPrimesResponse {
    pub job_id: String,
    pub status: JobState,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub struct JobResultBody {
    pub prime_count: u64,
    pub duration_sec: f64,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub struct JobStatusResponse {
    pub job_id: String,
    pub state: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResultBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<Job> for JobStatusResponse {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.id.to_string(),
            state: job.state,
            progress: Some(job.progress),
            result: job.result.map(|r| JobResultBody {
                prime_count: r.prime_count,
                duration_sec: r.duration_seconds,
            }),
            error: job.error,
        }
    }
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub struct HealthResponse {
    pub status: String,
    pub workers: usize,
    pub active_jobs: usize,
}

pub async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "message": "Prime Counter API",
        "endpoints": {
            "health": "GET /health",
            "submit_job": "POST /api/count-primes",
            "check_status": "GET /api/jobs/{job_id}",
        },
    }))
}

pub async fn health(State(orchestrator): State<Orchestrator>) -> Json<HealthResponse> {
    let status = if orchestrator.is_accepting() {
        "healthy"
    } else {
        "shutting_down"
    };

    Json(HealthResponse {
        status: status.to_string(),
        workers: orchestrator.num_workers(),
        active_jobs: orchestrator.active_jobs(),
    })
}

pub async fn count_primes(
    State(orchestrator): State<Orchestrator>,
    payload: Result<Json<CountPrimesRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CountPrimesResponse>), ApiError> {
    let start = Instant::now();

    let Json(request) = payload.map_err(|rejection| {
        increment_submissions_rejected("malformed");
        ApiError::Validation(rejection.body_text())
    })?;

    let job_id = orchestrator
        .submit(request.n, request.chunks)
        .await
        .inspect_err(|e| {
            increment_submissions_rejected(match e {
                primecount::Error::InvalidArgument { .. } => "invalid",
                primecount::Error::ServiceShutdown => "shutdown",
                _ => "internal",
            });
        })?;

    increment_jobs_submitted();
    record_submit_duration(start.elapsed().as_secs_f64() * 1000.0);

    Ok((
        StatusCode::ACCEPTED,
        Json(CountPrimesResponse {
            job_id: job_id.to_string(),
            status: JobState::Pending,
        }),
    ))
}

pub async fn job_status(
    State(orchestrator): State<Orchestrator>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let id: JobId = job_id
        .parse()
        .map_err(|_| ApiError::JobNotFound(job_id.clone()))?;

    let job = orchestrator.status(&id)?;
    Ok(Json(job.into()))
}
