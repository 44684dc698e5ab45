use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Structured JSON error body.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}

/// API errors, mapped to HTTP status codes.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Malformed body or arguments outside the accepted range.
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error(transparent)]
    Core(#[from] primecount::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Self::Validation(reason) => {
                tracing::warn!(%reason, "Rejected request");
                (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    ErrorResponse::with_details("Invalid request", reason),
                )
            }
            Self::JobNotFound(job_id) => {
                tracing::debug!(%job_id, "Job not found");
                (
                    StatusCode::NOT_FOUND,
                    ErrorResponse::with_details("Job not found", format!("Job ID: {job_id}")),
                )
            }
            Self::Core(err) => match err {
                primecount::Error::InvalidArgument { reason } => {
                    return Self::Validation(reason).into_response();
                }
                primecount::Error::NotFound { job_id } => {
                    return Self::JobNotFound(job_id).into_response();
                }
                primecount::Error::ServiceShutdown => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    ErrorResponse::with_details(
                        "Service unavailable",
                        primecount::Error::ServiceShutdown.to_string(),
                    ),
                ),
                other => {
                    tracing::error!(error = %other, "Failed to create job");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        ErrorResponse::with_details("Failed to create job", other.to_string()),
                    )
                }
            },
        };

        (status, Json(body)).into_response()
    }
}
