//! HTTP service exposing the prime counting orchestrator.
//!
//! ## Structure
//!
//! - [`handler`] - request handlers and JSON bodies.
//! - [`error`] - mapping of core errors to HTTP responses.

pub mod error;
pub mod handler;

use axum::{
    Router,
    routing::{get, post},
};
use primecount::Orchestrator;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Builds the application router over a running orchestrator.
pub fn router(orchestrator: Orchestrator) -> Router {
    Router::new()
        .route("/", get(handler::root))
        .route("/health", get(handler::health))
        .route("/api/count-primes", post(handler::count_primes))
        .route("/api/jobs/{job_id}", get(handler::job_status))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(orchestrator)
}
