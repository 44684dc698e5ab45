//! # Telemetry Features
//!
//! Structured logs are always emitted through `tracing_subscriber::fmt`.
//! OpenTelemetry metrics are optional.
//!
//! ## Feature matrix
//!
//! - `metrics`: Enables OpenTelemetry metrics (counters, histograms, gauges).
//! - `stdout`: Enables the stdout exporter for those metrics.
//!
//! ## Metrics
//!
//! - `jobs_submitted`: accepted submissions.
//! - `submissions_rejected`: submissions refused by validation or shutdown.
//! - `submit_duration`: latency of the submit handler, in milliseconds.
//! - `active_jobs`: jobs that have not reached a terminal state.
//!
//! ## Example usage
//!
//! ```bash
//! cargo run -p primecount-server --features metrics,stdout
//! ```

#[cfg(all(feature = "stdout", not(feature = "metrics")))]
compile_error!("The 'stdout' feature requires 'metrics' to be enabled.");

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "metrics")]
use opentelemetry::{
    InstrumentationScope, KeyValue,
    metrics::{Counter, Histogram, Meter, ObservableGauge},
};
#[cfg(feature = "metrics")]
use opentelemetry_sdk::{Resource, metrics as sdkmetrics};
#[cfg(feature = "metrics")]
use opentelemetry_semantic_conventions as semvcns;
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

pub struct TelemetryProviders {
    #[cfg(feature = "metrics")]
    pub meter_provider: sdkmetrics::SdkMeterProvider,
}

impl TelemetryProviders {
    /// Flushes and stops every exporter.
    pub fn shutdown(self) {
        #[cfg(feature = "metrics")]
        {
            if let Err(err) = self.meter_provider.force_flush() {
                eprintln!("Error flushing metrics: {err:#?}");
            }
            if let Err(err) = self.meter_provider.shutdown() {
                eprintln!("Error shutting down meter: {err:#?}");
            }
        }
    }
}

pub fn init_telemetry() -> anyhow::Result<TelemetryProviders> {
    #[cfg(feature = "metrics")]
    let meter_provider = {
        let provider = init_metrics();
        opentelemetry::global::set_meter_provider(provider.clone());
        let scope = InstrumentationScope::builder("primecount")
            .with_version(env!("CARGO_PKG_VERSION"))
            .with_schema_url(semvcns::SCHEMA_URL)
            .build();
        init_metric_handles(opentelemetry::global::meter_with_scope(scope));
        provider
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                .with_file(true)
                .pretty(),
        )
        .try_init()?;

    Ok(TelemetryProviders {
        #[cfg(feature = "metrics")]
        meter_provider,
    })
}

#[cfg(feature = "metrics")]
fn resource() -> Resource {
    Resource::builder()
        .with_service_name("primecount")
        .with_schema_url(
            [KeyValue::new(
                semvcns::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            )],
            semvcns::SCHEMA_URL,
        )
        .build()
}

#[cfg(feature = "metrics")]
fn init_metrics() -> sdkmetrics::SdkMeterProvider {
    let builder = sdkmetrics::SdkMeterProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = {
        use opentelemetry_stdout::MetricExporter;
        let exporter = MetricExporter::default();
        let reader = sdkmetrics::PeriodicReader::builder(exporter)
            .with_interval(std::time::Duration::from_secs(5))
            .build();

        builder.with_reader(reader)
    };

    builder.build()
}

// Metric handles - only compiled when metrics feature is enabled
#[cfg(feature = "metrics")]
static METER: OnceLock<Meter> = OnceLock::new();
#[cfg(feature = "metrics")]
static JOBS_SUBMITTED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static SUBMISSIONS_REJECTED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static SUBMIT_DURATION_MS: OnceLock<Histogram<f64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static ACTIVE_JOBS: OnceLock<ObservableGauge<u64>> = OnceLock::new();

#[cfg(feature = "metrics")]
fn init_metric_handles(meter: Meter) {
    let _ = JOBS_SUBMITTED.set(
        meter
            .u64_counter("jobs_submitted")
            .with_description("Accepted prime counting jobs")
            .build(),
    );

    let _ = SUBMISSIONS_REJECTED.set(
        meter
            .u64_counter("submissions_rejected")
            .with_description("Submissions refused by validation or shutdown")
            .build(),
    );

    let _ = SUBMIT_DURATION_MS.set(
        meter
            .f64_histogram("submit_duration")
            .with_unit("ms")
            .with_description("Latency of the submit handler")
            .build(),
    );

    let _ = METER.set(meter);
}

/// Reports the orchestrator's in-flight job count on every collection.
#[cfg(feature = "metrics")]
pub fn observe_active_jobs(orchestrator: primecount::Orchestrator) {
    let Some(meter) = METER.get() else { return };
    let _ = ACTIVE_JOBS.set(
        meter
            .u64_observable_gauge("active_jobs")
            .with_description("Jobs that have not reached a terminal state")
            .with_callback(move |observer| observer.observe(orchestrator.active_jobs() as u64, &[]))
            .build(),
    );
}

#[cfg(not(feature = "metrics"))]
pub fn observe_active_jobs(_orchestrator: primecount::Orchestrator) {}

// Convenience functions that compile to no-ops when metrics are disabled
#[cfg(feature = "metrics")]
pub fn increment_jobs_submitted() {
    if let Some(counter) = JOBS_SUBMITTED.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_jobs_submitted() {}

#[cfg(feature = "metrics")]
pub fn increment_submissions_rejected(reason: &'static str) {
    if let Some(counter) = SUBMISSIONS_REJECTED.get() {
        counter.add(1, &[KeyValue::new("reason", reason)]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_submissions_rejected(_reason: &'static str) {}

#[cfg(feature = "metrics")]
pub fn record_submit_duration(duration_ms: f64) {
    if let Some(histogram) = SUBMIT_DURATION_MS.get() {
        histogram.record(duration_ms, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn record_submit_duration(_duration_ms: f64) {}
