#![doc = include_str!("../README.md")]

mod server;

use clap::Parser;
use primecount::Orchestrator;
use server::config::{CliArgs, ServerConfig};
use server::service::router;
use server::telemetry::{init_telemetry, observe_active_jobs};
use tokio::net::TcpListener;
use tokio::signal;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry()?;

    let orchestrator = Orchestrator::new(config.orchestrator.clone())?;
    observe_active_jobs(orchestrator.clone());

    let listener = TcpListener::bind(config.server_addr).await?;
    log_startup_info(&config);

    axum::serve(listener, router(orchestrator.clone()))
        .with_graceful_shutdown(shutdown_signal(orchestrator))
        .await?;

    providers.shutdown();
    tracing::info!("Service shut down successfully");
    Ok(())
}

fn log_startup_info(config: &ServerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!(
            "Starting prime counting service on {} with full config: {:#?}",
            config.server_addr,
            config
        );
    } else {
        tracing::info!(
            "Starting prime counting service on {} with {} workers",
            config.server_addr,
            config.orchestrator.num_workers
        );
    }
}

async fn shutdown_signal(orchestrator: Orchestrator) {
    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }

    tracing::info!("Shutdown signal received, terminating gracefully...");

    // Drain in-flight jobs before the listener stops serving status polls.
    orchestrator.shutdown().await;
}
