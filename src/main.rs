//! carbon_ledger - Carbon Credit Wallet & Ledger API
//!
//! HTTP service over the wallet store, transfer engine and verification
//! service. Optionally runs the expiry and auto-transfer processors
//! in-process (`RUN_SCHEDULER=true`); otherwise `ledger_jobs` is expected
//! to be run by an external scheduler.

use std::net::SocketAddr;

use carbon_ledger::jobs::{JobScheduler, JobSchedulerConfig};
use carbon_ledger::{build_router, init_tracing, store, Config, Ledger};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(config.log_format);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    tracing::info!(
        environment = %config.environment,
        backend = ?config.storage_backend,
        "Starting carbon_ledger server"
    );

    let store = store::connect(&config).await?;
    let ledger = Ledger::new(store, config.ledger);

    let scheduler = if config.run_scheduler {
        let jobs = JobScheduler::with_config(ledger.clone(), JobSchedulerConfig::from_config(&config));
        Some(jobs.start())
    } else {
        None
    };

    tracing::info!("Listening on http://{}", addr);

    // Build router and start server
    let app = build_router(ledger);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Cleanup
    tracing::info!("Server shutting down...");
    if let Some(handle) = scheduler {
        handle.abort();
        tracing::info!("Job scheduler stopped");
    }
    tracing::info!("Goodbye!");

    Ok(())
}

/// Shutdown signal handler for graceful shutdown
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}
