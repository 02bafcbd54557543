//! carbon_ledger Library
//!
//! Carbon credit wallets with an append-only, hash-checked ledger, atomic
//! transfers, and batch processors for credit expiry and auto-transfers.
//! Re-exports modules for the binaries and integration tests.

pub mod api;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod jobs;
pub mod store;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub use api::build_router;
pub use config::{Config, LedgerConfig, LogFormat};
pub use domain::{Amount, AmountError, Balance, Credits, DomainError, OperationContext};
pub use error::{AppError, AppResult};
pub use handlers::Ledger;
pub use store::{LedgerStore, MemoryStore, PgStore, SharedStore};

/// Initialize tracing/logging
pub fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "carbon_ledger=debug,tower_http=debug".into());

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}
