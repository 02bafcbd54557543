//! API module
//!
//! HTTP API endpoints and middleware.

pub mod middleware;
pub mod routes;

use axum::{middleware as axum_middleware, Router};
use tower_http::trace::TraceLayer;

use crate::handlers::Ledger;

pub use routes::create_router;

/// Build the application router
pub fn build_router(ledger: Ledger) -> Router {
    // Axum layers run in reverse order (last added = first executed):
    // context -> logging -> handler
    let api_routes = create_router()
        .layer(axum_middleware::from_fn(middleware::logging_middleware))
        .layer(axum_middleware::from_fn(middleware::context_middleware));

    Router::new()
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(ledger)
}
