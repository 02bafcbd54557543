//! Common test utilities
#![allow(dead_code)]

use std::sync::Arc;

use axum::{body::Body, http::Request, Router};
use http_body_util::BodyExt;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use tower::util::ServiceExt;

use carbon_ledger::domain::Credits;
use carbon_ledger::{Ledger, LedgerConfig, MemoryStore, PgStore};

/// Ledger over a fresh in-memory store with default rules
pub fn memory_ledger() -> Ledger {
    Ledger::new(Arc::new(MemoryStore::new()), LedgerConfig::default())
}

pub fn memory_ledger_with(config: LedgerConfig) -> Ledger {
    Ledger::new(Arc::new(MemoryStore::new()), config)
}

pub fn credits(s: &str) -> Credits {
    s.parse().unwrap()
}

/// Setup test database - migrate and truncate ledger tables
pub async fn setup_test_db() -> PgStore {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set for tests");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    carbon_ledger::db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    sqlx::query(
        "TRUNCATE TABLE wallet_settings, credit_expiry, credit_transfers, wallet_transactions, carbon_wallets CASCADE",
    )
    .execute(&pool)
    .await
    .expect("Failed to clean up DB");

    PgStore::new(pool)
}

// =========================================================================
// HTTP helpers
// =========================================================================

pub fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

/// Send a request and return the status with the decoded JSON body
/// (`Value::Null` for an empty or non-JSON body)
pub async fn send(app: &Router, request: Request<Body>) -> (axum::http::StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}
