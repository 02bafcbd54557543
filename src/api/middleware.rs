//! API Middleware
//!
//! Request context extraction and request logging.

use axum::{
    body::Body,
    http::{HeaderMap, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::net::IpAddr;
use uuid::Uuid;

use crate::domain::{Initiator, OperationContext};

pub const REQUEST_OWNER_HEADER: &str = "X-Request-Owner-Id";
pub const CORRELATION_HEADER: &str = "X-Correlation-Id";

// =========================================================================
// Request Context Middleware
// =========================================================================

/// Build the `OperationContext` for the request from its headers.
///
/// `X-Correlation-Id` is reused when it is a valid UUID and generated
/// otherwise; it is echoed on the response. `X-Request-Owner-Id`, when
/// present, is the owner the caller acts for.
pub async fn context_middleware(mut request: Request<Body>, next: Next) -> Result<Response, Response> {
    let headers = request.headers();

    let correlation_id = match headers.get(CORRELATION_HEADER).map(|v| v.to_str()) {
        None => Uuid::new_v4(),
        Some(Ok(raw)) => match Uuid::parse_str(raw.trim()) {
            Ok(id) => id,
            Err(_) => return Err(bad_header(CORRELATION_HEADER, "invalid_correlation_id")),
        },
        Some(Err(_)) => return Err(bad_header(CORRELATION_HEADER, "invalid_correlation_id")),
    };

    let mut context = OperationContext::new()
        .with_initiator(Initiator::Api)
        .with_correlation_id(correlation_id);

    match headers.get(REQUEST_OWNER_HEADER).map(|v| v.to_str()) {
        None => {}
        Some(Ok(owner)) if !owner.trim().is_empty() => {
            context = context.with_request_owner(owner.trim());
        }
        Some(_) => return Err(bad_header(REQUEST_OWNER_HEADER, "invalid_owner_id")),
    }

    if let Some(ip) = client_ip(headers) {
        context = context.with_client_ip(ip);
    }

    request.extensions_mut().insert(context);

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&correlation_id.to_string()) {
        response.headers_mut().insert(CORRELATION_HEADER, value);
    }
    Ok(response)
}

/// First address in X-Forwarded-For
fn client_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|ip| ip.trim().parse().ok())
}

fn bad_header(header: &str, error_code: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({
            "error": format!("Invalid {} header", header),
            "error_code": error_code
        })),
    )
        .into_response()
}

// =========================================================================
// mask_headers_for_logging
// =========================================================================

/// Headers that should be masked in logs
const SENSITIVE_HEADERS: &[&str] = &["x-api-key", "authorization", "cookie", "set-cookie"];

/// Mask sensitive headers for logging
pub fn mask_headers_for_logging(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let name_lower = name.as_str().to_lowercase();
            let masked_value = if SENSITIVE_HEADERS.contains(&name_lower.as_str()) {
                "[REDACTED]".to_string()
            } else {
                value.to_str().unwrap_or("[invalid utf8]").to_string()
            };
            (name.to_string(), masked_value)
        })
        .collect()
}

// =========================================================================
// Request Logging Middleware
// =========================================================================

/// Request logging middleware; runs inside `context_middleware`
pub async fn logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let version = request.version();

    let headers = mask_headers_for_logging(request.headers());

    let correlation_id = request
        .extensions()
        .get::<OperationContext>()
        .and_then(|ctx| ctx.correlation_id);

    let start = std::time::Instant::now();

    tracing::info!(
        method = %method,
        uri = %uri,
        version = ?version,
        correlation_id = ?correlation_id,
        headers = ?headers,
        "Incoming request"
    );

    let response = next.run(request).await;

    let duration = start.elapsed();
    let status = response.status();

    tracing::info!(
        method = %method,
        uri = %uri,
        status = %status,
        duration_ms = %duration.as_millis(),
        correlation_id = ?correlation_id,
        "Request completed"
    );

    response
}
