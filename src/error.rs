//! Error handling module
//!
//! Centralized error types and HTTP response conversion.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::domain::DomainError;
use crate::store::StoreError;

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Client errors (4xx)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    // Domain errors
    #[error(transparent)]
    Domain(#[from] DomainError),

    // Server errors (5xx)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Domain(e) => AppError::Domain(e),
            StoreError::Database(e) => AppError::Database(e),
            StoreError::NotFound(what) => AppError::NotFound(what),
            StoreError::Corrupt(msg) => AppError::Internal(format!("corrupt ledger row: {}", msg)),
        }
    }
}

impl AppError {
    /// The domain error behind this failure, if any
    pub fn as_domain(&self) -> Option<&DomainError> {
        match self {
            AppError::Domain(e) => Some(e),
            _ => None,
        }
    }

    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            AppError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::Domain(e) => (domain_status(e), e.code()),
            AppError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            AppError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
        }
    }
}

/// HTTP status for a domain error
pub fn domain_status(err: &DomainError) -> StatusCode {
    match err {
        DomainError::InvalidAmount(_) | DomainError::InvalidOwnerId(_) | DomainError::SameWallet => {
            StatusCode::BAD_REQUEST
        }
        DomainError::WalletNotFound(_) | DomainError::TransferNotFound(_) => StatusCode::NOT_FOUND,
        DomainError::TransferNotPending { .. } | DomainError::InvalidStatusTransition { .. } => {
            StatusCode::CONFLICT
        }
        DomainError::InsufficientAvailableBalance { .. }
        | DomainError::InsufficientFrozenBalance { .. }
        | DomainError::WalletInactive { .. }
        | DomainError::ValidationRejected(_)
        | DomainError::BalanceOverflow => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code) = self.status_and_code();

        let details = match &self {
            AppError::InvalidRequest(msg) | AppError::Forbidden(msg) | AppError::NotFound(msg) => {
                Some(msg.clone())
            }
            AppError::Domain(e) => Some(e.to_string()),

            // Server-side details stay in the log
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                None
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                None
            }
            AppError::Config(e) => {
                tracing::error!("Config error: {:?}", e);
                None
            }
        };

        let error = if status.is_server_error() {
            status
                .canonical_reason()
                .unwrap_or("Internal Server Error")
                .to_string()
        } else {
            self.to_string()
        };

        let body = ErrorResponse {
            error,
            error_code: error_code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Credits, TransferStatus, WalletStatus};
    use uuid::Uuid;

    fn status_of(err: AppError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_domain_error_status_mapping() {
        let cases = [
            (DomainError::InvalidAmount("0".into()), StatusCode::BAD_REQUEST),
            (DomainError::SameWallet, StatusCode::BAD_REQUEST),
            (DomainError::WalletNotFound("alice".into()), StatusCode::NOT_FOUND),
            (DomainError::TransferNotFound(Uuid::nil()), StatusCode::NOT_FOUND),
            (
                DomainError::TransferNotPending {
                    transfer_id: Uuid::nil(),
                    status: TransferStatus::Completed,
                },
                StatusCode::CONFLICT,
            ),
            (
                DomainError::insufficient_available(Credits::from_units(60_000), Credits::ZERO),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                DomainError::WalletInactive {
                    wallet_id: Uuid::nil(),
                    status: WalletStatus::Frozen,
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                DomainError::ValidationRejected("below minimum".into()),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(status_of(AppError::Domain(err.clone())), expected, "{:?}", err);
        }
    }

    #[test]
    fn test_store_error_conversion() {
        let err: AppError = StoreError::Domain(DomainError::SameWallet).into();
        assert!(matches!(err.as_domain(), Some(DomainError::SameWallet)));

        let err: AppError = StoreError::NotFound("expiry record".into()).into();
        assert_eq!(status_of(err), StatusCode::NOT_FOUND);

        let err: AppError = StoreError::Corrupt("bad status".into()).into();
        assert_eq!(status_of(err), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_client_errors() {
        assert_eq!(status_of(AppError::InvalidRequest("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status_of(AppError::Forbidden("x".into())), StatusCode::FORBIDDEN);
    }
}
