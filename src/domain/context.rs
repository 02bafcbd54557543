//! Operation Context
//!
//! Contains metadata about the current operation for tracing.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use uuid::Uuid;

/// Who started an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Initiator {
    /// HTTP API caller
    Api,
    /// Batch processors (expiry, auto-transfer)
    Scheduler,
    /// Library caller (trip engine, marketplace, tests)
    Internal,
}

/// Context for an operation, carried into every handler for log correlation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationContext {
    pub initiator: Initiator,

    /// Owner id from X-Request-Owner-Id header
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_owner_id: Option<String>,

    /// Correlation ID for request tracing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,

    /// Client IP address
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<IpAddr>,
}

impl OperationContext {
    /// Create a new empty context
    pub fn new() -> Self {
        Self {
            initiator: Initiator::Internal,
            request_owner_id: None,
            correlation_id: None,
            client_ip: None,
        }
    }

    /// Context for a batch run, with a fresh correlation id
    pub fn scheduler() -> Self {
        Self::new()
            .with_initiator(Initiator::Scheduler)
            .with_correlation_id(Uuid::new_v4())
    }

    pub fn with_initiator(mut self, initiator: Initiator) -> Self {
        self.initiator = initiator;
        self
    }

    /// Create context with request owner ID
    pub fn with_request_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.request_owner_id = Some(owner_id.into());
        self
    }

    /// Create context with correlation ID
    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Create context with client IP
    pub fn with_client_ip(mut self, ip: IpAddr) -> Self {
        self.client_ip = Some(ip);
        self
    }

    /// Generate a new correlation ID if not present
    pub fn ensure_correlation_id(&mut self) -> Uuid {
        *self.correlation_id.get_or_insert_with(Uuid::new_v4)
    }
}

impl Default for OperationContext {
    fn default() -> Self {
        Self::new()
    }
}
