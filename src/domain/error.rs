//! Domain Error Types
//!
//! Pure domain errors that don't depend on infrastructure.

use thiserror::Error;
use uuid::Uuid;

use super::amount::Credits;
use super::transfer::TransferStatus;
use super::wallet::WalletStatus;

/// Domain-specific errors
///
/// These errors represent business rule violations and domain invariant failures.
/// They are independent of the web/infrastructure layer.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    /// Invalid amount (zero, negative, or exceeds limit)
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Available balance does not cover the operation
    #[error("Insufficient available balance: required {required}, available {available}")]
    InsufficientAvailableBalance { required: Credits, available: Credits },

    /// Frozen balance does not cover the unfreeze/settle
    #[error("Insufficient frozen balance: required {required}, frozen {frozen}")]
    InsufficientFrozenBalance { required: Credits, frozen: Credits },

    /// Owner reference is empty or too long
    #[error("Invalid owner id: {0}")]
    InvalidOwnerId(String),

    /// No wallet for the owner/kind pair (or id)
    #[error("Wallet not found: {0}")]
    WalletNotFound(String),

    /// Wallet status is not active
    #[error("Wallet {wallet_id} is not active (status: {status})")]
    WalletInactive { wallet_id: Uuid, status: WalletStatus },

    /// Transfer has already left the pending state
    #[error("Transfer {transfer_id} is not pending (status: {status})")]
    TransferNotPending {
        transfer_id: Uuid,
        status: TransferStatus,
    },

    /// Rule engine veto
    #[error("Transfer rejected: {0}")]
    ValidationRejected(String),

    /// Transfer to same wallet
    #[error("Cannot transfer to the same wallet")]
    SameWallet,

    /// Transfer not found
    #[error("Transfer not found: {0}")]
    TransferNotFound(Uuid),

    /// Lifecycle transition that is not allowed
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidStatusTransition { from: String, to: String },

    /// Result would exceed the representable range
    #[error("Balance overflow")]
    BalanceOverflow,
}

impl DomainError {
    /// Create an insufficient available balance error
    pub fn insufficient_available(required: Credits, available: Credits) -> Self {
        Self::InsufficientAvailableBalance { required, available }
    }

    /// Create an insufficient frozen balance error
    pub fn insufficient_frozen(required: Credits, frozen: Credits) -> Self {
        Self::InsufficientFrozenBalance { required, frozen }
    }

    pub fn invalid_transition(from: impl ToString, to: impl ToString) -> Self {
        Self::InvalidStatusTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Check if this is a client error (user's fault)
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::BalanceOverflow)
    }

    /// Check if this is a not-found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::WalletNotFound(_) | Self::TransferNotFound(_))
    }

    /// Check if this is a conflict with current state (re-reading may help)
    pub fn is_conflict_error(&self) -> bool {
        matches!(
            self,
            Self::TransferNotPending { .. } | Self::InvalidStatusTransition { .. }
        )
    }

    /// Stable machine-readable code, also stored on failed transfers
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidAmount(_) => "invalid_amount",
            Self::InsufficientAvailableBalance { .. } => "insufficient_available_balance",
            Self::InsufficientFrozenBalance { .. } => "insufficient_frozen_balance",
            Self::InvalidOwnerId(_) => "invalid_owner_id",
            Self::WalletNotFound(_) => "wallet_not_found",
            Self::WalletInactive { .. } => "wallet_inactive",
            Self::TransferNotPending { .. } => "transfer_not_pending",
            Self::ValidationRejected(_) => "validation_rejected",
            Self::SameWallet => "same_wallet",
            Self::TransferNotFound(_) => "transfer_not_found",
            Self::InvalidStatusTransition { .. } => "invalid_status_transition",
            Self::BalanceOverflow => "balance_overflow",
        }
    }
}

impl From<super::amount::AmountError> for DomainError {
    fn from(err: super::amount::AmountError) -> Self {
        match err {
            super::amount::AmountError::Overflow => Self::BalanceOverflow,
            other => Self::InvalidAmount(other.to_string()),
        }
    }
}
