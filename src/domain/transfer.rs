//! Transfer state machine
//!
//! ```text
//! pending ──► completed
//!    │
//!    ├──────► failed
//!    └──────► cancelled
//! ```
//!
//! Terminal states never change again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::amount::{Amount, Credits};
use super::error::DomainError;
use super::wallet::{OwnerId, Wallet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown transfer status '{}'", other)),
        }
    }
}

/// How the debit side is realized
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferMode {
    /// Debit and credit commit together in one unit
    #[default]
    Instant,
    /// Amount is frozen on creation and consumed on settle
    Escrow,
}

impl TransferMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Instant => "instant",
            Self::Escrow => "escrow",
        }
    }
}

impl FromStr for TransferMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "instant" => Ok(Self::Instant),
            "escrow" => Ok(Self::Escrow),
            other => Err(format!("unknown transfer mode '{}'", other)),
        }
    }
}

/// A movement of credits between two wallets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: Uuid,
    pub from_wallet_id: Uuid,
    pub to_wallet_id: Uuid,
    pub from_owner_id: OwnerId,
    pub to_owner_id: OwnerId,
    pub amount: Amount,
    pub mode: TransferMode,
    pub status: TransferStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// `DomainError::code()` of the error that failed the transfer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_code: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Transfer {
    /// New pending transfer between two distinct wallets
    pub fn initiate(
        from: &Wallet,
        to: &Wallet,
        amount: Amount,
        mode: TransferMode,
        message: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        if from.id == to.id {
            return Err(DomainError::SameWallet);
        }

        Ok(Self {
            id: Uuid::new_v4(),
            from_wallet_id: from.id,
            to_wallet_id: to.id,
            from_owner_id: from.owner_id.clone(),
            to_owner_id: to.owner_id.clone(),
            amount,
            mode,
            status: TransferStatus::Pending,
            message,
            failure_reason: None,
            failure_code: None,
            created_at: now,
            completed_at: None,
        })
    }

    pub fn ensure_pending(&self) -> Result<(), DomainError> {
        if self.status != TransferStatus::Pending {
            return Err(DomainError::TransferNotPending {
                transfer_id: self.id,
                status: self.status,
            });
        }
        Ok(())
    }

    pub fn complete(&mut self, at: DateTime<Utc>) -> Result<(), DomainError> {
        self.ensure_pending()?;
        self.status = TransferStatus::Completed;
        self.completed_at = Some(at);
        Ok(())
    }

    pub fn fail(&mut self, error: &DomainError) -> Result<(), DomainError> {
        self.ensure_pending()?;
        self.status = TransferStatus::Failed;
        self.failure_reason = Some(error.to_string());
        self.failure_code = Some(error.code().to_string());
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), DomainError> {
        self.ensure_pending()?;
        self.status = TransferStatus::Cancelled;
        Ok(())
    }

    /// Whether the amount is currently reserved on the source wallet
    pub fn holds_reservation(&self) -> bool {
        self.mode == TransferMode::Escrow && self.status == TransferStatus::Pending
    }

    /// Whether the transfer counts toward the sender's daily total.
    /// Pending transfers count because escrows hold their amount until settled.
    pub fn counts_toward_daily_limit(&self) -> bool {
        matches!(self.status, TransferStatus::Pending | TransferStatus::Completed)
    }
}

/// Reject `amount` when, added to what the sender already has in flight or
/// sent inside the window, it would pass `limit`.
pub fn check_daily_limit(limit: Credits, sent: Credits, amount: Amount) -> Result<(), DomainError> {
    match sent.checked_add(amount.credits()) {
        Some(total) if total <= limit => Ok(()),
        _ => Err(DomainError::ValidationRejected(format!(
            "Daily transfer limit of {} exceeded ({} already sent in the last 24 hours)",
            limit, sent
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::wallet::WalletKind;

    fn wallets() -> (Wallet, Wallet) {
        let now = Utc::now();
        (
            Wallet::open(OwnerId::new("a").unwrap(), WalletKind::Employee, now),
            Wallet::open(OwnerId::new("b").unwrap(), WalletKind::Employee, now),
        )
    }

    fn pending() -> Transfer {
        let (a, b) = wallets();
        Transfer::initiate(&a, &b, "5".parse().unwrap(), TransferMode::Instant, None, Utc::now()).unwrap()
    }

    #[test]
    fn test_initiate_is_pending() {
        let transfer = pending();
        assert_eq!(transfer.status, TransferStatus::Pending);
        assert!(transfer.completed_at.is_none());
        assert!(!transfer.holds_reservation());
    }

    #[test]
    fn test_same_wallet_rejected() {
        let (a, _) = wallets();
        let result = Transfer::initiate(&a, &a, "1".parse().unwrap(), TransferMode::Instant, None, Utc::now());
        assert_eq!(result.unwrap_err(), DomainError::SameWallet);
    }

    #[test]
    fn test_complete_sets_timestamp() {
        let mut transfer = pending();
        let at = Utc::now();
        transfer.complete(at).unwrap();

        assert_eq!(transfer.status, TransferStatus::Completed);
        assert_eq!(transfer.completed_at, Some(at));
    }

    #[test]
    fn test_fail_records_reason() {
        let mut transfer = pending();
        let err = DomainError::insufficient_available(
            crate::domain::Credits::from_units(50_000),
            crate::domain::Credits::from_units(30_000),
        );
        transfer.fail(&err).unwrap();

        assert_eq!(transfer.status, TransferStatus::Failed);
        assert!(transfer.failure_reason.as_deref().unwrap().contains("3.0000"));
        assert_eq!(transfer.failure_code.as_deref(), Some("insufficient_available_balance"));
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut transfer = pending();
        transfer.cancel().unwrap();

        let err = transfer.complete(Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            DomainError::TransferNotPending { status: TransferStatus::Cancelled, .. }
        ));
        assert!(transfer.fail(&DomainError::SameWallet).is_err());
        assert!(transfer.cancel().is_err());
    }

    #[test]
    fn test_escrow_holds_reservation_while_pending() {
        let (a, b) = wallets();
        let mut transfer =
            Transfer::initiate(&a, &b, "2".parse().unwrap(), TransferMode::Escrow, None, Utc::now()).unwrap();
        assert!(transfer.holds_reservation());

        transfer.complete(Utc::now()).unwrap();
        assert!(!transfer.holds_reservation());
    }

    #[test]
    fn test_daily_limit_counts_in_flight_transfers() {
        let mut transfer = pending();
        assert!(transfer.counts_toward_daily_limit());
        transfer.fail(&DomainError::SameWallet).unwrap();
        assert!(!transfer.counts_toward_daily_limit());

        let limit: Credits = "10".parse().unwrap();
        let sent: Credits = "8".parse().unwrap();
        assert!(check_daily_limit(limit, sent, "2".parse().unwrap()).is_ok());
        assert!(matches!(
            check_daily_limit(limit, sent, "2.0001".parse().unwrap()),
            Err(DomainError::ValidationRejected(reason)) if reason.contains("Daily transfer limit")
        ));
    }
}
