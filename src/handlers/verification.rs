//! Verification Service
//!
//! Read-only diagnostics over a wallet's ledger: per-row hash checks,
//! reconciliation of the ledger sum against the stored balance, and
//! continuity of sequence numbers and running balances. Mismatches are
//! reported, never corrected.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{Credits, DomainError, Transaction, TransactionKind, Wallet, WalletKind};
use crate::error::AppResult;
use crate::store::SharedStore;

use super::parse_owner;

/// Hash check result for one ledger row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityResult {
    pub transaction_id: Uuid,
    pub sequence: i64,
    pub kind: TransactionKind,
    pub valid: bool,
}

/// Ledger sum versus stored balance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceCheck {
    pub ledger_total: Credits,
    pub stored_balance: Credits,
    pub matches: bool,
}

/// Sequence/running-balance continuity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuityCheck {
    pub valid: bool,
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub wallet_id: Uuid,
    pub owner_id: String,
    pub kind: WalletKind,
    pub transaction_count: usize,
    pub transactions: Vec<IntegrityResult>,
    pub invalid_transactions: usize,
    pub balance: BalanceCheck,
    pub continuity: ContinuityCheck,
    /// Every check passed
    pub is_valid: bool,
    pub verified_at: DateTime<Utc>,
}

/// Service for ledger verification
#[derive(Clone)]
pub struct VerificationService {
    store: SharedStore,
}

impl VerificationService {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Recompute the row's hash and compare it with the stored one
    pub fn verify_transaction_integrity(tx: &Transaction) -> bool {
        tx.verify_integrity()
    }

    /// Whether the ledger sums to the wallet's stored balance
    pub async fn verify_wallet_balance(&self, wallet: &Wallet) -> AppResult<bool> {
        let ledger = self.store.ledger(wallet.id).await?;
        Ok(reconcile(wallet, &ledger).matches)
    }

    /// Full diagnostic for one wallet
    pub async fn create_verification_report(&self, wallet: &Wallet) -> AppResult<VerificationReport> {
        let ledger = self.store.ledger(wallet.id).await?;
        let report = build_report(wallet, &ledger);

        if report.is_valid {
            tracing::debug!(wallet_id = %wallet.id, rows = report.transaction_count, "Wallet verified");
        } else {
            tracing::warn!(
                wallet_id = %wallet.id,
                invalid_transactions = report.invalid_transactions,
                balance_matches = report.balance.matches,
                continuity_issues = report.continuity.issues.len(),
                "Wallet verification failed"
            );
        }
        Ok(report)
    }

    /// Report for (owner, kind)
    pub async fn verify_wallet(&self, owner_id: &str, kind: WalletKind) -> AppResult<VerificationReport> {
        let owner = parse_owner(owner_id)?;
        let wallet = self
            .store
            .find_wallet(&owner, kind)
            .await?
            .ok_or_else(|| DomainError::WalletNotFound(format!("{} ({})", owner, kind)))?;
        self.create_verification_report(&wallet).await
    }
}

/// Sum of balance deltas (freeze/unfreeze contribute zero) against the stored balance
pub fn reconcile(wallet: &Wallet, ledger: &[Transaction]) -> BalanceCheck {
    let ledger_total: Credits = ledger.iter().map(Transaction::balance_delta).sum();
    BalanceCheck {
        ledger_total,
        stored_balance: wallet.balance(),
        matches: ledger_total == wallet.balance(),
    }
}

/// Check that sequences run 1, 2, 3... and that each `balance_after` equals
/// the previous one plus the row's delta. `ledger` must be in sequence order.
pub fn check_continuity(ledger: &[Transaction]) -> ContinuityCheck {
    let mut issues = Vec::new();
    let mut running = Credits::ZERO;

    for (index, tx) in ledger.iter().enumerate() {
        let expected_sequence = index as i64 + 1;
        if tx.sequence != expected_sequence {
            issues.push(format!(
                "transaction {} has sequence {}, expected {}",
                tx.id, tx.sequence, expected_sequence
            ));
        }

        running = match running.checked_add(tx.balance_delta()) {
            Some(next) => next,
            None => {
                issues.push(format!("running balance overflows at transaction {}", tx.id));
                break;
            }
        };
        if tx.balance_after != running {
            issues.push(format!(
                "transaction {} records balance_after {}, running total is {}",
                tx.id, tx.balance_after, running
            ));
            // Resynchronize so one bad row is reported once
            running = tx.balance_after;
        }
    }

    ContinuityCheck {
        valid: issues.is_empty(),
        issues,
    }
}

pub fn build_report(wallet: &Wallet, ledger: &[Transaction]) -> VerificationReport {
    let transactions: Vec<IntegrityResult> = ledger
        .iter()
        .map(|tx| IntegrityResult {
            transaction_id: tx.id,
            sequence: tx.sequence,
            kind: tx.kind,
            valid: VerificationService::verify_transaction_integrity(tx),
        })
        .collect();
    let invalid_transactions = transactions.iter().filter(|r| !r.valid).count();

    let balance = reconcile(wallet, ledger);
    let continuity = check_continuity(ledger);
    let is_valid = invalid_transactions == 0 && balance.matches && continuity.valid;

    VerificationReport {
        wallet_id: wallet.id,
        owner_id: wallet.owner_id.to_string(),
        kind: wallet.kind,
        transaction_count: ledger.len(),
        transactions,
        invalid_transactions,
        balance,
        continuity,
        is_valid,
        verified_at: Utc::now(),
    }
}
