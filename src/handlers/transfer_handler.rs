//! Transfer Handler
//!
//! Instant transfers run as one two-wallet unit in the store. Escrow
//! transfers reserve the amount with a freeze and are settled or cancelled
//! later. Any transfer that passes input parsing is recorded, including the
//! ones that fail. The daily limit is checked by the store when the transfer
//! is opened, so a vetoed transfer never exists as `pending`.

use uuid::Uuid;

use crate::config::TransferRules;
use crate::domain::{
    ledger_now, Amount, Credits, DomainError, OperationContext, OwnerId, Posting, Transfer, TransferMode,
    TransferStatus, Wallet, WalletKind,
};
use crate::error::{AppError, AppResult};
use crate::store::{SharedStore, StoreError, TransferFilter, TransferResolution};

use super::rules::{check_minimum, daily_cap, daily_window_start, validate_transfer_rules, RuleVerdict};
use super::{parse_amount, parse_owner, TransferCommand, TransferOutcome, WalletHandler};

// =========================================================================
// TransferHandler
// =========================================================================

/// Handler for credit transfers
#[derive(Clone)]
pub struct TransferHandler {
    store: SharedStore,
    rules: TransferRules,
    wallets: WalletHandler,
}

impl TransferHandler {
    pub fn new(wallets: WalletHandler, rules: TransferRules) -> Self {
        Self {
            store: wallets.store().clone(),
            rules,
            wallets,
        }
    }

    /// Check a prospective transfer against the rules without changing anything
    pub async fn validate_transfer_rules(
        &self,
        from_owner_id: &str,
        to_owner_id: &str,
        amount: &str,
        kind: WalletKind,
    ) -> AppResult<RuleVerdict> {
        let amount = parse_amount(amount)?;
        let from = parse_owner(from_owner_id)?;
        let to = parse_owner(to_owner_id)?;
        if from == to {
            return Ok(RuleVerdict::reject(DomainError::SameWallet.to_string()));
        }

        let sent = match self.store.find_wallet(&from, kind).await? {
            Some(wallet) => self.sent_in_window(wallet.id).await?,
            None => Credits::ZERO,
        };
        Ok(validate_transfer_rules(&self.rules, amount, sent))
    }

    /// Move credits between two owners in one atomic unit.
    ///
    /// Errors before the transfer is recorded (bad input, unknown sender,
    /// self-transfer) come back as `Err`. Afterwards every business failure
    /// is persisted as a `failed` transfer and returned in the outcome.
    pub async fn transfer_credits(
        &self,
        command: TransferCommand,
        context: &OperationContext,
    ) -> AppResult<TransferOutcome> {
        let (from, to, amount) = self.resolve(&command, context).await?;
        self.execute_instant(&from, &to, amount, command.message, context).await
    }

    /// Instant transfer from an already loaded wallet, used by the
    /// auto-transfer processor
    pub async fn transfer_from_wallet(
        &self,
        from: &Wallet,
        to_owner: &OwnerId,
        amount: Amount,
        message: Option<String>,
        context: &OperationContext,
    ) -> AppResult<TransferOutcome> {
        let to = self.store.get_or_create_wallet(to_owner, WalletKind::Employee).await?;
        self.execute_instant(from, &to, amount, message, context).await
    }

    /// Open a pending transfer with the amount frozen on the sender
    pub async fn create_escrow_transfer(
        &self,
        command: TransferCommand,
        context: &OperationContext,
    ) -> AppResult<TransferOutcome> {
        let (from, to, amount) = self.resolve(&command, context).await?;
        let transfer = Transfer::initiate(&from, &to, amount, TransferMode::Escrow, command.message, ledger_now())?;

        let reserve = Posting::freeze(amount)
            .with_destination(to.owner_id.as_str())
            .with_description(format!("escrow {}", transfer.id));

        let opened = match check_minimum(&self.rules, amount) {
            Ok(()) => {
                let cap = daily_cap(&self.rules, transfer.created_at);
                self.store.open_transfer(&transfer, Some(reserve), Some(cap)).await
            }
            Err(e) => Err(StoreError::Domain(e)),
        };

        match opened {
            Ok(transfer) => {
                tracing::info!(
                    transfer_id = %transfer.id,
                    from_wallet_id = %transfer.from_wallet_id,
                    to_wallet_id = %transfer.to_wallet_id,
                    amount = %amount,
                    correlation_id = ?context.correlation_id,
                    "Escrow transfer opened"
                );
                Ok(TransferOutcome::completed(transfer))
            }
            Err(StoreError::Domain(e)) => self.record_refused(transfer, e, context).await,
            Err(e) => Err(e.into()),
        }
    }

    /// Realize a pending escrow transfer: consume the reservation on the
    /// sender and credit the recipient.
    pub async fn settle_transfer(&self, transfer_id: Uuid, context: &OperationContext) -> AppResult<TransferOutcome> {
        let transfer = self.get_transfer(transfer_id).await?;
        transfer.ensure_pending()?;
        if transfer.mode != TransferMode::Escrow {
            return Err(AppError::InvalidRequest(format!(
                "transfer {} is not an escrow transfer",
                transfer_id
            )));
        }

        let debit = Posting::escrow_release(transfer.amount, transfer.to_owner_id.as_str())
            .with_description(transfer.message.clone().unwrap_or_else(|| "transfer".to_string()));
        let credit = Posting::transfer_in(transfer.amount)
            .with_source_id(transfer.id.to_string())
            .with_description(format!("from {}", transfer.from_owner_id));

        match self.store.complete_transfer(transfer_id, debit, credit).await {
            Ok(receipt) => {
                tracing::info!(
                    transfer_id = %transfer_id,
                    amount = %transfer.amount,
                    correlation_id = ?context.correlation_id,
                    "Escrow transfer settled"
                );
                self.wallets.check_low_balance(&receipt.from_wallet).await;
                Ok(TransferOutcome::completed(receipt.transfer))
            }
            // Someone else resolved it first
            Err(StoreError::Domain(e @ DomainError::TransferNotPending { .. })) => Err(e.into()),
            Err(StoreError::Domain(e)) => {
                let failed = self.release_and_close(&transfer, TransferResolution::Failed(e.clone())).await?;
                log_failure(&failed, &e, context);
                Ok(TransferOutcome::failed(failed, e))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Cancel a pending transfer, returning any reservation to the sender
    pub async fn cancel_transfer(&self, transfer_id: Uuid, context: &OperationContext) -> AppResult<Transfer> {
        let transfer = self.get_transfer(transfer_id).await?;
        if let Some(requester) = &context.request_owner_id {
            if requester.trim() != transfer.from_owner_id.as_str() {
                return Err(AppError::Forbidden(
                    "only the sender may cancel a transfer".to_string(),
                ));
            }
        }
        transfer.ensure_pending()?;

        let cancelled = self.release_and_close(&transfer, TransferResolution::Cancelled).await?;
        tracing::info!(
            transfer_id = %transfer_id,
            correlation_id = ?context.correlation_id,
            "Transfer cancelled"
        );
        Ok(cancelled)
    }

    pub async fn get_transfer(&self, transfer_id: Uuid) -> AppResult<Transfer> {
        self.store
            .get_transfer(transfer_id)
            .await?
            .ok_or_else(|| DomainError::TransferNotFound(transfer_id).into())
    }

    /// Pending transfers where the owner is sender or recipient, newest first
    pub async fn pending_transfers(&self, owner_id: &str, kind: WalletKind) -> AppResult<Vec<Transfer>> {
        let owner = parse_owner(owner_id)?;
        let Some(wallet) = self.store.find_wallet(&owner, kind).await? else {
            return Ok(Vec::new());
        };

        let filter = TransferFilter {
            status: Some(TransferStatus::Pending),
            outgoing_only: false,
            limit: None,
        };
        Ok(self.store.transfers_for_wallet(wallet.id, filter).await?)
    }

    // =====================================================================
    // Internals
    // =====================================================================

    /// Parse the command and load both wallets; the recipient wallet is
    /// created on first use.
    async fn resolve(
        &self,
        command: &TransferCommand,
        context: &OperationContext,
    ) -> AppResult<(Wallet, Wallet, Amount)> {
        let amount = parse_amount(&command.amount)?;
        let from_owner = parse_owner(&command.from_owner_id)?;
        let to_owner = parse_owner(&command.to_owner_id)?;

        if let Some(requester) = &context.request_owner_id {
            if requester.trim() != from_owner.as_str() {
                return Err(AppError::Forbidden(
                    "request owner does not match sender".to_string(),
                ));
            }
        }

        if from_owner == to_owner && command.from_kind == command.to_kind {
            return Err(DomainError::SameWallet.into());
        }

        let from = self
            .store
            .find_wallet(&from_owner, command.from_kind)
            .await?
            .ok_or_else(|| DomainError::WalletNotFound(format!("{} ({})", from_owner, command.from_kind)))?;
        let to = self.store.get_or_create_wallet(&to_owner, command.to_kind).await?;

        Ok((from, to, amount))
    }

    async fn execute_instant(
        &self,
        from: &Wallet,
        to: &Wallet,
        amount: Amount,
        message: Option<String>,
        context: &OperationContext,
    ) -> AppResult<TransferOutcome> {
        let transfer = Transfer::initiate(from, to, amount, TransferMode::Instant, message, ledger_now())?;

        let opened = match check_minimum(&self.rules, amount) {
            Ok(()) => {
                let cap = daily_cap(&self.rules, transfer.created_at);
                self.store.open_transfer(&transfer, None, Some(cap)).await
            }
            Err(e) => Err(StoreError::Domain(e)),
        };
        let transfer = match opened {
            Ok(transfer) => transfer,
            Err(StoreError::Domain(e)) => return self.record_refused(transfer, e, context).await,
            Err(e) => return Err(e.into()),
        };

        let debit = Posting::transfer_out(amount, to.owner_id.as_str())
            .with_description(transfer.message.clone().unwrap_or_else(|| "transfer".to_string()));
        let credit = Posting::transfer_in(amount)
            .with_source_id(transfer.id.to_string())
            .with_description(format!("from {}", from.owner_id));

        match self.store.complete_transfer(transfer.id, debit, credit).await {
            Ok(receipt) => {
                tracing::info!(
                    transfer_id = %transfer.id,
                    from_owner_id = %from.owner_id,
                    to_owner_id = %to.owner_id,
                    amount = %amount,
                    correlation_id = ?context.correlation_id,
                    "Transfer completed"
                );
                self.wallets.check_low_balance(&receipt.from_wallet).await;
                Ok(TransferOutcome::completed(receipt.transfer))
            }
            Err(StoreError::Domain(e)) => {
                let failed = self
                    .store
                    .close_transfer(transfer.id, TransferResolution::Failed(e.clone()), None)
                    .await?;
                log_failure(&failed, &e, context);
                Ok(TransferOutcome::failed(failed, e))
            }
            Err(e) => {
                tracing::error!(
                    transfer_id = %transfer.id,
                    error = %e,
                    correlation_id = ?context.correlation_id,
                    "Transfer interrupted by storage error; record left pending"
                );
                Err(e.into())
            }
        }
    }

    /// Keep a record of an attempt the store refused before anything was
    /// reserved or moved
    async fn record_refused(
        &self,
        mut transfer: Transfer,
        error: DomainError,
        context: &OperationContext,
    ) -> AppResult<TransferOutcome> {
        transfer.fail(&error)?;
        let transfer = self.store.open_transfer(&transfer, None, None).await?;
        log_failure(&transfer, &error, context);
        Ok(TransferOutcome::failed(transfer, error))
    }

    /// Close a pending transfer, unfreezing its reservation in the same unit.
    /// If the unfreeze itself is rejected the transfer is still closed and
    /// the failure is logged for investigation.
    async fn release_and_close(&self, transfer: &Transfer, resolution: TransferResolution) -> AppResult<Transfer> {
        if !transfer.holds_reservation() {
            return Ok(self.store.close_transfer(transfer.id, resolution, None).await?);
        }

        let release = Posting::unfreeze(transfer.amount).with_description(format!("release {}", transfer.id));
        match self
            .store
            .close_transfer(transfer.id, resolution.clone(), Some(release))
            .await
        {
            Ok(closed) => Ok(closed),
            Err(StoreError::Domain(e @ DomainError::TransferNotPending { .. })) => Err(e.into()),
            Err(StoreError::Domain(e)) => {
                tracing::error!(
                    transfer_id = %transfer.id,
                    wallet_id = %transfer.from_wallet_id,
                    amount = %transfer.amount,
                    error = %e,
                    "Compensating unfreeze failed"
                );
                Ok(self.store.close_transfer(transfer.id, resolution, None).await?)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn sent_in_window(&self, wallet_id: Uuid) -> AppResult<Credits> {
        let since = daily_window_start(ledger_now());
        Ok(self.store.outgoing_total_since(wallet_id, since).await?)
    }
}

fn log_failure(transfer: &Transfer, error: &DomainError, context: &OperationContext) {
    tracing::warn!(
        transfer_id = %transfer.id,
        from_wallet_id = %transfer.from_wallet_id,
        to_wallet_id = %transfer.to_wallet_id,
        amount = %transfer.amount,
        error_code = error.code(),
        reason = %error,
        correlation_id = ?context.correlation_id,
        "Transfer failed"
    );
}
