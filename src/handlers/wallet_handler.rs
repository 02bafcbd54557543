//! Wallet Handler
//!
//! Single-wallet operations: lazy creation, balances, credit grants and the
//! freeze/unfreeze/deduct primitives, history, statistics and settings.

use serde::{Deserialize, Serialize};

use crate::config::LedgerConfig;
use crate::domain::{
    CreditSource, Credits, DomainError, ExpiryRecord, OperationContext, OwnerId, Posting, SettingsChanges,
    Transaction, TransactionKind, Transfer, TransferStatus, Wallet, WalletKind, WalletSettings, WalletStatus,
    ledger_now,
};
use crate::error::{AppError, AppResult};
use crate::store::{HistoryFilter, SharedStore, TransferFilter};

use super::{parse_amount, parse_owner, AddCreditsCommand, BalanceView, WalletOpCommand};

/// Default and maximum page size for history queries
pub const DEFAULT_HISTORY_LIMIT: usize = 50;
pub const MAX_HISTORY_LIMIT: usize = 500;

/// Number of recent outgoing transfers included in stats
const RECENT_TRANSFERS: usize = 5;

/// Aggregated view of one wallet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletStats {
    pub wallet_id: uuid::Uuid,
    pub owner_id: String,
    pub kind: WalletKind,
    pub status: WalletStatus,
    pub total_balance: Credits,
    pub available_balance: Credits,
    pub frozen_balance: Credits,
    /// credit + transfer_in + reward
    pub total_earned: Credits,
    /// debit + transfer_out + penalty + expiry
    pub total_spent: Credits,
    pub net_credits: Credits,
    pub transaction_count: usize,
    pub recent_transfers: Vec<Transfer>,
}

// =========================================================================
// WalletHandler
// =========================================================================

/// Handler for single-wallet operations
#[derive(Clone)]
pub struct WalletHandler {
    store: SharedStore,
    config: LedgerConfig,
}

impl WalletHandler {
    pub fn new(store: SharedStore, config: LedgerConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Get the wallet for (owner, kind), creating it on first use
    pub async fn get_or_create_wallet(&self, owner_id: &str, kind: WalletKind) -> AppResult<Wallet> {
        let owner = parse_owner(owner_id)?;
        Ok(self.store.get_or_create_wallet(&owner, kind).await?)
    }

    /// Balances for (owner, kind); zeros when no wallet exists yet
    pub async fn get_balance(&self, owner_id: &str, kind: WalletKind) -> AppResult<BalanceView> {
        let owner = parse_owner(owner_id)?;
        let view = match self.store.find_wallet(&owner, kind).await? {
            Some(wallet) => BalanceView::from(&wallet),
            None => BalanceView::empty(&owner, kind),
        };
        Ok(view)
    }

    /// Grant credits; the wallet is created if needed.
    ///
    /// Grants from sources with a default lifetime (or with an explicit
    /// `lifetime_days`) also write an expiry record. A repeated
    /// `external_ref` returns the original transaction unchanged.
    pub async fn add_credits(&self, command: AddCreditsCommand, context: &OperationContext) -> AppResult<Transaction> {
        self.grant(command, false, context).await
    }

    /// Grant credits recorded as a `reward`
    pub async fn reward_credits(&self, command: AddCreditsCommand, context: &OperationContext) -> AppResult<Transaction> {
        self.grant(command, true, context).await
    }

    /// Move credits from available to frozen
    pub async fn freeze_credits(&self, command: WalletOpCommand, context: &OperationContext) -> AppResult<Transaction> {
        let amount = parse_amount(&command.amount)?;
        let mut posting = Posting::freeze(amount);
        if let Some(reason) = command.description.clone() {
            posting = posting.with_description(reason);
        }
        self.apply_to_existing(&command, posting, context).await
    }

    /// Move frozen credits back to available
    pub async fn unfreeze_credits(&self, command: WalletOpCommand, context: &OperationContext) -> AppResult<Transaction> {
        let amount = parse_amount(&command.amount)?;
        let mut posting = Posting::unfreeze(amount);
        if let Some(reason) = command.description.clone() {
            posting = posting.with_description(reason);
        }
        self.apply_to_existing(&command, posting, context).await
    }

    /// Spend available credits
    pub async fn deduct_credits(&self, command: WalletOpCommand, context: &OperationContext) -> AppResult<Transaction> {
        let amount = parse_amount(&command.amount)?;
        let posting = decorate(Posting::debit(amount), &command);
        self.apply_to_existing(&command, posting, context).await
    }

    /// Remove available credits as a `penalty`
    pub async fn penalize_credits(&self, command: WalletOpCommand, context: &OperationContext) -> AppResult<Transaction> {
        let amount = parse_amount(&command.amount)?;
        let posting = decorate(Posting::penalty(amount), &command);
        self.apply_to_existing(&command, posting, context).await
    }

    /// Administer wallet status (closed is terminal)
    pub async fn set_wallet_status(
        &self,
        owner_id: &str,
        kind: WalletKind,
        status: WalletStatus,
        context: &OperationContext,
    ) -> AppResult<Wallet> {
        let wallet = self.require_wallet(owner_id, kind).await?;
        let updated = self.store.set_wallet_status(wallet.id, status).await?;

        tracing::info!(
            wallet_id = %updated.id,
            owner_id = %updated.owner_id,
            from = %wallet.status,
            to = %status,
            correlation_id = ?context.correlation_id,
            "Wallet status changed"
        );
        Ok(updated)
    }

    /// Ledger rows, newest first. An owner without a wallet has no history.
    pub async fn get_transaction_history(
        &self,
        owner_id: &str,
        kind: WalletKind,
        limit: Option<usize>,
        kind_filter: Option<TransactionKind>,
    ) -> AppResult<Vec<Transaction>> {
        let owner = parse_owner(owner_id)?;
        let Some(wallet) = self.store.find_wallet(&owner, kind).await? else {
            return Ok(Vec::new());
        };

        let filter = HistoryFilter {
            kind: kind_filter,
            limit: Some(limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, MAX_HISTORY_LIMIT)),
        };
        Ok(self.store.transactions(wallet.id, filter).await?)
    }

    /// Totals earned/spent over the whole ledger plus recent outgoing transfers
    pub async fn get_wallet_stats(&self, owner_id: &str, kind: WalletKind) -> AppResult<WalletStats> {
        let wallet = self.require_wallet(owner_id, kind).await?;
        let ledger = self.store.ledger(wallet.id).await?;

        let total_earned: Credits = ledger
            .iter()
            .filter(|tx| tx.kind.is_earning())
            .map(|tx| tx.amount.abs())
            .sum();
        let total_spent: Credits = ledger
            .iter()
            .filter(|tx| tx.kind.is_spending())
            .map(|tx| tx.amount.abs())
            .sum();
        let net_credits = total_earned
            .checked_sub(total_spent)
            .ok_or(DomainError::BalanceOverflow)?;

        let recent_transfers = self
            .store
            .transfers_for_wallet(
                wallet.id,
                TransferFilter {
                    status: Some(TransferStatus::Completed),
                    outgoing_only: true,
                    limit: Some(RECENT_TRANSFERS),
                },
            )
            .await?;

        Ok(WalletStats {
            wallet_id: wallet.id,
            owner_id: wallet.owner_id.to_string(),
            kind: wallet.kind,
            status: wallet.status,
            total_balance: wallet.balance(),
            available_balance: wallet.available(),
            frozen_balance: wallet.frozen(),
            total_earned,
            total_spent,
            net_credits,
            transaction_count: ledger.len(),
            recent_transfers,
        })
    }

    pub async fn get_settings(&self, owner_id: &str, kind: WalletKind) -> AppResult<WalletSettings> {
        let wallet = self.get_or_create_wallet(owner_id, kind).await?;
        self.store
            .get_settings(wallet.id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("settings for wallet {}", wallet.id)))
    }

    /// Partially update the wallet's settings (the wallet is created if needed)
    pub async fn update_settings(
        &self,
        owner_id: &str,
        kind: WalletKind,
        changes: SettingsChanges,
        context: &OperationContext,
    ) -> AppResult<WalletSettings> {
        let mut settings = self.get_settings(owner_id, kind).await?;

        if changes.auto_transfer_recipient.as_ref().map(OwnerId::as_str) == Some(owner_id.trim())
            && kind == WalletKind::Employee
        {
            return Err(DomainError::SameWallet.into());
        }

        settings.apply(changes, ledger_now())?;
        self.store.save_settings(&settings).await?;

        tracing::info!(
            wallet_id = %settings.wallet_id,
            auto_transfer_enabled = settings.auto_transfer_enabled,
            correlation_id = ?context.correlation_id,
            "Wallet settings updated"
        );
        Ok(settings)
    }

    /// Expiry records of (owner, kind), soonest first
    pub async fn get_expiries(&self, owner_id: &str, kind: WalletKind) -> AppResult<Vec<ExpiryRecord>> {
        let wallet = self.require_wallet(owner_id, kind).await?;
        Ok(self.store.expiries_for_wallet(wallet.id).await?)
    }

    /// Emit the `low_balance` signal if the wallet dropped below its alert level
    pub async fn check_low_balance(&self, wallet: &Wallet) {
        match self.store.get_settings(wallet.id).await {
            Ok(Some(settings)) if settings.is_low_balance(wallet.available()) => {
                tracing::warn!(
                    event = "low_balance",
                    wallet_id = %wallet.id,
                    owner_id = %wallet.owner_id,
                    available_balance = %wallet.available(),
                    threshold = %settings.low_balance_alert,
                    "Wallet available balance below alert threshold"
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(wallet_id = %wallet.id, error = %e, "Could not load settings for low-balance check");
            }
        }
    }

    // =====================================================================
    // Internals
    // =====================================================================

    async fn require_wallet(&self, owner_id: &str, kind: WalletKind) -> AppResult<Wallet> {
        let owner = parse_owner(owner_id)?;
        self.store
            .find_wallet(&owner, kind)
            .await?
            .ok_or_else(|| DomainError::WalletNotFound(format!("{} ({})", owner, kind)).into())
    }

    async fn grant(&self, command: AddCreditsCommand, reward: bool, context: &OperationContext) -> AppResult<Transaction> {
        let amount = parse_amount(&command.amount)?;
        let owner = parse_owner(&command.owner_id)?;

        let mut posting = if reward {
            Posting::reward(amount)
        } else {
            Posting::credit(amount).with_source(command.source.unwrap_or(CreditSource::System))
        };
        if let (true, Some(source)) = (reward, command.source) {
            posting = posting.with_source(source);
        }
        if let Some(description) = command.description {
            posting = posting.with_description(description);
        }
        if let Some(external_ref) = command.external_ref {
            posting = posting.with_source_id(external_ref);
        }
        if let Some(days) = self.lifetime_for(posting.source, command.lifetime_days) {
            posting = posting.with_expiry(ExpiryRecord::expiry_for(ledger_now(), days));
        }

        let wallet = self.store.get_or_create_wallet(&owner, command.kind).await?;
        let posted = self.store.post(wallet.id, posting).await?;

        if posted.replayed {
            tracing::info!(
                wallet_id = %wallet.id,
                transaction_id = %posted.transaction.id,
                source_id = ?posted.transaction.source_id,
                correlation_id = ?context.correlation_id,
                "Duplicate credit grant ignored"
            );
        } else {
            tracing::info!(
                wallet_id = %wallet.id,
                owner_id = %owner,
                kind = %posted.transaction.kind,
                amount = %amount,
                balance_after = %posted.transaction.balance_after,
                correlation_id = ?context.correlation_id,
                "Credits added"
            );
        }
        Ok(posted.transaction)
    }

    /// Lifetime in days for a grant: explicit override first, then the
    /// configured default for sources that expire.
    fn lifetime_for(&self, source: Option<CreditSource>, explicit: Option<u32>) -> Option<u32> {
        let days = match explicit {
            Some(days) => days,
            None if source.map_or(false, |s| s.expires_by_default()) => self.config.credit_lifetime_days,
            None => 0,
        };
        (days > 0).then_some(days)
    }

    async fn apply_to_existing(
        &self,
        command: &WalletOpCommand,
        posting: Posting,
        context: &OperationContext,
    ) -> AppResult<Transaction> {
        let wallet = self.require_wallet(&command.owner_id, command.kind).await?;
        let reduces_available = posting.op.reduces_available();
        let posted = self.store.post(wallet.id, posting).await?;

        tracing::info!(
            wallet_id = %wallet.id,
            owner_id = %wallet.owner_id,
            kind = %posted.transaction.kind,
            amount = %posted.transaction.amount,
            available_balance = %posted.wallet.available(),
            frozen_balance = %posted.wallet.frozen(),
            correlation_id = ?context.correlation_id,
            "Wallet operation applied"
        );

        if reduces_available {
            self.check_low_balance(&posted.wallet).await;
        }
        Ok(posted.transaction)
    }
}

fn decorate(mut posting: Posting, command: &WalletOpCommand) -> Posting {
    if let Some(description) = command.description.clone() {
        posting = posting.with_description(description);
    }
    if let Some(destination) = command.destination.clone() {
        posting = posting.with_destination(destination);
    }
    posting
}
