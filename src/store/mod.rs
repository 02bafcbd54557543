//! Ledger storage
//!
//! `LedgerStore` is the persistence port for wallets, their ledger rows,
//! transfers, expiry records and settings. Every method that changes a
//! balance is one atomic unit: the wallet row(s) are locked, the pure domain
//! transition runs, and the new balances plus the appended ledger row(s) are
//! committed together or not at all.
//!
//! Two implementations:
//! - [`PgStore`]: Postgres with `SELECT ... FOR UPDATE` row locks
//! - [`MemoryStore`]: per-wallet mutexes, for development and tests

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::config::{Config, StorageBackend};
use crate::domain::{
    check_daily_limit, Amount, Credits, DomainError, ExpiryOutcome, ExpiryRecord, OwnerId, Posting, Transaction,
    TransactionKind, Transfer, TransferStatus, Wallet, WalletKind, WalletSettings, WalletStatus,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

// =============================================================================
// Errors
// =============================================================================

/// Storage errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Business rule rejected the operation; nothing was written
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A stored row violates an invariant
    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Store handle shared by handlers, jobs and the HTTP state
pub type SharedStore = Arc<dyn LedgerStore>;

// =============================================================================
// Query / result types
// =============================================================================

/// Result of applying one posting
#[derive(Debug, Clone)]
pub struct Posted {
    pub transaction: Transaction,
    /// Wallet state after the posting
    pub wallet: Wallet,
    /// True when an earlier posting with the same external reference was
    /// found and returned unchanged
    pub replayed: bool,
}

/// Result of completing a transfer
#[derive(Debug, Clone)]
pub struct TransferReceipt {
    pub transfer: Transfer,
    pub debit: Transaction,
    pub credit: Transaction,
    /// Source wallet after the debit
    pub from_wallet: Wallet,
}

/// How a pending transfer ends without completing
#[derive(Debug, Clone, PartialEq)]
pub enum TransferResolution {
    Failed(DomainError),
    Cancelled,
}

/// Filter options for history queries.
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub kind: Option<TransactionKind>,
    pub limit: Option<usize>,
}

/// Filter options for transfer queries.
#[derive(Debug, Clone, Default)]
pub struct TransferFilter {
    pub status: Option<TransferStatus>,
    /// Only transfers where the wallet is the sender
    pub outgoing_only: bool,
    pub limit: Option<usize>,
}

/// Rolling cap on what one wallet may send. The store checks it while the
/// source wallet is locked, in the same unit that records the transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutgoingCap {
    pub limit: Credits,
    /// Transfers created before this instant no longer count
    pub since: DateTime<Utc>,
}

impl OutgoingCap {
    pub fn check(&self, sent: Credits, amount: Amount) -> Result<(), DomainError> {
        check_daily_limit(self.limit, sent, amount)
    }
}

impl TransferFilter {
    fn matches(&self, transfer: &Transfer, wallet_id: Uuid) -> bool {
        let involved = if self.outgoing_only {
            transfer.from_wallet_id == wallet_id
        } else {
            transfer.from_wallet_id == wallet_id || transfer.to_wallet_id == wallet_id
        };
        involved && self.status.map_or(true, |s| transfer.status == s)
    }
}

// =============================================================================
// Store trait
// =============================================================================

#[async_trait]
pub trait LedgerStore: Send + Sync {
    // ----- wallets -----

    /// Get the wallet for (owner, kind), creating it and its settings row on
    /// first use.
    async fn get_or_create_wallet(&self, owner_id: &OwnerId, kind: WalletKind) -> StoreResult<Wallet>;

    /// Get the wallet for (owner, kind) without creating it.
    async fn find_wallet(&self, owner_id: &OwnerId, kind: WalletKind) -> StoreResult<Option<Wallet>>;

    /// Get wallet by id.
    async fn get_wallet(&self, wallet_id: Uuid) -> StoreResult<Option<Wallet>>;

    /// Change wallet status (closed is terminal).
    async fn set_wallet_status(&self, wallet_id: Uuid, status: WalletStatus) -> StoreResult<Wallet>;

    // ----- ledger -----

    /// Apply one posting to one wallet and append its ledger row. A credit
    /// posting with `expires_at` also writes its expiry record.
    async fn post(&self, wallet_id: Uuid, posting: Posting) -> StoreResult<Posted>;

    /// Ledger rows, newest first.
    async fn transactions(&self, wallet_id: Uuid, filter: HistoryFilter) -> StoreResult<Vec<Transaction>>;

    /// Full ledger in sequence order, for verification.
    async fn ledger(&self, wallet_id: Uuid) -> StoreResult<Vec<Transaction>>;

    // ----- transfers -----

    /// Persist a new transfer. `reserve` (a freeze on the source wallet) is
    /// applied in the same unit. With a `cap`, the source wallet is locked and
    /// its outgoing total is checked before anything is written; openings
    /// from one wallet are serialized.
    async fn open_transfer(
        &self,
        transfer: &Transfer,
        reserve: Option<Posting>,
        cap: Option<OutgoingCap>,
    ) -> StoreResult<Transfer>;

    /// Apply `debit` to the source and `credit` to the destination and mark
    /// the transfer completed, all in one unit. Both wallets are locked in
    /// ascending id order.
    async fn complete_transfer(
        &self,
        transfer_id: Uuid,
        debit: Posting,
        credit: Posting,
    ) -> StoreResult<TransferReceipt>;

    /// Move a pending transfer to failed/cancelled. `release` (an unfreeze on
    /// the source wallet) is applied in the same unit and is allowed on
    /// wallets that are no longer active.
    async fn close_transfer(
        &self,
        transfer_id: Uuid,
        resolution: TransferResolution,
        release: Option<Posting>,
    ) -> StoreResult<Transfer>;

    async fn get_transfer(&self, transfer_id: Uuid) -> StoreResult<Option<Transfer>>;

    /// Transfers involving a wallet, newest first.
    async fn transfers_for_wallet(&self, wallet_id: Uuid, filter: TransferFilter) -> StoreResult<Vec<Transfer>>;

    /// Sum of pending and completed outgoing transfers created at or after
    /// `since`.
    async fn outgoing_total_since(&self, wallet_id: Uuid, since: DateTime<Utc>) -> StoreResult<Credits>;

    // ----- expiry -----

    /// Unprocessed records whose expiry date has passed, oldest first.
    async fn due_expiries(&self, now: DateTime<Utc>) -> StoreResult<Vec<ExpiryRecord>>;

    /// Expire one record: lock it with its wallet, deduct if the available
    /// balance covers the amount, mark it processed. Otherwise `Deferred`.
    async fn expire(&self, expiry_id: Uuid, now: DateTime<Utc>) -> StoreResult<ExpiryOutcome>;

    async fn expiries_for_wallet(&self, wallet_id: Uuid) -> StoreResult<Vec<ExpiryRecord>>;

    // ----- settings -----

    async fn get_settings(&self, wallet_id: Uuid) -> StoreResult<Option<WalletSettings>>;

    async fn save_settings(&self, settings: &WalletSettings) -> StoreResult<()>;

    /// Settings rows with auto-transfer enabled.
    async fn auto_transfer_settings(&self) -> StoreResult<Vec<WalletSettings>>;
}

/// Build the configured store.
pub async fn connect(config: &Config) -> anyhow::Result<SharedStore> {
    match config.storage_backend {
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory ledger store; state is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        StorageBackend::Postgres => {
            let store = PgStore::connect(config).await?;
            Ok(Arc::new(store))
        }
    }
}

/// Ledger posting that consumes an expiry record
pub(crate) fn expiry_posting(record: &ExpiryRecord) -> Posting {
    Posting::expiry(record.amount).with_source_id(record.id.to_string())
}
