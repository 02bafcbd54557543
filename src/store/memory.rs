//! In-memory ledger store
//!
//! Each wallet lives in its own `Mutex` slot together with its ledger, so
//! operations on one wallet are serialized while different wallets proceed
//! in parallel. Index maps are behind `RwLock`s and are never held while a
//! slot lock is awaited.
//!
//! Lock order: the source wallet's opening lock, then transfer or expiry
//! slot, then wallet slots in ascending id.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use super::{
    expiry_posting, HistoryFilter, LedgerStore, OutgoingCap, Posted, StoreError, StoreResult,
    TransferFilter, TransferReceipt, TransferResolution,
};
use crate::domain::{
    ledger_now, BalanceOp, Credits, DomainError, ExpiryOutcome, ExpiryRecord, OwnerId, Posting,
    Transaction, Transfer, Wallet, WalletBalances, WalletKind, WalletSettings,
    WalletStatus,
};

type Slot<T> = Arc<Mutex<T>>;

struct WalletSlot {
    wallet: Wallet,
    ledger: Vec<Transaction>,
}

impl WalletSlot {
    /// Post-operation balances; nothing is changed.
    fn prepare(&self, posting: &Posting, enforce_status: bool) -> Result<WalletBalances, DomainError> {
        if enforce_status {
            self.wallet.plan(&posting.op)
        } else {
            self.wallet.balances.apply(&posting.op)
        }
    }

    fn commit(&mut self, posting: &Posting, next: WalletBalances, now: DateTime<Utc>) -> Transaction {
        let sequence = self.ledger.len() as i64 + 1;
        let tx = Transaction::record(self.wallet.id, sequence, posting, next.balance.credits(), now);
        self.wallet.balances = next;
        self.wallet.updated_at = now;
        self.ledger.push(tx.clone());
        tx
    }

    fn find_replay(&self, posting: &Posting) -> Option<&Transaction> {
        let (source, source_id) = posting.replay_key()?;
        self.ledger
            .iter()
            .find(|tx| tx.source == source && tx.source_id.as_deref() == Some(source_id))
    }
}

#[derive(Default)]
struct Inner {
    owners: RwLock<HashMap<(OwnerId, WalletKind), Uuid>>,
    wallets: RwLock<HashMap<Uuid, Slot<WalletSlot>>>,
    transfers: RwLock<HashMap<Uuid, Slot<Transfer>>>,
    expiries: RwLock<HashMap<Uuid, Slot<ExpiryRecord>>>,
    settings: RwLock<HashMap<Uuid, WalletSettings>>,
    /// Serializes transfer openings per source wallet
    openings: RwLock<HashMap<Uuid, Slot<()>>>,
}

/// In-memory implementation of LedgerStore.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Inner {
    fn wallet_slot(&self, wallet_id: Uuid) -> Result<Slot<WalletSlot>, DomainError> {
        self.wallets
            .read()
            .get(&wallet_id)
            .cloned()
            .ok_or_else(|| DomainError::WalletNotFound(wallet_id.to_string()))
    }

    fn transfer_slot(&self, transfer_id: Uuid) -> Result<Slot<Transfer>, DomainError> {
        self.transfers
            .read()
            .get(&transfer_id)
            .cloned()
            .ok_or(DomainError::TransferNotFound(transfer_id))
    }

    fn opening_lock(&self, wallet_id: Uuid) -> Slot<()> {
        if let Some(slot) = self.openings.read().get(&wallet_id) {
            return slot.clone();
        }
        self.openings.write().entry(wallet_id).or_default().clone()
    }

    fn get_or_create_wallet(&self, owner_id: &OwnerId, kind: WalletKind) -> Wallet {
        let key = (owner_id.clone(), kind);
        if let Some(wallet) = self.find_wallet(owner_id, kind) {
            return wallet;
        }

        let mut owners = self.owners.write();
        // Re-check under the write lock
        if let Some(id) = owners.get(&key) {
            if let Some(slot) = self.wallets.read().get(id) {
                return slot.lock().wallet.clone();
            }
        }

        let now = ledger_now();
        let wallet = Wallet::open(owner_id.clone(), kind, now);
        self.wallets.write().insert(
            wallet.id,
            Arc::new(Mutex::new(WalletSlot {
                wallet: wallet.clone(),
                ledger: Vec::new(),
            })),
        );
        self.settings
            .write()
            .insert(wallet.id, WalletSettings::defaults(wallet.id, now));
        owners.insert(key, wallet.id);

        tracing::debug!(wallet_id = %wallet.id, owner_id = %owner_id, kind = %kind, "Wallet created");
        wallet
    }

    fn find_wallet(&self, owner_id: &OwnerId, kind: WalletKind) -> Option<Wallet> {
        let id = *self.owners.read().get(&(owner_id.clone(), kind))?;
        let slot = self.wallets.read().get(&id).cloned()?;
        let wallet = slot.lock().wallet.clone();
        Some(wallet)
    }

    fn set_wallet_status(&self, wallet_id: Uuid, status: WalletStatus) -> Result<Wallet, DomainError> {
        let slot = self.wallet_slot(wallet_id)?;
        let mut guard = slot.lock();
        guard.wallet.plan_status(status)?;
        guard.wallet.status = status;
        guard.wallet.updated_at = ledger_now();
        Ok(guard.wallet.clone())
    }

    fn post(&self, wallet_id: Uuid, posting: Posting) -> Result<Posted, DomainError> {
        let slot = self.wallet_slot(wallet_id)?;
        let mut guard = slot.lock();

        if let Some(existing) = guard.find_replay(&posting) {
            return Ok(Posted {
                transaction: existing.clone(),
                wallet: guard.wallet.clone(),
                replayed: true,
            });
        }

        let next = guard.prepare(&posting, true)?;
        let now = ledger_now();
        let tx = guard.commit(&posting, next, now);

        if let (Some(expires_at), BalanceOp::Credit(amount)) = (posting.expires_at, posting.op) {
            let record = ExpiryRecord::new(wallet_id, amount, expires_at, now);
            self.expiries
                .write()
                .insert(record.id, Arc::new(Mutex::new(record)));
        }

        Ok(Posted {
            transaction: tx,
            wallet: guard.wallet.clone(),
            replayed: false,
        })
    }

    fn transactions(&self, wallet_id: Uuid, filter: HistoryFilter) -> Result<Vec<Transaction>, DomainError> {
        let slot = self.wallet_slot(wallet_id)?;
        let guard = slot.lock();
        let rows = guard
            .ledger
            .iter()
            .rev()
            .filter(|tx| filter.kind.map_or(true, |k| tx.kind == k))
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok(rows)
    }

    fn ledger(&self, wallet_id: Uuid) -> Result<Vec<Transaction>, DomainError> {
        let slot = self.wallet_slot(wallet_id)?;
        let rows = slot.lock().ledger.clone();
        Ok(rows)
    }

    fn open_transfer(
        &self,
        transfer: &Transfer,
        reserve: Option<Posting>,
        cap: Option<OutgoingCap>,
    ) -> Result<Transfer, DomainError> {
        let opening = self.opening_lock(transfer.from_wallet_id);
        let _opening = opening.lock();

        if let Some(cap) = cap {
            let sent = self.outgoing_total_since(transfer.from_wallet_id, cap.since);
            cap.check(sent, transfer.amount)?;
        }

        if let Some(posting) = reserve {
            let slot = self.wallet_slot(transfer.from_wallet_id)?;
            let mut guard = slot.lock();
            let next = guard.prepare(&posting, true)?;
            guard.commit(&posting, next, ledger_now());
            // Still under the wallet lock so the reservation and the transfer
            // become visible together
            self.transfers
                .write()
                .insert(transfer.id, Arc::new(Mutex::new(transfer.clone())));
        } else {
            self.transfers
                .write()
                .insert(transfer.id, Arc::new(Mutex::new(transfer.clone())));
        }
        Ok(transfer.clone())
    }

    fn complete_transfer(
        &self,
        transfer_id: Uuid,
        debit: Posting,
        credit: Posting,
    ) -> Result<TransferReceipt, DomainError> {
        let transfer_slot = self.transfer_slot(transfer_id)?;
        let mut transfer = transfer_slot.lock();
        transfer.ensure_pending()?;

        let from_slot = self.wallet_slot(transfer.from_wallet_id)?;
        let to_slot = self.wallet_slot(transfer.to_wallet_id)?;

        let from_first = transfer.from_wallet_id < transfer.to_wallet_id;
        let (first, second) = if from_first {
            (&from_slot, &to_slot)
        } else {
            (&to_slot, &from_slot)
        };
        let mut first_guard = first.lock();
        let mut second_guard = second.lock();
        let (from, to) = if from_first {
            (&mut *first_guard, &mut *second_guard)
        } else {
            (&mut *second_guard, &mut *first_guard)
        };

        // Both sides are checked before either is written
        let from_next = from.prepare(&debit, true)?;
        let to_next = to.prepare(&credit, true)?;

        let now = ledger_now();
        let debit_tx = from.commit(&debit, from_next, now);
        let credit_tx = to.commit(&credit, to_next, now);
        transfer.complete(now)?;

        Ok(TransferReceipt {
            transfer: transfer.clone(),
            debit: debit_tx,
            credit: credit_tx,
            from_wallet: from.wallet.clone(),
        })
    }

    fn close_transfer(
        &self,
        transfer_id: Uuid,
        resolution: TransferResolution,
        release: Option<Posting>,
    ) -> Result<Transfer, DomainError> {
        let transfer_slot = self.transfer_slot(transfer_id)?;
        let mut transfer = transfer_slot.lock();
        transfer.ensure_pending()?;

        if let Some(posting) = release {
            let slot = self.wallet_slot(transfer.from_wallet_id)?;
            let mut guard = slot.lock();
            let next = guard.prepare(&posting, false)?;
            guard.commit(&posting, next, ledger_now());
        }

        match resolution {
            TransferResolution::Failed(error) => transfer.fail(&error)?,
            TransferResolution::Cancelled => transfer.cancel()?,
        }
        Ok(transfer.clone())
    }

    fn get_transfer(&self, transfer_id: Uuid) -> Option<Transfer> {
        let slot = self.transfers.read().get(&transfer_id).cloned()?;
        let transfer = slot.lock().clone();
        Some(transfer)
    }

    fn all_transfers(&self) -> Vec<Transfer> {
        let slots: Vec<Slot<Transfer>> = self.transfers.read().values().cloned().collect();
        slots.iter().map(|slot| slot.lock().clone()).collect()
    }

    fn transfers_for_wallet(&self, wallet_id: Uuid, filter: TransferFilter) -> Vec<Transfer> {
        let mut rows: Vec<Transfer> = self
            .all_transfers()
            .into_iter()
            .filter(|t| filter.matches(t, wallet_id))
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            rows.truncate(limit);
        }
        rows
    }

    fn outgoing_total_since(&self, wallet_id: Uuid, since: DateTime<Utc>) -> Credits {
        self.all_transfers()
            .iter()
            .filter(|t| t.from_wallet_id == wallet_id && t.counts_toward_daily_limit() && t.created_at >= since)
            .map(|t| t.amount.credits())
            .sum()
    }

    fn all_expiries(&self) -> Vec<ExpiryRecord> {
        let slots: Vec<Slot<ExpiryRecord>> = self.expiries.read().values().cloned().collect();
        slots.iter().map(|slot| slot.lock().clone()).collect()
    }

    fn due_expiries(&self, now: DateTime<Utc>) -> Vec<ExpiryRecord> {
        let mut rows: Vec<ExpiryRecord> = self
            .all_expiries()
            .into_iter()
            .filter(|r| r.is_due(now))
            .collect();
        rows.sort_by(|a, b| a.expiry_date.cmp(&b.expiry_date));
        rows
    }

    fn expire(&self, expiry_id: Uuid, now: DateTime<Utc>) -> StoreResult<ExpiryOutcome> {
        let record_slot = self
            .expiries
            .read()
            .get(&expiry_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("expiry record {}", expiry_id)))?;
        let mut record = record_slot.lock();
        if record.processed || record.is_expired {
            return Ok(ExpiryOutcome::AlreadyProcessed);
        }

        let slot = self.wallet_slot(record.wallet_id)?;
        let mut wallet = slot.lock();
        if wallet.wallet.balance() < record.amount.credits() {
            return Ok(ExpiryOutcome::Deferred);
        }

        let posting = expiry_posting(&record);
        let next = match wallet.prepare(&posting, true) {
            Ok(next) => next,
            // Part of the balance is frozen; retry once it is released
            Err(DomainError::InsufficientAvailableBalance { .. }) => return Ok(ExpiryOutcome::Deferred),
            Err(e) => return Err(e.into()),
        };
        wallet.commit(&posting, next, ledger_now());
        record.mark_processed(now);

        Ok(ExpiryOutcome::Expired(record.clone()))
    }

    fn expiries_for_wallet(&self, wallet_id: Uuid) -> Vec<ExpiryRecord> {
        let mut rows: Vec<ExpiryRecord> = self
            .all_expiries()
            .into_iter()
            .filter(|r| r.wallet_id == wallet_id)
            .collect();
        rows.sort_by(|a, b| a.expiry_date.cmp(&b.expiry_date));
        rows
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn get_or_create_wallet(&self, owner_id: &OwnerId, kind: WalletKind) -> StoreResult<Wallet> {
        Ok(self.inner.get_or_create_wallet(owner_id, kind))
    }

    async fn find_wallet(&self, owner_id: &OwnerId, kind: WalletKind) -> StoreResult<Option<Wallet>> {
        Ok(self.inner.find_wallet(owner_id, kind))
    }

    async fn get_wallet(&self, wallet_id: Uuid) -> StoreResult<Option<Wallet>> {
        let slot = self.inner.wallets.read().get(&wallet_id).cloned();
        Ok(slot.map(|s| s.lock().wallet.clone()))
    }

    async fn set_wallet_status(&self, wallet_id: Uuid, status: WalletStatus) -> StoreResult<Wallet> {
        Ok(self.inner.set_wallet_status(wallet_id, status)?)
    }

    async fn post(&self, wallet_id: Uuid, posting: Posting) -> StoreResult<Posted> {
        Ok(self.inner.post(wallet_id, posting)?)
    }

    async fn transactions(&self, wallet_id: Uuid, filter: HistoryFilter) -> StoreResult<Vec<Transaction>> {
        Ok(self.inner.transactions(wallet_id, filter)?)
    }

    async fn ledger(&self, wallet_id: Uuid) -> StoreResult<Vec<Transaction>> {
        Ok(self.inner.ledger(wallet_id)?)
    }

    async fn open_transfer(
        &self,
        transfer: &Transfer,
        reserve: Option<Posting>,
        cap: Option<OutgoingCap>,
    ) -> StoreResult<Transfer> {
        Ok(self.inner.open_transfer(transfer, reserve, cap)?)
    }

    async fn complete_transfer(
        &self,
        transfer_id: Uuid,
        debit: Posting,
        credit: Posting,
    ) -> StoreResult<TransferReceipt> {
        Ok(self.inner.complete_transfer(transfer_id, debit, credit)?)
    }

    async fn close_transfer(
        &self,
        transfer_id: Uuid,
        resolution: TransferResolution,
        release: Option<Posting>,
    ) -> StoreResult<Transfer> {
        Ok(self.inner.close_transfer(transfer_id, resolution, release)?)
    }

    async fn get_transfer(&self, transfer_id: Uuid) -> StoreResult<Option<Transfer>> {
        Ok(self.inner.get_transfer(transfer_id))
    }

    async fn transfers_for_wallet(&self, wallet_id: Uuid, filter: TransferFilter) -> StoreResult<Vec<Transfer>> {
        Ok(self.inner.transfers_for_wallet(wallet_id, filter))
    }

    async fn outgoing_total_since(&self, wallet_id: Uuid, since: DateTime<Utc>) -> StoreResult<Credits> {
        Ok(self.inner.outgoing_total_since(wallet_id, since))
    }

    async fn due_expiries(&self, now: DateTime<Utc>) -> StoreResult<Vec<ExpiryRecord>> {
        Ok(self.inner.due_expiries(now))
    }

    async fn expire(&self, expiry_id: Uuid, now: DateTime<Utc>) -> StoreResult<ExpiryOutcome> {
        self.inner.expire(expiry_id, now)
    }

    async fn expiries_for_wallet(&self, wallet_id: Uuid) -> StoreResult<Vec<ExpiryRecord>> {
        Ok(self.inner.expiries_for_wallet(wallet_id))
    }

    async fn get_settings(&self, wallet_id: Uuid) -> StoreResult<Option<WalletSettings>> {
        Ok(self.inner.settings.read().get(&wallet_id).cloned())
    }

    async fn save_settings(&self, settings: &WalletSettings) -> StoreResult<()> {
        if self.inner.wallets.read().get(&settings.wallet_id).is_none() {
            return Err(StoreError::Domain(DomainError::WalletNotFound(
                settings.wallet_id.to_string(),
            )));
        }
        self.inner
            .settings
            .write()
            .insert(settings.wallet_id, settings.clone());
        Ok(())
    }

    async fn auto_transfer_settings(&self) -> StoreResult<Vec<WalletSettings>> {
        Ok(self
            .inner
            .settings
            .read()
            .values()
            .filter(|s| s.auto_transfer_enabled)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Amount, CreditSource, TransactionKind, TransferMode, TransferStatus};
    use chrono::Duration;

    fn amount(s: &str) -> Amount {
        s.parse().unwrap()
    }

    async fn funded(store: &MemoryStore, owner: &str, credits: &str) -> Wallet {
        let owner = OwnerId::new(owner).unwrap();
        let wallet = store.get_or_create_wallet(&owner, WalletKind::Employee).await.unwrap();
        store.post(wallet.id, Posting::credit(amount(credits))).await.unwrap().wallet
    }

    #[tokio::test]
    async fn test_get_or_create_is_unique_per_owner_kind() {
        let store = MemoryStore::new();
        let owner = OwnerId::new("emp-1").unwrap();

        let a = store.get_or_create_wallet(&owner, WalletKind::Employee).await.unwrap();
        let b = store.get_or_create_wallet(&owner, WalletKind::Employee).await.unwrap();
        let c = store.get_or_create_wallet(&owner, WalletKind::Employer).await.unwrap();

        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert!(store.get_settings(a.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_post_assigns_sequences_and_balance_after() {
        let store = MemoryStore::new();
        let wallet = funded(&store, "emp-1", "10").await;
        let posted = store.post(wallet.id, Posting::debit(amount("3"))).await.unwrap();

        assert_eq!(posted.transaction.sequence, 2);
        assert_eq!(posted.transaction.balance_after.to_string(), "7.0000");
        assert_eq!(posted.wallet.balance().to_string(), "7.0000");

        let ledger = store.ledger(wallet.id).await.unwrap();
        assert_eq!(ledger.iter().map(|t| t.sequence).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_rejected_post_writes_nothing() {
        let store = MemoryStore::new();
        let wallet = funded(&store, "emp-1", "1").await;

        let err = store.post(wallet.id, Posting::debit(amount("2"))).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Domain(DomainError::InsufficientAvailableBalance { .. })
        ));
        assert_eq!(store.ledger(wallet.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_replayed_posting_is_not_applied_twice() {
        let store = MemoryStore::new();
        let owner = OwnerId::new("emp-1").unwrap();
        let wallet = store.get_or_create_wallet(&owner, WalletKind::Employee).await.unwrap();
        let posting = Posting::credit(amount("5"))
            .with_source(CreditSource::Trip)
            .with_source_id("trip-1");

        let first = store.post(wallet.id, posting.clone()).await.unwrap();
        let second = store.post(wallet.id, posting).await.unwrap();

        assert!(!first.replayed);
        assert!(second.replayed);
        assert_eq!(first.transaction.id, second.transaction.id);
        assert_eq!(second.wallet.balance().to_string(), "5.0000");
    }

    #[tokio::test]
    async fn test_complete_transfer_moves_credits() {
        let store = MemoryStore::new();
        let a = funded(&store, "a", "10").await;
        let b = funded(&store, "b", "1").await;

        let transfer = Transfer::initiate(&a, &b, amount("4"), TransferMode::Instant, None, ledger_now()).unwrap();
        store.open_transfer(&transfer, None, None).await.unwrap();
        let receipt = store
            .complete_transfer(
                transfer.id,
                Posting::transfer_out(amount("4"), "b"),
                Posting::transfer_in(amount("4")),
            )
            .await
            .unwrap();

        assert_eq!(receipt.transfer.status, TransferStatus::Completed);
        assert_eq!(receipt.debit.kind, TransactionKind::TransferOut);
        assert_eq!(receipt.credit.kind, TransactionKind::TransferIn);

        let a = store.get_wallet(a.id).await.unwrap().unwrap();
        let b = store.get_wallet(b.id).await.unwrap().unwrap();
        assert_eq!(a.balance().to_string(), "6.0000");
        assert_eq!(b.balance().to_string(), "5.0000");
    }

    #[tokio::test]
    async fn test_complete_transfer_rejects_non_pending() {
        let store = MemoryStore::new();
        let a = funded(&store, "a", "10").await;
        let b = funded(&store, "b", "0.0001").await;

        let transfer = Transfer::initiate(&a, &b, amount("1"), TransferMode::Instant, None, ledger_now()).unwrap();
        store.open_transfer(&transfer, None, None).await.unwrap();
        store
            .close_transfer(transfer.id, TransferResolution::Cancelled, None)
            .await
            .unwrap();

        let err = store
            .complete_transfer(
                transfer.id,
                Posting::transfer_out(amount("1"), "b"),
                Posting::transfer_in(amount("1")),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Domain(DomainError::TransferNotPending { .. })
        ));
    }

    #[tokio::test]
    async fn test_expire_is_once_only() {
        let store = MemoryStore::new();
        let owner = OwnerId::new("emp-1").unwrap();
        let wallet = store.get_or_create_wallet(&owner, WalletKind::Employee).await.unwrap();
        let past = ledger_now() - Duration::days(1);
        store
            .post(wallet.id, Posting::credit(amount("3")).with_expiry(past))
            .await
            .unwrap();

        let due = store.due_expiries(ledger_now()).await.unwrap();
        assert_eq!(due.len(), 1);

        let first = store.expire(due[0].id, ledger_now()).await.unwrap();
        assert!(matches!(first, ExpiryOutcome::Expired(_)));
        let second = store.expire(due[0].id, ledger_now()).await.unwrap();
        assert_eq!(second, ExpiryOutcome::AlreadyProcessed);

        let wallet = store.get_wallet(wallet.id).await.unwrap().unwrap();
        assert_eq!(wallet.balance(), Credits::ZERO);
        assert!(store.due_expiries(ledger_now()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_expire_deferred_when_balance_short() {
        let store = MemoryStore::new();
        let owner = OwnerId::new("emp-1").unwrap();
        let wallet = store.get_or_create_wallet(&owner, WalletKind::Employee).await.unwrap();
        store
            .post(
                wallet.id,
                Posting::credit(amount("3")).with_expiry(ledger_now() - Duration::hours(1)),
            )
            .await
            .unwrap();
        store.post(wallet.id, Posting::debit(amount("2"))).await.unwrap();

        let due = store.due_expiries(ledger_now()).await.unwrap();
        let outcome = store.expire(due[0].id, ledger_now()).await.unwrap();
        assert_eq!(outcome, ExpiryOutcome::Deferred);
        assert_eq!(store.due_expiries(ledger_now()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_expire_deferred_while_credits_frozen() {
        let store = MemoryStore::new();
        let owner = OwnerId::new("emp-1").unwrap();
        let wallet = store.get_or_create_wallet(&owner, WalletKind::Employee).await.unwrap();
        store
            .post(
                wallet.id,
                Posting::credit(amount("5")).with_expiry(ledger_now() - Duration::hours(1)),
            )
            .await
            .unwrap();
        store.post(wallet.id, Posting::freeze(amount("3"))).await.unwrap();

        let due = store.due_expiries(ledger_now()).await.unwrap();
        let outcome = store.expire(due[0].id, ledger_now()).await.unwrap();
        assert_eq!(outcome, ExpiryOutcome::Deferred);

        let wallet = store.get_wallet(wallet.id).await.unwrap().unwrap();
        assert_eq!(wallet.balance().to_string(), "5.0000");
        assert_eq!(store.ledger(wallet.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_open_transfer_enforces_outgoing_cap() {
        let store = MemoryStore::new();
        let a = funded(&store, "a", "50").await;
        let b = funded(&store, "b", "1").await;
        let cap = OutgoingCap {
            limit: "10".parse().unwrap(),
            since: ledger_now() - Duration::hours(24),
        };

        // A pending escrow counts toward the cap
        let first = Transfer::initiate(&a, &b, amount("8"), TransferMode::Escrow, None, ledger_now()).unwrap();
        store
            .open_transfer(&first, Some(Posting::freeze(amount("8"))), Some(cap))
            .await
            .unwrap();
        assert_eq!(store.outgoing_total_since(a.id, cap.since).await.unwrap().to_string(), "8.0000");

        let second = Transfer::initiate(&a, &b, amount("3"), TransferMode::Instant, None, ledger_now()).unwrap();
        let err = store.open_transfer(&second, None, Some(cap)).await.unwrap_err();
        assert!(matches!(err, StoreError::Domain(DomainError::ValidationRejected(_))));
        assert!(store.get_transfer(second.id).await.unwrap().is_none());

        // Cancelling releases the room
        store
            .close_transfer(first.id, TransferResolution::Cancelled, Some(Posting::unfreeze(amount("8"))))
            .await
            .unwrap();
        store.open_transfer(&second, None, Some(cap)).await.unwrap();
        assert_eq!(store.outgoing_total_since(a.id, cap.since).await.unwrap().to_string(), "3.0000");
    }
}
