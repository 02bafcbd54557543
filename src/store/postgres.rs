//! PostgreSQL ledger store
//!
//! Every balance-changing method runs in one SQL transaction and takes
//! `SELECT ... FOR UPDATE` row locks before reading the balance fields.
//! Two-wallet units lock both rows in a single `ORDER BY id` statement.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgConnection, PgPoolOptions};
use sqlx::PgPool;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use super::{
    expiry_posting, HistoryFilter, LedgerStore, OutgoingCap, Posted, StoreError, StoreResult,
    TransferFilter, TransferReceipt, TransferResolution,
};
use crate::config::{Config, ConfigError};
use crate::db;
use crate::domain::{
    ledger_now, Amount, BalanceOp, Credits, DomainError, ExpiryOutcome, ExpiryRecord, OwnerId,
    Posting, Transaction, Transfer, Wallet, WalletBalances, WalletKind, WalletSettings,
    WalletStatus,
};

const WALLET_COLUMNS: &str = "id, owner_id, wallet_type, balance, available_balance, \
    frozen_balance, status, created_at, updated_at";

const TRANSACTION_COLUMNS: &str = "id, wallet_id, sequence, transaction_type, amount, source, \
    source_id, destination, description, balance_after, transaction_hash, created_at";

const TRANSFER_COLUMNS: &str = "id, from_wallet_id, to_wallet_id, from_owner_id, to_owner_id, \
    amount, mode, status, message, failure_reason, failure_code, created_at, completed_at";

const EXPIRY_COLUMNS: &str = "id, wallet_id, amount, expiry_date, is_expired, processed, \
    created_at, processed_at";

const SETTINGS_COLUMNS: &str = "wallet_id, auto_transfer_enabled, auto_transfer_threshold, \
    auto_transfer_recipient, notification_enabled, low_balance_alert, monthly_report_enabled, \
    created_at, updated_at";

/// PostgreSQL implementation of LedgerStore.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the pool, verify connectivity and schema.
    pub async fn connect(config: &Config) -> anyhow::Result<Self> {
        let url = config
            .database_url
            .as_deref()
            .ok_or(ConfigError::MissingEnv("DATABASE_URL"))?;

        tracing::info!(
            max_connections = config.database_max_connections,
            "Connecting to database..."
        );
        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .acquire_timeout(Duration::from_secs(config.database_acquire_timeout_secs))
            .connect(url)
            .await
            .context("Failed to connect to database")?;

        db::verify_connection(&pool)
            .await
            .context("Database connectivity check failed")?;

        if config.database_auto_migrate {
            db::run_migrations(&pool).await?;
        }

        if !db::check_schema(&pool).await? {
            anyhow::bail!("Database schema is incomplete; apply migrations/0001_carbon_ledger.sql");
        }
        tracing::info!("Database connected");

        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// =============================================================================
// Row types
// =============================================================================

fn credits(value: Decimal, field: &str) -> StoreResult<Credits> {
    Credits::from_decimal(value).map_err(|e| StoreError::Corrupt(format!("{}: {}", field, e)))
}

fn amount(value: Decimal, field: &str) -> StoreResult<Amount> {
    Amount::new(credits(value, field)?).map_err(|e| StoreError::Corrupt(format!("{}: {}", field, e)))
}

fn parse<T: FromStr<Err = String>>(value: &str, field: &str) -> StoreResult<T> {
    value
        .parse()
        .map_err(|e| StoreError::Corrupt(format!("{}: {}", field, e)))
}

fn owner(value: String, field: &str) -> StoreResult<OwnerId> {
    OwnerId::new(value).map_err(|e| StoreError::Corrupt(format!("{}: {}", field, e)))
}

#[derive(sqlx::FromRow)]
struct WalletRow {
    id: Uuid,
    owner_id: String,
    wallet_type: String,
    balance: Decimal,
    available_balance: Decimal,
    frozen_balance: Decimal,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl WalletRow {
    fn into_wallet(self) -> StoreResult<Wallet> {
        let balances = WalletBalances::from_parts(
            credits(self.balance, "wallet.balance")?,
            credits(self.available_balance, "wallet.available_balance")?,
            credits(self.frozen_balance, "wallet.frozen_balance")?,
        )
        .map_err(|e| StoreError::Corrupt(format!("wallet {}: {}", self.id, e)))?;

        Ok(Wallet {
            id: self.id,
            owner_id: owner(self.owner_id, "wallet.owner_id")?,
            kind: parse(&self.wallet_type, "wallet.wallet_type")?,
            balances,
            status: parse(&self.status, "wallet.status")?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    wallet_id: Uuid,
    sequence: i64,
    transaction_type: String,
    amount: Decimal,
    source: Option<String>,
    source_id: Option<String>,
    destination: Option<String>,
    description: Option<String>,
    balance_after: Decimal,
    transaction_hash: String,
    created_at: DateTime<Utc>,
}

impl TransactionRow {
    fn into_transaction(self) -> StoreResult<Transaction> {
        Ok(Transaction {
            id: self.id,
            wallet_id: self.wallet_id,
            sequence: self.sequence,
            kind: parse(&self.transaction_type, "transaction.transaction_type")?,
            amount: credits(self.amount, "transaction.amount")?,
            source: self
                .source
                .as_deref()
                .map(|s| parse(s, "transaction.source"))
                .transpose()?,
            source_id: self.source_id,
            destination: self.destination,
            description: self.description,
            balance_after: credits(self.balance_after, "transaction.balance_after")?,
            // CHAR(64) pads; the hash is always exactly 64 chars
            hash: self.transaction_hash.trim_end().to_string(),
            created_at: self.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TransferRow {
    id: Uuid,
    from_wallet_id: Uuid,
    to_wallet_id: Uuid,
    from_owner_id: String,
    to_owner_id: String,
    amount: Decimal,
    mode: String,
    status: String,
    message: Option<String>,
    failure_reason: Option<String>,
    failure_code: Option<String>,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TransferRow {
    fn into_transfer(self) -> StoreResult<Transfer> {
        Ok(Transfer {
            id: self.id,
            from_wallet_id: self.from_wallet_id,
            to_wallet_id: self.to_wallet_id,
            from_owner_id: owner(self.from_owner_id, "transfer.from_owner_id")?,
            to_owner_id: owner(self.to_owner_id, "transfer.to_owner_id")?,
            amount: amount(self.amount, "transfer.amount")?,
            mode: parse(&self.mode, "transfer.mode")?,
            status: parse(&self.status, "transfer.status")?,
            message: self.message,
            failure_reason: self.failure_reason,
            failure_code: self.failure_code,
            created_at: self.created_at,
            completed_at: self.completed_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ExpiryRow {
    id: Uuid,
    wallet_id: Uuid,
    amount: Decimal,
    expiry_date: DateTime<Utc>,
    is_expired: bool,
    processed: bool,
    created_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
}

impl ExpiryRow {
    fn into_record(self) -> StoreResult<ExpiryRecord> {
        Ok(ExpiryRecord {
            id: self.id,
            wallet_id: self.wallet_id,
            amount: amount(self.amount, "credit_expiry.amount")?,
            expiry_date: self.expiry_date,
            is_expired: self.is_expired,
            processed: self.processed,
            created_at: self.created_at,
            processed_at: self.processed_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SettingsRow {
    wallet_id: Uuid,
    auto_transfer_enabled: bool,
    auto_transfer_threshold: Decimal,
    auto_transfer_recipient: Option<String>,
    notification_enabled: bool,
    low_balance_alert: Decimal,
    monthly_report_enabled: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl SettingsRow {
    fn into_settings(self) -> StoreResult<WalletSettings> {
        Ok(WalletSettings {
            wallet_id: self.wallet_id,
            auto_transfer_enabled: self.auto_transfer_enabled,
            auto_transfer_threshold: credits(self.auto_transfer_threshold, "settings.auto_transfer_threshold")?,
            auto_transfer_recipient: self
                .auto_transfer_recipient
                .map(|r| owner(r, "settings.auto_transfer_recipient"))
                .transpose()?,
            notification_enabled: self.notification_enabled,
            low_balance_alert: credits(self.low_balance_alert, "settings.low_balance_alert")?,
            monthly_report_enabled: self.monthly_report_enabled,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

// =============================================================================
// Statement helpers (run inside an open transaction)
// =============================================================================

async fn lock_wallet(conn: &mut PgConnection, wallet_id: Uuid) -> StoreResult<Wallet> {
    let row = sqlx::query_as::<_, WalletRow>(&format!(
        "SELECT {} FROM carbon_wallets WHERE id = $1 FOR UPDATE",
        WALLET_COLUMNS
    ))
    .bind(wallet_id)
    .fetch_optional(&mut *conn)
    .await?;

    row.ok_or_else(|| DomainError::WalletNotFound(wallet_id.to_string()))?
        .into_wallet()
}

/// Lock two wallets in ascending id order; returns them as (a, b).
async fn lock_wallet_pair(conn: &mut PgConnection, a: Uuid, b: Uuid) -> StoreResult<(Wallet, Wallet)> {
    let rows = sqlx::query_as::<_, WalletRow>(&format!(
        "SELECT {} FROM carbon_wallets WHERE id = ANY($1) ORDER BY id FOR UPDATE",
        WALLET_COLUMNS
    ))
    .bind(vec![a, b])
    .fetch_all(&mut *conn)
    .await?;

    let mut first = None;
    let mut second = None;
    for row in rows {
        let wallet = row.into_wallet()?;
        if wallet.id == a {
            first = Some(wallet);
        } else if wallet.id == b {
            second = Some(wallet);
        }
    }

    let first = first.ok_or_else(|| DomainError::WalletNotFound(a.to_string()))?;
    let second = second.ok_or_else(|| DomainError::WalletNotFound(b.to_string()))?;
    Ok((first, second))
}

/// Pending and completed outgoing transfers of a wallet since `since`
async fn outgoing_total(conn: &mut PgConnection, wallet_id: Uuid, since: DateTime<Utc>) -> StoreResult<Credits> {
    let total: Decimal = sqlx::query_scalar(
        r#"
        SELECT COALESCE(SUM(amount), 0)
        FROM credit_transfers
        WHERE from_wallet_id = $1 AND status IN ('pending', 'completed') AND created_at >= $2
        "#,
    )
    .bind(wallet_id)
    .bind(since)
    .fetch_one(&mut *conn)
    .await?;

    credits(total, "credit_transfers.sum(amount)")
}

async fn find_replay(
    conn: &mut PgConnection,
    wallet_id: Uuid,
    posting: &Posting,
) -> StoreResult<Option<Transaction>> {
    let Some((source, source_id)) = posting.replay_key() else {
        return Ok(None);
    };

    let row = sqlx::query_as::<_, TransactionRow>(&format!(
        "SELECT {} FROM wallet_transactions \
         WHERE wallet_id = $1 AND source IS NOT DISTINCT FROM $2 AND source_id = $3",
        TRANSACTION_COLUMNS
    ))
    .bind(wallet_id)
    .bind(source.map(|s| s.as_str()))
    .bind(source_id)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(TransactionRow::into_transaction).transpose()
}

/// Append the ledger row and store the new balances of a locked wallet.
async fn write_posting(
    conn: &mut PgConnection,
    wallet: &Wallet,
    posting: &Posting,
    next: WalletBalances,
    now: DateTime<Utc>,
) -> StoreResult<(Transaction, Wallet)> {
    let sequence: i64 = sqlx::query_scalar(
        "SELECT COALESCE(MAX(sequence), 0) + 1 FROM wallet_transactions WHERE wallet_id = $1",
    )
    .bind(wallet.id)
    .fetch_one(&mut *conn)
    .await?;

    let tx = Transaction::record(wallet.id, sequence, posting, next.balance.credits(), now);

    sqlx::query(&format!(
        "INSERT INTO wallet_transactions ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        TRANSACTION_COLUMNS
    ))
    .bind(tx.id)
    .bind(tx.wallet_id)
    .bind(tx.sequence)
    .bind(tx.kind.as_str())
    .bind(tx.amount.to_decimal())
    .bind(tx.source.map(|s| s.as_str()))
    .bind(&tx.source_id)
    .bind(&tx.destination)
    .bind(&tx.description)
    .bind(tx.balance_after.to_decimal())
    .bind(&tx.hash)
    .bind(tx.created_at)
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        r#"
        UPDATE carbon_wallets
        SET balance = $2, available_balance = $3, frozen_balance = $4, updated_at = $5
        WHERE id = $1
        "#,
    )
    .bind(wallet.id)
    .bind(next.balance.to_decimal())
    .bind(next.available_balance.to_decimal())
    .bind(next.frozen_balance.to_decimal())
    .bind(now)
    .execute(&mut *conn)
    .await?;

    if let (Some(expires_at), BalanceOp::Credit(granted)) = (posting.expires_at, posting.op) {
        let record = ExpiryRecord::new(wallet.id, granted, expires_at, now);
        sqlx::query(&format!(
            "INSERT INTO credit_expiry ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            EXPIRY_COLUMNS
        ))
        .bind(record.id)
        .bind(record.wallet_id)
        .bind(record.amount.to_decimal())
        .bind(record.expiry_date)
        .bind(record.is_expired)
        .bind(record.processed)
        .bind(record.created_at)
        .bind(record.processed_at)
        .execute(&mut *conn)
        .await?;
    }

    let mut after = wallet.clone();
    after.balances = next;
    after.updated_at = now;
    Ok((tx, after))
}

async fn lock_transfer(conn: &mut PgConnection, transfer_id: Uuid) -> StoreResult<Transfer> {
    let row = sqlx::query_as::<_, TransferRow>(&format!(
        "SELECT {} FROM credit_transfers WHERE id = $1 FOR UPDATE",
        TRANSFER_COLUMNS
    ))
    .bind(transfer_id)
    .fetch_optional(&mut *conn)
    .await?;

    row.ok_or(DomainError::TransferNotFound(transfer_id))?
        .into_transfer()
}

async fn update_transfer_status(conn: &mut PgConnection, transfer: &Transfer) -> StoreResult<()> {
    sqlx::query(
        r#"
        UPDATE credit_transfers
        SET status = $2, failure_reason = $3, failure_code = $4, completed_at = $5
        WHERE id = $1
        "#,
    )
    .bind(transfer.id)
    .bind(transfer.status.as_str())
    .bind(&transfer.failure_reason)
    .bind(&transfer.failure_code)
    .bind(transfer.completed_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

// =============================================================================
// LedgerStore
// =============================================================================

#[async_trait]
impl LedgerStore for PgStore {
    async fn get_or_create_wallet(&self, owner_id: &OwnerId, kind: WalletKind) -> StoreResult<Wallet> {
        let mut tx = self.pool.begin().await?;
        let now = ledger_now();
        let fresh = Wallet::open(owner_id.clone(), kind, now);

        let inserted = sqlx::query_as::<_, WalletRow>(&format!(
            r#"
            INSERT INTO carbon_wallets (id, owner_id, wallet_type, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            ON CONFLICT (owner_id, wallet_type) DO NOTHING
            RETURNING {}
            "#,
            WALLET_COLUMNS
        ))
        .bind(fresh.id)
        .bind(owner_id.as_str())
        .bind(kind.as_str())
        .bind(fresh.status.as_str())
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let wallet = match inserted {
            Some(row) => {
                let wallet = row.into_wallet()?;
                let settings = WalletSettings::defaults(wallet.id, now);
                insert_settings(&mut tx, &settings).await?;
                tracing::debug!(wallet_id = %wallet.id, owner_id = %owner_id, kind = %kind, "Wallet created");
                wallet
            }
            None => sqlx::query_as::<_, WalletRow>(&format!(
                "SELECT {} FROM carbon_wallets WHERE owner_id = $1 AND wallet_type = $2",
                WALLET_COLUMNS
            ))
            .bind(owner_id.as_str())
            .bind(kind.as_str())
            .fetch_one(&mut *tx)
            .await?
            .into_wallet()?,
        };

        tx.commit().await?;
        Ok(wallet)
    }

    async fn find_wallet(&self, owner_id: &OwnerId, kind: WalletKind) -> StoreResult<Option<Wallet>> {
        let row = sqlx::query_as::<_, WalletRow>(&format!(
            "SELECT {} FROM carbon_wallets WHERE owner_id = $1 AND wallet_type = $2",
            WALLET_COLUMNS
        ))
        .bind(owner_id.as_str())
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(WalletRow::into_wallet).transpose()
    }

    async fn get_wallet(&self, wallet_id: Uuid) -> StoreResult<Option<Wallet>> {
        let row = sqlx::query_as::<_, WalletRow>(&format!(
            "SELECT {} FROM carbon_wallets WHERE id = $1",
            WALLET_COLUMNS
        ))
        .bind(wallet_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(WalletRow::into_wallet).transpose()
    }

    async fn set_wallet_status(&self, wallet_id: Uuid, status: WalletStatus) -> StoreResult<Wallet> {
        let mut tx = self.pool.begin().await?;
        let mut wallet = lock_wallet(&mut tx, wallet_id).await?;
        wallet.plan_status(status)?;

        let now = ledger_now();
        sqlx::query("UPDATE carbon_wallets SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(wallet_id)
            .bind(status.as_str())
            .bind(now)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        wallet.status = status;
        wallet.updated_at = now;
        Ok(wallet)
    }

    async fn post(&self, wallet_id: Uuid, posting: Posting) -> StoreResult<Posted> {
        let mut tx = self.pool.begin().await?;
        let wallet = lock_wallet(&mut tx, wallet_id).await?;

        if let Some(existing) = find_replay(&mut tx, wallet_id, &posting).await? {
            return Ok(Posted {
                transaction: existing,
                wallet,
                replayed: true,
            });
        }

        let next = wallet.plan(&posting.op)?;
        let (transaction, wallet) = write_posting(&mut tx, &wallet, &posting, next, ledger_now()).await?;
        tx.commit().await?;

        Ok(Posted {
            transaction,
            wallet,
            replayed: false,
        })
    }

    async fn transactions(&self, wallet_id: Uuid, filter: HistoryFilter) -> StoreResult<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            r#"
            SELECT {} FROM wallet_transactions
            WHERE wallet_id = $1 AND ($2::text IS NULL OR transaction_type = $2)
            ORDER BY sequence DESC
            LIMIT $3
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(wallet_id)
        .bind(filter.kind.map(|k| k.as_str()))
        .bind(filter.limit.map(|l| l as i64))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TransactionRow::into_transaction).collect()
    }

    async fn ledger(&self, wallet_id: Uuid) -> StoreResult<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM wallet_transactions WHERE wallet_id = $1 ORDER BY sequence ASC",
            TRANSACTION_COLUMNS
        ))
        .bind(wallet_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TransactionRow::into_transaction).collect()
    }

    async fn open_transfer(
        &self,
        transfer: &Transfer,
        reserve: Option<Posting>,
        cap: Option<OutgoingCap>,
    ) -> StoreResult<Transfer> {
        let mut tx = self.pool.begin().await?;

        if reserve.is_some() || cap.is_some() {
            // The row lock serializes openings from this wallet, so the total
            // below already includes any transfer opened before us
            let wallet = lock_wallet(&mut tx, transfer.from_wallet_id).await?;

            if let Some(cap) = cap {
                let sent = outgoing_total(&mut tx, wallet.id, cap.since).await?;
                cap.check(sent, transfer.amount)?;
            }

            if let Some(posting) = reserve {
                let next = wallet.plan(&posting.op)?;
                write_posting(&mut tx, &wallet, &posting, next, ledger_now()).await?;
            }
        }

        sqlx::query(&format!(
            "INSERT INTO credit_transfers ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
            TRANSFER_COLUMNS
        ))
        .bind(transfer.id)
        .bind(transfer.from_wallet_id)
        .bind(transfer.to_wallet_id)
        .bind(transfer.from_owner_id.as_str())
        .bind(transfer.to_owner_id.as_str())
        .bind(transfer.amount.to_decimal())
        .bind(transfer.mode.as_str())
        .bind(transfer.status.as_str())
        .bind(&transfer.message)
        .bind(&transfer.failure_reason)
        .bind(&transfer.failure_code)
        .bind(transfer.created_at)
        .bind(transfer.completed_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(transfer.clone())
    }

    async fn complete_transfer(
        &self,
        transfer_id: Uuid,
        debit: Posting,
        credit: Posting,
    ) -> StoreResult<TransferReceipt> {
        let mut tx = self.pool.begin().await?;
        let mut transfer = lock_transfer(&mut tx, transfer_id).await?;
        transfer.ensure_pending()?;

        let (from, to) = lock_wallet_pair(&mut tx, transfer.from_wallet_id, transfer.to_wallet_id).await?;

        // Both sides are checked before either is written
        let from_next = from.plan(&debit.op)?;
        let to_next = to.plan(&credit.op)?;

        let now = ledger_now();
        let (debit_tx, from_wallet) = write_posting(&mut tx, &from, &debit, from_next, now).await?;
        let (credit_tx, _) = write_posting(&mut tx, &to, &credit, to_next, now).await?;

        transfer.complete(now)?;
        update_transfer_status(&mut tx, &transfer).await?;
        tx.commit().await?;

        Ok(TransferReceipt {
            transfer,
            debit: debit_tx,
            credit: credit_tx,
            from_wallet,
        })
    }

    async fn close_transfer(
        &self,
        transfer_id: Uuid,
        resolution: TransferResolution,
        release: Option<Posting>,
    ) -> StoreResult<Transfer> {
        let mut tx = self.pool.begin().await?;
        let mut transfer = lock_transfer(&mut tx, transfer_id).await?;
        transfer.ensure_pending()?;

        if let Some(posting) = release {
            let wallet = lock_wallet(&mut tx, transfer.from_wallet_id).await?;
            let next = wallet.balances.apply(&posting.op)?;
            write_posting(&mut tx, &wallet, &posting, next, ledger_now()).await?;
        }

        match resolution {
            TransferResolution::Failed(error) => transfer.fail(&error)?,
            TransferResolution::Cancelled => transfer.cancel()?,
        }
        update_transfer_status(&mut tx, &transfer).await?;
        tx.commit().await?;

        Ok(transfer)
    }

    async fn get_transfer(&self, transfer_id: Uuid) -> StoreResult<Option<Transfer>> {
        let row = sqlx::query_as::<_, TransferRow>(&format!(
            "SELECT {} FROM credit_transfers WHERE id = $1",
            TRANSFER_COLUMNS
        ))
        .bind(transfer_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TransferRow::into_transfer).transpose()
    }

    async fn transfers_for_wallet(&self, wallet_id: Uuid, filter: TransferFilter) -> StoreResult<Vec<Transfer>> {
        let rows = sqlx::query_as::<_, TransferRow>(&format!(
            r#"
            SELECT {} FROM credit_transfers
            WHERE (from_wallet_id = $1 OR (NOT $2 AND to_wallet_id = $1))
              AND ($3::text IS NULL OR status = $3)
            ORDER BY created_at DESC
            LIMIT $4
            "#,
            TRANSFER_COLUMNS
        ))
        .bind(wallet_id)
        .bind(filter.outgoing_only)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.limit.map(|l| l as i64))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TransferRow::into_transfer).collect()
    }

    async fn outgoing_total_since(&self, wallet_id: Uuid, since: DateTime<Utc>) -> StoreResult<Credits> {
        let mut conn = self.pool.acquire().await?;
        outgoing_total(&mut conn, wallet_id, since).await
    }

    async fn due_expiries(&self, now: DateTime<Utc>) -> StoreResult<Vec<ExpiryRecord>> {
        let rows = sqlx::query_as::<_, ExpiryRow>(&format!(
            r#"
            SELECT {} FROM credit_expiry
            WHERE processed = FALSE AND is_expired = FALSE AND expiry_date <= $1
            ORDER BY expiry_date ASC
            "#,
            EXPIRY_COLUMNS
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ExpiryRow::into_record).collect()
    }

    async fn expire(&self, expiry_id: Uuid, now: DateTime<Utc>) -> StoreResult<ExpiryOutcome> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, ExpiryRow>(&format!(
            "SELECT {} FROM credit_expiry WHERE id = $1 FOR UPDATE",
            EXPIRY_COLUMNS
        ))
        .bind(expiry_id)
        .fetch_optional(&mut *tx)
        .await?;
        let mut record = row
            .ok_or_else(|| StoreError::NotFound(format!("expiry record {}", expiry_id)))?
            .into_record()?;

        if record.processed || record.is_expired {
            return Ok(ExpiryOutcome::AlreadyProcessed);
        }

        let wallet = lock_wallet(&mut tx, record.wallet_id).await?;
        if wallet.balance() < record.amount.credits() {
            return Ok(ExpiryOutcome::Deferred);
        }

        let posting = expiry_posting(&record);
        let next = match wallet.plan(&posting.op) {
            Ok(next) => next,
            // Part of the balance is frozen; retry once it is released
            Err(DomainError::InsufficientAvailableBalance { .. }) => return Ok(ExpiryOutcome::Deferred),
            Err(e) => return Err(e.into()),
        };
        write_posting(&mut tx, &wallet, &posting, next, ledger_now()).await?;

        record.mark_processed(now);
        sqlx::query(
            "UPDATE credit_expiry SET is_expired = TRUE, processed = TRUE, processed_at = $2 WHERE id = $1",
        )
        .bind(record.id)
        .bind(record.processed_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(ExpiryOutcome::Expired(record))
    }

    async fn expiries_for_wallet(&self, wallet_id: Uuid) -> StoreResult<Vec<ExpiryRecord>> {
        let rows = sqlx::query_as::<_, ExpiryRow>(&format!(
            "SELECT {} FROM credit_expiry WHERE wallet_id = $1 ORDER BY expiry_date ASC",
            EXPIRY_COLUMNS
        ))
        .bind(wallet_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ExpiryRow::into_record).collect()
    }

    async fn get_settings(&self, wallet_id: Uuid) -> StoreResult<Option<WalletSettings>> {
        let row = sqlx::query_as::<_, SettingsRow>(&format!(
            "SELECT {} FROM wallet_settings WHERE wallet_id = $1",
            SETTINGS_COLUMNS
        ))
        .bind(wallet_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(SettingsRow::into_settings).transpose()
    }

    async fn save_settings(&self, settings: &WalletSettings) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE wallet_settings
            SET auto_transfer_enabled = $2,
                auto_transfer_threshold = $3,
                auto_transfer_recipient = $4,
                notification_enabled = $5,
                low_balance_alert = $6,
                monthly_report_enabled = $7,
                updated_at = $8
            WHERE wallet_id = $1
            "#,
        )
        .bind(settings.wallet_id)
        .bind(settings.auto_transfer_enabled)
        .bind(settings.auto_transfer_threshold.to_decimal())
        .bind(settings.auto_transfer_recipient.as_ref().map(|r| r.as_str()))
        .bind(settings.notification_enabled)
        .bind(settings.low_balance_alert.to_decimal())
        .bind(settings.monthly_report_enabled)
        .bind(settings.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::WalletNotFound(settings.wallet_id.to_string()).into());
        }
        Ok(())
    }

    async fn auto_transfer_settings(&self) -> StoreResult<Vec<WalletSettings>> {
        let rows = sqlx::query_as::<_, SettingsRow>(&format!(
            "SELECT {} FROM wallet_settings WHERE auto_transfer_enabled = TRUE ORDER BY wallet_id",
            SETTINGS_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SettingsRow::into_settings).collect()
    }
}

async fn insert_settings(conn: &mut PgConnection, settings: &WalletSettings) -> StoreResult<()> {
    sqlx::query(&format!(
        "INSERT INTO wallet_settings ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        SETTINGS_COLUMNS
    ))
    .bind(settings.wallet_id)
    .bind(settings.auto_transfer_enabled)
    .bind(settings.auto_transfer_threshold.to_decimal())
    .bind(settings.auto_transfer_recipient.as_ref().map(|r| r.as_str()))
    .bind(settings.notification_enabled)
    .bind(settings.low_balance_alert.to_decimal())
    .bind(settings.monthly_report_enabled)
    .bind(settings.created_at)
    .bind(settings.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}
