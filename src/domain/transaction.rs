//! Ledger transactions
//!
//! Every balance mutation appends one immutable `Transaction` row. Each row
//! carries a SHA-256 checksum over its identifying fields and a per-wallet
//! sequence number, so edited, deleted or re-ordered rows can be detected.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::amount::{Amount, Credits};
use super::wallet::BalanceOp;

/// Current time at ledger precision.
///
/// Postgres `TIMESTAMPTZ` keeps microseconds, so timestamps that feed the
/// integrity hash are truncated before use.
pub fn ledger_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Kind of ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Credit,
    Debit,
    Freeze,
    Unfreeze,
    TransferOut,
    TransferIn,
    Expiry,
    Reward,
    Penalty,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Credit => "credit",
            Self::Debit => "debit",
            Self::Freeze => "freeze",
            Self::Unfreeze => "unfreeze",
            Self::TransferOut => "transfer_out",
            Self::TransferIn => "transfer_in",
            Self::Expiry => "expiry",
            Self::Reward => "reward",
            Self::Penalty => "penalty",
        }
    }

    /// Signed amount as recorded on the row
    pub fn signed(&self, amount: Amount) -> Credits {
        match self {
            Self::Debit | Self::TransferOut | Self::Expiry | Self::Penalty => -amount.credits(),
            _ => amount.credits(),
        }
    }

    /// Whether the row moves credits between available and frozen only
    pub fn is_reservation(&self) -> bool {
        matches!(self, Self::Freeze | Self::Unfreeze)
    }

    /// Counted as earned in wallet statistics
    pub fn is_earning(&self) -> bool {
        matches!(self, Self::Credit | Self::TransferIn | Self::Reward)
    }

    /// Counted as spent in wallet statistics
    pub fn is_spending(&self) -> bool {
        matches!(
            self,
            Self::Debit | Self::TransferOut | Self::Penalty | Self::Expiry
        )
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "credit" => Ok(Self::Credit),
            "debit" => Ok(Self::Debit),
            "freeze" => Ok(Self::Freeze),
            "unfreeze" => Ok(Self::Unfreeze),
            "transfer_out" => Ok(Self::TransferOut),
            "transfer_in" => Ok(Self::TransferIn),
            "expiry" => Ok(Self::Expiry),
            "reward" => Ok(Self::Reward),
            "penalty" => Ok(Self::Penalty),
            other => Err(format!("unknown transaction kind '{}'", other)),
        }
    }
}

/// Where credits came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditSource {
    Trip,
    Transfer,
    Reward,
    Penalty,
    Expiry,
    System,
    Marketplace,
}

impl CreditSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trip => "trip",
            Self::Transfer => "transfer",
            Self::Reward => "reward",
            Self::Penalty => "penalty",
            Self::Expiry => "expiry",
            Self::System => "system",
            Self::Marketplace => "marketplace",
        }
    }

    /// Sources whose grants are subject to the default credit lifetime
    pub fn expires_by_default(&self) -> bool {
        matches!(self, Self::Trip | Self::Reward | Self::Marketplace)
    }
}

impl fmt::Display for CreditSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CreditSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trip" => Ok(Self::Trip),
            "transfer" => Ok(Self::Transfer),
            "reward" => Ok(Self::Reward),
            "penalty" => Ok(Self::Penalty),
            "expiry" => Ok(Self::Expiry),
            "system" => Ok(Self::System),
            "marketplace" => Ok(Self::Marketplace),
            other => Err(format!("unknown credit source '{}'", other)),
        }
    }
}

/// A requested ledger mutation: the balance operation plus the row metadata
/// it will be recorded with.
#[derive(Debug, Clone, PartialEq)]
pub struct Posting {
    pub kind: TransactionKind,
    pub op: BalanceOp,
    pub source: Option<CreditSource>,
    pub source_id: Option<String>,
    pub destination: Option<String>,
    pub description: Option<String>,
    /// When set on a credit, an expiry record is written in the same unit
    pub expires_at: Option<DateTime<Utc>>,
}

impl Posting {
    fn new(kind: TransactionKind, op: BalanceOp) -> Self {
        Self {
            kind,
            op,
            source: None,
            source_id: None,
            destination: None,
            description: None,
            expires_at: None,
        }
    }

    pub fn credit(amount: Amount) -> Self {
        Self::new(TransactionKind::Credit, BalanceOp::Credit(amount))
    }

    pub fn reward(amount: Amount) -> Self {
        Self::new(TransactionKind::Reward, BalanceOp::Credit(amount)).with_source(CreditSource::Reward)
    }

    pub fn debit(amount: Amount) -> Self {
        Self::new(TransactionKind::Debit, BalanceOp::Debit(amount))
    }

    pub fn penalty(amount: Amount) -> Self {
        Self::new(TransactionKind::Penalty, BalanceOp::Debit(amount)).with_source(CreditSource::Penalty)
    }

    pub fn expiry(amount: Amount) -> Self {
        Self::new(TransactionKind::Expiry, BalanceOp::Debit(amount))
            .with_source(CreditSource::Expiry)
            .with_description("expiry")
    }

    pub fn freeze(amount: Amount) -> Self {
        Self::new(TransactionKind::Freeze, BalanceOp::Freeze(amount))
    }

    pub fn unfreeze(amount: Amount) -> Self {
        Self::new(TransactionKind::Unfreeze, BalanceOp::Unfreeze(amount))
    }

    /// Debit side of an instant transfer
    pub fn transfer_out(amount: Amount, destination: impl Into<String>) -> Self {
        Self::new(TransactionKind::TransferOut, BalanceOp::Debit(amount))
            .with_source(CreditSource::Transfer)
            .with_destination(destination)
    }

    /// Debit side of an escrow settlement: consumes the reserved amount
    pub fn escrow_release(amount: Amount, destination: impl Into<String>) -> Self {
        Self::new(TransactionKind::TransferOut, BalanceOp::ConsumeFrozen(amount))
            .with_source(CreditSource::Transfer)
            .with_destination(destination)
    }

    /// Credit side of a transfer
    pub fn transfer_in(amount: Amount) -> Self {
        Self::new(TransactionKind::TransferIn, BalanceOp::Credit(amount)).with_source(CreditSource::Transfer)
    }

    pub fn with_source(mut self, source: CreditSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_source_id(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn amount(&self) -> Amount {
        self.op.amount()
    }

    /// Key used to make repeated grants for the same external event a no-op
    pub fn replay_key(&self) -> Option<(Option<CreditSource>, &str)> {
        self.source_id.as_deref().map(|id| (self.source, id))
    }
}

/// Immutable ledger row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub wallet_id: Uuid,
    pub sequence: i64,
    pub kind: TransactionKind,
    /// Signed: negative for debit-type kinds
    pub amount: Credits,
    pub source: Option<CreditSource>,
    pub source_id: Option<String>,
    pub destination: Option<String>,
    pub description: Option<String>,
    pub balance_after: Credits,
    pub hash: String,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Build the row for a posting that has just been applied.
    pub fn record(
        wallet_id: Uuid,
        sequence: i64,
        posting: &Posting,
        balance_after: Credits,
        created_at: DateTime<Utc>,
    ) -> Self {
        let mut tx = Self {
            id: Uuid::new_v4(),
            wallet_id,
            sequence,
            kind: posting.kind,
            amount: posting.kind.signed(posting.amount()),
            source: posting.source,
            source_id: posting.source_id.clone(),
            destination: posting.destination.clone(),
            description: posting.description.clone(),
            balance_after,
            hash: String::new(),
            created_at: created_at.trunc_subsecs(6),
        };
        tx.hash = tx.compute_hash();
        tx
    }

    /// Recompute the checksum from the hashed fields
    pub fn compute_hash(&self) -> String {
        integrity_hash(
            self.wallet_id,
            self.kind,
            self.amount,
            self.source,
            self.destination.as_deref(),
            self.created_at,
        )
    }

    /// True when the stored hash matches the row's current contents
    pub fn verify_integrity(&self) -> bool {
        self.hash == self.compute_hash()
    }

    /// Effect on `balance`: zero for freeze/unfreeze, the signed amount otherwise
    pub fn balance_delta(&self) -> Credits {
        if self.kind.is_reservation() {
            Credits::ZERO
        } else {
            self.amount
        }
    }
}

/// SHA-256 over the canonical sorted-key JSON of the hashed fields.
pub fn integrity_hash(
    wallet_id: Uuid,
    kind: TransactionKind,
    amount: Credits,
    source: Option<CreditSource>,
    destination: Option<&str>,
    created_at: DateTime<Utc>,
) -> String {
    let mut canonical: BTreeMap<&str, serde_json::Value> = BTreeMap::new();
    canonical.insert("wallet_id", wallet_id.to_string().into());
    canonical.insert("kind", kind.as_str().into());
    canonical.insert("amount", amount.to_string().into());
    canonical.insert("source", source.map(|s| s.as_str()).into());
    canonical.insert("destination", destination.into());
    canonical.insert(
        "created_at",
        created_at.to_rfc3339_opts(SecondsFormat::Micros, true).into(),
    );

    // BTreeMap keeps the keys sorted whatever serde_json features are enabled
    let encoded = serde_json::to_string(&canonical).unwrap_or_default();
    sha256_hex(&encoded)
}

/// Calculate SHA-256 hash and return as hex string
fn sha256_hex(input: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn amount(s: &str) -> Amount {
        s.parse().unwrap()
    }

    fn sample() -> Transaction {
        let posting = Posting::credit(amount("10"))
            .with_source(CreditSource::Trip)
            .with_source_id("trip-7")
            .with_description("Commute");
        Transaction::record(
            Uuid::new_v4(),
            1,
            &posting,
            Credits::from_units(100_000),
            ledger_now(),
        )
    }

    #[test]
    fn test_sha256_hex() {
        let hash = sha256_hex("test input");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_new_transaction_verifies() {
        let tx = sample();
        assert_eq!(tx.hash.len(), 64);
        assert!(tx.verify_integrity());
    }

    #[test]
    fn test_altered_fields_break_integrity() {
        let tx = sample();

        let mut tampered = tx.clone();
        tampered.amount = Credits::from_units(990_000);
        assert!(!tampered.verify_integrity());

        let mut tampered = tx.clone();
        tampered.kind = TransactionKind::Reward;
        assert!(!tampered.verify_integrity());

        let mut tampered = tx.clone();
        tampered.wallet_id = Uuid::new_v4();
        assert!(!tampered.verify_integrity());

        let mut tampered = tx.clone();
        tampered.source = Some(CreditSource::System);
        assert!(!tampered.verify_integrity());

        let mut tampered = tx.clone();
        tampered.destination = Some("someone".into());
        assert!(!tampered.verify_integrity());

        let mut tampered = tx;
        tampered.created_at += chrono::Duration::microseconds(1);
        assert!(!tampered.verify_integrity());
    }

    #[test]
    fn test_description_not_hashed() {
        let mut tx = sample();
        tx.description = Some("edited".into());
        assert!(tx.verify_integrity());
    }

    #[test]
    fn test_hash_is_deterministic() {
        let wallet_id = Uuid::new_v4();
        let at = ledger_now();
        let a = integrity_hash(wallet_id, TransactionKind::Debit, Credits::from_units(-5), None, Some("x"), at);
        let b = integrity_hash(wallet_id, TransactionKind::Debit, Credits::from_units(-5), None, Some("x"), at);
        assert_eq!(a, b);
    }

    #[test]
    fn test_sign_convention() {
        let a = amount("2.5");
        assert!(TransactionKind::Credit.signed(a).is_positive());
        assert!(TransactionKind::TransferIn.signed(a).is_positive());
        assert!(TransactionKind::Reward.signed(a).is_positive());
        assert!(TransactionKind::Freeze.signed(a).is_positive());
        assert!(TransactionKind::Unfreeze.signed(a).is_positive());
        assert!(TransactionKind::Debit.signed(a).is_negative());
        assert!(TransactionKind::TransferOut.signed(a).is_negative());
        assert!(TransactionKind::Expiry.signed(a).is_negative());
        assert!(TransactionKind::Penalty.signed(a).is_negative());
    }

    #[test]
    fn test_freeze_has_zero_delta() {
        let tx = Transaction::record(
            Uuid::new_v4(),
            2,
            &Posting::freeze(amount("4")),
            Credits::from_units(100_000),
            ledger_now(),
        );
        assert_eq!(tx.amount, Credits::from_units(40_000));
        assert_eq!(tx.balance_delta(), Credits::ZERO);
    }

    #[test]
    fn test_record_truncates_to_micros() {
        let at = Utc::now();
        let posting = Posting::debit(amount("1"));
        let tx = Transaction::record(Uuid::new_v4(), 1, &posting, Credits::ZERO, at);
        assert_eq!(tx.created_at.timestamp_subsec_nanos() % 1_000, 0);
    }

    #[test]
    fn test_kind_round_trip_strings() {
        for kind in [
            TransactionKind::Credit,
            TransactionKind::TransferOut,
            TransactionKind::Expiry,
        ] {
            assert_eq!(kind.as_str().parse::<TransactionKind>().unwrap(), kind);
        }
    }
}
