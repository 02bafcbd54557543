//! Wallet entity
//!
//! A wallet holds the three balance fields of one (owner, kind) pair. Balance
//! transitions are pure: they take the current state and return the next one
//! (or a `DomainError`), and the store persists the result together with the
//! ledger row in one atomic unit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::amount::{Amount, Balance, Credits};
use super::error::DomainError;

/// Maximum length of an owner reference (matches the `destination` column)
const MAX_OWNER_ID_LEN: usize = 200;

/// Opaque external identity of a wallet owner (employee id, employer id, ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(DomainError::InvalidOwnerId("must not be empty".to_string()));
        }
        if trimmed.len() > MAX_OWNER_ID_LEN {
            return Err(DomainError::InvalidOwnerId(format!(
                "longer than {} characters",
                MAX_OWNER_ID_LEN
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for OwnerId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        OwnerId::new(value)
    }
}

impl From<OwnerId> for String {
    fn from(owner: OwnerId) -> Self {
        owner.0
    }
}

/// Kind of wallet, one per owner
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletKind {
    #[default]
    Employee,
    Employer,
    System,
}

impl WalletKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Employee => "employee",
            Self::Employer => "employer",
            Self::System => "system",
        }
    }
}

impl fmt::Display for WalletKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WalletKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "employee" => Ok(Self::Employee),
            "employer" => Ok(Self::Employer),
            "system" => Ok(Self::System),
            other => Err(format!("unknown wallet kind '{}'", other)),
        }
    }
}

/// Wallet status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletStatus {
    #[default]
    Active,
    Frozen,
    Closed,
}

impl WalletStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Frozen => "frozen",
            Self::Closed => "closed",
        }
    }

    /// Closed is terminal; active and frozen may toggle.
    pub fn can_transition_to(&self, next: WalletStatus) -> bool {
        match (self, next) {
            (Self::Closed, _) => false,
            (current, next) => *current != next,
        }
    }
}

impl fmt::Display for WalletStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WalletStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "frozen" => Ok(Self::Frozen),
            "closed" => Ok(Self::Closed),
            other => Err(format!("unknown wallet status '{}'", other)),
        }
    }
}

/// A balance change requested against one wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceOp {
    /// balance += x, available += x
    Credit(Amount),
    /// balance -= x, available -= x (requires available >= x)
    Debit(Amount),
    /// available -= x, frozen += x (requires available >= x)
    Freeze(Amount),
    /// frozen -= x, available += x (requires frozen >= x)
    Unfreeze(Amount),
    /// balance -= x, frozen -= x (requires frozen >= x); settles an escrow
    ConsumeFrozen(Amount),
}

impl BalanceOp {
    pub fn amount(&self) -> Amount {
        match self {
            Self::Credit(a)
            | Self::Debit(a)
            | Self::Freeze(a)
            | Self::Unfreeze(a)
            | Self::ConsumeFrozen(a) => *a,
        }
    }

    /// Whether this operation lowers the spendable balance
    pub fn reduces_available(&self) -> bool {
        matches!(self, Self::Debit(_) | Self::Freeze(_))
    }
}

/// The three balance fields of a wallet.
///
/// # Invariants
/// - `balance == available + frozen`
/// - all three are >= 0
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletBalances {
    pub balance: Balance,
    pub available_balance: Balance,
    pub frozen_balance: Balance,
}

impl WalletBalances {
    pub fn zero() -> Self {
        Self::default()
    }

    /// Rebuild from stored values, checking the invariant.
    pub fn from_parts(balance: Credits, available: Credits, frozen: Credits) -> Result<Self, DomainError> {
        let balances = Self {
            balance: Balance::new(balance)?,
            available_balance: Balance::new(available)?,
            frozen_balance: Balance::new(frozen)?,
        };
        if !balances.is_consistent() {
            return Err(DomainError::InvalidAmount(format!(
                "balance {} != available {} + frozen {}",
                balance, available, frozen
            )));
        }
        Ok(balances)
    }

    pub fn is_consistent(&self) -> bool {
        self.available_balance
            .credits()
            .checked_add(self.frozen_balance.credits())
            .map(|sum| sum == self.balance.credits())
            .unwrap_or(false)
    }

    /// Compute the post-operation state without mutating anything.
    pub fn apply(&self, op: &BalanceOp) -> Result<Self, DomainError> {
        match op {
            BalanceOp::Credit(amount) => Ok(Self {
                balance: self.balance.credit(amount)?,
                available_balance: self.available_balance.credit(amount)?,
                frozen_balance: self.frozen_balance,
            }),
            BalanceOp::Debit(amount) => {
                self.require_available(amount)?;
                Ok(Self {
                    balance: self.balance.debit(amount)?,
                    available_balance: self.available_balance.debit(amount)?,
                    frozen_balance: self.frozen_balance,
                })
            }
            BalanceOp::Freeze(amount) => {
                self.require_available(amount)?;
                Ok(Self {
                    balance: self.balance,
                    available_balance: self.available_balance.debit(amount)?,
                    frozen_balance: self.frozen_balance.credit(amount)?,
                })
            }
            BalanceOp::Unfreeze(amount) => {
                self.require_frozen(amount)?;
                Ok(Self {
                    balance: self.balance,
                    available_balance: self.available_balance.credit(amount)?,
                    frozen_balance: self.frozen_balance.debit(amount)?,
                })
            }
            BalanceOp::ConsumeFrozen(amount) => {
                self.require_frozen(amount)?;
                Ok(Self {
                    balance: self.balance.debit(amount)?,
                    available_balance: self.available_balance,
                    frozen_balance: self.frozen_balance.debit(amount)?,
                })
            }
        }
    }

    fn require_available(&self, amount: &Amount) -> Result<(), DomainError> {
        if !self.available_balance.is_sufficient_for(amount) {
            return Err(DomainError::insufficient_available(
                amount.credits(),
                self.available_balance.credits(),
            ));
        }
        Ok(())
    }

    fn require_frozen(&self, amount: &Amount) -> Result<(), DomainError> {
        if !self.frozen_balance.is_sufficient_for(amount) {
            return Err(DomainError::insufficient_frozen(
                amount.credits(),
                self.frozen_balance.credits(),
            ));
        }
        Ok(())
    }
}

/// Wallet entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub id: Uuid,
    pub owner_id: OwnerId,
    pub kind: WalletKind,
    #[serde(flatten)]
    pub balances: WalletBalances,
    pub status: WalletStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// A fresh, empty, active wallet
    pub fn open(owner_id: OwnerId, kind: WalletKind, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id,
            kind,
            balances: WalletBalances::zero(),
            status: WalletStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == WalletStatus::Active
    }

    pub fn ensure_active(&self) -> Result<(), DomainError> {
        if !self.is_active() {
            return Err(DomainError::WalletInactive {
                wallet_id: self.id,
                status: self.status,
            });
        }
        Ok(())
    }

    /// Next balance state for `op`, after checking the wallet accepts mutations.
    pub fn plan(&self, op: &BalanceOp) -> Result<WalletBalances, DomainError> {
        self.ensure_active()?;
        self.balances.apply(op)
    }

    /// Validate a status change
    pub fn plan_status(&self, next: WalletStatus) -> Result<(), DomainError> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::invalid_transition(self.status, next));
        }
        Ok(())
    }

    pub fn balance(&self) -> Credits {
        self.balances.balance.credits()
    }

    pub fn available(&self) -> Credits {
        self.balances.available_balance.credits()
    }

    pub fn frozen(&self) -> Credits {
        self.balances.frozen_balance.credits()
    }
}
