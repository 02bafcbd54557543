//! Domain module
//!
//! Core domain types and business logic.

pub mod amount;
pub mod context;
pub mod error;
pub mod expiry;
pub mod settings;
pub mod transaction;
pub mod transfer;
pub mod wallet;

pub use amount::{Amount, AmountError, Balance, Credits};
pub use context::{Initiator, OperationContext};
pub use error::DomainError;
pub use expiry::{ExpiryOutcome, ExpiryRecord};
pub use settings::{SettingsChanges, WalletSettings};
pub use transaction::{ledger_now, CreditSource, Posting, Transaction, TransactionKind};
pub use transfer::{check_daily_limit, Transfer, TransferMode, TransferStatus};
pub use wallet::{BalanceOp, OwnerId, Wallet, WalletBalances, WalletKind, WalletStatus};
