//! Command definitions
//!
//! Commands represent intentions to change the system state. Amounts and
//! owner ids arrive as text and are validated by the handler that runs the
//! command.

use serde::{Deserialize, Serialize};

use crate::domain::{Amount, CreditSource, Credits, DomainError, OwnerId, Transfer, Wallet, WalletKind};

/// Parse a caller-supplied amount; zero and negative values are rejected.
pub fn parse_amount(raw: &str) -> Result<Amount, DomainError> {
    raw.parse::<Amount>()
        .map_err(|e| DomainError::InvalidAmount(e.to_string()))
}

/// Parse a caller-supplied owner reference.
pub fn parse_owner(raw: &str) -> Result<OwnerId, DomainError> {
    OwnerId::new(raw)
}

// =========================================================================
// AddCreditsCommand
// =========================================================================

/// Command to grant credits to a wallet (credit or reward)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddCreditsCommand {
    pub owner_id: String,
    #[serde(default)]
    pub kind: WalletKind,
    /// Amount as string for precise decimal
    pub amount: String,
    #[serde(default)]
    pub source: Option<CreditSource>,
    #[serde(default)]
    pub description: Option<String>,
    /// External event id (trip id, order id); repeats are no-ops
    #[serde(default)]
    pub external_ref: Option<String>,
    /// Lifetime override in days; 0 disables expiry for this grant
    #[serde(default)]
    pub lifetime_days: Option<u32>,
}

impl AddCreditsCommand {
    pub fn new(owner_id: impl Into<String>, amount: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            kind: WalletKind::default(),
            amount: amount.into(),
            source: None,
            description: None,
            external_ref: None,
            lifetime_days: None,
        }
    }

    pub fn with_kind(mut self, kind: WalletKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_source(mut self, source: CreditSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_external_ref(mut self, external_ref: impl Into<String>) -> Self {
        self.external_ref = Some(external_ref.into());
        self
    }

    pub fn with_lifetime_days(mut self, days: u32) -> Self {
        self.lifetime_days = Some(days);
        self
    }
}

// =========================================================================
// WalletOpCommand
// =========================================================================

/// Command for freeze, unfreeze, deduct and penalize on an existing wallet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletOpCommand {
    pub owner_id: String,
    #[serde(default)]
    pub kind: WalletKind,
    pub amount: String,
    /// Free text; the freeze/unfreeze reason or the deduct description
    #[serde(default)]
    pub description: Option<String>,
    /// Where deducted credits went (marketplace item, partner)
    #[serde(default)]
    pub destination: Option<String>,
}

impl WalletOpCommand {
    pub fn new(owner_id: impl Into<String>, amount: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            kind: WalletKind::default(),
            amount: amount.into(),
            description: None,
            destination: None,
        }
    }

    pub fn with_kind(mut self, kind: WalletKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }
}

// =========================================================================
// TransferCommand
// =========================================================================

/// Command to move credits between two owners
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferCommand {
    pub from_owner_id: String,
    pub to_owner_id: String,
    /// Amount to transfer (as string for precise decimal)
    pub amount: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub from_kind: WalletKind,
    #[serde(default)]
    pub to_kind: WalletKind,
}

impl TransferCommand {
    pub fn new(from_owner_id: impl Into<String>, to_owner_id: impl Into<String>, amount: impl Into<String>) -> Self {
        Self {
            from_owner_id: from_owner_id.into(),
            to_owner_id: to_owner_id.into(),
            amount: amount.into(),
            message: None,
            from_kind: WalletKind::default(),
            to_kind: WalletKind::default(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_kinds(mut self, from_kind: WalletKind, to_kind: WalletKind) -> Self {
        self.from_kind = from_kind;
        self.to_kind = to_kind;
        self
    }
}

// =========================================================================
// Results
// =========================================================================

/// Balance triple for one wallet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceView {
    pub owner_id: String,
    pub kind: WalletKind,
    pub balance: Credits,
    pub available_balance: Credits,
    pub frozen_balance: Credits,
}

impl BalanceView {
    /// All zeros for an owner that has no wallet yet
    pub fn empty(owner_id: &OwnerId, kind: WalletKind) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            kind,
            balance: Credits::ZERO,
            available_balance: Credits::ZERO,
            frozen_balance: Credits::ZERO,
        }
    }
}

impl From<&Wallet> for BalanceView {
    fn from(wallet: &Wallet) -> Self {
        Self {
            owner_id: wallet.owner_id.to_string(),
            kind: wallet.kind,
            balance: wallet.balance(),
            available_balance: wallet.available(),
            frozen_balance: wallet.frozen(),
        }
    }
}

/// Result of a transfer attempt.
///
/// A transfer that got as far as being recorded comes back here even when it
/// failed; `error` then carries the typed reason and `transfer.status` is
/// `failed`.
#[derive(Debug, Clone)]
pub struct TransferOutcome {
    pub transfer: Transfer,
    pub error: Option<DomainError>,
}

impl TransferOutcome {
    pub fn completed(transfer: Transfer) -> Self {
        Self { transfer, error: None }
    }

    pub fn failed(transfer: Transfer, error: DomainError) -> Self {
        Self {
            transfer,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Convert into a plain result, discarding the failed record
    pub fn into_result(self) -> Result<Transfer, DomainError> {
        match self.error {
            None => Ok(self.transfer),
            Some(e) => Err(e),
        }
    }
}
