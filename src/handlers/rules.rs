//! Transfer rule validation
//!
//! The minimum is checked before a transfer touches the store. The rolling
//! daily total is checked again by the store, under the source wallet lock,
//! when the transfer is opened.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::TransferRules;
use crate::domain::{check_daily_limit, Amount, Credits, DomainError};
use crate::store::OutgoingCap;

/// Length of the rolling window for the daily limit
pub fn daily_window_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::hours(24)
}

/// Daily cap for a transfer opened at `now`
pub fn daily_cap(rules: &TransferRules, now: DateTime<Utc>) -> OutgoingCap {
    OutgoingCap {
        limit: rules.daily_limit,
        since: daily_window_start(now),
    }
}

pub fn check_minimum(rules: &TransferRules, amount: Amount) -> Result<(), DomainError> {
    if amount < rules.minimum {
        return Err(DomainError::ValidationRejected(format!(
            "Transfer amount {} is below the minimum of {}",
            amount, rules.minimum
        )));
    }
    Ok(())
}

/// Outcome of a rule check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleVerdict {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl RuleVerdict {
    pub fn allow() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
        }
    }

    /// `ValidationRejected` for a veto
    pub fn into_result(self) -> Result<(), DomainError> {
        if self.valid {
            return Ok(());
        }
        Err(DomainError::ValidationRejected(
            self.reason.unwrap_or_else(|| "rejected by transfer rules".to_string()),
        ))
    }
}

/// Check `amount` against the minimum and the rolling daily total.
///
/// `sent_in_window` is the sum of the source wallet's pending and completed
/// outgoing transfers inside the window.
pub fn validate_transfer_rules(rules: &TransferRules, amount: Amount, sent_in_window: Credits) -> RuleVerdict {
    let checked = check_minimum(rules, amount)
        .and_then(|()| check_daily_limit(rules.daily_limit, sent_in_window, amount));
    match checked {
        Ok(()) => RuleVerdict::allow(),
        Err(DomainError::ValidationRejected(reason)) => RuleVerdict::reject(reason),
        Err(other) => RuleVerdict::reject(other.to_string()),
    }
}
