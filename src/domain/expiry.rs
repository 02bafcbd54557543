//! Credit expiry records
//!
//! Written when credits are granted with a lifetime; consumed exactly once by
//! the expiry processor.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::amount::Amount;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpiryRecord {
    pub id: Uuid,
    pub wallet_id: Uuid,
    pub amount: Amount,
    pub expiry_date: DateTime<Utc>,
    pub is_expired: bool,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
}

/// Result of trying to expire one record
#[derive(Debug, Clone, PartialEq)]
pub enum ExpiryOutcome {
    /// Credits deducted and record marked processed
    Expired(ExpiryRecord),
    /// Another run already consumed the record
    AlreadyProcessed,
    /// Balance, or the unfrozen part of it, does not cover the amount;
    /// retried next run
    Deferred,
}

impl ExpiryRecord {
    pub fn new(wallet_id: Uuid, amount: Amount, expiry_date: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            wallet_id,
            amount,
            expiry_date,
            is_expired: false,
            processed: false,
            created_at: now,
            processed_at: None,
        }
    }

    /// Expiry date for credits granted at `granted_at` with a lifetime in days
    pub fn expiry_for(granted_at: DateTime<Utc>, lifetime_days: u32) -> DateTime<Utc> {
        granted_at + Duration::days(i64::from(lifetime_days))
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.processed && !self.is_expired && self.expiry_date <= now
    }

    pub fn mark_processed(&mut self, at: DateTime<Utc>) {
        self.is_expired = true;
        self.processed = true;
        self.processed_at = Some(at);
    }
}
