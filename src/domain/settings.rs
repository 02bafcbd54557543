//! Per-wallet settings
//!
//! One row per wallet, created alongside it. Auto-transfer configuration is
//! read by the batch processor; the alert threshold drives the low-balance
//! log signal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::amount::{Amount, Credits};
use super::error::DomainError;
use super::wallet::OwnerId;

/// Default low-balance alert threshold: 10 credits
pub const DEFAULT_LOW_BALANCE_ALERT: Credits = Credits::from_units(100_000);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletSettings {
    pub wallet_id: Uuid,
    pub auto_transfer_enabled: bool,
    pub auto_transfer_threshold: Credits,
    pub auto_transfer_recipient: Option<OwnerId>,
    pub notification_enabled: bool,
    pub low_balance_alert: Credits,
    pub monthly_report_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update; `None` leaves a field unchanged. A recipient is removed
/// with `clear_auto_transfer_recipient`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsChanges {
    #[serde(default)]
    pub auto_transfer_enabled: Option<bool>,
    #[serde(default)]
    pub auto_transfer_threshold: Option<Credits>,
    #[serde(default)]
    pub auto_transfer_recipient: Option<OwnerId>,
    #[serde(default)]
    pub clear_auto_transfer_recipient: bool,
    #[serde(default)]
    pub notification_enabled: Option<bool>,
    #[serde(default)]
    pub low_balance_alert: Option<Credits>,
    #[serde(default)]
    pub monthly_report_enabled: Option<bool>,
}

impl WalletSettings {
    pub fn defaults(wallet_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            wallet_id,
            auto_transfer_enabled: false,
            auto_transfer_threshold: Credits::ZERO,
            auto_transfer_recipient: None,
            notification_enabled: true,
            low_balance_alert: DEFAULT_LOW_BALANCE_ALERT,
            monthly_report_enabled: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a partial update, rejecting negative thresholds.
    pub fn apply(&mut self, changes: SettingsChanges, now: DateTime<Utc>) -> Result<(), DomainError> {
        if changes.clear_auto_transfer_recipient && changes.auto_transfer_recipient.is_some() {
            return Err(DomainError::InvalidOwnerId(
                "auto_transfer_recipient cannot be set and cleared in one update".to_string(),
            ));
        }
        if let Some(threshold) = changes.auto_transfer_threshold {
            if threshold.is_negative() {
                return Err(DomainError::InvalidAmount(format!(
                    "auto_transfer_threshold cannot be negative (got {})",
                    threshold
                )));
            }
            self.auto_transfer_threshold = threshold;
        }
        if let Some(alert) = changes.low_balance_alert {
            if alert.is_negative() {
                return Err(DomainError::InvalidAmount(format!(
                    "low_balance_alert cannot be negative (got {})",
                    alert
                )));
            }
            self.low_balance_alert = alert;
        }
        if let Some(enabled) = changes.auto_transfer_enabled {
            self.auto_transfer_enabled = enabled;
        }
        if let Some(recipient) = changes.auto_transfer_recipient {
            self.auto_transfer_recipient = Some(recipient);
        }
        if changes.clear_auto_transfer_recipient {
            self.auto_transfer_recipient = None;
        }
        if let Some(enabled) = changes.notification_enabled {
            self.notification_enabled = enabled;
        }
        if let Some(enabled) = changes.monthly_report_enabled {
            self.monthly_report_enabled = enabled;
        }
        self.updated_at = now;
        Ok(())
    }

    /// The configured auto-transfer, if it is enabled and complete
    pub fn auto_transfer(&self) -> Option<(Amount, &OwnerId)> {
        if !self.auto_transfer_enabled {
            return None;
        }
        let threshold = Amount::new(self.auto_transfer_threshold).ok()?;
        let recipient = self.auto_transfer_recipient.as_ref()?;
        Some((threshold, recipient))
    }

    /// Whether `available` should raise the low-balance signal
    pub fn is_low_balance(&self, available: Credits) -> bool {
        self.notification_enabled && available < self.low_balance_alert
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = WalletSettings::defaults(Uuid::new_v4(), Utc::now());
        assert!(!settings.auto_transfer_enabled);
        assert!(settings.notification_enabled);
        assert!(settings.monthly_report_enabled);
        assert_eq!(settings.low_balance_alert.to_string(), "10.0000");
        assert!(settings.auto_transfer().is_none());
    }

    #[test]
    fn test_auto_transfer_requires_threshold_and_recipient() {
        let now = Utc::now();
        let mut settings = WalletSettings::defaults(Uuid::new_v4(), now);

        settings
            .apply(
                SettingsChanges {
                    auto_transfer_enabled: Some(true),
                    ..Default::default()
                },
                now,
            )
            .unwrap();
        assert!(settings.auto_transfer().is_none());

        settings
            .apply(
                SettingsChanges {
                    auto_transfer_threshold: Some("25".parse().unwrap()),
                    auto_transfer_recipient: Some(OwnerId::new("employer-1").unwrap()),
                    ..Default::default()
                },
                now,
            )
            .unwrap();

        let (threshold, recipient) = settings.auto_transfer().unwrap();
        assert_eq!(threshold.to_string(), "25.0000");
        assert_eq!(recipient.as_str(), "employer-1");
    }

    #[test]
    fn test_recipient_can_be_cleared() {
        let now = Utc::now();
        let mut settings = WalletSettings::defaults(Uuid::new_v4(), now);
        settings
            .apply(
                SettingsChanges {
                    auto_transfer_enabled: Some(true),
                    auto_transfer_threshold: Some("5".parse().unwrap()),
                    auto_transfer_recipient: Some(OwnerId::new("employer-1").unwrap()),
                    ..Default::default()
                },
                now,
            )
            .unwrap();
        assert!(settings.auto_transfer().is_some());

        // Leaving the field out keeps the recipient
        let untouched: SettingsChanges = serde_json::from_str(r#"{"notification_enabled": false}"#).unwrap();
        settings.apply(untouched, now).unwrap();
        assert_eq!(settings.auto_transfer_recipient.as_ref().map(OwnerId::as_str), Some("employer-1"));

        let clear: SettingsChanges = serde_json::from_str(r#"{"clear_auto_transfer_recipient": true}"#).unwrap();
        settings.apply(clear, now).unwrap();
        assert!(settings.auto_transfer_recipient.is_none());
        assert!(settings.auto_transfer().is_none());

        let both = SettingsChanges {
            auto_transfer_recipient: Some(OwnerId::new("employer-2").unwrap()),
            clear_auto_transfer_recipient: true,
            ..Default::default()
        };
        assert!(matches!(settings.apply(both, now), Err(DomainError::InvalidOwnerId(_))));
        assert!(settings.auto_transfer_recipient.is_none());
    }

    #[test]
    fn test_negative_threshold_rejected() {
        let now = Utc::now();
        let mut settings = WalletSettings::defaults(Uuid::new_v4(), now);
        let result = settings.apply(
            SettingsChanges {
                auto_transfer_threshold: Some("-1".parse().unwrap()),
                ..Default::default()
            },
            now,
        );
        assert!(matches!(result, Err(DomainError::InvalidAmount(_))));
    }

    #[test]
    fn test_low_balance_respects_notifications() {
        let now = Utc::now();
        let mut settings = WalletSettings::defaults(Uuid::new_v4(), now);
        assert!(settings.is_low_balance("9.9999".parse().unwrap()));
        assert!(!settings.is_low_balance("10".parse().unwrap()));

        settings.notification_enabled = false;
        assert!(!settings.is_low_balance(Credits::ZERO));
    }
}
