//! Scheduled Jobs
//!
//! Batch processors for credit expiry and auto-transfers, and a scheduler
//! that runs them periodically inside the server. Both processors are safe
//! to run repeatedly and concurrently: expiry records are consumed under a
//! lock and auto-transfers re-check the balance on every run.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};

use crate::domain::{ExpiryOutcome, ExpiryRecord, OperationContext, Transfer};
use crate::handlers::Ledger;
use crate::store::{SharedStore, StoreError};

// =========================================================================
// Credit expiry
// =========================================================================

/// Result of one expiry run
#[derive(Debug, Clone, Default)]
pub struct ExpiryRunReport {
    /// Records consumed by this run
    pub expired: Vec<ExpiryRecord>,
    /// Balance or unfrozen balance did not cover the amount; left for the
    /// next run
    pub deferred: usize,
    /// Consumed by an overlapping run
    pub skipped: usize,
    pub errors: Vec<String>,
}

/// Expire every due record. Per-record failures are logged and collected;
/// they never stop the batch.
pub async fn process_credit_expiry(store: &SharedStore, now: DateTime<Utc>) -> Result<ExpiryRunReport, JobError> {
    let context = OperationContext::scheduler();
    let due = store.due_expiries(now).await?;
    let mut report = ExpiryRunReport::default();

    for record in due {
        match store.expire(record.id, now).await {
            Ok(ExpiryOutcome::Expired(record)) => {
                tracing::info!(
                    expiry_id = %record.id,
                    wallet_id = %record.wallet_id,
                    amount = %record.amount,
                    correlation_id = ?context.correlation_id,
                    "Credits expired"
                );
                report.expired.push(record);
            }
            Ok(ExpiryOutcome::Deferred) => {
                tracing::info!(
                    expiry_id = %record.id,
                    wallet_id = %record.wallet_id,
                    amount = %record.amount,
                    "Expiry deferred: available balance does not cover amount"
                );
                report.deferred += 1;
            }
            Ok(ExpiryOutcome::AlreadyProcessed) => report.skipped += 1,
            Err(e) => {
                tracing::error!(
                    expiry_id = %record.id,
                    wallet_id = %record.wallet_id,
                    error = %e,
                    correlation_id = ?context.correlation_id,
                    "Expiry failed"
                );
                report.errors.push(format!("expiry {}: {}", record.id, e));
            }
        }
    }

    tracing::info!(
        expired = report.expired.len(),
        deferred = report.deferred,
        skipped = report.skipped,
        errors = report.errors.len(),
        "Credit expiry run finished"
    );
    Ok(report)
}

// =========================================================================
// Auto-transfers
// =========================================================================

/// Result of one auto-transfer run
#[derive(Debug, Clone, Default)]
pub struct AutoTransferReport {
    /// Transfers attempted, completed or failed
    pub transfers: Vec<Transfer>,
    /// Wallets below their threshold, inactive, or with incomplete settings
    pub skipped: usize,
    pub errors: Vec<String>,
}

impl AutoTransferReport {
    pub fn completed(&self) -> usize {
        self.transfers
            .iter()
            .filter(|t| t.status == crate::domain::TransferStatus::Completed)
            .count()
    }
}

/// For every wallet with auto-transfer enabled whose available balance has
/// reached its threshold, move exactly the threshold to the recipient.
/// One attempt per wallet; a failure for one wallet does not stop the rest.
pub async fn process_auto_transfers(ledger: &Ledger) -> Result<AutoTransferReport, JobError> {
    let store = ledger.store();
    let context = OperationContext::scheduler();
    let mut report = AutoTransferReport::default();

    for settings in store.auto_transfer_settings().await? {
        let Some((threshold, recipient)) = settings.auto_transfer() else {
            report.skipped += 1;
            continue;
        };

        let wallet = match store.get_wallet(settings.wallet_id).await {
            Ok(Some(wallet)) => wallet,
            Ok(None) => {
                report.errors.push(format!("wallet {} not found", settings.wallet_id));
                continue;
            }
            Err(e) => {
                tracing::error!(wallet_id = %settings.wallet_id, error = %e, "Auto-transfer lookup failed");
                report.errors.push(format!("wallet {}: {}", settings.wallet_id, e));
                continue;
            }
        };

        if !wallet.is_active() || wallet.available() < threshold.credits() {
            report.skipped += 1;
            continue;
        }

        let message = Some("auto-transfer".to_string());
        match ledger
            .transfers
            .transfer_from_wallet(&wallet, recipient, threshold, message, &context)
            .await
        {
            Ok(outcome) => {
                if let Some(e) = &outcome.error {
                    tracing::error!(
                        wallet_id = %wallet.id,
                        transfer_id = %outcome.transfer.id,
                        error = %e,
                        "Auto-transfer failed"
                    );
                    report.errors.push(format!("wallet {}: {}", wallet.id, e));
                }
                report.transfers.push(outcome.transfer);
            }
            Err(e) => {
                tracing::error!(wallet_id = %wallet.id, error = %e, "Auto-transfer failed");
                report.errors.push(format!("wallet {}: {}", wallet.id, e));
            }
        }
    }

    tracing::info!(
        transfers = report.transfers.len(),
        completed = report.completed(),
        skipped = report.skipped,
        errors = report.errors.len(),
        "Auto-transfer run finished"
    );
    Ok(report)
}

// =========================================================================
// Job Scheduler
// =========================================================================

/// Configuration for job scheduler
#[derive(Debug, Clone)]
pub struct JobSchedulerConfig {
    /// Interval for credit expiry (default: 1 hour)
    pub expiry_interval: Duration,
    /// Interval for auto-transfers (default: 1 hour)
    pub auto_transfer_interval: Duration,
}

impl Default for JobSchedulerConfig {
    fn default() -> Self {
        Self {
            expiry_interval: Duration::from_secs(3600),
            auto_transfer_interval: Duration::from_secs(3600),
        }
    }
}

impl JobSchedulerConfig {
    pub fn from_config(config: &crate::Config) -> Self {
        Self {
            expiry_interval: Duration::from_secs(config.expiry_interval_secs),
            auto_transfer_interval: Duration::from_secs(config.auto_transfer_interval_secs),
        }
    }
}

/// Job Scheduler - runs the batch processors periodically
pub struct JobScheduler {
    ledger: Ledger,
    config: JobSchedulerConfig,
}

impl JobScheduler {
    /// Create a new job scheduler
    pub fn new(ledger: Ledger) -> Self {
        Self {
            ledger,
            config: JobSchedulerConfig::default(),
        }
    }

    /// Create with custom configuration
    pub fn with_config(ledger: Ledger, config: JobSchedulerConfig) -> Self {
        Self { ledger, config }
    }

    /// Start the job scheduler in the background
    /// Returns a handle that can be used to abort the scheduler
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Run the scheduler loop
    async fn run(&self) {
        tracing::info!(
            expiry_interval_secs = self.config.expiry_interval.as_secs(),
            auto_transfer_interval_secs = self.config.auto_transfer_interval.as_secs(),
            "Job scheduler started"
        );

        let mut expiry_interval = interval(self.config.expiry_interval);
        let mut auto_transfer_interval = interval(self.config.auto_transfer_interval);
        expiry_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        auto_transfer_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = expiry_interval.tick() => {
                    if let Err(e) = process_credit_expiry(self.ledger.store(), Utc::now()).await {
                        tracing::error!(error = %e, "Credit expiry run failed");
                    }
                }
                _ = auto_transfer_interval.tick() => {
                    if let Err(e) = process_auto_transfers(&self.ledger).await {
                        tracing::error!(error = %e, "Auto-transfer run failed");
                    }
                }
            }
        }
    }

    /// Run all jobs once (for manual trigger or testing)
    pub async fn run_all_once(&self) -> JobReport {
        run_selected(&self.ledger, true, true).await
    }
}

/// Run the selected processors once and collect their results
pub async fn run_selected(ledger: &Ledger, expiry: bool, auto_transfers: bool) -> JobReport {
    let mut report = JobReport::default();

    if expiry {
        match process_credit_expiry(ledger.store(), Utc::now()).await {
            Ok(run) => report.expiry = Some(run),
            Err(e) => report.errors.push(format!("Credit expiry: {}", e)),
        }
    }

    if auto_transfers {
        match process_auto_transfers(ledger).await {
            Ok(run) => report.auto_transfers = Some(run),
            Err(e) => report.errors.push(format!("Auto-transfers: {}", e)),
        }
    }

    report.completed_at = Utc::now();
    report
}

/// Report from running the batch processors
#[derive(Debug, Clone, Default)]
pub struct JobReport {
    pub expiry: Option<ExpiryRunReport>,
    pub auto_transfers: Option<AutoTransferReport>,
    /// Runs that could not start at all
    pub errors: Vec<String>,
    pub completed_at: DateTime<Utc>,
}

/// Job execution errors
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use crate::domain::{CreditSource, Credits, SettingsChanges, TransferStatus, WalletKind};
    use crate::handlers::{AddCreditsCommand, WalletOpCommand};
    use crate::store::MemoryStore;
    use chrono::Duration as ChronoDuration;
    use std::sync::Arc;

    fn ledger() -> Ledger {
        Ledger::new(Arc::new(MemoryStore::new()), LedgerConfig::default())
    }

    fn credits(s: &str) -> Credits {
        s.parse().unwrap()
    }

    async fn grant_trip(ledger: &Ledger, owner: &str, amount: &str, days: u32) {
        ledger
            .wallets
            .add_credits(
                AddCreditsCommand::new(owner, amount)
                    .with_source(CreditSource::Trip)
                    .with_lifetime_days(days),
                &OperationContext::new(),
            )
            .await
            .unwrap();
    }

    async fn balance(ledger: &Ledger, owner: &str) -> Credits {
        ledger
            .wallets
            .get_balance(owner, WalletKind::Employee)
            .await
            .unwrap()
            .balance
    }

    #[tokio::test]
    async fn test_expiry_is_idempotent() {
        let ledger = ledger();
        grant_trip(&ledger, "w", "3", 1).await;
        grant_trip(&ledger, "w", "2", 30).await;

        let later = Utc::now() + ChronoDuration::days(2);
        let first = process_credit_expiry(ledger.store(), later).await.unwrap();
        assert_eq!(first.expired.len(), 1);
        assert_eq!(balance(&ledger, "w").await, credits("2"));

        let second = process_credit_expiry(ledger.store(), later).await.unwrap();
        assert!(second.expired.is_empty());
        assert_eq!(balance(&ledger, "w").await, credits("2"));
    }

    #[tokio::test]
    async fn test_expiry_defers_when_balance_short() {
        let ledger = ledger();
        grant_trip(&ledger, "w", "5", 1).await;
        ledger
            .wallets
            .deduct_credits(WalletOpCommand::new("w", "4"), &OperationContext::new())
            .await
            .unwrap();

        let later = Utc::now() + ChronoDuration::days(2);
        let report = process_credit_expiry(ledger.store(), later).await.unwrap();
        assert!(report.expired.is_empty());
        assert_eq!(report.deferred, 1);
        assert_eq!(balance(&ledger, "w").await, credits("1"));

        let records = ledger.wallets.get_expiries("w", WalletKind::Employee).await.unwrap();
        assert!(!records[0].processed);
    }

    #[tokio::test]
    async fn test_nothing_due_before_expiry_date() {
        let ledger = ledger();
        grant_trip(&ledger, "w", "5", 10).await;

        let report = process_credit_expiry(ledger.store(), Utc::now()).await.unwrap();
        assert!(report.expired.is_empty());
        assert_eq!(report.deferred, 0);
    }

    async fn enable_auto_transfer(ledger: &Ledger, owner: &str, threshold: &str, recipient: &str) {
        ledger
            .wallets
            .update_settings(
                owner,
                WalletKind::Employee,
                SettingsChanges {
                    auto_transfer_enabled: Some(true),
                    auto_transfer_threshold: Some(credits(threshold)),
                    auto_transfer_recipient: Some(crate::domain::OwnerId::new(recipient).unwrap()),
                    ..Default::default()
                },
                &OperationContext::new(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_auto_transfer_moves_threshold() {
        let ledger = ledger();
        ledger
            .wallets
            .add_credits(AddCreditsCommand::new("alice", "12"), &OperationContext::new())
            .await
            .unwrap();
        enable_auto_transfer(&ledger, "alice", "5", "pool").await;
        enable_auto_transfer(&ledger, "bob", "5", "pool").await;

        let report = process_auto_transfers(&ledger).await.unwrap();
        assert_eq!(report.transfers.len(), 1);
        assert_eq!(report.completed(), 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.transfers[0].status, TransferStatus::Completed);

        assert_eq!(balance(&ledger, "alice").await, credits("7"));
        assert_eq!(balance(&ledger, "pool").await, credits("5"));

        // One attempt per wallet per run
        let report = process_auto_transfers(&ledger).await.unwrap();
        assert_eq!(report.completed(), 1);
        assert_eq!(balance(&ledger, "alice").await, credits("2"));
    }

    #[tokio::test]
    async fn test_run_selected() {
        let ledger = ledger();
        let report = run_selected(&ledger, true, false).await;
        assert!(report.expiry.is_some());
        assert!(report.auto_transfers.is_none());
        assert!(report.errors.is_empty());
    }

    #[test]
    fn test_job_scheduler_config_default() {
        let config = JobSchedulerConfig::default();
        assert_eq!(config.expiry_interval, Duration::from_secs(3600));
        assert_eq!(config.auto_transfer_interval, Duration::from_secs(3600));
    }
}
