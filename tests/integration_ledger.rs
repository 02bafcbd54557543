//! Ledger Integration Tests
//!
//! End-to-end ledger behaviour through the public handlers, against the
//! in-memory store.

use chrono::{Duration, Utc};

use carbon_ledger::domain::{
    CreditSource, Credits, DomainError, OperationContext, OwnerId, SettingsChanges, TransactionKind, TransferStatus,
    WalletKind,
};
use carbon_ledger::handlers::{AddCreditsCommand, TransferCommand, WalletOpCommand};
use carbon_ledger::jobs::{process_auto_transfers, process_credit_expiry, run_selected};
use carbon_ledger::config::TransferRules;
use carbon_ledger::{AppError, Ledger, LedgerConfig};

mod common;
use common::{credits, memory_ledger, memory_ledger_with};

fn ctx() -> OperationContext {
    OperationContext::new()
}

async fn fund(ledger: &Ledger, owner: &str, amount: &str) {
    ledger
        .wallets
        .add_credits(AddCreditsCommand::new(owner, amount).with_lifetime_days(0), &ctx())
        .await
        .unwrap();
}

async fn total_balance(ledger: &Ledger, owners: &[&str]) -> Credits {
    let mut total = Credits::ZERO;
    for owner in owners {
        let view = ledger.wallets.get_balance(owner, WalletKind::Employee).await.unwrap();
        assert_eq!(
            view.balance,
            view.available_balance.checked_add(view.frozen_balance).unwrap(),
            "balance invariant broken for {}",
            owner
        );
        assert!(!view.available_balance.is_negative());
        assert!(!view.frozen_balance.is_negative());
        total = total.checked_add(view.balance).unwrap();
    }
    total
}

async fn assert_verified(ledger: &Ledger, owner: &str) {
    let report = ledger.verification.verify_wallet(owner, WalletKind::Employee).await.unwrap();
    assert!(report.is_valid, "verification failed for {}: {:?}", owner, report.continuity.issues);
}

#[tokio::test]
async fn test_transfers_conserve_credits() {
    let ledger = memory_ledger();
    let owners = ["alice", "bob", "carol"];
    fund(&ledger, "alice", "30").await;
    fund(&ledger, "bob", "10").await;
    ledger.wallets.get_or_create_wallet("carol", WalletKind::Employee).await.unwrap();

    let before = total_balance(&ledger, &owners).await;

    let moves = [
        ("alice", "bob", "7.5"),
        ("bob", "carol", "12"),
        ("carol", "alice", "20"), // carol only has 12: fails
        ("carol", "alice", "2.25"),
        ("bob", "alice", "100"), // fails
    ];
    for (from, to, amount) in moves {
        let outcome = ledger
            .transfers
            .transfer_credits(TransferCommand::new(from, to, amount), &ctx())
            .await
            .unwrap();
        if !outcome.is_success() {
            assert_eq!(outcome.transfer.status, TransferStatus::Failed);
        }
        assert_eq!(total_balance(&ledger, &owners).await, before);
    }

    assert_eq!(
        ledger.wallets.get_balance("alice", WalletKind::Employee).await.unwrap().balance,
        credits("24.75")
    );
    for owner in owners {
        assert_verified(&ledger, owner).await;
    }
}

#[tokio::test]
async fn test_failed_transfer_leaves_wallets_untouched() {
    let ledger = memory_ledger();
    fund(&ledger, "a", "3").await;
    ledger.wallets.get_or_create_wallet("b", WalletKind::Employee).await.unwrap();

    let outcome = ledger
        .transfers
        .transfer_credits(TransferCommand::new("a", "b", "5"), &ctx())
        .await
        .unwrap();

    assert_eq!(outcome.transfer.status, TransferStatus::Failed);
    assert!(matches!(
        outcome.error,
        Some(DomainError::InsufficientAvailableBalance { .. })
    ));
    assert!(outcome.transfer.failure_reason.is_some());
    assert_eq!(
        ledger.wallets.get_balance("a", WalletKind::Employee).await.unwrap().balance,
        credits("3")
    );
    assert_eq!(
        ledger.wallets.get_balance("b", WalletKind::Employee).await.unwrap().balance,
        Credits::ZERO
    );

    // Only the original credit is in a's ledger
    let history = ledger
        .wallets
        .get_transaction_history("a", WalletKind::Employee, None, None)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);

    // The failed attempt is still inspectable
    let stored = ledger.transfers.get_transfer(outcome.transfer.id).await.unwrap();
    assert_eq!(stored.status, TransferStatus::Failed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_opposite_transfers_do_not_deadlock() {
    let ledger = memory_ledger();
    fund(&ledger, "left", "100").await;
    fund(&ledger, "right", "100").await;

    let mut handles = Vec::new();
    for i in 0..40 {
        let ledger = ledger.clone();
        let (from, to) = if i % 2 == 0 { ("left", "right") } else { ("right", "left") };
        handles.push(tokio::spawn(async move {
            ledger
                .transfers
                .transfer_credits(TransferCommand::new(from, to, "1"), &OperationContext::new())
                .await
                .unwrap()
        }));
    }

    let mut completed = 0;
    for handle in handles {
        if handle.await.unwrap().is_success() {
            completed += 1;
        }
    }

    assert_eq!(completed, 40);
    assert_eq!(total_balance(&ledger, &["left", "right"]).await, credits("200"));
    assert_verified(&ledger, "left").await;
    assert_verified(&ledger, "right").await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_spends_never_overdraw() {
    let ledger = memory_ledger();
    fund(&ledger, "w", "10").await;

    let mut handles = Vec::new();
    for _ in 0..25 {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move {
            ledger
                .wallets
                .deduct_credits(WalletOpCommand::new("w", "1"), &OperationContext::new())
                .await
        }));
    }

    let mut ok = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => ok += 1,
            Err(AppError::Domain(DomainError::InsufficientAvailableBalance { .. })) => {}
            Err(other) => panic!("unexpected error: {:?}", other),
        }
    }

    assert_eq!(ok, 10);
    let view = ledger.wallets.get_balance("w", WalletKind::Employee).await.unwrap();
    assert_eq!(view.available_balance, Credits::ZERO);
    assert_verified(&ledger, "w").await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_transfers_respect_daily_limit() {
    let ledger = memory_ledger_with(LedgerConfig {
        rules: TransferRules {
            minimum: "0.0001".parse().unwrap(),
            daily_limit: credits("10"),
        },
        ..LedgerConfig::default()
    });
    fund(&ledger, "w", "100").await;

    let mut handles = Vec::new();
    for i in 0..8 {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move {
            let command = TransferCommand::new("w", "r", "6");
            if i % 2 == 0 {
                ledger.transfers.transfer_credits(command, &OperationContext::new()).await
            } else {
                ledger.transfers.create_escrow_transfer(command, &OperationContext::new()).await
            }
        }));
    }

    let mut admitted = 0;
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        match outcome.error {
            None => admitted += 1,
            Some(DomainError::ValidationRejected(_)) => {}
            Some(other) => panic!("unexpected failure: {:?}", other),
        }
    }

    assert_eq!(admitted, 1);
    let view = ledger.wallets.get_balance("w", WalletKind::Employee).await.unwrap();
    assert_eq!(view.available_balance, credits("94"));
    assert_verified(&ledger, "w").await;
}

#[tokio::test]
async fn test_expiry_waits_for_frozen_credits() {
    let ledger = memory_ledger();
    ledger
        .wallets
        .add_credits(AddCreditsCommand::new("w", "5").with_lifetime_days(30), &ctx())
        .await
        .unwrap();
    ledger
        .wallets
        .freeze_credits(WalletOpCommand::new("w", "3"), &ctx())
        .await
        .unwrap();

    let later = Utc::now() + Duration::days(31);
    let report = process_credit_expiry(ledger.store(), later).await.unwrap();
    assert!(report.expired.is_empty());
    assert_eq!(report.deferred, 1);
    assert!(report.errors.is_empty());

    let expiries = ledger.wallets.get_expiries("w", WalletKind::Employee).await.unwrap();
    assert!(!expiries[0].processed);

    // Once released the record expires on the next run
    ledger
        .wallets
        .unfreeze_credits(WalletOpCommand::new("w", "3"), &ctx())
        .await
        .unwrap();
    let report = process_credit_expiry(ledger.store(), later).await.unwrap();
    assert_eq!(report.expired.len(), 1);
    assert_eq!(
        ledger.wallets.get_balance("w", WalletKind::Employee).await.unwrap().balance,
        Credits::ZERO
    );
}

#[tokio::test]
async fn test_expiry_runs_are_idempotent() {
    let ledger = memory_ledger();
    ledger
        .wallets
        .add_credits(
            AddCreditsCommand::new("w", "5")
                .with_source(CreditSource::Trip)
                .with_lifetime_days(30),
            &ctx(),
        )
        .await
        .unwrap();
    fund(&ledger, "w", "2").await;

    let later = Utc::now() + Duration::days(31);
    let first = process_credit_expiry(ledger.store(), later).await.unwrap();
    assert_eq!(first.expired.len(), 1);
    assert!(first.expired[0].is_expired && first.expired[0].processed);

    let second = process_credit_expiry(ledger.store(), later).await.unwrap();
    assert!(second.expired.is_empty());

    let view = ledger.wallets.get_balance("w", WalletKind::Employee).await.unwrap();
    assert_eq!(view.balance, credits("2"));

    let history = ledger
        .wallets
        .get_transaction_history("w", WalletKind::Employee, None, Some(TransactionKind::Expiry))
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].amount, credits("-5"));
    assert_verified(&ledger, "w").await;
}

#[tokio::test]
async fn test_expiry_not_yet_due_is_left_alone() {
    let ledger = memory_ledger();
    ledger
        .wallets
        .add_credits(AddCreditsCommand::new("w", "5").with_lifetime_days(30), &ctx())
        .await
        .unwrap();

    let report = process_credit_expiry(ledger.store(), Utc::now()).await.unwrap();
    assert!(report.expired.is_empty());

    let expiries = ledger.wallets.get_expiries("w", WalletKind::Employee).await.unwrap();
    assert_eq!(expiries.len(), 1);
    assert!(!expiries[0].processed);
}

#[tokio::test]
async fn test_auto_transfer_moves_threshold() {
    let ledger = memory_ledger();
    fund(&ledger, "emp", "25").await;
    ledger
        .wallets
        .update_settings(
            "emp",
            WalletKind::Employee,
            SettingsChanges {
                auto_transfer_enabled: Some(true),
                auto_transfer_threshold: Some(credits("10")),
                auto_transfer_recipient: Some(OwnerId::new("charity").unwrap()),
                ..Default::default()
            },
            &ctx(),
        )
        .await
        .unwrap();

    let report = process_auto_transfers(&ledger).await.unwrap();
    assert_eq!(report.completed(), 1);

    assert_eq!(
        ledger.wallets.get_balance("emp", WalletKind::Employee).await.unwrap().balance,
        credits("15")
    );
    assert_eq!(
        ledger.wallets.get_balance("charity", WalletKind::Employee).await.unwrap().balance,
        credits("10")
    );

    // One attempt per wallet per run
    let report = run_selected(&ledger, false, true).await;
    assert_eq!(report.auto_transfers.unwrap().completed(), 1);
    assert_eq!(
        ledger.wallets.get_balance("emp", WalletKind::Employee).await.unwrap().balance,
        credits("5")
    );

    // Below threshold now
    let report = process_auto_transfers(&ledger).await.unwrap();
    assert_eq!(report.completed(), 0);
    assert_eq!(report.skipped, 1);
}

#[tokio::test]
async fn test_escrow_lifecycle_conserves_credits() {
    let ledger = memory_ledger();
    fund(&ledger, "buyer", "20").await;
    ledger.wallets.get_or_create_wallet("seller", WalletKind::Employee).await.unwrap();

    let held = ledger
        .transfers
        .create_escrow_transfer(TransferCommand::new("buyer", "seller", "8"), &ctx())
        .await
        .unwrap();
    assert!(held.is_success());
    assert_eq!(held.transfer.status, TransferStatus::Pending);

    let view = ledger.wallets.get_balance("buyer", WalletKind::Employee).await.unwrap();
    assert_eq!(view.frozen_balance, credits("8"));
    assert_eq!(view.available_balance, credits("12"));

    let pending = ledger
        .transfers
        .pending_transfers("seller", WalletKind::Employee)
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);

    let settled = ledger.transfers.settle_transfer(held.transfer.id, &ctx()).await.unwrap();
    assert_eq!(settled.transfer.status, TransferStatus::Completed);
    assert_eq!(total_balance(&ledger, &["buyer", "seller"]).await, credits("20"));

    // Settled transfers cannot be resolved again
    let err = ledger.transfers.cancel_transfer(held.transfer.id, &ctx()).await.unwrap_err();
    assert!(matches!(
        err,
        AppError::Domain(DomainError::TransferNotPending { .. })
    ));

    assert_verified(&ledger, "buyer").await;
    assert_verified(&ledger, "seller").await;
}
