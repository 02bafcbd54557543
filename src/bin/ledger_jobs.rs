//! Batch runner for credit expiry and auto-transfers
//!
//! Run with: cargo run --bin ledger_jobs -- [--process-expiry] [--process-transfers]
//!
//! With neither flag both processors run. Intended for cron.

use std::time::Instant;

use carbon_ledger::jobs::run_selected;
use carbon_ledger::{init_tracing, store, Config, Ledger};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut expiry = args.iter().any(|a| a == "--process-expiry");
    let mut transfers = args.iter().any(|a| a == "--process-transfers");
    if let Some(unknown) = args
        .iter()
        .find(|a| *a != "--process-expiry" && *a != "--process-transfers")
    {
        anyhow::bail!("unknown argument: {} (expected --process-expiry or --process-transfers)", unknown);
    }
    if !expiry && !transfers {
        expiry = true;
        transfers = true;
    }

    let config = Config::from_env()?;
    init_tracing(config.log_format);

    let store = store::connect(&config).await?;
    let ledger = Ledger::new(store, config.ledger);

    let start = Instant::now();
    let report = run_selected(&ledger, expiry, transfers).await;

    if let Some(run) = &report.expiry {
        println!("=== Credit expiry ===");
        for record in &run.expired {
            println!(
                "Expired {} credits from wallet {} (due {})",
                record.amount, record.wallet_id, record.expiry_date
            );
        }
        println!(
            "Expired: {}  Deferred: {}  Skipped: {}  Errors: {}",
            run.expired.len(),
            run.deferred,
            run.skipped,
            run.errors.len()
        );
        for error in &run.errors {
            println!("  error: {}", error);
        }
    }

    if let Some(run) = &report.auto_transfers {
        println!("=== Auto-transfers ===");
        for transfer in &run.transfers {
            println!(
                "Transfer {} of {} credits from {} to {}: {}",
                transfer.id, transfer.amount, transfer.from_owner_id, transfer.to_owner_id, transfer.status
            );
        }
        println!(
            "Completed: {}  Skipped: {}  Errors: {}",
            run.completed(),
            run.skipped,
            run.errors.len()
        );
        for error in &run.errors {
            println!("  error: {}", error);
        }
    }

    for error in &report.errors {
        println!("Run failed: {}", error);
    }
    println!("Finished in {:.2}s", start.elapsed().as_secs_f64());

    if !report.errors.is_empty() {
        anyhow::bail!("{} batch run(s) failed", report.errors.len());
    }
    Ok(())
}
