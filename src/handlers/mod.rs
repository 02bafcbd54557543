//! Command Handlers module
//!
//! Handlers validate caller input, run the ledger operations against the
//! injected store and log the outcome. They hold no balance state of their
//! own.

mod commands;
pub mod rules;
mod transfer_handler;
pub mod verification;
mod wallet_handler;


pub use commands::*;
pub use rules::{validate_transfer_rules, RuleVerdict};
pub use transfer_handler::TransferHandler;
pub use verification::{VerificationReport, VerificationService};
pub use wallet_handler::{WalletHandler, WalletStats, DEFAULT_HISTORY_LIMIT, MAX_HISTORY_LIMIT};

use crate::config::LedgerConfig;
use crate::store::SharedStore;

/// All handlers over one store, shared by the HTTP state and the jobs
#[derive(Clone)]
pub struct Ledger {
    pub wallets: WalletHandler,
    pub transfers: TransferHandler,
    pub verification: VerificationService,
}

impl Ledger {
    pub fn new(store: SharedStore, config: LedgerConfig) -> Self {
        let wallets = WalletHandler::new(store.clone(), config);
        let transfers = TransferHandler::new(wallets.clone(), config.rules);
        Self {
            wallets,
            transfers,
            verification: VerificationService::new(store),
        }
    }

    pub fn store(&self) -> &SharedStore {
        self.wallets.store()
    }
}
