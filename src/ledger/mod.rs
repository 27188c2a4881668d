//! Wagering ledger
//!
//! Balance store, odds engine, ticket manager, outcome registry and
//! settlement engine sharing one transactional store. Locks are always taken
//! in the order user record, match records (by id), ticket record.

pub mod balance;
pub mod odds;
pub mod outcomes;
pub mod settlement;
pub mod tickets;
pub mod types;

pub use balance::BalanceStore;
pub use odds::OddsEngine;
pub use outcomes::MatchRegistry;
pub use settlement::{SettlementEngine, SettlementReport, TicketSettlement};
pub use tickets::TicketManager;
pub use types::*;

use crate::config::WagerConfig;
use crate::errors::LedgerResult;
use crate::metrics::LedgerMetrics;
use crate::storage::LedgerStorage;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;

/// Wired-up ledger components
pub struct Ledger {
    pub balances: Arc<BalanceStore>,
    pub odds: Arc<OddsEngine>,
    pub tickets: TicketManager,
    pub matches: MatchRegistry,
    pub settlement: Arc<SettlementEngine>,
    pub metrics: Arc<LedgerMetrics>,
}

impl Ledger {
    /// Open storage, build every component, and finish any interrupted settlement
    pub fn open(config: &WagerConfig) -> LedgerResult<Self> {
        config.validate()?;
        let storage = Arc::new(LedgerStorage::open(&config.storage)?);
        let metrics = Arc::new(LedgerMetrics::new());

        let balances = Arc::new(BalanceStore::new(storage.clone(), &config.ledger));
        let odds = Arc::new(OddsEngine::new(storage.clone(), config.odds.clone()));
        let settlement = Arc::new(SettlementEngine::new(
            storage.clone(),
            balances.clone(),
            metrics.clone(),
        ));
        let tickets = TicketManager::new(
            storage.clone(),
            balances.clone(),
            odds.clone(),
            config.ledger.clone(),
            metrics.clone(),
        );
        let matches = MatchRegistry::new(storage, settlement.clone(), metrics.clone());

        let ledger = Self {
            balances,
            odds,
            tickets,
            matches,
            settlement,
            metrics,
        };

        if config.ledger.recover_on_start {
            let report = ledger.settlement.recover_unsettled()?;
            if report.settled > 0 || report.failed > 0 {
                info!(
                    settled = report.settled,
                    failed = report.failed,
                    "Finished interrupted settlements"
                );
            }
        }

        Ok(ledger)
    }

    /// Register an account, counting new registrations
    pub fn register(
        &self,
        user_id: &str,
        role: Role,
        display_name: Option<String>,
    ) -> LedgerResult<UserAccount> {
        let existed = self.balances.account(user_id).is_ok();
        let account = self.balances.open_account(user_id, role, display_name)?;
        if !existed {
            self.metrics.record_account_opened();
        }
        Ok(account)
    }

    /// Debit requested by a trusted side service on behalf of `user_id`
    pub fn deduct_coins(&self, user_id: &str, amount: Decimal) -> LedgerResult<Decimal> {
        let balance = self.balances.debit(user_id, amount)?;
        self.metrics.record_external_debit(amount);
        info!(user_id, %amount, %balance, "External debit applied");
        Ok(balance)
    }

    /// Match with its current quotes
    pub fn match_view(&self, match_id: &str) -> LedgerResult<(Match, OddsSnapshot)> {
        let m = self.matches.get_match(match_id)?;
        let odds = self.odds.snapshot_of(&m);
        Ok((m, odds))
    }
}
