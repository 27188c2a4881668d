//! Wager Ticket Manager
//!
//! A ticket is created in a single transaction that holds the bettor's
//! account lock and the locks of every match it touches (taken in id order).
//! Inside it the stake is debited, each leg receives the current rate for its
//! side, the per-side leg counters move, and the ticket with its index rows
//! is written. Any failure drops the transaction and nothing is persisted.

use super::balance::{apply_debit, validate_amount, BalanceStore};
use super::odds::OddsEngine;
use super::settlement::compute_payout;
use super::types::{
    validate_id, LegRequest, LegResolution, Match, SettlementState, WagerLeg, WagerTicket,
};
use crate::config::LedgerConfig;
use crate::errors::{LedgerError, LedgerResult};
use crate::metrics::LedgerMetrics;
use crate::storage::{
    lock_json, match_key, match_ticket_key, put_json, put_marker, ticket_key, ticket_prefix,
    user_ticket_key, user_ticket_prefix, LedgerStorage,
};
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub struct TicketManager {
    storage: Arc<LedgerStorage>,
    balances: Arc<BalanceStore>,
    odds: Arc<OddsEngine>,
    config: LedgerConfig,
    metrics: Arc<LedgerMetrics>,
}

impl TicketManager {
    pub fn new(
        storage: Arc<LedgerStorage>,
        balances: Arc<BalanceStore>,
        odds: Arc<OddsEngine>,
        config: LedgerConfig,
        metrics: Arc<LedgerMetrics>,
    ) -> Self {
        Self {
            storage,
            balances,
            odds,
            config,
            metrics,
        }
    }

    /// Place a ticket, debiting `total_stake` from `user_id`
    pub fn create_ticket(
        &self,
        user_id: &str,
        legs: &[LegRequest],
        total_stake: Decimal,
    ) -> LedgerResult<WagerTicket> {
        let result = self
            .validate(legs, total_stake)
            .and_then(|_| self.place(user_id, legs, total_stake));

        match result {
            Ok(ticket) => {
                self.metrics.record_ticket_created(total_stake);
                info!(
                    user_id,
                    ticket_id = %ticket.id,
                    legs = ticket.legs.len(),
                    stake = %total_stake,
                    "Ticket created"
                );
                Ok(ticket)
            }
            Err(e) => {
                self.metrics.record_ticket_rejected();
                warn!(user_id, stake = %total_stake, error = %e, "Ticket rejected");
                Err(e)
            }
        }
    }

    fn validate(&self, legs: &[LegRequest], total_stake: Decimal) -> LedgerResult<()> {
        validate_amount(total_stake, "stake")?;
        if total_stake < self.config.min_stake {
            return Err(LedgerError::Validation(format!(
                "stake must be at least {}",
                self.config.min_stake
            )));
        }
        if legs.is_empty() {
            return Err(LedgerError::validation("ticket needs at least one leg"));
        }
        if legs.len() > self.config.max_legs_per_ticket {
            return Err(LedgerError::Validation(format!(
                "ticket has {} legs, maximum is {}",
                legs.len(),
                self.config.max_legs_per_ticket
            )));
        }

        let mut seen = HashSet::with_capacity(legs.len());
        for leg in legs {
            validate_id("match", &leg.match_id).map_err(LedgerError::Validation)?;
            if !seen.insert(leg.match_id.as_str()) {
                return Err(LedgerError::Validation(format!(
                    "match {} appears more than once",
                    leg.match_id
                )));
            }
        }
        Ok(())
    }

    fn place(
        &self,
        user_id: &str,
        legs: &[LegRequest],
        total_stake: Decimal,
    ) -> LedgerResult<WagerTicket> {
        self.balances.with_user_lock(user_id, |txn, account| {
            let now = Utc::now();

            // BTreeMap keeps match locks in id order
            let mut matches = BTreeMap::new();
            for leg in legs {
                matches.insert(leg.match_id.as_str(), None::<Match>);
            }
            for (match_id, slot) in matches.iter_mut() {
                let m: Match = lock_json(txn, &match_key(match_id))?
                    .ok_or_else(|| LedgerError::not_found("match", *match_id))?;
                if !m.accepts_bets(now) {
                    return Err(LedgerError::MatchClosed(match_id.to_string()));
                }
                *slot = Some(m);
            }

            apply_debit(account, total_stake)?;

            let ticket_id = Uuid::new_v4().to_string();
            let mut placed = Vec::with_capacity(legs.len());
            for leg in legs {
                let m = matches
                    .get_mut(leg.match_id.as_str())
                    .and_then(Option::as_mut)
                    .ok_or_else(|| LedgerError::not_found("match", leg.match_id.clone()))?;
                let rate = self.odds.quote(&m.pool, leg.side);
                m.pool.record(leg.side);
                m.updated_at = now;
                placed.push(WagerLeg {
                    match_id: leg.match_id.clone(),
                    side: leg.side,
                    rate,
                    paid: false,
                });
            }

            self.check_potential_payout(total_stake, &placed)?;

            for m in matches.values().flatten() {
                put_json(txn, &match_key(&m.id), m)?;
                put_marker(txn, &match_ticket_key(&m.id, &ticket_id))?;
            }

            let ticket = WagerTicket {
                id: ticket_id,
                owner_id: user_id.to_string(),
                total_stake,
                legs: placed,
                created_at: now,
                settlement: SettlementState::Open,
            };
            put_json(txn, &ticket_key(&ticket.id), &ticket)?;
            put_marker(txn, &user_ticket_key(user_id, &ticket.id))?;
            Ok(ticket)
        })
    }

    /// Refuse tickets whose all-legs-won payout would leave the configured range
    fn check_potential_payout(&self, total_stake: Decimal, legs: &[WagerLeg]) -> LedgerResult<()> {
        let best_case: Vec<_> = legs.iter().map(|l| LegResolution::Won(l.rate)).collect();
        let potential = compute_payout(total_stake, &best_case)
            .map_err(|_| LedgerError::validation("potential payout out of range"))?
            .unwrap_or(Decimal::ZERO);
        if potential > self.config.max_potential_payout {
            return Err(LedgerError::Validation(format!(
                "potential payout {} exceeds maximum {}",
                potential, self.config.max_potential_payout
            )));
        }
        Ok(())
    }

    /// Owner-scoped read; another user's ticket is reported as missing
    pub fn get_ticket(&self, ticket_id: &str, owner_id: &str) -> LedgerResult<WagerTicket> {
        match self.storage.get_json::<WagerTicket>(&ticket_key(ticket_id))? {
            Some(ticket) if ticket.owner_id == owner_id => Ok(ticket),
            _ => Err(LedgerError::not_found("ticket", ticket_id)),
        }
    }

    /// A user's tickets, newest first
    pub fn list_tickets(&self, owner_id: &str) -> LedgerResult<Vec<WagerTicket>> {
        let ids = self.storage.scan_index_ids(&user_ticket_prefix(owner_id))?;
        let mut tickets = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(ticket) = self.storage.get_json::<WagerTicket>(&ticket_key(&id))? {
                tickets.push(ticket);
            }
        }
        tickets.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tickets)
    }

    pub fn list_all_tickets(&self) -> LedgerResult<Vec<WagerTicket>> {
        let mut tickets: Vec<WagerTicket> = self.storage.scan_json(ticket_prefix())?;
        tickets.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tickets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WagerConfig;
    use crate::ledger::types::{NewMatch, Role, Side};
    use crate::ledger::Ledger;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn setup() -> (tempfile::TempDir, Ledger) {
        let dir = tempfile::tempdir().unwrap();
        let config = WagerConfig::for_testing(dir.path().join("db"));
        let ledger = Ledger::open(&config).unwrap();
        ledger.balances.open_account("alice", Role::User, None).unwrap();
        (dir, ledger)
    }

    fn fixture(ledger: &Ledger, id: &str, starts_in: Duration) {
        let start = Utc::now() + starts_in;
        ledger
            .matches
            .create_match(NewMatch {
                id: Some(id.to_string()),
                side_a_team: "red".to_string(),
                side_b_team: "blue".to_string(),
                sport_type: "football".to_string(),
                start_time: start,
                end_time: start + Duration::hours(2),
            })
            .unwrap();
    }

    fn leg(match_id: &str, side: Side) -> LegRequest {
        LegRequest {
            match_id: match_id.to_string(),
            side,
        }
    }

    #[test]
    fn test_create_ticket_debits_and_freezes_rates() {
        let (_dir, ledger) = setup();
        fixture(&ledger, "m1", Duration::hours(1));
        fixture(&ledger, "m2", Duration::hours(1));

        let ticket = ledger
            .tickets
            .create_ticket("alice", &[leg("m2", Side::B), leg("m1", Side::A)], dec!(88))
            .unwrap();

        assert_eq!(ticket.legs.len(), 2);
        assert_eq!(ticket.legs[0].match_id, "m2");
        assert!(ticket.legs.iter().all(|l| l.rate == dec!(2.00) && !l.paid));
        assert_eq!(ledger.balances.balance("alice").unwrap(), dec!(800.00));

        let m1 = ledger.matches.get_match("m1").unwrap();
        assert_eq!(m1.pool.legs_a, 1);
        assert_eq!(ledger.odds.compute_rate("m1", Side::A).unwrap(), dec!(1.50));
        assert_eq!(ledger.odds.compute_rate("m1", Side::B).unwrap(), dec!(3.00));
    }

    #[test]
    fn test_later_bets_do_not_touch_placed_legs() {
        let (_dir, ledger) = setup();
        fixture(&ledger, "m1", Duration::hours(1));
        let first = ledger
            .tickets
            .create_ticket("alice", &[leg("m1", Side::A)], dec!(10))
            .unwrap();
        ledger
            .tickets
            .create_ticket("alice", &[leg("m1", Side::A)], dec!(10))
            .unwrap();

        let stored = ledger.tickets.get_ticket(&first.id, "alice").unwrap();
        assert_eq!(stored.legs[0].rate, dec!(2.00));
    }

    #[test]
    fn test_started_match_is_closed() {
        let (_dir, ledger) = setup();
        fixture(&ledger, "live", Duration::milliseconds(50));
        std::thread::sleep(std::time::Duration::from_millis(100));

        match ledger.tickets.create_ticket("alice", &[leg("live", Side::A)], dec!(10)) {
            Err(LedgerError::MatchClosed(id)) => assert_eq!(id, "live"),
            other => panic!("Expected match closed, got {:?}", other),
        }
        assert_eq!(ledger.balances.balance("alice").unwrap(), dec!(888.00));
    }

    #[test]
    fn test_failed_leg_rolls_back_whole_ticket() {
        let (_dir, ledger) = setup();
        fixture(&ledger, "m1", Duration::hours(1));

        let result = ledger
            .tickets
            .create_ticket("alice", &[leg("m1", Side::A), leg("zz-missing", Side::B)], dec!(10));
        assert!(matches!(result, Err(LedgerError::NotFound { entity: "match", .. })));

        assert_eq!(ledger.balances.balance("alice").unwrap(), dec!(888.00));
        assert_eq!(ledger.matches.get_match("m1").unwrap().pool.legs_a, 0);
        assert!(ledger.tickets.list_tickets("alice").unwrap().is_empty());
    }

    #[test]
    fn test_payload_validation() {
        let (_dir, ledger) = setup();
        fixture(&ledger, "m1", Duration::hours(1));
        let tickets = &ledger.tickets;

        assert!(matches!(
            tickets.create_ticket("alice", &[leg("m1", Side::A)], dec!(0)),
            Err(LedgerError::Validation(_))
        ));
        assert!(matches!(
            tickets.create_ticket("alice", &[leg("m1", Side::A)], dec!(1.001)),
            Err(LedgerError::Validation(_))
        ));
        assert!(matches!(
            tickets.create_ticket("alice", &[], dec!(5)),
            Err(LedgerError::Validation(_))
        ));
        assert!(matches!(
            tickets.create_ticket("alice", &[leg("m1", Side::A), leg("m1", Side::B)], dec!(5)),
            Err(LedgerError::Validation(_))
        ));
    }

    #[test]
    fn test_potential_payout_is_capped_at_placement() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = WagerConfig::for_testing(dir.path().join("db"));
        config.ledger.max_potential_payout = dec!(500);
        let ledger = Ledger::open(&config).unwrap();
        ledger.balances.open_account("alice", Role::User, None).unwrap();
        fixture(&ledger, "m1", Duration::hours(1));
        fixture(&ledger, "m2", Duration::hours(1));

        // 250 × 2.00 = 500 is allowed, 150 × 3.00 × 2.00 = 900 is not
        ledger
            .tickets
            .create_ticket("alice", &[leg("m1", Side::A)], dec!(250))
            .unwrap();
        assert!(matches!(
            ledger
                .tickets
                .create_ticket("alice", &[leg("m1", Side::B), leg("m2", Side::A)], dec!(150)),
            Err(LedgerError::Validation(_))
        ));
        assert_eq!(ledger.balances.balance("alice").unwrap(), dec!(638.00));
        assert_eq!(ledger.matches.get_match("m2").unwrap().pool.legs_a, 0);
    }

    #[test]
    fn test_payout_overflow_rejected_before_settlement() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = WagerConfig::for_testing(dir.path().join("db"));
        config.ledger.starting_balance = Decimal::MAX;
        config.ledger.max_potential_payout = Decimal::MAX;
        let ledger = Ledger::open(&config).unwrap();
        ledger.balances.open_account("whale", Role::User, None).unwrap();
        fixture(&ledger, "m1", Duration::hours(1));

        let stake = Decimal::MAX - Decimal::ONE;
        match ledger.tickets.create_ticket("whale", &[leg("m1", Side::A)], stake) {
            Err(LedgerError::Validation(msg)) => assert!(msg.contains("out of range")),
            other => panic!("Expected validation error, got {:?}", other),
        }
        assert_eq!(ledger.balances.balance("whale").unwrap(), Decimal::MAX);
    }

    #[test]
    fn test_insufficient_funds() {
        let (_dir, ledger) = setup();
        fixture(&ledger, "m1", Duration::hours(1));
        assert!(matches!(
            ledger.tickets.create_ticket("alice", &[leg("m1", Side::A)], dec!(888.01)),
            Err(LedgerError::InsufficientFunds { .. })
        ));
        assert_eq!(ledger.matches.get_match("m1").unwrap().pool.legs_a, 0);
    }

    #[test]
    fn test_tickets_are_owner_scoped() {
        let (_dir, ledger) = setup();
        ledger.balances.open_account("bob", Role::User, None).unwrap();
        fixture(&ledger, "m1", Duration::hours(1));

        let ticket = ledger
            .tickets
            .create_ticket("alice", &[leg("m1", Side::A)], dec!(10))
            .unwrap();
        assert!(ledger.tickets.get_ticket(&ticket.id, "alice").is_ok());
        assert!(matches!(
            ledger.tickets.get_ticket(&ticket.id, "bob"),
            Err(LedgerError::NotFound { .. })
        ));
        assert!(ledger.tickets.list_tickets("bob").unwrap().is_empty());
        assert_eq!(ledger.tickets.list_all_tickets().unwrap().len(), 1);
    }
}
