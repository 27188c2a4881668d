//! Settlement Engine
//!
//! Turns declared match outcomes into payouts. A pass walks every ticket with
//! a leg on the resolved match and settles the ones whose legs are all
//! decided. Each ticket moves `Open -> Settling -> Settled` under its owner's
//! account lock:
//!
//! 1. claim: compute the payout and record it as `Settling`
//! 2. finish: credit the recorded payout, mark every leg paid, mark `Settled`
//!
//! Both steps are individually atomic and idempotent, so any pass (or the
//! start-up recovery sweep) can be re-run after a crash at any point without
//! crediting a ticket twice.

use super::balance::{apply_credit, BalanceStore};
use super::types::{LegResolution, Match, SettlementState, WagerTicket};
use crate::errors::{LedgerError, LedgerResult};
use crate::metrics::LedgerMetrics;
use crate::storage::{
    lock_json, match_key, match_ticket_prefix, put_json, ticket_key, ticket_prefix,
    LedgerStorage, LedgerTxn,
};
use chrono::Utc;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Summary of one settlement pass
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SettlementReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_id: Option<String>,
    pub scanned: usize,
    pub settled: usize,
    pub already_settled: usize,
    /// Tickets still waiting on another match
    pub pending: usize,
    pub failed: usize,
    pub total_paid: Decimal,
}

impl SettlementReport {
    fn record(&mut self, result: &LedgerResult<TicketSettlement>) {
        self.scanned += 1;
        match result {
            Ok(TicketSettlement::Settled { payout }) => {
                self.settled += 1;
                self.total_paid += *payout;
            }
            Ok(TicketSettlement::AlreadySettled) => self.already_settled += 1,
            Ok(TicketSettlement::Pending) => self.pending += 1,
            Err(_) => self.failed += 1,
        }
    }
}

/// What a single-ticket settlement attempt did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketSettlement {
    Settled { payout: Decimal },
    AlreadySettled,
    /// At least one leg's match is still undecided
    Pending,
}

/// Phase one result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Claim {
    Ready(Decimal),
    Done,
    Pending,
}

pub struct SettlementEngine {
    storage: Arc<LedgerStorage>,
    balances: Arc<BalanceStore>,
    metrics: Arc<LedgerMetrics>,
}

impl SettlementEngine {
    pub fn new(
        storage: Arc<LedgerStorage>,
        balances: Arc<BalanceStore>,
        metrics: Arc<LedgerMetrics>,
    ) -> Self {
        Self {
            storage,
            balances,
            metrics,
        }
    }

    /// Settle every resolvable ticket with a leg on `match_id`
    pub fn resolve_match(&self, match_id: &str) -> LedgerResult<SettlementReport> {
        let m: Match = self
            .storage
            .get_json(&match_key(match_id))?
            .ok_or_else(|| LedgerError::not_found("match", match_id))?;

        let ticket_ids = self.storage.scan_index_ids(&match_ticket_prefix(match_id))?;
        info!(
            match_id,
            outcome = ?m.outcome,
            tickets = ticket_ids.len(),
            "Starting settlement pass"
        );

        let mut report = SettlementReport {
            match_id: Some(match_id.to_string()),
            ..Default::default()
        };
        for ticket_id in &ticket_ids {
            let result = self.settle_ticket(ticket_id);
            if let Err(ref e) = result {
                warn!(
                    match_id,
                    ticket_id = %ticket_id,
                    error = %e,
                    retryable = e.is_retryable(),
                    "Ticket settlement failed"
                );
                self.metrics.record_settlement_failure();
            }
            report.record(&result);
        }

        info!(
            match_id,
            settled = report.settled,
            pending = report.pending,
            failed = report.failed,
            total_paid = %report.total_paid,
            "Settlement pass complete"
        );
        Ok(report)
    }

    /// Settle one ticket if all of its legs are decided
    pub fn settle_ticket(&self, ticket_id: &str) -> LedgerResult<TicketSettlement> {
        let ticket: WagerTicket = self
            .storage
            .get_json(&ticket_key(ticket_id))?
            .ok_or_else(|| LedgerError::not_found("ticket", ticket_id))?;
        if ticket.settlement.is_settled() {
            return Ok(TicketSettlement::AlreadySettled);
        }

        match self.claim(ticket_id, &ticket.owner_id)? {
            Claim::Pending => Ok(TicketSettlement::Pending),
            Claim::Done => Ok(TicketSettlement::AlreadySettled),
            Claim::Ready(_) => match self.finish(ticket_id, &ticket.owner_id)? {
                Some(payout) => {
                    self.metrics.record_settlement(payout);
                    info!(ticket_id, user_id = %ticket.owner_id, %payout, "Ticket settled");
                    Ok(TicketSettlement::Settled { payout })
                }
                None => Ok(TicketSettlement::AlreadySettled),
            },
        }
    }

    /// Re-run settlement for every ticket not yet `Settled`
    pub fn recover_unsettled(&self) -> LedgerResult<SettlementReport> {
        let tickets: Vec<WagerTicket> = self.storage.scan_json(ticket_prefix())?;
        let mut report = SettlementReport::default();

        for ticket in tickets.iter().filter(|t| !t.settlement.is_settled()) {
            let result = self.settle_ticket(&ticket.id);
            if let Err(ref e) = result {
                warn!(
                    ticket_id = %ticket.id,
                    error = %e,
                    retryable = e.is_retryable(),
                    "Recovery failed for ticket"
                );
                self.metrics.record_settlement_failure();
            }
            report.record(&result);
        }

        info!(
            scanned = report.scanned,
            settled = report.settled,
            pending = report.pending,
            failed = report.failed,
            "Recovery sweep complete"
        );
        Ok(report)
    }

    /// Phase one: fix the payout on the ticket as `Settling`
    pub(crate) fn claim(&self, ticket_id: &str, owner_id: &str) -> LedgerResult<Claim> {
        self.balances.with_user_lock(owner_id, |txn, _account| {
            let mut ticket = lock_ticket(txn, ticket_id)?;
            match ticket.settlement {
                SettlementState::Settled { .. } => Ok(Claim::Done),
                SettlementState::Settling { payout } => Ok(Claim::Ready(payout)),
                SettlementState::Open => match self.evaluate(&ticket)? {
                    None => Ok(Claim::Pending),
                    Some(payout) => {
                        ticket.settlement = SettlementState::Settling { payout };
                        put_json(txn, &ticket_key(ticket_id), &ticket)?;
                        debug!(ticket_id, %payout, "Ticket claimed for settlement");
                        Ok(Claim::Ready(payout))
                    }
                },
            }
        })
    }

    /// Phase two: credit and close out a `Settling` ticket in one transaction
    fn finish(&self, ticket_id: &str, owner_id: &str) -> LedgerResult<Option<Decimal>> {
        self.balances.with_user_lock(owner_id, |txn, account| {
            let mut ticket = lock_ticket(txn, ticket_id)?;
            let payout = match ticket.settlement {
                SettlementState::Settling { payout } => payout,
                SettlementState::Settled { .. } => return Ok(None),
                SettlementState::Open => {
                    return Err(LedgerError::ConcurrencyConflict(format!(
                        "ticket {} lost its settlement claim",
                        ticket_id
                    )))
                }
            };

            apply_credit(account, payout)?;
            for leg in ticket.legs.iter_mut() {
                leg.paid = true;
            }
            ticket.settlement = SettlementState::Settled {
                payout,
                settled_at: Utc::now(),
            };
            put_json(txn, &ticket_key(ticket_id), &ticket)?;
            Ok(Some(payout))
        })
    }

    /// Payout if every leg is decided, `None` while any leg is pending.
    ///
    /// Outcomes never change once set, so committed match reads are stable.
    fn evaluate(&self, ticket: &WagerTicket) -> LedgerResult<Option<Decimal>> {
        let mut resolutions = Vec::with_capacity(ticket.legs.len());
        for leg in &ticket.legs {
            let m: Match = self
                .storage
                .get_json(&match_key(&leg.match_id))?
                .ok_or_else(|| LedgerError::not_found("match", leg.match_id.clone()))?;
            resolutions.push(m.resolve_leg(leg.side, leg.rate));
        }
        compute_payout(ticket.total_stake, &resolutions)
    }
}

/// `stake × Π multipliers`, rounded half-to-even to cents
pub fn compute_payout(
    stake: Decimal,
    resolutions: &[LegResolution],
) -> LedgerResult<Option<Decimal>> {
    let mut multiplier = Decimal::ONE;
    for resolution in resolutions {
        match resolution.multiplier() {
            Some(m) => {
                multiplier = multiplier
                    .checked_mul(m)
                    .ok_or_else(|| LedgerError::validation("payout multiplier overflow"))?;
            }
            None => return Ok(None),
        }
    }
    let payout = stake
        .checked_mul(multiplier)
        .ok_or_else(|| LedgerError::validation("payout overflow"))?;
    Ok(Some(payout.round_dp_with_strategy(
        2,
        RoundingStrategy::MidpointNearestEven,
    )))
}

fn lock_ticket(txn: &LedgerTxn<'_>, ticket_id: &str) -> LedgerResult<WagerTicket> {
    lock_json(txn, &ticket_key(ticket_id))?.ok_or_else(|| LedgerError::not_found("ticket", ticket_id))
}
