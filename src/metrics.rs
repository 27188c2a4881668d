//! Ledger counters and Prometheus text export

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Process-wide ledger activity counters. Coin amounts are kept in cents.
pub struct LedgerMetrics {
    start_time: Instant,
    accounts_opened: AtomicU64,
    tickets_created: AtomicU64,
    tickets_rejected: AtomicU64,
    staked_cents: AtomicU64,
    outcomes_declared: AtomicU64,
    settlements_completed: AtomicU64,
    settlements_failed: AtomicU64,
    paid_cents: AtomicU64,
    external_debits: AtomicU64,
    external_debit_cents: AtomicU64,
}

impl Default for LedgerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl LedgerMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            accounts_opened: AtomicU64::new(0),
            tickets_created: AtomicU64::new(0),
            tickets_rejected: AtomicU64::new(0),
            staked_cents: AtomicU64::new(0),
            outcomes_declared: AtomicU64::new(0),
            settlements_completed: AtomicU64::new(0),
            settlements_failed: AtomicU64::new(0),
            paid_cents: AtomicU64::new(0),
            external_debits: AtomicU64::new(0),
            external_debit_cents: AtomicU64::new(0),
        }
    }

    pub fn record_account_opened(&self) {
        self.accounts_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ticket_created(&self, stake: Decimal) {
        self.tickets_created.fetch_add(1, Ordering::Relaxed);
        self.staked_cents.fetch_add(to_cents(stake), Ordering::Relaxed);
    }

    pub fn record_ticket_rejected(&self) {
        self.tickets_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_outcome_declared(&self) {
        self.outcomes_declared.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_settlement(&self, payout: Decimal) {
        self.settlements_completed.fetch_add(1, Ordering::Relaxed);
        self.paid_cents.fetch_add(to_cents(payout), Ordering::Relaxed);
    }

    pub fn record_settlement_failure(&self) {
        self.settlements_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_external_debit(&self, amount: Decimal) {
        self.external_debits.fetch_add(1, Ordering::Relaxed);
        self.external_debit_cents
            .fetch_add(to_cents(amount), Ordering::Relaxed);
    }

    pub fn tickets_created(&self) -> u64 {
        self.tickets_created.load(Ordering::Relaxed)
    }

    pub fn settlements_completed(&self) -> u64 {
        self.settlements_completed.load(Ordering::Relaxed)
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Render counters in the Prometheus text exposition format
    pub fn render_prometheus(&self) -> String {
        let mut output = String::new();

        let counters = [
            (
                "wagerbook_accounts_opened_total",
                "Accounts registered",
                self.accounts_opened.load(Ordering::Relaxed),
            ),
            (
                "wagerbook_tickets_created_total",
                "Wager tickets accepted",
                self.tickets_created.load(Ordering::Relaxed),
            ),
            (
                "wagerbook_tickets_rejected_total",
                "Wager tickets refused",
                self.tickets_rejected.load(Ordering::Relaxed),
            ),
            (
                "wagerbook_outcomes_declared_total",
                "Match outcomes declared",
                self.outcomes_declared.load(Ordering::Relaxed),
            ),
            (
                "wagerbook_settlements_completed_total",
                "Tickets settled",
                self.settlements_completed.load(Ordering::Relaxed),
            ),
            (
                "wagerbook_settlements_failed_total",
                "Ticket settlement attempts that failed",
                self.settlements_failed.load(Ordering::Relaxed),
            ),
            (
                "wagerbook_external_debits_total",
                "Debits requested by trusted side services",
                self.external_debits.load(Ordering::Relaxed),
            ),
        ];
        for (name, help, value) in counters {
            output.push_str(&format!(
                "# HELP {name} {help}\n# TYPE {name} counter\n{name} {value}\n\n"
            ));
        }

        let coins = [
            (
                "wagerbook_coins_staked_total",
                "Coins debited as ticket stakes",
                self.staked_cents.load(Ordering::Relaxed),
            ),
            (
                "wagerbook_coins_paid_total",
                "Coins credited as payouts",
                self.paid_cents.load(Ordering::Relaxed),
            ),
            (
                "wagerbook_coins_external_debited_total",
                "Coins debited by trusted side services",
                self.external_debit_cents.load(Ordering::Relaxed),
            ),
        ];
        for (name, help, cents) in coins {
            output.push_str(&format!(
                "# HELP {name} {help}\n# TYPE {name} counter\n{name} {}\n\n",
                Decimal::new(cents as i64, 2)
            ));
        }

        output.push_str(&format!(
            "# HELP wagerbook_uptime_seconds Process uptime\n\
             # TYPE wagerbook_uptime_seconds gauge\n\
             wagerbook_uptime_seconds {}\n",
            self.uptime().as_secs()
        ));

        output
    }
}

fn to_cents(amount: Decimal) -> u64 {
    (amount * Decimal::ONE_HUNDRED).trunc().to_u64().unwrap_or(0)
}
