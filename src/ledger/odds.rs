//! Odds Engine
//!
//! Pari-mutuel quoting: a side's multiplier is total volume over the volume
//! on that side, where volume is the number of legs placed. Each side is
//! seeded with a small virtual weight so an untouched side still has a
//! finite rate. Rates are frozen into legs at placement time, so a quote
//! only ever affects tickets not yet written.

use super::types::{BetPool, Match, OddsSnapshot, Side};
use crate::config::OddsConfig;
use crate::errors::{LedgerError, LedgerResult};
use crate::storage::{match_key, LedgerStorage};
use rust_decimal::Decimal;
use std::sync::Arc;

pub struct OddsEngine {
    storage: Arc<LedgerStorage>,
    config: OddsConfig,
}

impl OddsEngine {
    pub fn new(storage: Arc<LedgerStorage>, config: OddsConfig) -> Self {
        Self { storage, config }
    }

    /// Rate for `side` given the pool, clamped and rounded to cents
    pub fn quote(&self, pool: &BetPool, side: Side) -> Decimal {
        let seed = Decimal::from(self.config.seed_weight);
        let total = Decimal::from(pool.legs_a) + Decimal::from(pool.legs_b) + seed + seed;
        let on_side = Decimal::from(pool.legs_on(side)) + seed;

        let raw = total
            .checked_div(on_side)
            .unwrap_or(self.config.max_rate);
        let mut rate = raw
            .clamp(self.config.min_rate, self.config.max_rate)
            .round_dp(2);
        rate.rescale(2);
        rate
    }

    /// Current rate for a side of a stored match
    pub fn compute_rate(&self, match_id: &str, side: Side) -> LedgerResult<Decimal> {
        let m = self.load(match_id)?;
        Ok(self.quote(&m.pool, side))
    }

    pub fn snapshot(&self, match_id: &str) -> LedgerResult<OddsSnapshot> {
        let m = self.load(match_id)?;
        Ok(self.snapshot_of(&m))
    }

    pub fn snapshot_of(&self, m: &Match) -> OddsSnapshot {
        OddsSnapshot {
            match_id: m.id.clone(),
            rate_a: self.quote(&m.pool, Side::A),
            rate_b: self.quote(&m.pool, Side::B),
            legs_a: m.pool.legs_a,
            legs_b: m.pool.legs_b,
        }
    }

    fn load(&self, match_id: &str) -> LedgerResult<Match> {
        self.storage
            .get_json(&match_key(match_id))?
            .ok_or_else(|| LedgerError::not_found("match", match_id))
    }
}
