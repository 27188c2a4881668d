//! Match Outcome Registry
//!
//! Fixture registration plus the one-way outcome transition. Declaring a
//! winner or a draw is a compare-and-swap out of `Pending` under the match
//! lock; once it commits the settlement pass runs synchronously.

use super::settlement::{SettlementEngine, SettlementReport};
use super::types::{validate_id, BetPool, Match, MatchFilter, MatchOutcome, NewMatch, Side};
use crate::errors::{LedgerError, LedgerResult};
use crate::metrics::LedgerMetrics;
use crate::storage::{delete_key, lock_json, match_key, match_prefix, put_json, LedgerStorage};
use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

pub struct MatchRegistry {
    storage: Arc<LedgerStorage>,
    settlement: Arc<SettlementEngine>,
    metrics: Arc<LedgerMetrics>,
}

impl MatchRegistry {
    pub fn new(
        storage: Arc<LedgerStorage>,
        settlement: Arc<SettlementEngine>,
        metrics: Arc<LedgerMetrics>,
    ) -> Self {
        Self {
            storage,
            settlement,
            metrics,
        }
    }

    pub fn create_match(&self, new: NewMatch) -> LedgerResult<Match> {
        let id = new.id.unwrap_or_else(|| Uuid::new_v4().to_string());
        validate_id("match", &id).map_err(LedgerError::Validation)?;
        validate_id("team", &new.side_a_team).map_err(LedgerError::Validation)?;
        validate_id("team", &new.side_b_team).map_err(LedgerError::Validation)?;
        validate_id("sport type", &new.sport_type).map_err(LedgerError::Validation)?;
        if new.side_a_team == new.side_b_team {
            return Err(LedgerError::validation("a team cannot play itself"));
        }
        if new.start_time >= new.end_time {
            return Err(LedgerError::validation("start_time must be before end_time"));
        }

        let txn = self.storage.begin();
        let key = match_key(&id);
        if lock_json::<Match>(&txn, &key)?.is_some() {
            return Err(LedgerError::Validation(format!("match {} already exists", id)));
        }

        let now = Utc::now();
        let m = Match {
            id,
            side_a_team: new.side_a_team,
            side_b_team: new.side_b_team,
            sport_type: new.sport_type,
            start_time: new.start_time,
            end_time: new.end_time,
            score_a: None,
            score_b: None,
            outcome: MatchOutcome::Pending,
            pool: BetPool::default(),
            created_at: now,
            updated_at: now,
        };
        put_json(&txn, &key, &m)?;
        txn.commit()?;

        info!(match_id = %m.id, start = %m.start_time, "Match created");
        Ok(m)
    }

    pub fn get_match(&self, match_id: &str) -> LedgerResult<Match> {
        self.storage
            .get_json(&match_key(match_id))?
            .ok_or_else(|| LedgerError::not_found("match", match_id))
    }

    /// Matches passing `filter`, ordered by start time
    pub fn list_matches(&self, filter: &MatchFilter) -> LedgerResult<Vec<Match>> {
        let now = Utc::now();
        let mut matches: Vec<Match> = self
            .storage
            .scan_json::<Match>(match_prefix())?
            .into_iter()
            .filter(|m| filter.matches(m, now))
            .collect();
        matches.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.id.cmp(&b.id)));
        Ok(matches)
    }

    /// Remove a fixture nobody has bet on yet.
    ///
    /// Decided matches and matches with legs are kept; their tickets and
    /// settlement history depend on the record.
    pub fn delete_match(&self, match_id: &str) -> LedgerResult<()> {
        let txn = self.storage.begin();
        let key = match_key(match_id);
        let m: Match =
            lock_json(&txn, &key)?.ok_or_else(|| LedgerError::not_found("match", match_id))?;
        if m.outcome.is_resolved() {
            return Err(LedgerError::AlreadyResolved(match_id.to_string()));
        }
        // Legs are only added under this lock, so an empty pool means no tickets
        if m.pool.legs_a + m.pool.legs_b > 0 {
            return Err(LedgerError::MatchInUse(match_id.to_string()));
        }
        delete_key(&txn, &key)?;
        txn.commit()?;

        info!(match_id, "Match deleted");
        Ok(())
    }

    /// Record the score line; does not decide the match
    pub fn set_score(&self, match_id: &str, score_a: u32, score_b: u32) -> LedgerResult<Match> {
        let txn = self.storage.begin();
        let key = match_key(match_id);
        let mut m: Match =
            lock_json(&txn, &key)?.ok_or_else(|| LedgerError::not_found("match", match_id))?;
        m.score_a = Some(score_a);
        m.score_b = Some(score_b);
        m.updated_at = Utc::now();
        put_json(&txn, &key, &m)?;
        txn.commit()?;

        info!(match_id, score_a, score_b, "Score recorded");
        Ok(m)
    }

    pub fn set_winner(&self, match_id: &str, side: Side) -> LedgerResult<SettlementReport> {
        self.record_outcome(match_id, MatchOutcome::Winner { side })?;
        self.settlement.resolve_match(match_id)
    }

    pub fn set_draw(&self, match_id: &str) -> LedgerResult<SettlementReport> {
        self.record_outcome(match_id, MatchOutcome::Draw)?;
        self.settlement.resolve_match(match_id)
    }

    /// Compare-and-swap `Pending -> outcome` without running settlement
    pub(crate) fn record_outcome(
        &self,
        match_id: &str,
        outcome: MatchOutcome,
    ) -> LedgerResult<Match> {
        if !outcome.is_resolved() {
            return Err(LedgerError::validation("cannot reset a match to pending"));
        }

        let txn = self.storage.begin();
        let key = match_key(match_id);
        let mut m: Match =
            lock_json(&txn, &key)?.ok_or_else(|| LedgerError::not_found("match", match_id))?;
        if m.outcome.is_resolved() {
            return Err(LedgerError::AlreadyResolved(match_id.to_string()));
        }
        m.outcome = outcome;
        m.updated_at = Utc::now();
        put_json(&txn, &key, &m)?;
        txn.commit()?;

        self.metrics.record_outcome_declared();
        info!(match_id, outcome = ?outcome, "Outcome declared");
        Ok(m)
    }
}
