use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Caller role supplied by the identity provider
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "user" => Some(Role::User),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

/// Coin account; the balance is the single serialization point for money
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserAccount {
    pub id: String,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub balance: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Profile fields that may change after registration. `None` leaves a field as is.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProfileUpdate {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
}

/// One of the two sides of a match
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    A,
    B,
}

/// Declared result of a match. Leaves `Pending` exactly once.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum MatchOutcome {
    Pending,
    Winner { side: Side },
    Draw,
}

impl MatchOutcome {
    pub fn is_resolved(&self) -> bool {
        !matches!(self, MatchOutcome::Pending)
    }
}

/// Count of legs placed on each side, the volume behind the odds
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BetPool {
    pub legs_a: u64,
    pub legs_b: u64,
}

impl BetPool {
    pub fn legs_on(&self, side: Side) -> u64 {
        match side {
            Side::A => self.legs_a,
            Side::B => self.legs_b,
        }
    }

    pub fn record(&mut self, side: Side) {
        match side {
            Side::A => self.legs_a += 1,
            Side::B => self.legs_b += 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Match {
    pub id: String,
    pub side_a_team: String,
    pub side_b_team: String,
    pub sport_type: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_a: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_b: Option<u32>,
    pub outcome: MatchOutcome,
    pub pool: BetPool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Match {
    /// Bets are accepted strictly before kick-off and only while undecided
    pub fn accepts_bets(&self, now: DateTime<Utc>) -> bool {
        now < self.start_time && !self.outcome.is_resolved()
    }

    /// How a leg selecting `side` with frozen `rate` resolves against this match
    pub fn resolve_leg(&self, side: Side, rate: Decimal) -> LegResolution {
        match self.outcome {
            MatchOutcome::Pending => LegResolution::Pending,
            MatchOutcome::Draw => LegResolution::Refund,
            MatchOutcome::Winner { side: winner } if winner == side => LegResolution::Won(rate),
            MatchOutcome::Winner { .. } => LegResolution::Lost,
        }
    }
}

/// Per-leg contribution to a ticket's multiplier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegResolution {
    Pending,
    /// Draw, stake returned for this leg (multiplier 1)
    Refund,
    Won(Decimal),
    Lost,
}

impl LegResolution {
    pub fn multiplier(&self) -> Option<Decimal> {
        match self {
            LegResolution::Pending => None,
            LegResolution::Refund => Some(Decimal::ONE),
            LegResolution::Won(rate) => Some(*rate),
            LegResolution::Lost => Some(Decimal::ZERO),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WagerLeg {
    pub match_id: String,
    pub side: Side,
    /// Odds multiplier frozen at placement time
    pub rate: Decimal,
    pub paid: bool,
}

/// Ticket-level idempotency guard for payouts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum SettlementState {
    Open,
    /// Payout computed and recorded, credit not yet applied
    Settling { payout: Decimal },
    Settled {
        payout: Decimal,
        settled_at: DateTime<Utc>,
    },
}

impl SettlementState {
    pub fn is_settled(&self) -> bool {
        matches!(self, SettlementState::Settled { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WagerTicket {
    pub id: String,
    pub owner_id: String,
    pub total_stake: Decimal,
    pub legs: Vec<WagerLeg>,
    pub created_at: DateTime<Utc>,
    pub settlement: SettlementState,
}

/// A requested leg, before odds are attached
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LegRequest {
    pub match_id: String,
    pub side: Side,
}

/// Current quotes for a match, derived on demand from its pool
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OddsSnapshot {
    pub match_id: String,
    pub rate_a: Decimal,
    pub rate_b: Decimal,
    pub legs_a: u64,
    pub legs_b: u64,
}

/// Operator input for a new fixture
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMatch {
    #[serde(default)]
    pub id: Option<String>,
    pub side_a_team: String,
    pub side_b_team: String,
    pub sport_type: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// Upcoming fixtures versus finished ones, split on end time
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MatchWindow {
    Schedule,
    Result,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchFilter {
    #[serde(default)]
    pub sport_type: Option<String>,
    #[serde(default)]
    pub window: Option<MatchWindow>,
}

impl MatchFilter {
    pub fn matches(&self, m: &Match, now: DateTime<Utc>) -> bool {
        if let Some(ref sport) = self.sport_type {
            if &m.sport_type != sport {
                return false;
            }
        }
        match self.window {
            Some(MatchWindow::Schedule) => m.end_time > now,
            Some(MatchWindow::Result) => m.end_time <= now,
            None => true,
        }
    }
}

/// Identifiers become key segments, so they are kept short and colon-free
pub fn validate_id(kind: &str, id: &str) -> Result<(), String> {
    if id.trim().is_empty() {
        return Err(format!("{} id must not be empty", kind));
    }
    if id.len() > 100 {
        return Err(format!("{} id longer than 100 characters", kind));
    }
    if id.contains(':') || id.chars().any(|c| c.is_control()) {
        return Err(format!("{} id contains invalid characters", kind));
    }
    Ok(())
}

pub fn validate_display_name(name: &str) -> Result<(), String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err("display name must not be empty".to_string());
    }
    if trimmed.chars().count() > 64 {
        return Err("display name longer than 64 characters".to_string());
    }
    if trimmed.chars().any(|c| c.is_control()) {
        return Err("display name contains control characters".to_string());
    }
    Ok(())
}
