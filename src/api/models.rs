//! API Request and Response Models

use crate::ledger::{
    LegRequest, Match, MatchOutcome, OddsSnapshot, Role, SettlementReport, Side, UserAccount,
    WagerTicket,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountResponse {
    pub user_id: String,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub balance: Decimal,
    pub created_at: DateTime<Utc>,
}

impl From<UserAccount> for AccountResponse {
    fn from(account: UserAccount) -> Self {
        Self {
            user_id: account.id,
            role: account.role,
            display_name: account.display_name,
            balance: account.balance,
            created_at: account.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountListResponse {
    pub users: Vec<AccountResponse>,
    pub total: usize,
}

/// Self-service profile change
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateProfileRequest {
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTicketRequest {
    pub legs: Vec<LegRequest>,
    pub total_stake: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTicketResponse {
    pub ticket: WagerTicket,
    /// Caller balance after the stake was debited
    pub balance: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketListResponse {
    pub tickets: Vec<WagerTicket>,
    pub total: usize,
}

/// Match with current quotes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResponse {
    #[serde(flatten)]
    pub fixture: Match,
    pub odds: OddsSnapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchListResponse {
    pub matches: Vec<MatchResponse>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreRequest {
    pub score_a: u32,
    pub score_b: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WinnerRequest {
    pub side: Side,
}

/// Outcome declaration result with the settlement pass it triggered
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeResponse {
    pub match_id: String,
    pub outcome: MatchOutcome,
    pub settlement: SettlementReport,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdjustRequest {
    pub delta: Decimal,
}

/// Debit requested by a trusted side service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeductCoinRequest {
    pub amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeductCoinResponse {
    pub user_id: String,
    pub amount: Decimal,
    pub balance: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub user_id: String,
    pub balance: Decimal,
}
