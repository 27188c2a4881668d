//! Request Handlers
//!
//! Ledger calls are synchronous RocksDB transactions, so every handler hands
//! its work to the blocking pool and maps the outcome onto an HTTP response.

use super::{errors::ApiError, middleware::Caller, middleware::RequestId, models::*};
use crate::errors::{LedgerError, LedgerResult};
use crate::ledger::{Ledger, MatchFilter, NewMatch, ProfileUpdate, SettlementReport};
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared application state
pub struct AppState {
    pub ledger: Arc<Ledger>,
    pub version: String,
    pub enable_metrics: bool,
    /// Same budget as the timeout layer
    pub request_timeout: Duration,
}

/// Run a ledger operation on the blocking pool.
///
/// Ledger work that has started is never cancelled: if the timeout layer
/// answers 408 first, the operation may still commit. Clients must re-read
/// (`GET /tickets`, `GET /users/me`) before retrying a write after a 408.
/// Work still queued for a blocking thread when the budget runs out is
/// skipped and reported as 503.
async fn with_ledger<T, F>(state: &AppState, request_id: &str, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Ledger) -> LedgerResult<T> + Send + 'static,
    T: Send + 'static,
{
    let ledger = state.ledger.clone();
    let deadline = Instant::now() + state.request_timeout;
    tokio::task::spawn_blocking(move || {
        if Instant::now() >= deadline {
            return Err(LedgerError::ConcurrencyConflict(
                "request deadline passed before ledger work started".to_string(),
            ));
        }
        f(&ledger)
    })
        .await
        .map_err(|e| ApiError::internal_error(request_id, format!("Ledger task failed: {}", e)))?
        .map_err(|e| ApiError::from_ledger(request_id, e))
}

/// Health check handler
/// GET /health
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "Running".to_string(),
        version: state.version.clone(),
        uptime_secs: state.ledger.metrics.uptime().as_secs(),
    })
}

/// Prometheus scrape endpoint
/// GET /metrics
pub async fn metrics_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
) -> Result<Response, ApiError> {
    if !state.enable_metrics {
        return Err(ApiError::not_found(request_id.0, "Metrics disabled"));
    }
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.ledger.metrics.render_prometheus(),
    )
        .into_response())
}

/// Register the caller's account (idempotent)
/// POST /users
pub async fn register_handler(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(body): Json<RegisterRequest>,
) -> Result<Json<AccountResponse>, ApiError> {
    let Caller {
        user_id,
        role,
        request_id,
    } = caller;
    let account = with_ledger(&state, &request_id, move |ledger| {
        ledger.register(&user_id, role, body.display_name)
    })
    .await?;
    Ok(Json(account.into()))
}

/// GET /users/me
pub async fn me_handler(
    State(state): State<Arc<AppState>>,
    caller: Caller,
) -> Result<Json<AccountResponse>, ApiError> {
    let user_id = caller.user_id.clone();
    let account = with_ledger(&state, &caller.request_id, move |ledger| {
        ledger.balances.account(&user_id)
    })
    .await?;
    Ok(Json(account.into()))
}

/// GET /users/:id
pub async fn get_user_handler(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(user_id): Path<String>,
) -> Result<Json<AccountResponse>, ApiError> {
    caller.require_self_or_admin(&user_id)?;
    let account = with_ledger(&state, &caller.request_id, move |ledger| {
        ledger.balances.account(&user_id)
    })
    .await?;
    Ok(Json(account.into()))
}

/// Change the caller's own display name
/// PATCH /users/:id
pub async fn update_profile_handler(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(user_id): Path<String>,
    Json(body): Json<UpdateProfileRequest>,
) -> Result<Json<AccountResponse>, ApiError> {
    caller.require_self_or_admin(&user_id)?;
    let update = ProfileUpdate {
        display_name: body.display_name,
        role: None,
    };
    let account = with_ledger(&state, &caller.request_id, move |ledger| {
        ledger.balances.update_profile(&user_id, update)
    })
    .await?;
    Ok(Json(account.into()))
}

/// Debit the caller on behalf of a trusted side service
/// POST /external/deduct-coin
pub async fn deduct_coin_handler(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(body): Json<DeductCoinRequest>,
) -> Result<Json<DeductCoinResponse>, ApiError> {
    let user_id = caller.user_id.clone();
    let response = with_ledger(&state, &caller.request_id, move |ledger| {
        let balance = ledger.deduct_coins(&user_id, body.amount)?;
        Ok(DeductCoinResponse {
            user_id,
            amount: body.amount,
            balance,
        })
    })
    .await?;
    Ok(Json(response))
}

/// Place a ticket
/// POST /tickets
pub async fn create_ticket_handler(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(body): Json<CreateTicketRequest>,
) -> Result<(StatusCode, Json<CreateTicketResponse>), ApiError> {
    let user_id = caller.user_id.clone();
    let response = with_ledger(&state, &caller.request_id, move |ledger| {
        let ticket = ledger
            .tickets
            .create_ticket(&user_id, &body.legs, body.total_stake)?;
        let balance = ledger.balances.balance(&user_id)?;
        Ok(CreateTicketResponse { ticket, balance })
    })
    .await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// Caller's tickets, newest first
/// GET /tickets
pub async fn list_tickets_handler(
    State(state): State<Arc<AppState>>,
    caller: Caller,
) -> Result<Json<TicketListResponse>, ApiError> {
    let user_id = caller.user_id.clone();
    let tickets = with_ledger(&state, &caller.request_id, move |ledger| {
        ledger.tickets.list_tickets(&user_id)
    })
    .await?;
    Ok(Json(TicketListResponse {
        total: tickets.len(),
        tickets,
    }))
}

/// GET /tickets/:id
pub async fn get_ticket_handler(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(ticket_id): Path<String>,
) -> Result<Json<crate::ledger::WagerTicket>, ApiError> {
    let user_id = caller.user_id.clone();
    let ticket = with_ledger(&state, &caller.request_id, move |ledger| {
        ledger.tickets.get_ticket(&ticket_id, &user_id)
    })
    .await?;
    Ok(Json(ticket))
}

/// GET /matches?sport_type={id}&window={schedule|result}
pub async fn list_matches_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Query(filter): Query<MatchFilter>,
) -> Result<Json<MatchListResponse>, ApiError> {
    let matches = with_ledger(&state, &request_id.0, move |ledger| {
        let matches = ledger.matches.list_matches(&filter)?;
        Ok(matches
            .into_iter()
            .map(|m| {
                let odds = ledger.odds.snapshot_of(&m);
                MatchResponse { fixture: m, odds }
            })
            .collect::<Vec<_>>())
    })
    .await?;
    Ok(Json(MatchListResponse {
        total: matches.len(),
        matches,
    }))
}

/// GET /matches/:id
pub async fn get_match_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(match_id): Path<String>,
) -> Result<Json<MatchResponse>, ApiError> {
    let (fixture, odds) =
        with_ledger(&state, &request_id.0, move |ledger| ledger.match_view(&match_id)).await?;
    Ok(Json(MatchResponse { fixture, odds }))
}

/// POST /admin/matches
pub async fn create_match_handler(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(body): Json<NewMatch>,
) -> Result<(StatusCode, Json<MatchResponse>), ApiError> {
    caller.require_admin()?;
    let response = with_ledger(&state, &caller.request_id, move |ledger| {
        let fixture = ledger.matches.create_match(body)?;
        let odds = ledger.odds.snapshot_of(&fixture);
        Ok(MatchResponse { fixture, odds })
    })
    .await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// Remove a fixture that has no legs and no outcome
/// DELETE /admin/matches/:id
pub async fn delete_match_handler(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(match_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    caller.require_admin()?;
    with_ledger(&state, &caller.request_id, move |ledger| {
        ledger.matches.delete_match(&match_id)
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PATCH /admin/matches/:id/score
pub async fn set_score_handler(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(match_id): Path<String>,
    Json(body): Json<ScoreRequest>,
) -> Result<Json<MatchResponse>, ApiError> {
    caller.require_admin()?;
    let response = with_ledger(&state, &caller.request_id, move |ledger| {
        let fixture = ledger
            .matches
            .set_score(&match_id, body.score_a, body.score_b)?;
        let odds = ledger.odds.snapshot_of(&fixture);
        Ok(MatchResponse { fixture, odds })
    })
    .await?;
    Ok(Json(response))
}

/// Declare the winning side and settle
/// POST /admin/matches/:id/winner
pub async fn set_winner_handler(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(match_id): Path<String>,
    Json(body): Json<WinnerRequest>,
) -> Result<Json<OutcomeResponse>, ApiError> {
    caller.require_admin()?;
    let response = with_ledger(&state, &caller.request_id, move |ledger| {
        let settlement = ledger.matches.set_winner(&match_id, body.side)?;
        outcome_response(ledger, match_id, settlement)
    })
    .await?;
    Ok(Json(response))
}

/// Declare a draw and settle
/// POST /admin/matches/:id/draw
pub async fn set_draw_handler(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(match_id): Path<String>,
) -> Result<Json<OutcomeResponse>, ApiError> {
    caller.require_admin()?;
    let response = with_ledger(&state, &caller.request_id, move |ledger| {
        let settlement = ledger.matches.set_draw(&match_id)?;
        outcome_response(ledger, match_id, settlement)
    })
    .await?;
    Ok(Json(response))
}

fn outcome_response(
    ledger: &Ledger,
    match_id: String,
    settlement: SettlementReport,
) -> LedgerResult<OutcomeResponse> {
    let fixture = ledger.matches.get_match(&match_id)?;
    Ok(OutcomeResponse {
        match_id,
        outcome: fixture.outcome,
        settlement,
    })
}

/// Every ticket in the book
/// GET /admin/tickets
pub async fn admin_list_tickets_handler(
    State(state): State<Arc<AppState>>,
    caller: Caller,
) -> Result<Json<TicketListResponse>, ApiError> {
    caller.require_admin()?;
    let tickets = with_ledger(&state, &caller.request_id, |ledger| {
        ledger.tickets.list_all_tickets()
    })
    .await?;
    Ok(Json(TicketListResponse {
        total: tickets.len(),
        tickets,
    }))
}

/// Every account, ordered by id
/// GET /admin/users
pub async fn list_users_handler(
    State(state): State<Arc<AppState>>,
    caller: Caller,
) -> Result<Json<AccountListResponse>, ApiError> {
    caller.require_admin()?;
    let accounts = with_ledger(&state, &caller.request_id, |ledger| {
        ledger.balances.list_accounts()
    })
    .await?;
    Ok(Json(AccountListResponse {
        total: accounts.len(),
        users: accounts.into_iter().map(Into::into).collect(),
    }))
}

/// Operator profile change, including role
/// PATCH /admin/users/:id
pub async fn admin_update_user_handler(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(user_id): Path<String>,
    Json(update): Json<ProfileUpdate>,
) -> Result<Json<AccountResponse>, ApiError> {
    caller.require_admin()?;
    let account = with_ledger(&state, &caller.request_id, move |ledger| {
        ledger.balances.update_profile(&user_id, update)
    })
    .await?;
    Ok(Json(account.into()))
}

/// POST /admin/users/:id/adjust
pub async fn adjust_balance_handler(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(user_id): Path<String>,
    Json(body): Json<AdjustRequest>,
) -> Result<Json<BalanceResponse>, ApiError> {
    caller.require_admin()?;
    let response = with_ledger(&state, &caller.request_id, move |ledger| {
        let balance = ledger.balances.adjust(&user_id, body.delta)?;
        Ok(BalanceResponse { user_id, balance })
    })
    .await?;
    Ok(Json(response))
}

/// Re-run settlement for every unsettled ticket
/// POST /admin/settlement/recover
pub async fn recover_handler(
    State(state): State<Arc<AppState>>,
    caller: Caller,
) -> Result<Json<SettlementReport>, ApiError> {
    caller.require_admin()?;
    let report = with_ledger(&state, &caller.request_id, |ledger| {
        ledger.settlement.recover_unsettled()
    })
    .await?;
    Ok(Json(report))
}
