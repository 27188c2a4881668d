//! Route Definitions
//!
//! Maps URLs to handlers with type-safe routing.

use super::handlers::*;
use axum::{
    routing::{delete, get, patch, post},
    Router,
};
use std::sync::Arc;

/// Build the API router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        // Bettor endpoints
        .route("/users", post(register_handler))
        .route("/users/me", get(me_handler))
        .route("/users/:id", get(get_user_handler).patch(update_profile_handler))
        .route("/tickets", post(create_ticket_handler).get(list_tickets_handler))
        .route("/tickets/:id", get(get_ticket_handler))
        .route("/matches", get(list_matches_handler))
        .route("/matches/:id", get(get_match_handler))
        // Trusted side services
        .route("/external/deduct-coin", post(deduct_coin_handler))
        // Operator endpoints
        .route("/admin/matches", post(create_match_handler))
        .route("/admin/matches/:id", delete(delete_match_handler))
        .route("/admin/matches/:id/score", patch(set_score_handler))
        .route("/admin/matches/:id/winner", post(set_winner_handler))
        .route("/admin/matches/:id/draw", post(set_draw_handler))
        .route("/admin/tickets", get(admin_list_tickets_handler))
        .route("/admin/users", get(list_users_handler))
        .route("/admin/users/:id", patch(admin_update_user_handler))
        .route("/admin/users/:id/adjust", post(adjust_balance_handler))
        .route("/admin/settlement/recover", post(recover_handler))
        .with_state(state)
}
