//! API Error Handling
//!
//! Structured error responses with proper HTTP status codes and request tracking.

use crate::errors::LedgerError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Top-level API error response with request tracking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub request_id: String,
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Error code (NOT_FOUND, INSUFFICIENT_FUNDS, MATCH_CLOSED, etc.)
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// API error types with request tracking
#[derive(Debug)]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub request_id: String,
}

#[derive(Debug)]
pub enum ApiErrorKind {
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    InsufficientFunds { needed: Decimal, available: Decimal },
    MatchClosed(String),
    AlreadyResolved(String),
    MatchInUse(String),
    InternalError(String),
    ServiceUnavailable(String),
}

impl ApiError {
    pub fn new(request_id: impl Into<String>, kind: ApiErrorKind) -> Self {
        Self {
            kind,
            request_id: request_id.into(),
        }
    }

    pub fn unauthorized(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(request_id, ApiErrorKind::Unauthorized(message.into()))
    }

    pub fn forbidden(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(request_id, ApiErrorKind::Forbidden(message.into()))
    }

    pub fn not_found(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(request_id, ApiErrorKind::NotFound(message.into()))
    }

    pub fn internal_error(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(request_id, ApiErrorKind::InternalError(message.into()))
    }

    /// Map a ledger failure onto its HTTP category
    pub fn from_ledger(request_id: impl Into<String>, err: LedgerError) -> Self {
        let kind = match err {
            LedgerError::Validation(msg) => ApiErrorKind::BadRequest(msg),
            LedgerError::InsufficientFunds { needed, available } => {
                ApiErrorKind::InsufficientFunds { needed, available }
            }
            LedgerError::MatchClosed(id) => ApiErrorKind::MatchClosed(id),
            e @ LedgerError::NotFound { .. } => ApiErrorKind::NotFound(e.to_string()),
            LedgerError::AlreadyResolved(id) => ApiErrorKind::AlreadyResolved(id),
            LedgerError::MatchInUse(id) => ApiErrorKind::MatchInUse(id),
            e @ LedgerError::ConcurrencyConflict(_) => {
                ApiErrorKind::ServiceUnavailable(e.to_string())
            }
            e @ (LedgerError::Persistence(_) | LedgerError::Configuration(_)) => {
                tracing::error!(error = %e, "Ledger failure");
                ApiErrorKind::InternalError("Internal ledger error".to_string())
            }
        };
        Self::new(request_id, kind)
    }

    fn parts(&self) -> (StatusCode, &'static str, String, Option<serde_json::Value>) {
        match &self.kind {
            ApiErrorKind::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone(), None)
            }
            ApiErrorKind::Unauthorized(msg) => {
                (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone(), None)
            }
            ApiErrorKind::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg.clone(), None),
            ApiErrorKind::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone(), None),
            ApiErrorKind::InsufficientFunds { needed, available } => (
                StatusCode::PAYMENT_REQUIRED,
                "INSUFFICIENT_FUNDS",
                format!("Stake {} exceeds balance {}", needed, available),
                Some(serde_json::json!({ "needed": needed, "available": available })),
            ),
            ApiErrorKind::MatchClosed(id) => (
                StatusCode::CONFLICT,
                "MATCH_CLOSED",
                format!("Match {} is closed for betting", id),
                Some(serde_json::json!({ "match_id": id })),
            ),
            ApiErrorKind::AlreadyResolved(id) => (
                StatusCode::CONFLICT,
                "ALREADY_RESOLVED",
                format!("Match {} already has an outcome", id),
                Some(serde_json::json!({ "match_id": id })),
            ),
            ApiErrorKind::MatchInUse(id) => (
                StatusCode::CONFLICT,
                "MATCH_IN_USE",
                format!("Match {} already has placed legs", id),
                Some(serde_json::json!({ "match_id": id })),
            ),
            ApiErrorKind::InternalError(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg.clone(),
                None,
            ),
            ApiErrorKind::ServiceUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
                msg.clone(),
                None,
            ),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (_, code, message, _) = self.parts();
        write!(f, "[{}] {}: {}", self.request_id, code, message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = self.parts();

        let body = Json(ErrorResponse {
            request_id: self.request_id,
            error: ErrorBody {
                code: code.to_string(),
                message,
                details,
            },
        });

        (status, body).into_response()
    }
}
