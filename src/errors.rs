//! Error types for the wagering ledger
//!
//! Terminal errors (validation, funds, closed matches, missing records) are
//! returned straight to the caller. Storage level failures abort and roll back
//! the enclosing transaction; the caller may retry the whole operation.

use rust_decimal::Decimal;

/// Root error type for all ledger operations
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Malformed payload, non-positive stake, bad identifiers
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Insufficient funds: needed {needed}, available {available}")]
    InsufficientFunds { needed: Decimal, available: Decimal },

    /// Leg on a match that has started or is already decided
    #[error("Match closed for betting: {0}")]
    MatchClosed(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Outcome transition attempted on a match that is no longer pending
    #[error("Match {0} already resolved")]
    AlreadyResolved(String),

    /// Delete attempted on a match that already carries legs
    #[error("Match {0} has placed legs")]
    MatchInUse(String),

    /// Lock wait timed out or the store reported a busy key
    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl LedgerError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        LedgerError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        LedgerError::Validation(msg.into())
    }

    /// Whether retrying the whole operation could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::ConcurrencyConflict(_) | LedgerError::Persistence(_)
        )
    }
}

impl From<rocksdb::Error> for LedgerError {
    fn from(e: rocksdb::Error) -> Self {
        match e.kind() {
            rocksdb::ErrorKind::TimedOut
            | rocksdb::ErrorKind::Busy
            | rocksdb::ErrorKind::TryAgain => LedgerError::ConcurrencyConflict(e.to_string()),
            _ => LedgerError::Persistence(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(e: serde_json::Error) -> Self {
        LedgerError::Persistence(format!("Corrupted record: {}", e))
    }
}

impl From<std::io::Error> for LedgerError {
    fn from(e: std::io::Error) -> Self {
        LedgerError::Persistence(e.to_string())
    }
}

/// Convenience type alias for Results
pub type LedgerResult<T> = Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_error_display() {
        let err = LedgerError::InsufficientFunds {
            needed: dec!(200),
            available: dec!(150.50),
        };
        assert!(err.to_string().contains("needed 200"));
        assert!(err.to_string().contains("available 150.50"));

        let err = LedgerError::not_found("ticket", "t-1");
        assert_eq!(err.to_string(), "ticket not found: t-1");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(LedgerError::ConcurrencyConflict("lock".into()).is_retryable());
        assert!(LedgerError::Persistence("io".into()).is_retryable());
        assert!(!LedgerError::MatchClosed("m-1".into()).is_retryable());
        assert!(!LedgerError::validation("bad").is_retryable());
    }

    #[test]
    fn test_serde_error_conversion() {
        let err: LedgerError = serde_json::from_slice::<u64>(b"not json").unwrap_err().into();
        match err {
            LedgerError::Persistence(msg) => assert!(msg.contains("Corrupted record")),
            other => panic!("Expected persistence error, got {:?}", other),
        }
    }
}
