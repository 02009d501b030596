//! Error taxonomy for economy operations.
//!
//! Every variant carries a stable machine-readable code so the routing layer
//! can surface it without string matching.

use crate::storage::StorageError;

/// Result type for economy operations.
pub type Result<T> = std::result::Result<T, EconomyError>;

/// Errors surfaced by economy operations.
#[derive(Debug, thiserror::Error)]
pub enum EconomyError {
    /// Malformed or missing input.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: i64, available: i64 },

    #[error("insufficient tokens: requested {requested}, available {available}")]
    InsufficientTokens { requested: i64, available: i64 },

    /// Dedup scope already holds a record for this action.
    #[error("already recorded: {0}")]
    AlreadyRecorded(String),

    /// Action denied by the fraud gate.
    #[error("blocked by fraud gate: {reason} (risk {risk_score})")]
    FraudBlocked { reason: String, risk_score: u32 },

    #[error("account {0} is banned")]
    BannedAccount(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A giveaway draw found nobody to draw from.
    #[error("giveaway {0} has no participants")]
    NoParticipants(String),

    /// Another draw for the same giveaway holds the draw lock.
    #[error("draw already in progress for giveaway {0}")]
    DrawInProgress(String),

    #[error("persistence error: {0}")]
    Persistence(StorageError),
}

impl From<StorageError> for EconomyError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Overflow(what) => Self::Validation(format!("amount out of range for {what}")),
            e => Self::Persistence(e),
        }
    }
}

impl EconomyError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::InsufficientBalance { .. } => "insufficient_balance",
            Self::InsufficientTokens { .. } => "insufficient_tokens",
            Self::AlreadyRecorded(_) => "already_recorded",
            Self::FraudBlocked { .. } => "fraud_blocked",
            Self::BannedAccount(_) => "banned_account",
            Self::NotFound { .. } => "not_found",
            Self::NoParticipants(_) => "no_participants",
            Self::DrawInProgress(_) => "draw_in_progress",
            Self::Persistence(_) => "persistence_error",
        }
    }

    /// HTTP status class the routing layer should answer with.
    pub fn status(&self) -> u16 {
        match self {
            Self::Validation(_)
            | Self::InsufficientBalance { .. }
            | Self::InsufficientTokens { .. }
            | Self::NoParticipants(_) => 400,
            Self::FraudBlocked { .. } | Self::BannedAccount(_) => 403,
            Self::NotFound { .. } => 404,
            Self::AlreadyRecorded(_) | Self::DrawInProgress(_) => 409,
            Self::Persistence(_) => 503,
        }
    }

    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Persistence(e) => e.is_transient(),
            Self::DrawInProgress(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(
            EconomyError::InsufficientBalance {
                requested: 10,
                available: 0
            }
            .code(),
            "insufficient_balance"
        );
        assert_eq!(
            EconomyError::AlreadyRecorded("checkin".into()).code(),
            "already_recorded"
        );
        assert_eq!(EconomyError::not_found("account", "u1").code(), "not_found");
    }

    #[test]
    fn test_status_classes() {
        assert_eq!(EconomyError::validation("bad").status(), 400);
        assert_eq!(EconomyError::BannedAccount("u1".into()).status(), 403);
        assert_eq!(EconomyError::not_found("item", "x").status(), 404);
        assert_eq!(EconomyError::AlreadyRecorded("k".into()).status(), 409);
        assert_eq!(
            EconomyError::Persistence(StorageError::TransactionClosed).status(),
            503
        );
    }

    #[test]
    fn test_business_errors_are_not_transient() {
        assert!(!EconomyError::validation("bad").is_transient());
        assert!(!EconomyError::InsufficientTokens {
            requested: 5,
            available: 1
        }
        .is_transient());
        assert!(EconomyError::DrawInProgress("weekly".into()).is_transient());
    }

    #[test]
    fn test_overflow_surfaces_as_validation() {
        let err = EconomyError::from(StorageError::Overflow("credits of u1".into()));
        assert_eq!(err.code(), "validation_error");
        assert_eq!(err.status(), 400);
        assert!(!err.is_transient());
    }
}
