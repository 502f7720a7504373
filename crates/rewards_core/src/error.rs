//! crates/rewards_core/src/error.rs
//!
//! The typed failures every ledger operation can surface to its caller.

use crate::ports::PortError;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LedgerError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Insufficient points: {required} required, {available} available")]
    InsufficientPoints { required: u64, available: u64 },

    #[error("No attempt tokens left")]
    InsufficientTokens,

    #[error("Coupon {0} has no codes left")]
    NoCodesAvailable(String),

    #[error("Coupon {0} was already redeemed")]
    AlreadyRedeemed(String),

    #[error("Coupon {0} has not been redeemed")]
    NotRedeemed(String),

    #[error("Quiz has no questions")]
    EmptyQuiz,

    #[error("Score {0} is outside 0..=100")]
    InvalidScore(u32),

    /// A transactional commit lost the race on every attempt.
    #[error("Concurrent update conflict")]
    Conflict,

    /// Transient store failure; safe to retry.
    #[error("Network error: {0}")]
    Network(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Malformed document {key}: {reason}")]
    Malformed { key: String, reason: String },

    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

impl LedgerError {
    /// A stable machine-readable code for the failure.
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::NotFound(_) => "not_found",
            LedgerError::InsufficientPoints { .. } => "insufficient_points",
            LedgerError::InsufficientTokens => "insufficient_tokens",
            LedgerError::NoCodesAvailable(_) => "no_codes_available",
            LedgerError::AlreadyRedeemed(_) => "already_redeemed",
            LedgerError::NotRedeemed(_) => "not_redeemed",
            LedgerError::EmptyQuiz => "empty_quiz",
            LedgerError::InvalidScore(_) => "invalid_score",
            LedgerError::Conflict => "conflict",
            LedgerError::Network(_) => "network_error",
            LedgerError::PermissionDenied(_) => "permission_denied",
            LedgerError::Malformed { .. } => "malformed_document",
            LedgerError::Unexpected(_) => "internal",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Network(_) | LedgerError::Conflict)
    }
}

impl From<PortError> for LedgerError {
    fn from(err: PortError) -> Self {
        match err {
            PortError::NotFound(what) => LedgerError::NotFound(what),
            PortError::Conflict(_) => LedgerError::Conflict,
            PortError::Unavailable(reason) => LedgerError::Network(reason),
            PortError::PermissionDenied(reason) => LedgerError::PermissionDenied(reason),
            PortError::Unexpected(reason) => LedgerError::Unexpected(reason),
        }
    }
}

/// A convenience type alias for `Result<T, LedgerError>`.
pub type LedgerResult<T> = Result<T, LedgerError>;
