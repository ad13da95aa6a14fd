//! Error types for the payment gateway.

use crate::domain::PaymentIntentStatus;
use crate::ports::ExplorerError;

/// Domain-level errors (business logic violations).
#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    #[error("Amount cannot be negative")]
    NegativeAmount,

    #[error("Amount must be a positive number of base units")]
    NonPositiveAmount,

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidState {
        from: PaymentIntentStatus,
        to: PaymentIntentStatus,
    },

    #[error("Invalid {kind}: {value}")]
    InvalidId { kind: &'static str, value: String },

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Repository-level errors (data access failures).
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Entity not found")]
    NotFound,

    /// A guarded write found the row in a different state than expected.
    #[error("Conflict: {0}")]
    Conflict(String),
}

/// Application-level errors (for HTTP responses).
///
/// Maps cleanly to HTTP status codes.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<DomainError> for AppError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::InvalidState { .. } => AppError::InvalidState(err.to_string()),
            e => AppError::BadRequest(e.to_string()),
        }
    }
}

impl From<RepoError> for AppError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::Domain(e) => e.into(),
            RepoError::NotFound => AppError::NotFound("Resource not found".into()),
            RepoError::Database(e) => AppError::Internal(e),
            RepoError::Transaction(e) => AppError::Internal(e),
            RepoError::Conflict(e) => AppError::InvalidState(e),
        }
    }
}

impl From<ExplorerError> for AppError {
    fn from(err: ExplorerError) -> Self {
        AppError::Upstream(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_state_maps_to_invalid_state() {
        let err: AppError = DomainError::InvalidState {
            from: PaymentIntentStatus::Succeeded,
            to: PaymentIntentStatus::Failed,
        }
        .into();
        assert!(matches!(err, AppError::InvalidState(msg) if msg.contains("succeeded -> failed")));
    }

    #[test]
    fn test_repo_conflict_maps_to_invalid_state() {
        let err: AppError = RepoError::Conflict("status changed".into()).into();
        assert!(matches!(err, AppError::InvalidState(_)));
    }

    #[test]
    fn test_validation_maps_to_bad_request() {
        let err: AppError = RepoError::Domain(DomainError::NonPositiveAmount).into();
        assert!(matches!(err, AppError::BadRequest(_)));
    }
}
