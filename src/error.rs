//! Crate-wide error taxonomy.
//!
//! Every fallible operation returns [`CoreError`]. Callers branch on
//! [`CoreError::code`], a stable machine-readable code; messages never
//! include query text or secrets.

use uuid::Uuid;

use crate::model::Decision;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors surfaced by the loyalty core.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Malformed input, caller's fault. Carries field-level detail.
    #[error("invalid {field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    /// Approval request, card, program, or account absent.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Approval request re-processed with a conflicting decision.
    ///
    /// Replaying the *same* decision is not an error; it returns the
    /// prior outcome.
    #[error("approval request {request} already resolved as {prior}")]
    AlreadyTerminal { request: Uuid, prior: Decision },

    /// Points award attempted without an active enrollment.
    #[error("no active enrollment for this customer and program")]
    NotEnrolled,

    /// Token integrity check failed (tampered or malformed token).
    #[error("token signature is invalid")]
    SignatureInvalid,

    /// Token is validly signed but outside its freshness window.
    /// Callers should ask for a rescan rather than alert.
    #[error("token expired {age_secs}s past its validity window")]
    SignatureExpired { age_secs: i64 },

    /// Scanning actor exceeded its per-window request budget.
    #[error("rate limit exceeded for actor {actor}")]
    RateLimited { actor: String },

    /// Transaction retries exhausted on a transient conflict.
    #[error("transaction retries exhausted")]
    Transaction(#[source] sqlx::Error),

    /// Underlying database failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Payload (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Catch-all for invariant breaks (e.g. corrupt status column).
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Stable error code for API consumers.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Validation { .. } => "VALIDATION",
            CoreError::NotFound { .. } => "NOT_FOUND",
            CoreError::AlreadyTerminal { .. } => "ALREADY_RESOLVED",
            CoreError::NotEnrolled => "NOT_ENROLLED",
            CoreError::SignatureInvalid => "SIGNATURE_INVALID",
            CoreError::SignatureExpired { .. } => "SIGNATURE_EXPIRED",
            CoreError::RateLimited { .. } => "RATE_LIMITED",
            CoreError::Transaction(_) => "TRANSACTION",
            CoreError::Database(_) | CoreError::Serialization(_) | CoreError::Internal(_) => {
                "INTERNAL"
            }
        }
    }

    /// True when the underlying database error is a uniqueness-constraint
    /// violation, the last-resort backstop against lookup/insert races.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            CoreError::Database(sqlx::Error::Database(db)) => db.is_unique_violation(),
            _ => false,
        }
    }

    /// Shorthand for a validation failure on a named field.
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        CoreError::Validation {
            field,
            message: message.into(),
        }
    }

    /// Shorthand for a not-found failure on a named entity.
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        CoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(CoreError::validation("points", "must be positive").code(), "VALIDATION");
        assert_eq!(CoreError::not_found("card", Uuid::nil()).code(), "NOT_FOUND");
        assert_eq!(CoreError::NotEnrolled.code(), "NOT_ENROLLED");
        assert_eq!(CoreError::SignatureInvalid.code(), "SIGNATURE_INVALID");
        assert_eq!(CoreError::SignatureExpired { age_secs: 10 }.code(), "SIGNATURE_EXPIRED");
        assert_eq!(
            CoreError::RateLimited { actor: "b-1".into() }.code(),
            "RATE_LIMITED"
        );
        assert_eq!(CoreError::Internal("corrupt status".into()).code(), "INTERNAL");
    }

    #[test]
    fn test_internal_errors_hide_detail_behind_generic_code() {
        let err = CoreError::Serialization(serde_json::from_str::<i32>("{").unwrap_err());
        assert_eq!(err.code(), "INTERNAL");
    }
}
