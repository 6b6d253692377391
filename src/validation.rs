//! Input validation for external data.
//!
//! Centralized validation for fields that cross trust boundaries
//! (award amounts, idempotency keys, scanned card numbers, account ids).

use crate::error::{CoreError, Result};

/// Length and range limits for validated fields.
pub mod limits {
    /// Maximum points per single award.
    pub const MAX_AWARD_POINTS: i64 = 10_000;
    /// Maximum idempotency key length.
    pub const MAX_IDEMPOTENCY_KEY_LENGTH: usize = 128;
    /// Exact card number length (digits).
    pub const CARD_NUMBER_LENGTH: usize = 16;
    /// Maximum account id length.
    pub const MAX_ACCOUNT_ID_LENGTH: usize = 128;
    /// Maximum rate-limit actor key length.
    pub const MAX_ACTOR_LENGTH: usize = 128;
}

/// Error constants for validation failures.
pub mod errmsg {
    pub const POINTS_NOT_POSITIVE: &str = "points must be a positive integer";
    pub const POINTS_TOO_LARGE: &str = "points exceeds maximum per award";

    pub const IDEMPOTENCY_KEY_EMPTY: &str = "idempotency key cannot be empty";
    pub const IDEMPOTENCY_KEY_TOO_LONG: &str = "idempotency key exceeds maximum length";
    pub const IDEMPOTENCY_KEY_INVALID_CHARS: &str =
        "idempotency key contains invalid characters (allowed: a-zA-Z0-9_-)";

    pub const CARD_NUMBER_BAD_LENGTH: &str = "card number must be 16 digits";
    pub const CARD_NUMBER_INVALID_CHARS: &str = "card number must contain only digits";

    pub const ACCOUNT_ID_EMPTY: &str = "account id cannot be empty";
    pub const ACCOUNT_ID_TOO_LONG: &str = "account id exceeds maximum length";

    pub const ACTOR_EMPTY: &str = "actor cannot be empty";
    pub const ACTOR_TOO_LONG: &str = "actor exceeds maximum length";
}

/// Validate an award amount.
///
/// Rules:
/// - Must be strictly positive
/// - Maximum 10,000 per award
pub fn validate_points(points: i64) -> Result<()> {
    if points <= 0 {
        return Err(CoreError::validation("points", errmsg::POINTS_NOT_POSITIVE));
    }
    if points > limits::MAX_AWARD_POINTS {
        return Err(CoreError::validation(
            "points",
            format!(
                "{} (max: {}, got: {})",
                errmsg::POINTS_TOO_LARGE,
                limits::MAX_AWARD_POINTS,
                points
            ),
        ));
    }
    Ok(())
}

/// Validate a caller-supplied idempotency key.
///
/// Rules:
/// - Must not be empty
/// - Maximum 128 characters
/// - May contain: letters (a-zA-Z), digits (0-9), underscore (_), hyphen (-)
pub fn validate_idempotency_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(CoreError::validation(
            "idempotency_key",
            errmsg::IDEMPOTENCY_KEY_EMPTY,
        ));
    }
    if key.len() > limits::MAX_IDEMPOTENCY_KEY_LENGTH {
        return Err(CoreError::validation(
            "idempotency_key",
            format!(
                "{} (max: {}, got: {})",
                errmsg::IDEMPOTENCY_KEY_TOO_LONG,
                limits::MAX_IDEMPOTENCY_KEY_LENGTH,
                key.len()
            ),
        ));
    }
    for ch in key.chars() {
        if !matches!(ch, 'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '-') {
            return Err(CoreError::validation(
                "idempotency_key",
                errmsg::IDEMPOTENCY_KEY_INVALID_CHARS,
            ));
        }
    }
    Ok(())
}

/// Validate a scanned card number.
///
/// Rules: exactly 16 ASCII digits.
pub fn validate_card_number(number: &str) -> Result<()> {
    if number.len() != limits::CARD_NUMBER_LENGTH {
        return Err(CoreError::validation(
            "card_number",
            errmsg::CARD_NUMBER_BAD_LENGTH,
        ));
    }
    if !number.chars().all(|ch| ch.is_ascii_digit()) {
        return Err(CoreError::validation(
            "card_number",
            errmsg::CARD_NUMBER_INVALID_CHARS,
        ));
    }
    Ok(())
}

/// Validate an account id.
///
/// Rules:
/// - Must not be empty
/// - Maximum 128 characters
pub fn validate_account_id(account_id: &str) -> Result<()> {
    if account_id.is_empty() {
        return Err(CoreError::validation("account_id", errmsg::ACCOUNT_ID_EMPTY));
    }
    if account_id.len() > limits::MAX_ACCOUNT_ID_LENGTH {
        return Err(CoreError::validation(
            "account_id",
            format!(
                "{} (max: {}, got: {})",
                errmsg::ACCOUNT_ID_TOO_LONG,
                limits::MAX_ACCOUNT_ID_LENGTH,
                account_id.len()
            ),
        ));
    }
    Ok(())
}

/// Validate a rate-limit actor key.
pub fn validate_actor(actor: &str) -> Result<()> {
    if actor.is_empty() {
        return Err(CoreError::validation("actor", errmsg::ACTOR_EMPTY));
    }
    if actor.len() > limits::MAX_ACTOR_LENGTH {
        return Err(CoreError::validation(
            "actor",
            format!(
                "{} (max: {}, got: {})",
                errmsg::ACTOR_TOO_LONG,
                limits::MAX_ACTOR_LENGTH,
                actor.len()
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_points() {
        assert!(validate_points(1).is_ok());
        assert!(validate_points(limits::MAX_AWARD_POINTS).is_ok());
        assert!(validate_points(0).is_err());
        assert!(validate_points(-5).is_err());
        assert!(validate_points(limits::MAX_AWARD_POINTS + 1).is_err());
    }

    #[test]
    fn test_validate_idempotency_key() {
        assert!(validate_idempotency_key("tx-1").is_ok());
        assert!(validate_idempotency_key("A_b-9").is_ok());
        assert!(validate_idempotency_key("").is_err());
        assert!(validate_idempotency_key("has space").is_err());
        assert!(validate_idempotency_key(&"x".repeat(129)).is_err());
    }

    #[test]
    fn test_validate_card_number() {
        assert!(validate_card_number("1234567890123456").is_ok());
        assert!(validate_card_number("123456789012345").is_err());
        assert!(validate_card_number("123456789012345a").is_err());
    }

    #[test]
    fn test_validation_errors_carry_field_detail() {
        let err = validate_points(0).unwrap_err();
        match err {
            CoreError::Validation { field, .. } => assert_eq!(field, "points"),
            other => panic!("expected validation error, got {other:?}"),
        }
    }
}
