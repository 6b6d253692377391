//! Retry utilities: backoff builders and retryable error classification.
//!
//! Uses `backon` for exponential backoff with jitter. Transient SQLite
//! conflicts (busy/locked) are retried a bounded number of times; the
//! last error is reclassified as `Transaction` once retries are exhausted.

use std::time::Duration;

use backon::ExponentialBuilder;

use crate::error::CoreError;

/// Standard backoff for ledger transaction retries.
///
/// - Min delay: 10ms
/// - Max delay: 2s
/// - Max attempts: 5
/// - Jitter enabled
pub fn tx_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(10))
        .with_max_delay(Duration::from_secs(2))
        .with_max_times(5)
        .with_jitter()
}

/// Determines if an error is a transient transaction conflict.
///
/// Retryable: SQLite busy/locked (another writer holds the database).
/// Non-retryable: everything else, including constraint violations.
/// Those map to business outcomes and will never succeed on retry.
pub fn is_retryable(err: &CoreError) -> bool {
    match err {
        CoreError::Database(sqlx::Error::Database(db)) => {
            matches!(db.code().as_deref(), Some("5") | Some("6") | Some("517"))
        }
        _ => false,
    }
}

/// Reclassify the final error after retries are exhausted.
///
/// A retryable database error becomes `Transaction` (surfaced generically
/// to callers); anything else passes through unchanged.
pub fn map_exhausted(err: CoreError) -> CoreError {
    if is_retryable(&err) {
        match err {
            CoreError::Database(inner) => CoreError::Transaction(inner),
            other => other,
        }
    } else {
        err
    }
}
