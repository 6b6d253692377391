//! Timestamp formatting for ledger columns.
//!
//! All timestamps are stored as fixed-width RFC 3339 TEXT in UTC so that
//! lexicographic comparison in SQL matches chronological order (the
//! notification dedup window relies on this).

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::{CoreError, Result};

/// Format a timestamp for storage.
pub fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp.
pub fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CoreError::Internal(format!("corrupt timestamp: {e}")))
}
