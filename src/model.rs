//! Ledger row types and status enums.
//!
//! Statuses are stored as uppercase TEXT; timestamps as RFC 3339 TEXT in
//! UTC. Mapping from rows is manual (`sqlx::Row::get`), matching the
//! storage layer's query-builder style.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::utils::time::parse_ts;

/// Customer decision on a pending approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Approve,
    Decline,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::Approve => write!(f, "APPROVE"),
            Decision::Decline => write!(f, "DECLINE"),
        }
    }
}

/// Enrollment lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentStatus {
    Pending,
    Active,
    Declined,
}

impl EnrollmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrollmentStatus::Pending => "PENDING",
            EnrollmentStatus::Active => "ACTIVE",
            EnrollmentStatus::Declined => "DECLINED",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(EnrollmentStatus::Pending),
            "ACTIVE" => Ok(EnrollmentStatus::Active),
            "DECLINED" => Ok(EnrollmentStatus::Declined),
            other => Err(CoreError::Internal(format!(
                "corrupt enrollment status: {other}"
            ))),
        }
    }
}

/// Approval request lifecycle status. Transitions exactly once from
/// `Pending` to a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "PENDING",
            ApprovalStatus::Approved => "APPROVED",
            ApprovalStatus::Rejected => "REJECTED",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(ApprovalStatus::Pending),
            "APPROVED" => Ok(ApprovalStatus::Approved),
            "REJECTED" => Ok(ApprovalStatus::Rejected),
            other => Err(CoreError::Internal(format!(
                "corrupt approval status: {other}"
            ))),
        }
    }

    /// Terminal status produced by a decision.
    pub fn from_decision(decision: Decision) -> Self {
        match decision {
            Decision::Approve => ApprovalStatus::Approved,
            Decision::Decline => ApprovalStatus::Rejected,
        }
    }

    /// Decision that produced this terminal status, if terminal.
    pub fn as_decision(&self) -> Option<Decision> {
        match self {
            ApprovalStatus::Pending => None,
            ApprovalStatus::Approved => Some(Decision::Approve),
            ApprovalStatus::Rejected => Some(Decision::Decline),
        }
    }
}

/// Customer-business relationship status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationshipStatus {
    Active,
    Declined,
}

impl RelationshipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipStatus::Active => "ACTIVE",
            RelationshipStatus::Declined => "DECLINED",
        }
    }
}

/// Audit entry classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditType {
    Scan,
    Manual,
    Adjust,
}

impl AuditType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditType::Scan => "SCAN",
            AuditType::Manual => "MANUAL",
            AuditType::Adjust => "ADJUST",
        }
    }
}

/// Card tier, derived from the card balance on every award.
///
/// Never written independently of the balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Base,
    Silver,
    Gold,
}

/// Balance thresholds for tier derivation.
pub const SILVER_THRESHOLD: i64 = 500;
pub const GOLD_THRESHOLD: i64 = 2000;

impl Tier {
    pub fn for_balance(balance: i64) -> Self {
        if balance >= GOLD_THRESHOLD {
            Tier::Gold
        } else if balance >= SILVER_THRESHOLD {
            Tier::Silver
        } else {
            Tier::Base
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Base => "BASE",
            Tier::Silver => "SILVER",
            Tier::Gold => "GOLD",
        }
    }
}

/// Loyalty-domain customer record, lazily materialized from the account
/// directory the first time provisioning needs it.
#[derive(Debug, Clone)]
pub struct Customer {
    pub id: Uuid,
    pub account_id: String,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

/// Program owner. Read-only from the core's perspective.
#[derive(Debug, Clone)]
pub struct Business {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// A named point-earning scheme owned by exactly one business.
#[derive(Debug, Clone)]
pub struct Program {
    pub id: Uuid,
    pub business_id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Links one customer to one program. At most one row per
/// (customer, program).
///
/// `points` is a derived mirror of the card balance; it is always
/// assigned, never incremented.
#[derive(Debug, Clone)]
pub struct Enrollment {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub program_id: Uuid,
    pub status: EnrollmentStatus,
    pub points: i64,
    pub enrolled_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

/// Customer-facing representation of an active enrollment.
///
/// `points` is the single authoritative balance field.
#[derive(Debug, Clone)]
pub struct Card {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub program_id: Uuid,
    pub card_number: String,
    pub points: i64,
    pub tier: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// Append-only record of one point change. Never mutated or deleted.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub id: Uuid,
    pub card_id: Uuid,
    pub entry_type: String,
    pub delta: i64,
    pub balance_after: i64,
    pub description: String,
    pub reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A pending decision a customer must make.
///
/// Keyed by account id rather than customer id: the Customer row may
/// not exist yet when enrollment is requested.
#[derive(Debug, Clone)]
pub struct ApprovalRequest {
    pub id: Uuid,
    pub account_id: String,
    pub business_id: Uuid,
    pub program_id: Uuid,
    pub status: ApprovalStatus,
    pub notification_id: Option<Uuid>,
    pub requested_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
}

/// A stored message to a customer or business.
#[derive(Debug, Clone)]
pub struct Notification {
    pub id: Uuid,
    pub kind: String,
    pub customer_account_id: Option<String>,
    pub business_id: Option<Uuid>,
    pub program_id: Option<Uuid>,
    pub payload: serde_json::Value,
    pub message: String,
    pub requires_action: bool,
    pub read: bool,
    pub actioned: bool,
    pub created_at: DateTime<Utc>,
}

/// Result of resolving an approval request. `card_id` is set only for
/// approvals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApprovalOutcome {
    pub decision: Decision,
    pub card_id: Option<Uuid>,
}

/// Result of a points award. `replayed` is set when the idempotency key
/// had already been applied and the prior result was returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AwardOutcome {
    pub card_id: Uuid,
    pub balance: i64,
    pub replayed: bool,
}

/// How a points award identifies its target card.
#[derive(Debug, Clone)]
pub enum CardRef {
    /// Scanned card number.
    Number(String),
    /// Enrollment identity from a QR payload; used when the customer is
    /// enrolled but the card may not exist yet.
    Enrollment {
        account_id: String,
        program_id: Uuid,
    },
}

/// Origin of a points award. The actor is the rate-limit key.
#[derive(Debug, Clone)]
pub enum AwardSource {
    /// QR scan performed by a business device.
    Scan { actor: String },
    /// Manual award entered by business staff.
    Manual { actor: String },
}

impl AwardSource {
    /// Scanning actor identity, used as the rate-limit key.
    pub fn actor(&self) -> &str {
        match self {
            AwardSource::Scan { actor } | AwardSource::Manual { actor } => actor,
        }
    }

    pub fn audit_type(&self) -> AuditType {
        match self {
            AwardSource::Scan { .. } => AuditType::Scan,
            AwardSource::Manual { .. } => AuditType::Manual,
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            AwardSource::Scan { .. } => "QR scan",
            AwardSource::Manual { .. } => "manual award",
        }
    }
}

fn get_uuid(row: &SqliteRow, col: &str) -> Result<Uuid> {
    let s: String = row.get(col);
    Uuid::parse_str(&s).map_err(|e| CoreError::Internal(format!("corrupt uuid in {col}: {e}")))
}

fn get_opt_uuid(row: &SqliteRow, col: &str) -> Result<Option<Uuid>> {
    let s: Option<String> = row.get(col);
    s.map(|s| {
        Uuid::parse_str(&s).map_err(|e| CoreError::Internal(format!("corrupt uuid in {col}: {e}")))
    })
    .transpose()
}

fn get_ts(row: &SqliteRow, col: &str) -> Result<DateTime<Utc>> {
    let s: String = row.get(col);
    parse_ts(&s)
}

fn get_opt_ts(row: &SqliteRow, col: &str) -> Result<Option<DateTime<Utc>>> {
    let s: Option<String> = row.get(col);
    s.map(|s| parse_ts(&s)).transpose()
}

fn get_bool(row: &SqliteRow, col: &str) -> bool {
    let v: i64 = row.get(col);
    v != 0
}

impl Customer {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: get_uuid(row, "id")?,
            account_id: row.get("account_id"),
            name: row.get("name"),
            email: row.get("email"),
            created_at: get_ts(row, "created_at")?,
        })
    }
}

impl Business {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: get_uuid(row, "id")?,
            name: row.get("name"),
            created_at: get_ts(row, "created_at")?,
        })
    }
}

impl Program {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: get_uuid(row, "id")?,
            business_id: get_uuid(row, "business_id")?,
            name: row.get("name"),
            created_at: get_ts(row, "created_at")?,
        })
    }
}

impl Enrollment {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: get_uuid(row, "id")?,
            customer_id: get_uuid(row, "customer_id")?,
            program_id: get_uuid(row, "program_id")?,
            status: EnrollmentStatus::parse(row.get::<String, _>("status").as_str())?,
            points: row.get("points"),
            enrolled_at: get_ts(row, "enrolled_at")?,
            last_activity_at: get_ts(row, "last_activity_at")?,
        })
    }
}

impl Card {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: get_uuid(row, "id")?,
            customer_id: get_uuid(row, "customer_id")?,
            program_id: get_uuid(row, "program_id")?,
            card_number: row.get("card_number"),
            points: row.get("points"),
            tier: row.get("tier"),
            active: get_bool(row, "active"),
            created_at: get_ts(row, "created_at")?,
        })
    }
}

impl AuditEntry {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: get_uuid(row, "id")?,
            card_id: get_uuid(row, "card_id")?,
            entry_type: row.get("entry_type"),
            delta: row.get("delta"),
            balance_after: row.get("balance_after"),
            description: row.get("description"),
            reference: row.get("reference"),
            created_at: get_ts(row, "created_at")?,
        })
    }
}

impl ApprovalRequest {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: get_uuid(row, "id")?,
            account_id: row.get("account_id"),
            business_id: get_uuid(row, "business_id")?,
            program_id: get_uuid(row, "program_id")?,
            status: ApprovalStatus::parse(row.get::<String, _>("status").as_str())?,
            notification_id: get_opt_uuid(row, "notification_id")?,
            requested_at: get_ts(row, "requested_at")?,
            responded_at: get_opt_ts(row, "responded_at")?,
        })
    }
}

impl Notification {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        let payload: String = row.get("payload");
        Ok(Self {
            id: get_uuid(row, "id")?,
            kind: row.get("kind"),
            customer_account_id: row.get("customer_account_id"),
            business_id: get_opt_uuid(row, "business_id")?,
            program_id: get_opt_uuid(row, "program_id")?,
            payload: serde_json::from_str(&payload)?,
            message: row.get("message"),
            requires_action: get_bool(row, "requires_action"),
            read: get_bool(row, "read"),
            actioned: get_bool(row, "actioned"),
            created_at: get_ts(row, "created_at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_thresholds() {
        assert_eq!(Tier::for_balance(0), Tier::Base);
        assert_eq!(Tier::for_balance(499), Tier::Base);
        assert_eq!(Tier::for_balance(500), Tier::Silver);
        assert_eq!(Tier::for_balance(1999), Tier::Silver);
        assert_eq!(Tier::for_balance(2000), Tier::Gold);
    }

    #[test]
    fn test_approval_status_round_trips_decision() {
        assert_eq!(
            ApprovalStatus::from_decision(Decision::Approve).as_decision(),
            Some(Decision::Approve)
        );
        assert_eq!(
            ApprovalStatus::from_decision(Decision::Decline).as_decision(),
            Some(Decision::Decline)
        );
        assert_eq!(ApprovalStatus::Pending.as_decision(), None);
    }

    #[test]
    fn test_status_parse_rejects_corrupt_values() {
        assert!(EnrollmentStatus::parse("BOGUS").is_err());
        assert!(ApprovalStatus::parse("").is_err());
    }
}
