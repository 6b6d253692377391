//! Notification kinds, payloads, and message templates.
//!
//! Each kind carries its own payload shape (tagged serde variant) so the
//! dedup and template logic are checked at compile time instead of
//! operating on free-form blobs.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::Decision;

pub mod dedup;

pub use dedup::Deduplicator;

/// Notification classification, stored in the `kind` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    EnrollmentRequest,
    EnrollmentDecision,
    CardReady,
    PointsAwarded,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::EnrollmentRequest => "enrollment_request",
            NotificationKind::EnrollmentDecision => "enrollment_decision",
            NotificationKind::CardReady => "card_ready",
            NotificationKind::PointsAwarded => "points_awarded",
        }
    }
}

/// Typed notification payload, one variant per kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationPayload {
    EnrollmentRequest {
        business_name: String,
        program_name: String,
        approval_request: Uuid,
    },
    EnrollmentDecision {
        program_name: String,
        decision: Decision,
    },
    CardReady {
        card_number: String,
        program_name: String,
    },
    PointsAwarded {
        points: i64,
        balance: i64,
        program_name: String,
    },
}

impl NotificationPayload {
    pub fn kind(&self) -> NotificationKind {
        match self {
            NotificationPayload::EnrollmentRequest { .. } => NotificationKind::EnrollmentRequest,
            NotificationPayload::EnrollmentDecision { .. } => NotificationKind::EnrollmentDecision,
            NotificationPayload::CardReady { .. } => NotificationKind::CardReady,
            NotificationPayload::PointsAwarded { .. } => NotificationKind::PointsAwarded,
        }
    }

    /// Only enrollment requests block on a customer decision.
    pub fn requires_action(&self) -> bool {
        matches!(self, NotificationPayload::EnrollmentRequest { .. })
    }

    /// Standardized, kind-specific message.
    pub fn message(&self) -> String {
        match self {
            NotificationPayload::EnrollmentRequest {
                business_name,
                program_name,
                ..
            } => format!("{business_name} invites you to join {program_name}"),
            NotificationPayload::EnrollmentDecision {
                program_name,
                decision: Decision::Approve,
            } => format!("Customer accepted enrollment in {program_name}"),
            NotificationPayload::EnrollmentDecision {
                program_name,
                decision: Decision::Decline,
            } => format!("Customer declined enrollment in {program_name}"),
            NotificationPayload::CardReady { program_name, .. } => {
                format!("Your {program_name} card is ready")
            }
            NotificationPayload::PointsAwarded {
                points,
                balance,
                program_name,
            } => format!("You earned {points} points in {program_name} (balance: {balance})"),
        }
    }
}

/// Subject ids a notification is about; also the dedup identity
/// together with the kind.
#[derive(Debug, Clone, Default)]
pub struct Subjects {
    pub customer_account: Option<String>,
    pub business: Option<Uuid>,
    pub program: Option<Uuid>,
}

impl Subjects {
    pub fn customer(account_id: &str, program: Uuid) -> Self {
        Self {
            customer_account: Some(account_id.to_string()),
            business: None,
            program: Some(program),
        }
    }

    pub fn business(business: Uuid, program: Uuid) -> Self {
        Self {
            customer_account: None,
            business: Some(business),
            program: Some(program),
        }
    }
}
