//! Notification deduplication.
//!
//! Multiple internal code paths can independently decide to notify about
//! the same logical event; only the notification is deduplicated. The
//! ledger mutation that triggered it has already been applied by the
//! caller.

use chrono::{DateTime, Duration, Utc};
use sea_query::{Expr, Order, Query, SqliteQueryBuilder};
use sqlx::{Row, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::storage::schema::Notifications;
use crate::utils::time::fmt_ts;

use super::{NotificationPayload, Subjects};

/// Emits notifications, merging duplicates within a recency window.
pub struct Deduplicator {
    pool: SqlitePool,
    window_secs: i64,
}

impl Deduplicator {
    pub fn new(pool: SqlitePool, window_secs: i64) -> Self {
        Self { pool, window_secs }
    }

    /// Insert a notification, or return the id of an existing unacted
    /// one of the same kind and subjects created within the window.
    pub async fn emit_or_merge(
        &self,
        payload: &NotificationPayload,
        subjects: &Subjects,
        now: DateTime<Utc>,
    ) -> Result<Uuid> {
        let kind = payload.kind();
        let cutoff = now - Duration::seconds(self.window_secs);

        let mut query = Query::select();
        query
            .column(Notifications::Id)
            .from(Notifications::Table)
            .and_where(Expr::col(Notifications::Kind).eq(kind.as_str()))
            .and_where(Expr::col(Notifications::Actioned).eq(0))
            .and_where(Expr::col(Notifications::CreatedAt).gte(fmt_ts(cutoff)));

        match &subjects.customer_account {
            Some(account) => {
                query.and_where(Expr::col(Notifications::CustomerAccountId).eq(account.as_str()));
            }
            None => {
                query.and_where(Expr::col(Notifications::CustomerAccountId).is_null());
            }
        }
        match subjects.business {
            Some(id) => {
                query.and_where(Expr::col(Notifications::BusinessId).eq(id.to_string()));
            }
            None => {
                query.and_where(Expr::col(Notifications::BusinessId).is_null());
            }
        }
        match subjects.program {
            Some(id) => {
                query.and_where(Expr::col(Notifications::ProgramId).eq(id.to_string()));
            }
            None => {
                query.and_where(Expr::col(Notifications::ProgramId).is_null());
            }
        }

        let query = query
            .order_by(Notifications::CreatedAt, Order::Desc)
            .limit(1)
            .to_string(SqliteQueryBuilder);

        if let Some(row) = sqlx::query(&query).fetch_optional(&self.pool).await? {
            let id: String = row.get("id");
            let id = Uuid::parse_str(&id)
                .map_err(|e| CoreError::Internal(format!("corrupt notification id: {e}")))?;
            debug!(kind = kind.as_str(), notification = %id, "merged duplicate notification");
            return Ok(id);
        }

        let id = Uuid::new_v4();
        let insert = Query::insert()
            .into_table(Notifications::Table)
            .columns([
                Notifications::Id,
                Notifications::Kind,
                Notifications::CustomerAccountId,
                Notifications::BusinessId,
                Notifications::ProgramId,
                Notifications::Payload,
                Notifications::Message,
                Notifications::RequiresAction,
                Notifications::Read,
                Notifications::Actioned,
                Notifications::CreatedAt,
            ])
            .values_panic([
                id.to_string().into(),
                kind.as_str().into(),
                subjects.customer_account.clone().into(),
                subjects.business.map(|b| b.to_string()).into(),
                subjects.program.map(|p| p.to_string()).into(),
                serde_json::to_string(payload)?.into(),
                payload.message().into(),
                i32::from(payload.requires_action()).into(),
                0.into(),
                0.into(),
                fmt_ts(now).into(),
            ])
            .to_string(SqliteQueryBuilder);

        sqlx::query(&insert).execute(&self.pool).await?;
        debug!(kind = kind.as_str(), notification = %id, "notification emitted");
        Ok(id)
    }
}
