//! Points award engine.
//!
//! Validates and applies a point change from a QR scan or manual award.
//! The card's `points` column is the single source of truth: the award
//! increments it exactly once, and the enrollment counter is assigned
//! from it in the same transaction, never incremented on its own.
//! Replays of an idempotency key return the recorded result without a
//! second balance change.

use std::sync::Arc;

use backon::Retryable;
use chrono::{DateTime, Utc};
use sea_query::{Asterisk, Expr, Query, SqliteQueryBuilder};
use sqlx::{Acquire, SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::model::{
    AuditEntry, AwardOutcome, AwardSource, Card, CardRef, EnrollmentStatus, Tier,
};
use crate::notify::{Deduplicator, NotificationPayload, Subjects};
use crate::provisioning::{
    ensure_card, find_customer_by_account, find_enrollment, find_program,
};
use crate::ratelimit::RateLimiter;
use crate::storage::schema::{AuditEntries, Cards, Customers, Enrollments};
use crate::utils::retry::{is_retryable, map_exhausted, tx_backoff};
use crate::utils::time::fmt_ts;
use crate::validation::{
    validate_account_id, validate_actor, validate_card_number, validate_idempotency_key,
    validate_points,
};

/// Applies point awards to cards.
pub struct AwardEngine {
    pool: SqlitePool,
    limiter: RateLimiter,
    dedup: Arc<Deduplicator>,
}

impl AwardEngine {
    pub fn new(pool: SqlitePool, limiter: RateLimiter, dedup: Arc<Deduplicator>) -> Self {
        Self {
            pool,
            limiter,
            dedup,
        }
    }

    /// Award `points` to the card identified by `card_ref`.
    ///
    /// Replays with the same idempotency key are no-ops returning the
    /// prior balance. An ACTIVE enrollment without a card gets one
    /// provisioned on the fly; anything less is `NotEnrolled`.
    pub async fn award_points(
        &self,
        card_ref: &CardRef,
        points: i64,
        source: &AwardSource,
        idempotency_key: &str,
    ) -> Result<AwardOutcome> {
        validate_points(points)?;
        validate_idempotency_key(idempotency_key)?;
        validate_actor(source.actor())?;
        match card_ref {
            CardRef::Number(number) => validate_card_number(number)?,
            CardRef::Enrollment { account_id, .. } => validate_account_id(account_id)?,
        }

        // Rate limiting is keyed by scanning actor and sits outside the
        // transaction; scanner retries burn budget, not balances.
        self.limiter.check(source.actor(), Utc::now()).await?;

        let (outcome, plan) =
            (|| async { self.award_tx(card_ref, points, source, idempotency_key).await })
                .retry(tx_backoff())
                .when(is_retryable)
                .notify(|err: &CoreError, dur: std::time::Duration| {
                    warn!(error = %err, delay = ?dur, "transaction conflict, retrying");
                })
                .await
                .map_err(map_exhausted)?;

        if let Some((payload, subjects)) = plan {
            if let Err(err) = self.dedup.emit_or_merge(&payload, &subjects, Utc::now()).await {
                warn!(error = %err, "notification emission failed");
            }
        }

        info!(card = %outcome.card_id, points, balance = outcome.balance,
            replayed = outcome.replayed, actor = %source.actor(), "points award processed");
        Ok(outcome)
    }

    async fn award_tx(
        &self,
        card_ref: &CardRef,
        points: i64,
        source: &AwardSource,
        idempotency_key: &str,
    ) -> Result<(AwardOutcome, Option<(NotificationPayload, Subjects)>)> {
        let now = Utc::now();
        let mut conn = self.pool.acquire().await?;
        let mut tx = conn.begin().await?;

        let card = resolve_card(&mut tx, card_ref, now).await?;

        // Active card without an active enrollment is an invariant break,
        // not an award target.
        let enrollment = find_enrollment(&mut tx, card.customer_id, card.program_id)
            .await?
            .filter(|e| e.status == EnrollmentStatus::Active)
            .ok_or(CoreError::NotEnrolled)?;

        if let Some(prior) = find_audit_by_reference(&mut tx, idempotency_key).await? {
            tx.commit().await?;
            debug!(reference = %idempotency_key, "idempotency key replayed");
            return Ok((
                AwardOutcome {
                    card_id: prior.card_id,
                    balance: prior.balance_after,
                    replayed: true,
                },
                None,
            ));
        }

        let balance = card.points + points;

        // Audit insert goes first: a concurrent award with the same key
        // trips the reference unique index here, before any balance write.
        let audit_insert = Query::insert()
            .into_table(AuditEntries::Table)
            .columns([
                AuditEntries::Id,
                AuditEntries::CardId,
                AuditEntries::EntryType,
                AuditEntries::Delta,
                AuditEntries::BalanceAfter,
                AuditEntries::Description,
                AuditEntries::Reference,
                AuditEntries::CreatedAt,
            ])
            .values_panic([
                Uuid::new_v4().to_string().into(),
                card.id.to_string().into(),
                source.audit_type().as_str().into(),
                points.into(),
                balance.into(),
                format!("{} by {}", source.describe(), source.actor()).into(),
                idempotency_key.into(),
                fmt_ts(now).into(),
            ])
            .to_string(SqliteQueryBuilder);

        if let Err(e) = sqlx::query(&audit_insert).execute(&mut *tx).await {
            let err = CoreError::from(e);
            if err.is_unique_violation() {
                // Release the connection before re-reading through the pool.
                drop(tx);
                drop(conn);
                return self.replay_outcome(idempotency_key).await;
            }
            return Err(err);
        }

        // The one and only balance increment.
        let card_update = Query::update()
            .table(Cards::Table)
            .values([
                (Cards::Points, balance.into()),
                (Cards::Tier, Tier::for_balance(balance).as_str().into()),
            ])
            .and_where(Expr::col(Cards::Id).eq(card.id.to_string()))
            .to_string(SqliteQueryBuilder);
        sqlx::query(&card_update).execute(&mut *tx).await?;

        // Mirror, not a second counter: assigned equal to the card
        // balance, never incremented independently.
        let enrollment_update = Query::update()
            .table(Enrollments::Table)
            .values([
                (Enrollments::Points, balance.into()),
                (Enrollments::LastActivityAt, fmt_ts(now).into()),
            ])
            .and_where(Expr::col(Enrollments::Id).eq(enrollment.id.to_string()))
            .to_string(SqliteQueryBuilder);
        sqlx::query(&enrollment_update).execute(&mut *tx).await?;

        let program = find_program(&mut tx, card.program_id).await?;
        let account_id = find_account_for_customer(&mut tx, card.customer_id).await?;

        tx.commit().await?;

        let plan = match (program, account_id) {
            (Some(program), Some(account_id)) => Some((
                NotificationPayload::PointsAwarded {
                    points,
                    balance,
                    program_name: program.name,
                },
                Subjects::customer(&account_id, card.program_id),
            )),
            _ => None,
        };

        Ok((
            AwardOutcome {
                card_id: card.id,
                balance,
                replayed: false,
            },
            plan,
        ))
    }

    /// Recover the recorded outcome for an idempotency key that lost an
    /// insert race.
    async fn replay_outcome(
        &self,
        idempotency_key: &str,
    ) -> Result<(AwardOutcome, Option<(NotificationPayload, Subjects)>)> {
        let mut conn = self.pool.acquire().await?;
        let prior = find_audit_by_reference(&mut conn, idempotency_key)
            .await?
            .ok_or_else(|| {
                CoreError::Internal("idempotency conflict without audit row".to_string())
            })?;
        Ok((
            AwardOutcome {
                card_id: prior.card_id,
                balance: prior.balance_after,
                replayed: true,
            },
            None,
        ))
    }
}

/// Resolve the award target. Enrollment-identified scans provision a
/// card for an ACTIVE enrollment that has none; everything else that
/// fails to resolve is `NotEnrolled`.
async fn resolve_card(
    conn: &mut SqliteConnection,
    card_ref: &CardRef,
    now: DateTime<Utc>,
) -> Result<Card> {
    match card_ref {
        CardRef::Number(number) => {
            let query = Query::select()
                .column(Asterisk)
                .from(Cards::Table)
                .and_where(Expr::col(Cards::CardNumber).eq(number.as_str()))
                .to_string(SqliteQueryBuilder);
            let row = sqlx::query(&query).fetch_optional(&mut *conn).await?;
            let card = row.map(|r| Card::from_row(&r)).transpose()?;
            card.filter(|c| c.active).ok_or(CoreError::NotEnrolled)
        }
        CardRef::Enrollment {
            account_id,
            program_id,
        } => {
            let customer = find_customer_by_account(conn, account_id)
                .await?
                .ok_or(CoreError::NotEnrolled)?;
            let enrollment = find_enrollment(conn, customer.id, *program_id)
                .await?
                .ok_or(CoreError::NotEnrolled)?;
            if enrollment.status != EnrollmentStatus::Active {
                return Err(CoreError::NotEnrolled);
            }

            let (card_id, _) = ensure_card(conn, customer.id, *program_id, now).await?;
            let query = Query::select()
                .column(Asterisk)
                .from(Cards::Table)
                .and_where(Expr::col(Cards::Id).eq(card_id.to_string()))
                .to_string(SqliteQueryBuilder);
            let row = sqlx::query(&query).fetch_optional(&mut *conn).await?;
            row.map(|r| Card::from_row(&r)).transpose()?.ok_or_else(|| {
                CoreError::Internal("card vanished after provisioning".to_string())
            })
        }
    }
}

async fn find_audit_by_reference(
    conn: &mut SqliteConnection,
    reference: &str,
) -> Result<Option<AuditEntry>> {
    let query = Query::select()
        .column(Asterisk)
        .from(AuditEntries::Table)
        .and_where(Expr::col(AuditEntries::Reference).eq(reference))
        .to_string(SqliteQueryBuilder);

    let row = sqlx::query(&query).fetch_optional(&mut *conn).await?;
    row.map(|r| AuditEntry::from_row(&r)).transpose()
}

async fn find_account_for_customer(
    conn: &mut SqliteConnection,
    customer_id: Uuid,
) -> Result<Option<String>> {
    let query = Query::select()
        .column(Customers::AccountId)
        .from(Customers::Table)
        .and_where(Expr::col(Customers::Id).eq(customer_id.to_string()))
        .to_string(SqliteQueryBuilder);

    let row = sqlx::query(&query).fetch_optional(&mut *conn).await?;
    Ok(row.map(|r| sqlx::Row::get(&r, "account_id")))
}
