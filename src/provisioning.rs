//! Enrollment provisioning engine.
//!
//! Processes an approval decision into enrollment + card state inside a
//! single transaction. Replays are idempotent: a terminal request
//! resolved again with the same decision returns the original outcome;
//! a conflicting decision is rejected. Safety under concurrency comes
//! from the terminal-status compare-and-set, lookup-before-insert for
//! enrollment and card existence, and unique constraints as the
//! last-resort backstop.

use std::sync::Arc;

use backon::Retryable;
use chrono::{DateTime, Utc};
use sea_query::{Asterisk, Expr, OnConflict, Query, SqliteQueryBuilder};
use sqlx::{Acquire, SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::accounts::{AccountDirectory, AccountProfile};
use crate::error::{CoreError, Result};
use crate::model::{
    ApprovalOutcome, ApprovalRequest, ApprovalStatus, Business, Card, Customer, Decision,
    Enrollment, EnrollmentStatus, Program, RelationshipStatus, Tier,
};
use crate::notify::{Deduplicator, NotificationPayload, Subjects};
use crate::storage::schema::{
    ApprovalRequests, Businesses, Cards, Customers, Enrollments, Notifications, Programs,
    Relationships,
};
use crate::utils::retry::{is_retryable, map_exhausted, tx_backoff};
use crate::utils::time::fmt_ts;
use crate::validation::validate_account_id;

/// Notification to emit after the transaction commits.
type NotificationPlan = (NotificationPayload, Subjects);

/// Resolves approval requests into enrollment and card state.
pub struct ProvisioningEngine {
    pool: SqlitePool,
    accounts: Arc<dyn AccountDirectory>,
    dedup: Arc<Deduplicator>,
}

impl ProvisioningEngine {
    pub fn new(
        pool: SqlitePool,
        accounts: Arc<dyn AccountDirectory>,
        dedup: Arc<Deduplicator>,
    ) -> Self {
        Self {
            pool,
            accounts,
            dedup,
        }
    }

    /// Open an enrollment request from a business to a customer.
    ///
    /// Creates the PENDING approval request linked to an actionable
    /// notification. Re-requesting while a PENDING request exists
    /// returns the existing request instead of creating another.
    pub async fn request_enrollment(
        &self,
        business_id: Uuid,
        program_id: Uuid,
        account_id: &str,
    ) -> Result<ApprovalRequest> {
        validate_account_id(account_id)?;

        let now = Utc::now();
        let mut conn = self.pool.acquire().await?;

        let program = find_program(&mut conn, program_id)
            .await?
            .ok_or_else(|| CoreError::not_found("program", program_id))?;
        if program.business_id != business_id {
            return Err(CoreError::validation(
                "program_id",
                "program is not owned by this business",
            ));
        }
        let business = find_business(&mut conn, business_id)
            .await?
            .ok_or_else(|| CoreError::not_found("business", business_id))?;

        // The account must exist even though the Customer row is only
        // materialized later, on approval.
        self.accounts.lookup(account_id).await?;

        if let Some(existing) = find_pending_approval(&mut conn, account_id, program_id).await? {
            debug!(request = %existing.id, "enrollment already requested");
            return Ok(existing);
        }
        drop(conn);

        let request_id = Uuid::new_v4();
        let notification_id = self
            .dedup
            .emit_or_merge(
                &NotificationPayload::EnrollmentRequest {
                    business_name: business.name.clone(),
                    program_name: program.name.clone(),
                    approval_request: request_id,
                },
                &Subjects::customer(account_id, program_id),
                now,
            )
            .await?;

        let request = ApprovalRequest {
            id: request_id,
            account_id: account_id.to_string(),
            business_id,
            program_id,
            status: ApprovalStatus::Pending,
            notification_id: Some(notification_id),
            requested_at: now,
            responded_at: None,
        };

        let insert = Query::insert()
            .into_table(ApprovalRequests::Table)
            .columns([
                ApprovalRequests::Id,
                ApprovalRequests::AccountId,
                ApprovalRequests::BusinessId,
                ApprovalRequests::ProgramId,
                ApprovalRequests::Status,
                ApprovalRequests::NotificationId,
                ApprovalRequests::RequestedAt,
            ])
            .values_panic([
                request.id.to_string().into(),
                request.account_id.clone().into(),
                business_id.to_string().into(),
                program_id.to_string().into(),
                ApprovalStatus::Pending.as_str().into(),
                notification_id.to_string().into(),
                fmt_ts(now).into(),
            ])
            .to_string(SqliteQueryBuilder);

        match sqlx::query(&insert).execute(&self.pool).await {
            Ok(_) => {}
            // Concurrent request slipped past the lookup; the pending
            // unique index caught it. Return the winner's row.
            Err(e) => {
                let err = CoreError::from(e);
                if err.is_unique_violation() {
                    let mut conn = self.pool.acquire().await?;
                    if let Some(existing) =
                        find_pending_approval(&mut conn, account_id, program_id).await?
                    {
                        return Ok(existing);
                    }
                }
                return Err(err);
            }
        }

        info!(request = %request.id, account = %account_id, program = %program_id,
            "enrollment requested");
        Ok(request)
    }

    /// Resolve a PENDING approval request into its terminal state.
    ///
    /// Idempotent: replaying the same decision returns the original
    /// outcome without touching the ledger; a conflicting decision
    /// fails with `AlreadyTerminal`.
    pub async fn resolve_approval(
        &self,
        request_id: Uuid,
        decision: Decision,
    ) -> Result<ApprovalOutcome> {
        let (outcome, plans) = (|| async { self.resolve_tx(request_id, decision).await })
            .retry(tx_backoff())
            .when(is_retryable)
            .notify(|err: &CoreError, dur: std::time::Duration| {
                warn!(request = %request_id, error = %err, delay = ?dur,
                    "transaction conflict, retrying");
            })
            .await
            .map_err(map_exhausted)?;

        self.emit_plans(&plans).await;

        info!(request = %request_id, decision = %decision,
            card = ?outcome.card_id, "approval resolved");
        Ok(outcome)
    }

    /// Emit post-commit notifications. Best-effort: a failure here never
    /// rolls back the ledger mutation that triggered it.
    async fn emit_plans(&self, plans: &[NotificationPlan]) {
        let now = Utc::now();
        for (payload, subjects) in plans {
            if let Err(err) = self.dedup.emit_or_merge(payload, subjects, now).await {
                warn!(kind = payload.kind().as_str(), error = %err,
                    "notification emission failed");
            }
        }
    }

    async fn resolve_tx(
        &self,
        request_id: Uuid,
        decision: Decision,
    ) -> Result<(ApprovalOutcome, Vec<NotificationPlan>)> {
        let now = Utc::now();

        // Pre-read outside the transaction: the account directory call
        // is external and must not extend the write transaction.
        let request = self
            .approval(request_id)
            .await?
            .ok_or_else(|| CoreError::not_found("approval request", request_id))?;

        let mut conn = self.pool.acquire().await?;
        let profile = match find_customer_by_account(&mut conn, &request.account_id).await? {
            Some(_) => None,
            None => Some(self.accounts.lookup(&request.account_id).await?),
        };
        drop(conn);

        let mut conn = self.pool.acquire().await?;
        let mut tx = conn.begin().await?;

        // Atomic PENDING -> terminal transition; re-read on a lost race.
        let terminal = ApprovalStatus::from_decision(decision);
        let update = Query::update()
            .table(ApprovalRequests::Table)
            .values([
                (ApprovalRequests::Status, terminal.as_str().into()),
                (ApprovalRequests::RespondedAt, fmt_ts(now).into()),
            ])
            .and_where(Expr::col(ApprovalRequests::Id).eq(request_id.to_string()))
            .and_where(Expr::col(ApprovalRequests::Status).eq(ApprovalStatus::Pending.as_str()))
            .to_string(SqliteQueryBuilder);

        let transitioned = sqlx::query(&update).execute(&mut *tx).await?.rows_affected() == 1;

        if !transitioned {
            let current = find_approval(&mut tx, request_id)
                .await?
                .ok_or_else(|| CoreError::not_found("approval request", request_id))?;
            let prior = current.status.as_decision().ok_or_else(|| {
                CoreError::Internal("approval transition lost but row still pending".to_string())
            })?;
            if prior != decision {
                return Err(CoreError::AlreadyTerminal {
                    request: request_id,
                    prior,
                });
            }

            // Same decision replayed: recover the original outcome.
            let card_id = match prior {
                Decision::Decline => None,
                Decision::Approve => {
                    let customer = find_customer_by_account(&mut tx, &current.account_id)
                        .await?
                        .ok_or_else(|| {
                            CoreError::Internal(
                                "approved request without customer row".to_string(),
                            )
                        })?;
                    find_active_card(&mut tx, customer.id, current.program_id)
                        .await?
                        .map(|card| card.id)
                }
            };
            tx.commit().await?;
            debug!(request = %request_id, "approval replayed, returning prior outcome");
            return Ok((ApprovalOutcome {
                decision,
                card_id,
            }, Vec::new()));
        }

        if let Some(notification_id) = request.notification_id {
            mark_notification_actioned(&mut tx, notification_id).await?;
        }

        let program = find_program(&mut tx, request.program_id)
            .await?
            .ok_or_else(|| CoreError::not_found("program", request.program_id))?;

        // Both decisions materialize the Customer row: the DECLINED
        // relationship record references it.
        let customer = ensure_customer(&mut tx, &request.account_id, profile.as_ref(), now).await?;

        let mut plans = vec![(
            NotificationPayload::EnrollmentDecision {
                program_name: program.name.clone(),
                decision,
            },
            Subjects::business(request.business_id, request.program_id),
        )];

        let outcome = match decision {
            Decision::Decline => {
                upsert_relationship(
                    &mut tx,
                    customer.id,
                    request.business_id,
                    RelationshipStatus::Declined,
                    now,
                )
                .await?;
                ApprovalOutcome {
                    decision,
                    card_id: None,
                }
            }
            Decision::Approve => {
                upsert_relationship(
                    &mut tx,
                    customer.id,
                    request.business_id,
                    RelationshipStatus::Active,
                    now,
                )
                .await?;
                activate_enrollment(&mut tx, customer.id, request.program_id, now).await?;
                let (card_id, card_number) =
                    ensure_card(&mut tx, customer.id, request.program_id, now).await?;

                plans.push((
                    NotificationPayload::CardReady {
                        card_number,
                        program_name: program.name.clone(),
                    },
                    Subjects::customer(&request.account_id, request.program_id),
                ));
                ApprovalOutcome {
                    decision,
                    card_id: Some(card_id),
                }
            }
        };

        tx.commit().await?;
        Ok((outcome, plans))
    }

    async fn approval(&self, request_id: Uuid) -> Result<Option<ApprovalRequest>> {
        let mut conn = self.pool.acquire().await?;
        find_approval(&mut conn, request_id).await
    }
}

async fn find_approval(
    conn: &mut SqliteConnection,
    request_id: Uuid,
) -> Result<Option<ApprovalRequest>> {
    let query = Query::select()
        .column(Asterisk)
        .from(ApprovalRequests::Table)
        .and_where(Expr::col(ApprovalRequests::Id).eq(request_id.to_string()))
        .to_string(SqliteQueryBuilder);

    let row = sqlx::query(&query).fetch_optional(&mut *conn).await?;
    row.map(|r| ApprovalRequest::from_row(&r)).transpose()
}

async fn find_pending_approval(
    conn: &mut SqliteConnection,
    account_id: &str,
    program_id: Uuid,
) -> Result<Option<ApprovalRequest>> {
    let query = Query::select()
        .column(Asterisk)
        .from(ApprovalRequests::Table)
        .and_where(Expr::col(ApprovalRequests::AccountId).eq(account_id))
        .and_where(Expr::col(ApprovalRequests::ProgramId).eq(program_id.to_string()))
        .and_where(Expr::col(ApprovalRequests::Status).eq(ApprovalStatus::Pending.as_str()))
        .to_string(SqliteQueryBuilder);

    let row = sqlx::query(&query).fetch_optional(&mut *conn).await?;
    row.map(|r| ApprovalRequest::from_row(&r)).transpose()
}

pub(crate) async fn find_program(
    conn: &mut SqliteConnection,
    program_id: Uuid,
) -> Result<Option<Program>> {
    let query = Query::select()
        .column(Asterisk)
        .from(Programs::Table)
        .and_where(Expr::col(Programs::Id).eq(program_id.to_string()))
        .to_string(SqliteQueryBuilder);

    let row = sqlx::query(&query).fetch_optional(&mut *conn).await?;
    row.map(|r| Program::from_row(&r)).transpose()
}

async fn find_business(
    conn: &mut SqliteConnection,
    business_id: Uuid,
) -> Result<Option<Business>> {
    let query = Query::select()
        .column(Asterisk)
        .from(Businesses::Table)
        .and_where(Expr::col(Businesses::Id).eq(business_id.to_string()))
        .to_string(SqliteQueryBuilder);

    let row = sqlx::query(&query).fetch_optional(&mut *conn).await?;
    row.map(|r| Business::from_row(&r)).transpose()
}

pub(crate) async fn find_customer_by_account(
    conn: &mut SqliteConnection,
    account_id: &str,
) -> Result<Option<Customer>> {
    let query = Query::select()
        .column(Asterisk)
        .from(Customers::Table)
        .and_where(Expr::col(Customers::AccountId).eq(account_id))
        .to_string(SqliteQueryBuilder);

    let row = sqlx::query(&query).fetch_optional(&mut *conn).await?;
    row.map(|r| Customer::from_row(&r)).transpose()
}

pub(crate) async fn find_active_card(
    conn: &mut SqliteConnection,
    customer_id: Uuid,
    program_id: Uuid,
) -> Result<Option<Card>> {
    let query = Query::select()
        .column(Asterisk)
        .from(Cards::Table)
        .and_where(Expr::col(Cards::CustomerId).eq(customer_id.to_string()))
        .and_where(Expr::col(Cards::ProgramId).eq(program_id.to_string()))
        .and_where(Expr::col(Cards::Active).eq(1))
        .to_string(SqliteQueryBuilder);

    let row = sqlx::query(&query).fetch_optional(&mut *conn).await?;
    row.map(|r| Card::from_row(&r)).transpose()
}

pub(crate) async fn find_enrollment(
    conn: &mut SqliteConnection,
    customer_id: Uuid,
    program_id: Uuid,
) -> Result<Option<Enrollment>> {
    let query = Query::select()
        .column(Asterisk)
        .from(Enrollments::Table)
        .and_where(Expr::col(Enrollments::CustomerId).eq(customer_id.to_string()))
        .and_where(Expr::col(Enrollments::ProgramId).eq(program_id.to_string()))
        .to_string(SqliteQueryBuilder);

    let row = sqlx::query(&query).fetch_optional(&mut *conn).await?;
    row.map(|r| Enrollment::from_row(&r)).transpose()
}

async fn mark_notification_actioned(
    conn: &mut SqliteConnection,
    notification_id: Uuid,
) -> Result<()> {
    let update = Query::update()
        .table(Notifications::Table)
        .values([
            (Notifications::Actioned, 1.into()),
            (Notifications::Read, 1.into()),
        ])
        .and_where(Expr::col(Notifications::Id).eq(notification_id.to_string()))
        .to_string(SqliteQueryBuilder);

    sqlx::query(&update).execute(&mut *conn).await?;
    Ok(())
}

/// Materialize the loyalty-domain Customer row from the account profile
/// if it does not exist yet. Enrollment rows must never be created
/// before this has run.
async fn ensure_customer(
    conn: &mut SqliteConnection,
    account_id: &str,
    profile: Option<&AccountProfile>,
    now: DateTime<Utc>,
) -> Result<Customer> {
    if let Some(existing) = find_customer_by_account(conn, account_id).await? {
        return Ok(existing);
    }

    let profile = profile.ok_or_else(|| {
        CoreError::Internal("customer missing but no account profile was fetched".to_string())
    })?;

    let insert = Query::insert()
        .into_table(Customers::Table)
        .columns([
            Customers::Id,
            Customers::AccountId,
            Customers::Name,
            Customers::Email,
            Customers::CreatedAt,
        ])
        .values_panic([
            Uuid::new_v4().to_string().into(),
            account_id.into(),
            profile.name.clone().into(),
            profile.email.clone().into(),
            fmt_ts(now).into(),
        ])
        .on_conflict(
            OnConflict::column(Customers::AccountId)
                .do_nothing()
                .to_owned(),
        )
        .to_string(SqliteQueryBuilder);

    sqlx::query(&insert).execute(&mut *conn).await?;

    find_customer_by_account(conn, account_id)
        .await?
        .ok_or_else(|| CoreError::Internal("customer row vanished after insert".to_string()))
}

async fn upsert_relationship(
    conn: &mut SqliteConnection,
    customer_id: Uuid,
    business_id: Uuid,
    status: RelationshipStatus,
    now: DateTime<Utc>,
) -> Result<()> {
    let insert = Query::insert()
        .into_table(Relationships::Table)
        .columns([
            Relationships::CustomerId,
            Relationships::BusinessId,
            Relationships::Status,
            Relationships::UpdatedAt,
        ])
        .values_panic([
            customer_id.to_string().into(),
            business_id.to_string().into(),
            status.as_str().into(),
            fmt_ts(now).into(),
        ])
        .on_conflict(
            OnConflict::columns([Relationships::CustomerId, Relationships::BusinessId])
                .update_columns([Relationships::Status, Relationships::UpdatedAt])
                .to_owned(),
        )
        .to_string(SqliteQueryBuilder);

    sqlx::query(&insert).execute(&mut *conn).await?;
    Ok(())
}

/// Set an existing enrollment ACTIVE, or insert a fresh one with zero
/// points. Lookup-before-insert keeps the double-approve path from
/// tripping the (customer, program) unique constraint.
async fn activate_enrollment(
    conn: &mut SqliteConnection,
    customer_id: Uuid,
    program_id: Uuid,
    now: DateTime<Utc>,
) -> Result<()> {
    if let Some(enrollment) = find_enrollment(conn, customer_id, program_id).await? {
        if enrollment.status != EnrollmentStatus::Active {
            let update = Query::update()
                .table(Enrollments::Table)
                .values([
                    (Enrollments::Status, EnrollmentStatus::Active.as_str().into()),
                    (Enrollments::LastActivityAt, fmt_ts(now).into()),
                ])
                .and_where(Expr::col(Enrollments::Id).eq(enrollment.id.to_string()))
                .to_string(SqliteQueryBuilder);
            sqlx::query(&update).execute(&mut *conn).await?;
        }
        return Ok(());
    }

    let insert = Query::insert()
        .into_table(Enrollments::Table)
        .columns([
            Enrollments::Id,
            Enrollments::CustomerId,
            Enrollments::ProgramId,
            Enrollments::Status,
            Enrollments::Points,
            Enrollments::EnrolledAt,
            Enrollments::LastActivityAt,
        ])
        .values_panic([
            Uuid::new_v4().to_string().into(),
            customer_id.to_string().into(),
            program_id.to_string().into(),
            EnrollmentStatus::Active.as_str().into(),
            0.into(),
            fmt_ts(now).into(),
            fmt_ts(now).into(),
        ])
        .to_string(SqliteQueryBuilder);

    sqlx::query(&insert).execute(&mut *conn).await?;
    Ok(())
}

/// Reuse the active card for (customer, program) or insert a new one
/// with zero points. Shared with the award path for
/// enrolled-but-card-less customers.
pub(crate) async fn ensure_card(
    conn: &mut SqliteConnection,
    customer_id: Uuid,
    program_id: Uuid,
    now: DateTime<Utc>,
) -> Result<(Uuid, String)> {
    if let Some(card) = find_active_card(conn, customer_id, program_id).await? {
        return Ok((card.id, card.card_number));
    }

    let card_id = Uuid::new_v4();
    let card_number = generate_card_number();

    let insert = Query::insert()
        .into_table(Cards::Table)
        .columns([
            Cards::Id,
            Cards::CustomerId,
            Cards::ProgramId,
            Cards::CardNumber,
            Cards::Points,
            Cards::Tier,
            Cards::Active,
            Cards::CreatedAt,
        ])
        .values_panic([
            card_id.to_string().into(),
            customer_id.to_string().into(),
            program_id.to_string().into(),
            card_number.clone().into(),
            0.into(),
            Tier::for_balance(0).as_str().into(),
            1.into(),
            fmt_ts(now).into(),
        ])
        .to_string(SqliteQueryBuilder);

    match sqlx::query(&insert).execute(&mut *conn).await {
        Ok(_) => Ok((card_id, card_number)),
        Err(e) => {
            let err = CoreError::from(e);
            if err.is_unique_violation() {
                // Lost the race to a concurrent provisioner; the partial
                // unique index guarantees the winner's card is the one.
                if let Some(card) = find_active_card(conn, customer_id, program_id).await? {
                    return Ok((card.id, card.card_number));
                }
            }
            Err(err)
        }
    }
}

/// 16-digit card number. Uniqueness is enforced by the column
/// constraint; the space is large enough that collisions are not
/// handled beyond surfacing the constraint error.
fn generate_card_number() -> String {
    use rand::Rng;
    let mut rng = rand::rng();
    (0..16)
        .map(|_| char::from(b'0' + rng.random_range(0..10u8)))
        .collect()
}
