//! Read and seed access to the ledger tables.
//!
//! The engines own their transactional writes; this type covers the
//! non-transactional surface: seeding businesses and programs (owned by
//! excluded subsystems, needed by embedding applications and tests) and
//! the point lookups the engines and tests share.

use chrono::Utc;
use sea_query::{Asterisk, Expr, Order, Query, SqliteQueryBuilder};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::Result;
use crate::model::{
    ApprovalRequest, AuditEntry, Business, Card, Customer, Enrollment, Notification, Program,
};
use crate::utils::time::fmt_ts;

use super::schema::{
    ApprovalRequests, AuditEntries, Businesses, Cards, Customers, Enrollments, Notifications,
    Programs, Relationships,
};

/// Query access to ledger rows.
#[derive(Clone)]
pub struct Ledger {
    pool: SqlitePool,
}

impl Ledger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Seed a business row. Businesses are owned by the account system;
    /// the core only reads them.
    pub async fn create_business(&self, name: &str) -> Result<Business> {
        let business = Business {
            id: Uuid::new_v4(),
            name: name.to_string(),
            created_at: Utc::now(),
        };

        let query = Query::insert()
            .into_table(Businesses::Table)
            .columns([Businesses::Id, Businesses::Name, Businesses::CreatedAt])
            .values_panic([
                business.id.to_string().into(),
                business.name.clone().into(),
                fmt_ts(business.created_at).into(),
            ])
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await?;
        Ok(business)
    }

    /// Seed a program row under a business.
    pub async fn create_program(&self, business_id: Uuid, name: &str) -> Result<Program> {
        let program = Program {
            id: Uuid::new_v4(),
            business_id,
            name: name.to_string(),
            created_at: Utc::now(),
        };

        let query = Query::insert()
            .into_table(Programs::Table)
            .columns([
                Programs::Id,
                Programs::BusinessId,
                Programs::Name,
                Programs::CreatedAt,
            ])
            .values_panic([
                program.id.to_string().into(),
                program.business_id.to_string().into(),
                program.name.clone().into(),
                fmt_ts(program.created_at).into(),
            ])
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await?;
        Ok(program)
    }

    pub async fn program(&self, id: Uuid) -> Result<Option<Program>> {
        let query = Query::select()
            .column(Asterisk)
            .from(Programs::Table)
            .and_where(Expr::col(Programs::Id).eq(id.to_string()))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        row.map(|r| Program::from_row(&r)).transpose()
    }

    pub async fn customer_by_account(&self, account_id: &str) -> Result<Option<Customer>> {
        let query = Query::select()
            .column(Asterisk)
            .from(Customers::Table)
            .and_where(Expr::col(Customers::AccountId).eq(account_id))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        row.map(|r| Customer::from_row(&r)).transpose()
    }

    pub async fn enrollment(
        &self,
        customer_id: Uuid,
        program_id: Uuid,
    ) -> Result<Option<Enrollment>> {
        let query = Query::select()
            .column(Asterisk)
            .from(Enrollments::Table)
            .and_where(Expr::col(Enrollments::CustomerId).eq(customer_id.to_string()))
            .and_where(Expr::col(Enrollments::ProgramId).eq(program_id.to_string()))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        row.map(|r| Enrollment::from_row(&r)).transpose()
    }

    /// Enrollment lookup by account identity (customer row may not exist).
    pub async fn enrollment_by_account(
        &self,
        account_id: &str,
        program_id: Uuid,
    ) -> Result<Option<Enrollment>> {
        match self.customer_by_account(account_id).await? {
            Some(customer) => self.enrollment(customer.id, program_id).await,
            None => Ok(None),
        }
    }

    pub async fn card(&self, id: Uuid) -> Result<Option<Card>> {
        let query = Query::select()
            .column(Asterisk)
            .from(Cards::Table)
            .and_where(Expr::col(Cards::Id).eq(id.to_string()))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        row.map(|r| Card::from_row(&r)).transpose()
    }

    pub async fn card_by_number(&self, card_number: &str) -> Result<Option<Card>> {
        let query = Query::select()
            .column(Asterisk)
            .from(Cards::Table)
            .and_where(Expr::col(Cards::CardNumber).eq(card_number))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        row.map(|r| Card::from_row(&r)).transpose()
    }

    pub async fn active_card(
        &self,
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

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        row.map(|r| Card::from_row(&r)).transpose()
    }

    pub async fn approval_request(&self, id: Uuid) -> Result<Option<ApprovalRequest>> {
        let query = Query::select()
            .column(Asterisk)
            .from(ApprovalRequests::Table)
            .and_where(Expr::col(ApprovalRequests::Id).eq(id.to_string()))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        row.map(|r| ApprovalRequest::from_row(&r)).transpose()
    }

    pub async fn notification(&self, id: Uuid) -> Result<Option<Notification>> {
        let query = Query::select()
            .column(Asterisk)
            .from(Notifications::Table)
            .and_where(Expr::col(Notifications::Id).eq(id.to_string()))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        row.map(|r| Notification::from_row(&r)).transpose()
    }

    pub async fn notifications_of_kind(&self, kind: &str) -> Result<Vec<Notification>> {
        let query = Query::select()
            .column(Asterisk)
            .from(Notifications::Table)
            .and_where(Expr::col(Notifications::Kind).eq(kind))
            .order_by(Notifications::CreatedAt, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(Notification::from_row).collect()
    }

    pub async fn audit_entries_for_card(&self, card_id: Uuid) -> Result<Vec<AuditEntry>> {
        let query = Query::select()
            .column(Asterisk)
            .from(AuditEntries::Table)
            .and_where(Expr::col(AuditEntries::CardId).eq(card_id.to_string()))
            .order_by(AuditEntries::CreatedAt, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(AuditEntry::from_row).collect()
    }

    pub async fn relationship_status(
        &self,
        customer_id: Uuid,
        business_id: Uuid,
    ) -> Result<Option<String>> {
        let query = Query::select()
            .column(Relationships::Status)
            .from(Relationships::Table)
            .and_where(Expr::col(Relationships::CustomerId).eq(customer_id.to_string()))
            .and_where(Expr::col(Relationships::BusinessId).eq(business_id.to_string()))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        Ok(row.map(|r| sqlx::Row::get(&r, "status")))
    }
}
