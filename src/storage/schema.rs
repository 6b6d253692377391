//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building.

use sea_query::Iden;

/// Customers table schema.
#[derive(Iden)]
pub enum Customers {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "account_id"]
    AccountId,
    #[iden = "name"]
    Name,
    #[iden = "email"]
    Email,
    #[iden = "created_at"]
    CreatedAt,
}

/// Businesses table schema.
#[derive(Iden)]
pub enum Businesses {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "name"]
    Name,
    #[iden = "created_at"]
    CreatedAt,
}

/// Programs table schema.
#[derive(Iden)]
pub enum Programs {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "business_id"]
    BusinessId,
    #[iden = "name"]
    Name,
    #[iden = "created_at"]
    CreatedAt,
}

/// Customer-business relationships table schema.
#[derive(Iden)]
pub enum Relationships {
    Table,
    #[iden = "customer_id"]
    CustomerId,
    #[iden = "business_id"]
    BusinessId,
    #[iden = "status"]
    Status,
    #[iden = "updated_at"]
    UpdatedAt,
}

/// Enrollments table schema.
#[derive(Iden)]
pub enum Enrollments {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "customer_id"]
    CustomerId,
    #[iden = "program_id"]
    ProgramId,
    #[iden = "status"]
    Status,
    #[iden = "points"]
    Points,
    #[iden = "enrolled_at"]
    EnrolledAt,
    #[iden = "last_activity_at"]
    LastActivityAt,
}

/// Cards table schema.
#[derive(Iden)]
pub enum Cards {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "customer_id"]
    CustomerId,
    #[iden = "program_id"]
    ProgramId,
    #[iden = "card_number"]
    CardNumber,
    #[iden = "points"]
    Points,
    #[iden = "tier"]
    Tier,
    #[iden = "active"]
    Active,
    #[iden = "created_at"]
    CreatedAt,
}

/// Audit entries table schema.
#[derive(Iden)]
pub enum AuditEntries {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "card_id"]
    CardId,
    #[iden = "entry_type"]
    EntryType,
    #[iden = "delta"]
    Delta,
    #[iden = "balance_after"]
    BalanceAfter,
    #[iden = "description"]
    Description,
    #[iden = "reference"]
    Reference,
    #[iden = "created_at"]
    CreatedAt,
}

/// Approval requests table schema.
#[derive(Iden)]
pub enum ApprovalRequests {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "account_id"]
    AccountId,
    #[iden = "business_id"]
    BusinessId,
    #[iden = "program_id"]
    ProgramId,
    #[iden = "status"]
    Status,
    #[iden = "notification_id"]
    NotificationId,
    #[iden = "requested_at"]
    RequestedAt,
    #[iden = "responded_at"]
    RespondedAt,
}

/// Notifications table schema.
#[derive(Iden)]
pub enum Notifications {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "kind"]
    Kind,
    #[iden = "customer_account_id"]
    CustomerAccountId,
    #[iden = "business_id"]
    BusinessId,
    #[iden = "program_id"]
    ProgramId,
    #[iden = "payload"]
    Payload,
    #[iden = "message"]
    Message,
    #[iden = "requires_action"]
    RequiresAction,
    #[iden = "read"]
    Read,
    #[iden = "actioned"]
    Actioned,
    #[iden = "created_at"]
    CreatedAt,
}

/// SQL for creating the ledger tables.
///
/// The partial unique index on active cards is the last-resort backstop
/// against concurrent provisioning races; the partial unique index on
/// audit references enforces idempotency-key uniqueness.
pub const CREATE_LEDGER_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS customers (
    id TEXT PRIMARY KEY,
    account_id TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    email TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS businesses (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS programs (
    id TEXT PRIMARY KEY,
    business_id TEXT NOT NULL REFERENCES businesses(id),
    name TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS relationships (
    customer_id TEXT NOT NULL REFERENCES customers(id),
    business_id TEXT NOT NULL REFERENCES businesses(id),
    status TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (customer_id, business_id)
);

CREATE TABLE IF NOT EXISTS enrollments (
    id TEXT PRIMARY KEY,
    customer_id TEXT NOT NULL REFERENCES customers(id),
    program_id TEXT NOT NULL REFERENCES programs(id),
    status TEXT NOT NULL,
    points INTEGER NOT NULL DEFAULT 0,
    enrolled_at TEXT NOT NULL,
    last_activity_at TEXT NOT NULL,
    UNIQUE (customer_id, program_id)
);

CREATE TABLE IF NOT EXISTS cards (
    id TEXT PRIMARY KEY,
    customer_id TEXT NOT NULL REFERENCES customers(id),
    program_id TEXT NOT NULL REFERENCES programs(id),
    card_number TEXT NOT NULL UNIQUE,
    points INTEGER NOT NULL DEFAULT 0,
    tier TEXT NOT NULL,
    active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_cards_active_enrollment
    ON cards(customer_id, program_id) WHERE active = 1;

CREATE TABLE IF NOT EXISTS audit_entries (
    id TEXT PRIMARY KEY,
    card_id TEXT NOT NULL REFERENCES cards(id),
    entry_type TEXT NOT NULL,
    delta INTEGER NOT NULL,
    balance_after INTEGER NOT NULL,
    description TEXT NOT NULL,
    reference TEXT,
    created_at TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_audit_reference
    ON audit_entries(reference) WHERE reference IS NOT NULL;

CREATE TABLE IF NOT EXISTS approval_requests (
    id TEXT PRIMARY KEY,
    account_id TEXT NOT NULL,
    business_id TEXT NOT NULL REFERENCES businesses(id),
    program_id TEXT NOT NULL REFERENCES programs(id),
    status TEXT NOT NULL,
    notification_id TEXT,
    requested_at TEXT NOT NULL,
    responded_at TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_approvals_pending
    ON approval_requests(account_id, program_id) WHERE status = 'PENDING';

CREATE TABLE IF NOT EXISTS notifications (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    customer_account_id TEXT,
    business_id TEXT,
    program_id TEXT,
    payload TEXT NOT NULL,
    message TEXT NOT NULL,
    requires_action INTEGER NOT NULL DEFAULT 0,
    read INTEGER NOT NULL DEFAULT 0,
    actioned INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_notifications_dedup
    ON notifications(kind, customer_account_id, business_id, program_id, created_at);
"#;
