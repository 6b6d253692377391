//! Loyalty facade for in-process library usage.
//!
//! Provides a simple API for embedding the loyalty core without an HTTP
//! layer: the web/API boundary of the surrounding system calls these
//! methods from its request handlers.
//!
//! # Example
//!
//! ```ignore
//! use punchcard::config::Config;
//! use punchcard::facade::Loyalty;
//! use punchcard::model::{AwardSource, CardRef, Decision};
//!
//! let loyalty = Loyalty::builder(Config::for_test())
//!     .with_accounts(directory)
//!     .build()
//!     .await?;
//!
//! let request = loyalty
//!     .request_enrollment(business.id, program.id, "acct-1")
//!     .await?;
//! let outcome = loyalty.resolve_approval(request.id, Decision::Approve).await?;
//! let award = loyalty
//!     .award_points(
//!         &CardRef::Number(card_number),
//!         25,
//!         &AwardSource::Scan { actor: "scanner-1".into() },
//!         "tx-1",
//!     )
//!     .await?;
//! ```

use std::sync::Arc;

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::accounts::{AccountDirectory, StaticDirectory};
use crate::config::Config;
use crate::error::{CoreError, Result};
use crate::model::{ApprovalOutcome, ApprovalRequest, AwardOutcome, AwardSource, CardRef, Decision};
use crate::notify::Deduplicator;
use crate::points::AwardEngine;
use crate::provisioning::ProvisioningEngine;
use crate::ratelimit::{InMemoryCounter, RateCounter, RateLimiter};
use crate::signature::{QrPayload, QrSigner};
use crate::storage::{self, Ledger};

/// Builder for a Loyalty instance.
pub struct LoyaltyBuilder {
    config: Config,
    accounts: Option<Arc<dyn AccountDirectory>>,
    counter: Option<Arc<dyn RateCounter>>,
}

impl LoyaltyBuilder {
    /// Create a new builder with given config.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            accounts: None,
            counter: None,
        }
    }

    /// Wire the external account system.
    pub fn with_accounts(mut self, accounts: Arc<dyn AccountDirectory>) -> Self {
        self.accounts = Some(accounts);
        self
    }

    /// Substitute a shared rate-limit counter store.
    pub fn with_rate_counter(mut self, counter: Arc<dyn RateCounter>) -> Self {
        self.counter = Some(counter);
        self
    }

    /// Build the Loyalty instance: open the pool, create the schema,
    /// and wire the engines.
    pub async fn build(self) -> Result<Loyalty> {
        if self.config.signature.secret.is_empty() {
            return Err(CoreError::validation(
                "signature.secret",
                "signing secret must be configured",
            ));
        }

        let pool = storage::connect(&self.config.storage).await?;
        storage::init_schema(&pool).await?;

        let signer = QrSigner::new(
            self.config.signature.secret.clone().into_bytes(),
            self.config.signature.validity_secs,
        );

        let dedup = Arc::new(Deduplicator::new(
            pool.clone(),
            self.config.notifications.dedup_window_secs,
        ));

        let counter = self
            .counter
            .unwrap_or_else(|| Arc::new(InMemoryCounter::new()));
        let limiter = RateLimiter::new(
            counter,
            self.config.rate_limit.max_hits,
            self.config.rate_limit.window_secs,
        );

        let accounts = self
            .accounts
            .unwrap_or_else(|| Arc::new(StaticDirectory::new()));

        let provisioning =
            ProvisioningEngine::new(pool.clone(), accounts, Arc::clone(&dedup));
        let awards = AwardEngine::new(pool.clone(), limiter, dedup);

        Ok(Loyalty {
            ledger: Ledger::new(pool.clone()),
            pool,
            signer,
            provisioning,
            awards,
        })
    }
}

/// Main loyalty instance for library usage.
pub struct Loyalty {
    pool: SqlitePool,
    signer: QrSigner,
    provisioning: ProvisioningEngine,
    awards: AwardEngine,
    ledger: Ledger,
}

impl Loyalty {
    /// Create a new builder with given config.
    pub fn builder(config: Config) -> LoyaltyBuilder {
        LoyaltyBuilder::new(config)
    }

    /// Open an enrollment request from a business to a customer.
    pub async fn request_enrollment(
        &self,
        business_id: Uuid,
        program_id: Uuid,
        account_id: &str,
    ) -> Result<ApprovalRequest> {
        self.provisioning
            .request_enrollment(business_id, program_id, account_id)
            .await
    }

    /// Resolve a pending approval request.
    pub async fn resolve_approval(
        &self,
        request_id: Uuid,
        decision: Decision,
    ) -> Result<ApprovalOutcome> {
        self.provisioning.resolve_approval(request_id, decision).await
    }

    /// Award points to a card.
    pub async fn award_points(
        &self,
        card_ref: &CardRef,
        points: i64,
        source: &AwardSource,
        idempotency_key: &str,
    ) -> Result<AwardOutcome> {
        self.awards
            .award_points(card_ref, points, source, idempotency_key)
            .await
    }

    /// Produce a signed QR token for a payload.
    pub fn sign_qr(&self, payload: &QrPayload) -> Result<String> {
        self.signer.sign(payload, Utc::now())
    }

    /// Verify a scanned QR token and extract its payload.
    pub fn verify_qr(&self, token: &str) -> Result<QrPayload> {
        self.signer.verify(token, Utc::now())
    }

    /// Query access to ledger rows.
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
