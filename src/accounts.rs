//! Account system boundary.
//!
//! The core never creates accounts; it only reads `(account_id, name,
//! email)` when materializing a Customer row during provisioning. The
//! trait is the seam for wiring a real account service; the static
//! directory covers embedded use and tests.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{CoreError, Result};

/// Profile supplied by the account system.
#[derive(Debug, Clone)]
pub struct AccountProfile {
    pub account_id: String,
    pub name: String,
    pub email: String,
}

/// Read-only lookup into the external account system.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    /// Fetch the profile for an account id.
    ///
    /// Returns `NotFound` when the account does not exist; provisioning
    /// treats that as a hard failure, never inventing customer data.
    async fn lookup(&self, account_id: &str) -> Result<AccountProfile>;
}

/// In-memory account directory.
#[derive(Default)]
pub struct StaticDirectory {
    accounts: RwLock<HashMap<String, AccountProfile>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an account profile.
    pub fn insert(&self, profile: AccountProfile) {
        let mut accounts = self
            .accounts
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        accounts.insert(profile.account_id.clone(), profile);
    }
}

#[async_trait]
impl AccountDirectory for StaticDirectory {
    async fn lookup(&self, account_id: &str) -> Result<AccountProfile> {
        let accounts = self
            .accounts
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        accounts
            .get(account_id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("account", account_id))
    }
}
