//! Ledger storage: pool construction and schema initialization.
//!
//! All queries in the crate are built with sea-query and executed with
//! sqlx against SQLite. Mutating operations run inside explicit
//! transactions owned by the engines.

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use crate::config::StorageConfig;
use crate::error::Result;

pub mod ledger;
pub mod schema;

pub use ledger::Ledger;

/// Open a SQLite pool for the configured database path.
///
/// `:memory:` yields a private in-memory database for tests and
/// embedded use.
pub async fn connect(config: &StorageConfig) -> Result<SqlitePool> {
    info!(path = %config.path, "opening ledger database");

    if config.path == ":memory:" {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        // In-memory databases are per-connection; a second pool connection
        // would see an empty schema.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        return Ok(pool);
    }

    if let Some(parent) = std::path::Path::new(&config.path).parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| crate::error::CoreError::Internal(format!("create db dir: {e}")))?;
    }

    let options = SqliteConnectOptions::new()
        .filename(&config.path)
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    Ok(pool)
}

/// Create the ledger tables and indexes if they do not exist.
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::raw_sql(schema::CREATE_LEDGER_TABLES).execute(pool).await?;
    Ok(())
}
