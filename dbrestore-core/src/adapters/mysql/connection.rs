//! MySQL connection pool management and identifier handling.
//!
//! # Security Features
//! - Enforces connection limits to prevent resource exhaustion
//! - Sets appropriate timeouts for all operations
//! - Connection URLs are redacted in every error message

use super::MySqlTarget;
use crate::adapters::ConnectionConfig;
use crate::error::{DbRestoreError, redact_database_url};
use crate::security::ProfileInfo;
use crate::Result;
use sqlx::MySqlPool;

const ER_LOCK_WAIT_TIMEOUT: u16 = 1205;
const ER_LOCK_DEADLOCK: u16 = 1213;

impl MySqlTarget {
    /// Creates a target with a lazily connecting pool.
    ///
    /// No connection is made until the first operation; call
    /// [`crate::adapters::DatabaseOps::test_connection`] to fail fast.
    ///
    /// # Errors
    /// Returns error if the profile or pool configuration is invalid.
    pub fn connect_lazy(profile: &ProfileInfo) -> Result<Self> {
        let config = ConnectionConfig::from_profile(profile)?;
        Self::with_config(profile, config)
    }

    /// Creates a target with a custom configuration.
    pub fn with_config(profile: &ProfileInfo, config: ConnectionConfig) -> Result<Self> {
        config.validate()?;
        let url = profile.connection_url()?;
        let pool = create_mysql_connection_pool(&url, &config)?;
        Ok(Self { pool, config })
    }

    /// Closes the connection pool gracefully
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Quotes a MySQL identifier with backticks, doubling embedded backticks.
///
/// # Example
/// ```rust
/// use dbrestore_core::adapters::mysql::quote_identifier;
///
/// assert_eq!(quote_identifier("app"), "`app`");
/// assert_eq!(quote_identifier("we`ird"), "`we``ird`");
/// ```
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Validates a database name before it is used in DDL.
pub fn validate_database_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 64 {
        return Err(DbRestoreError::configuration(format!(
            "Invalid database name length: must be 1-64 characters, got {}",
            name.len()
        )));
    }
    if name.contains('\0') {
        return Err(DbRestoreError::configuration(
            "Database name contains invalid characters",
        ));
    }
    Ok(())
}

/// Returns true for errors worth retrying: dropped connections, pool
/// exhaustion, deadlocks and lock wait timeouts.
pub fn is_transient(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db) => db
            .try_downcast_ref::<sqlx::mysql::MySqlDatabaseError>()
            .is_some_and(|e| matches!(e.number(), ER_LOCK_DEADLOCK | ER_LOCK_WAIT_TIMEOUT)),
        _ => false,
    }
}

fn create_mysql_connection_pool(connection_url: &str, config: &ConnectionConfig) -> Result<MySqlPool> {
    sqlx::mysql::MySqlPoolOptions::new()
        .max_connections(config.max_connections.min(100))
        .acquire_timeout(config.connect_timeout)
        .test_before_acquire(true)
        .connect_lazy(connection_url)
        .map_err(|e| DbRestoreError::Connection {
            context: format!(
                "Failed to create MySQL connection pool to {}",
                redact_database_url(connection_url)
            ),
            source: Box::new(e),
        })
}
