//! MySQL/MariaDB target adapter.
//!
//! - [`MySqlTarget`]: sqlx pool for existence checks, drops and listing
//! - [`MySqlClientSink`]: spawns the `mariadb`/`mysql` client for ingestion
//! - [`MysqldumpBackup`]: writes the pre-restore backup with the dump tool

mod client;
mod connection;
mod dump;

pub use client::{CLIENT_CANDIDATES, MySqlClientSink, resolve_tool};
pub use connection::{is_transient, quote_identifier, validate_database_name};
pub use dump::{DUMP_CANDIDATES, MysqldumpBackup, backup_file_name, build_dump_args};

use crate::adapters::{ConnectionConfig, DatabaseOps};
use crate::error::DbRestoreError;
use crate::Result;
use async_trait::async_trait;
use sqlx::{MySqlPool, Row};
use tracing::{debug, warn};

/// Restore target reached through a sqlx connection pool.
pub struct MySqlTarget {
    pub pool: MySqlPool,
    pub config: ConnectionConfig,
}

impl std::fmt::Debug for MySqlTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MySqlTarget")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl DatabaseOps for MySqlTarget {
    async fn test_connection(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| DbRestoreError::Connection {
                context: format!("Failed to reach {}", self.config),
                source: Box::new(e),
            })?;
        Ok(())
    }

    async fn database_exists(&self, name: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM INFORMATION_SCHEMA.SCHEMATA WHERE SCHEMA_NAME = ?",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            DbRestoreError::query_failed(format!("Failed to check whether '{}' exists", name), e)
        })?;
        Ok(count > 0)
    }

    async fn drop_database(&self, name: &str) -> Result<()> {
        validate_database_name(name)?;
        let sql = format!("DROP DATABASE IF EXISTS {}", quote_identifier(name));
        self.execute_with_retry(&sql).await?;
        debug!("Dropped database {}", name);
        Ok(())
    }

    async fn list_databases(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT CAST(SCHEMA_NAME AS CHAR) AS schema_name \
             FROM INFORMATION_SCHEMA.SCHEMATA ORDER BY SCHEMA_NAME",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DbRestoreError::query_failed("Failed to list databases", e))?;

        rows.iter()
            .map(|row| {
                row.try_get::<String, _>("schema_name")
                    .map_err(|e| DbRestoreError::query_failed("Failed to read schema name", e))
            })
            .collect()
    }

    async fn execute_with_retry(&self, sql: &str) -> Result<u64> {
        let attempts = self.config.retry_attempts.max(1);
        let mut attempt = 1;
        loop {
            let outcome = tokio::time::timeout(
                self.config.query_timeout,
                sqlx::query(sql).execute(&self.pool),
            )
            .await;

            match outcome {
                Ok(Ok(done)) => return Ok(done.rows_affected()),
                Ok(Err(e)) if attempt < attempts && is_transient(&e) => {
                    warn!(
                        "Transient error on attempt {}/{}: {}; retrying",
                        attempt, attempts, e
                    );
                }
                Ok(Err(e)) => {
                    return Err(DbRestoreError::query_failed(
                        format!("Statement failed after {} attempt(s)", attempt),
                        e,
                    ));
                }
                Err(elapsed) => {
                    return Err(DbRestoreError::query_failed(
                        format!("Statement timed out after {:?}", self.config.query_timeout),
                        elapsed,
                    ));
                }
            }

            tokio::time::sleep(self.config.retry_backoff * attempt).await;
            attempt += 1;
        }
    }
}
