//! Capability traits for the restore target and their MySQL implementations.
//!
//! The restore engine talks to the outside world through narrow, object-safe
//! traits so each concern can be replaced independently (and faked in tests):
//!
//! - [`DatabaseOps`]: connection test, existence checks, drops, listing
//! - [`BackupOps`]: writes the pre-restore safety backup
//! - [`IngestionSink`]: runs the client process that consumes the SQL stream
//!
//! # Security Guarantees
//! - Credentials are never stored in logged configuration
//! - Connection strings are sanitized in error messages
//! - Identifiers are quoted before being interpolated into DDL

pub mod config;

#[cfg(feature = "mysql")]
pub mod mysql;

pub use config::ConnectionConfig;

use crate::Result;
use crate::models::BackupOptions;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

/// Stream handed to an [`IngestionSink`] as the client's stdin.
pub type IngestionInput = Box<dyn AsyncRead + Send + Unpin>;

/// Database-level operations against the restore target.
///
/// # Object Safety
/// This trait is object-safe, allowing for dynamic dispatch through
/// `Arc<dyn DatabaseOps>`.
#[async_trait]
pub trait DatabaseOps: Send + Sync {
    /// Tests connectivity to the target server.
    async fn test_connection(&self) -> Result<()>;

    /// Returns true if `name` exists on the target.
    async fn database_exists(&self, name: &str) -> Result<bool>;

    /// Drops `name` (no-op if it does not exist).
    async fn drop_database(&self, name: &str) -> Result<()>;

    /// Lists every database visible to the connected user.
    async fn list_databases(&self) -> Result<Vec<String>>;

    /// Executes a statement, retrying transient failures.
    ///
    /// Returns the number of affected rows.
    async fn execute_with_retry(&self, sql: &str) -> Result<u64>;
}

/// Writes the pre-restore safety backup.
#[async_trait]
pub trait BackupOps: Send + Sync {
    /// Backs up `databases` into one artifact and returns its path.
    ///
    /// # Errors
    /// Returns error if the dump tool fails, the artifact cannot be written,
    /// or `cancel` fires first. A partially written artifact is removed.
    async fn backup_databases(
        &self,
        databases: &[String],
        options: &BackupOptions,
        label: &str,
        cancel: &CancellationToken,
    ) -> Result<PathBuf>;
}

/// Client process that consumes a SQL stream on stdin.
#[async_trait]
pub trait IngestionSink: Send + Sync {
    /// Runs the client with `args`, feeding `input` to its stdin.
    ///
    /// Resolves when the client exits. An unsuccessful exit carries the
    /// client's stderr in the error so callers can classify it. When
    /// `cancel` fires the client is killed and a cancellation error returned.
    async fn execute(
        &self,
        args: &[String],
        input: IngestionInput,
        cancel: &CancellationToken,
    ) -> Result<()>;
}
