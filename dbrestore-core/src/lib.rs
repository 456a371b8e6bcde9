//! Core engine for streaming restore-all of MySQL/MariaDB dumps.
//!
//! A full-server dump is read through a decrypt/decompress pipeline, scanned
//! for database switch statements, filtered, and streamed into the target's
//! command-line client. Existing databases are checked, backed up and
//! optionally dropped before anything is written.
//!
//! # Security Guarantees
//! - No credentials stored or logged in any data structures
//! - Passwords reach the client through the environment, never argv
//! - AES-GCM envelope with PBKDF2-derived keys for encrypted dumps
//! - Identifiers are quoted before being interpolated into DDL
//!
//! # Architecture
//! - Narrow capability traits (`DatabaseOps`, `BackupOps`, `IngestionSink`,
//!   `ProgressSink`) composed by the [`restore::RestoreAllExecutor`]
//! - Two passes over the dump, each with its own reader chain
//! - A single cancellation token governs every task of a run

pub mod adapters;
pub mod compression;
pub mod error;
pub mod logging;
pub mod models;
pub mod restore;
pub mod security;

// Re-export commonly used types
pub use adapters::{BackupOps, ConnectionConfig, DatabaseOps, IngestionSink};
pub use error::{DbRestoreError, Result};
pub use models::{
    BackupCompression, BackupOptions, DryRunReport, RestoreOptions, RestorePhase, RestoreResult,
    RestoreStats, SafetyReport,
};
pub use restore::{FilterPolicy, RestoreAllExecutor};
pub use security::{ProfileInfo, parse_profile_url};

#[cfg(feature = "encryption")]
pub use security::encryption;
