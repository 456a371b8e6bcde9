//! Restore configuration and result types.
//!
//! [`RestoreOptions`] is fixed for the duration of a run. [`RestoreResult`]
//! starts with defaults when execution begins, is filled in as stages
//! complete and is returned once.

use crate::restore::filter::FilterPolicy;
use crate::security::ProfileInfo;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use zeroize::Zeroizing;

/// Target label reported for restore-all runs.
pub const ALL_DATABASES_TARGET: &str = "ALL_DATABASES";

/// Compression applied to the pre-restore backup artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupCompression {
    /// Plain SQL
    None,
    /// Zstandard (`.zst`)
    #[default]
    Zstd,
}

/// Options for the pre-restore safety backup.
#[derive(Clone, Default)]
pub struct BackupOptions {
    /// Directory receiving the backup artifact
    pub output_dir: PathBuf,
    /// Compression for the artifact
    pub compression: BackupCompression,
    /// Passphrase for encrypting the artifact; plain if `None`
    pub encryption_key: Option<Zeroizing<String>>,
}

impl std::fmt::Debug for BackupOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupOptions")
            .field("output_dir", &self.output_dir)
            .field("compression", &self.compression)
            .field("encrypted", &self.encryption_key.is_some())
            .finish()
    }
}

impl BackupOptions {
    /// Creates backup options writing into `output_dir`.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            ..Self::default()
        }
    }

    /// Sets the artifact compression.
    pub fn with_compression(mut self, compression: BackupCompression) -> Self {
        self.compression = compression;
        self
    }

    /// Encrypts the artifact with the given passphrase.
    pub fn with_encryption_key(mut self, key: Option<String>) -> Self {
        self.encryption_key = key.filter(|k| !k.is_empty()).map(Zeroizing::new);
        self
    }
}

/// Immutable configuration for one restore-all run.
#[derive(Clone)]
pub struct RestoreOptions {
    /// Restore target
    pub profile: ProfileInfo,
    /// Dump file to restore
    pub source_file: PathBuf,
    /// Passphrase for `.enc` sources
    pub encryption_key: Option<Zeroizing<String>>,
    /// Ticket / audit identifier recorded in logs and backup names
    pub ticket: String,
    /// Drop existing target databases before streaming
    pub drop_target: bool,
    /// Skip the pre-restore backup
    pub skip_backup: bool,
    /// Abort on the first per-database safety failure
    pub stop_on_error: bool,
    /// Analyze only; never touch the target
    pub dry_run: bool,
    /// Database keep/skip rules shared by both passes
    pub filter: FilterPolicy,
    /// Companion user-grants SQL file
    pub grants_file: Option<PathBuf>,
    /// Do not apply the grants file
    pub skip_grants: bool,
    /// Pre-restore backup settings
    pub backup: BackupOptions,
}

impl std::fmt::Debug for RestoreOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestoreOptions")
            .field("profile", &self.profile.to_safe_string())
            .field("source_file", &self.source_file)
            .field("encrypted", &self.encryption_key.is_some())
            .field("ticket", &self.ticket)
            .field("drop_target", &self.drop_target)
            .field("skip_backup", &self.skip_backup)
            .field("stop_on_error", &self.stop_on_error)
            .field("dry_run", &self.dry_run)
            .field("filter", &self.filter)
            .field("grants_file", &self.grants_file)
            .field("skip_grants", &self.skip_grants)
            .field("backup", &self.backup)
            .finish()
    }
}

impl RestoreOptions {
    /// Creates options with safe defaults: backup on, no drop, continue on error.
    pub fn new(profile: ProfileInfo, source_file: impl Into<PathBuf>) -> Self {
        Self {
            profile,
            source_file: source_file.into(),
            encryption_key: None,
            ticket: String::new(),
            drop_target: false,
            skip_backup: false,
            stop_on_error: false,
            dry_run: false,
            filter: FilterPolicy::default(),
            grants_file: None,
            skip_grants: false,
            backup: BackupOptions::default(),
        }
    }

    /// Sets the decryption passphrase; empty strings count as absent.
    pub fn with_encryption_key(mut self, key: Option<String>) -> Self {
        self.encryption_key = key.filter(|k| !k.is_empty()).map(Zeroizing::new);
        self
    }

    /// Sets the ticket / audit identifier.
    pub fn with_ticket(mut self, ticket: impl Into<String>) -> Self {
        self.ticket = ticket.into();
        self
    }

    /// Drops existing target databases before streaming.
    pub fn with_drop_target(mut self, drop_target: bool) -> Self {
        self.drop_target = drop_target;
        self
    }

    /// Skips the pre-restore backup.
    pub fn with_skip_backup(mut self, skip_backup: bool) -> Self {
        self.skip_backup = skip_backup;
        self
    }

    /// Aborts on the first safety failure instead of continuing.
    pub fn with_stop_on_error(mut self, stop_on_error: bool) -> Self {
        self.stop_on_error = stop_on_error;
        self
    }

    /// Analyzes the dump without touching the target.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Sets the database filter policy.
    pub fn with_filter(mut self, filter: FilterPolicy) -> Self {
        self.filter = filter;
        self
    }

    /// Sets the companion grants file.
    pub fn with_grants_file(mut self, grants_file: Option<PathBuf>) -> Self {
        self.grants_file = grants_file;
        self
    }

    /// Disables grants restore.
    pub fn with_skip_grants(mut self, skip_grants: bool) -> Self {
        self.skip_grants = skip_grants;
        self
    }

    /// Sets pre-restore backup settings.
    pub fn with_backup(mut self, backup: BackupOptions) -> Self {
        self.backup = backup;
        self
    }

    /// Returns the decryption passphrase, if any.
    pub fn encryption_key(&self) -> Option<&str> {
        self.encryption_key.as_ref().map(|k| k.as_str())
    }
}

/// Information about a database that failed a safety step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseFailure {
    /// Name of the database that failed
    pub database_name: String,
    /// Error message describing the failure
    pub error_message: String,
}

impl DatabaseFailure {
    /// Records a failure for `database_name`.
    pub fn new(database_name: impl Into<String>, error: &crate::DbRestoreError) -> Self {
        Self {
            database_name: database_name.into(),
            error_message: error.to_string(),
        }
    }
}

/// A database excluded by the filter policy, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedDatabase {
    /// Database name as it appears in the dump
    pub name: String,
    /// Human-readable reason
    pub reason: String,
}

/// Outcome of the pre-restore safety stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyReport {
    /// Enumerated databases that already existed on the target
    pub existing: Vec<String>,
    /// Existence checks that failed (continue-on-error only)
    pub check_failures: Vec<DatabaseFailure>,
    /// Databases included in the backup artifact
    pub backed_up: Vec<String>,
    /// Backup artifact path, if one was written
    pub backup_file: Option<PathBuf>,
    /// Backup error message (continue-on-error only)
    pub backup_error: Option<String>,
    /// Databases dropped before streaming
    pub dropped: Vec<String>,
    /// Drops that failed (continue-on-error only)
    pub drop_failures: Vec<DatabaseFailure>,
}

/// Counters produced by the streaming pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreStats {
    /// Distinct kept databases forwarded to the ingestion sink
    pub restored_count: usize,
    /// Lines written to the ingestion sink
    pub lines_forwarded: u64,
    /// Bytes written to the ingestion sink
    pub bytes_forwarded: u64,
}

/// Per-database summary from a dry run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabasePlan {
    /// Database name
    pub name: String,
    /// Lines that would be forwarded, including the switch statement
    pub line_count: u64,
}

/// Result of analyzing a dump without restoring it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DryRunReport {
    /// Databases that would be restored, in first-seen order
    pub databases: Vec<DatabasePlan>,
    /// Databases the filter would skip
    pub skipped: Vec<SkippedDatabase>,
    /// Lines before the first switch statement (global statements)
    pub preamble_lines: u64,
    /// Total lines scanned
    pub total_lines: u64,
}

/// Lifecycle phase of a restore run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RestorePhase {
    /// Not started
    #[default]
    Idle,
    /// Pass 1: discovering databases
    Enumerating,
    /// Existence checks, backup, drop
    SafetyCheck,
    /// Pass 2: piping into the ingestion process
    Streaming,
    /// Finished successfully
    Succeeded,
    /// Finished with an error
    Failed,
    /// Stopped by cancellation
    Cancelled,
}

impl std::fmt::Display for RestorePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Enumerating => "enumerating",
            Self::SafetyCheck => "safety check",
            Self::Streaming => "streaming",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Summary of a restore-all run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreResult {
    /// Correlates log lines for this run
    pub run_id: uuid::Uuid,
    /// Ticket / audit identifier
    pub ticket: String,
    /// Whether the run completed
    pub success: bool,
    /// Target label (always [`ALL_DATABASES_TARGET`])
    pub target: String,
    /// Source dump file
    pub source_file: PathBuf,
    /// When execution started
    pub started_at: chrono::DateTime<chrono::Utc>,
    /// Wall-clock duration
    #[serde(with = "duration_millis")]
    pub duration: Duration,
    /// Databases selected by pass 1, sorted
    pub databases: Vec<String>,
    /// Databases skipped by the filter, sorted by name
    pub skipped: Vec<SkippedDatabase>,
    /// Streaming counters
    pub stats: RestoreStats,
    /// Pre-restore safety outcome
    pub safety: SafetyReport,
    /// Whether streaming was retried with transport security disabled
    pub transport_fallback_used: bool,
    /// Companion grants file, if configured
    pub grants_file: Option<PathBuf>,
    /// Whether the grants file was applied
    pub grants_restored: bool,
    /// Dry-run analysis, when requested
    pub dry_run: Option<DryRunReport>,
    /// Last phase reached
    pub phase: RestorePhase,
    /// Terminal error message; `None` on success
    pub error: Option<String>,
}

impl RestoreResult {
    /// Creates the initial result for a run over `options`.
    pub fn started(options: &RestoreOptions) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4(),
            ticket: options.ticket.clone(),
            success: false,
            target: ALL_DATABASES_TARGET.to_string(),
            source_file: options.source_file.clone(),
            started_at: chrono::Utc::now(),
            duration: Duration::ZERO,
            databases: Vec::new(),
            skipped: Vec::new(),
            stats: RestoreStats::default(),
            safety: SafetyReport::default(),
            transport_fallback_used: false,
            grants_file: options.grants_file.clone(),
            grants_restored: false,
            dry_run: None,
            phase: RestorePhase::Idle,
            error: None,
        }
    }

    /// Backup artifact path, if one was written
    pub fn backup_file(&self) -> Option<&PathBuf> {
        self.safety.backup_file.as_ref()
    }

    /// Number of databases restored by the streaming pass
    pub fn restored_count(&self) -> usize {
        self.stats.restored_count
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(super) fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
