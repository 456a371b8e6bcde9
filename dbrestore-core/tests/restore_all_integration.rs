//! End-to-end tests of the restore-all executor over fake capabilities.
//!
//! The dump files are real files on disk; the target, backup tool and
//! ingestion client are in-memory fakes that record what they were asked to do.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use dbrestore_core::adapters::{BackupOps, DatabaseOps, IngestionInput, IngestionSink};
use dbrestore_core::restore::{FilterPolicy, ProgressSink, RestoreAllExecutor, run_with_lifecycle};
use dbrestore_core::security::{Credentials, ProfileInfo};
use dbrestore_core::{BackupOptions, DbRestoreError, RestoreOptions, RestorePhase, Result};
use std::collections::{BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

const DUMP: &str = "\
-- MySQL dump 10.13
SET NAMES utf8mb4;
USE `app_db`;
CREATE TABLE users (id INT);
INSERT INTO users VALUES (1),(2);
USE `mysql`;
INSERT INTO user VALUES ('root','localhost');
USE `app_logs`;
CREATE TABLE events (id INT);
INSERT INTO events VALUES (10);
";

const TLS_MISMATCH: &str =
    "ERROR 2026 (HY000): TLS/SSL error: SSL is required, but the server does not support it";

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FakeTarget {
    existing: BTreeSet<String>,
    failing_drops: BTreeSet<String>,
    checks: Mutex<Vec<String>>,
    drops: Mutex<Vec<String>>,
}

impl FakeTarget {
    fn with_existing(names: &[&str]) -> Self {
        Self {
            existing: names.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }

    fn checks(&self) -> Vec<String> {
        self.checks.lock().unwrap().clone()
    }
}

#[async_trait]
impl DatabaseOps for FakeTarget {
    async fn test_connection(&self) -> Result<()> {
        Ok(())
    }

    async fn database_exists(&self, name: &str) -> Result<bool> {
        self.checks.lock().unwrap().push(name.to_string());
        Ok(self.existing.contains(name))
    }

    async fn drop_database(&self, name: &str) -> Result<()> {
        self.drops.lock().unwrap().push(name.to_string());
        if self.failing_drops.contains(name) {
            return Err(DbRestoreError::configuration(format!("cannot drop {}", name)));
        }
        Ok(())
    }

    async fn list_databases(&self) -> Result<Vec<String>> {
        Ok(self.existing.iter().cloned().collect())
    }

    async fn execute_with_retry(&self, _sql: &str) -> Result<u64> {
        Ok(0)
    }
}

#[derive(Default)]
struct FakeBackup {
    fail: bool,
    batches: Mutex<Vec<Vec<String>>>,
}

#[async_trait]
impl BackupOps for FakeBackup {
    async fn backup_databases(
        &self,
        databases: &[String],
        options: &BackupOptions,
        label: &str,
        _cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        self.batches.lock().unwrap().push(databases.to_vec());
        if self.fail {
            return Err(DbRestoreError::configuration("dump tool crashed"));
        }
        Ok(options.output_dir.join(format!("pre_restore_{}.sql.zst", label)))
    }
}

/// Ingestion client that reads its whole stdin, then replies with the next
/// scripted outcome (`None` = success, `Some(stderr)` = failure).
#[derive(Default)]
struct RecordingSink {
    replies: Mutex<VecDeque<Option<String>>>,
    calls: Mutex<Vec<(Vec<String>, String)>>,
}

impl RecordingSink {
    fn replying(replies: &[Option<&str>]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|r| r.map(str::to_string)).collect()),
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<(Vec<String>, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl IngestionSink for RecordingSink {
    async fn execute(
        &self,
        args: &[String],
        mut input: IngestionInput,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        let mut received = String::new();
        input
            .read_to_string(&mut received)
            .await
            .map_err(|e| DbRestoreError::from_stream_error("fake client stdin", e))?;
        self.calls
            .lock()
            .unwrap()
            .push((args.to_vec(), received));

        match self.replies.lock().unwrap().pop_front().flatten() {
            None => Ok(()),
            Some(stderr) => Err(DbRestoreError::Ingestion {
                client: "mariadb".to_string(),
                status: "exit status: 1".to_string(),
                stderr,
            }),
        }
    }
}

/// Ingestion client that never reads and only returns once cancelled.
struct StuckSink;

#[async_trait]
impl IngestionSink for StuckSink {
    async fn execute(
        &self,
        _args: &[String],
        _input: IngestionInput,
        cancel: &CancellationToken,
    ) -> Result<()> {
        cancel.cancelled().await;
        Err(DbRestoreError::cancelled("ingestion"))
    }
}

#[derive(Default)]
struct RecordingProgress {
    started: Mutex<Vec<String>>,
    completed: Mutex<Vec<String>>,
}

impl ProgressSink for RecordingProgress {
    fn database_started(&self, name: &str) {
        self.started.lock().unwrap().push(name.to_string());
    }

    fn database_completed(&self, name: &str, _elapsed: Duration) {
        self.completed.lock().unwrap().push(name.to_string());
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn profile() -> ProfileInfo {
    ProfileInfo::new(
        "db.internal",
        3306,
        Credentials::new("restore".to_string(), Some("pw".to_string())),
    )
}

fn write_dump(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

fn options(source: &Path) -> RestoreOptions {
    RestoreOptions::new(profile(), source)
        .with_ticket("OPS-7")
        .with_filter(FilterPolicy::new().with_skip_system_databases(true))
        .with_backup(BackupOptions::new("/var/backups/dbrestore"))
}

struct Harness {
    target: Arc<FakeTarget>,
    backup: Arc<FakeBackup>,
    sink: Arc<RecordingSink>,
    progress: Arc<RecordingProgress>,
}

impl Harness {
    fn new(target: FakeTarget, sink: RecordingSink) -> Self {
        Self {
            target: Arc::new(target),
            backup: Arc::new(FakeBackup::default()),
            sink: Arc::new(sink),
            progress: Arc::new(RecordingProgress::default()),
        }
    }

    fn executor(&self, options: RestoreOptions) -> RestoreAllExecutor {
        RestoreAllExecutor::new(
            options,
            self.target.clone(),
            self.backup.clone(),
            self.sink.clone(),
        )
        .with_progress(self.progress.clone())
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_system_database_is_filtered_from_stream() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_dump(dir.path(), "all.sql", DUMP);
    let harness = Harness::new(FakeTarget::default(), RecordingSink::default());

    let result = harness
        .executor(options(&source))
        .execute(&CancellationToken::new())
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.phase, RestorePhase::Succeeded);
    assert_eq!(result.databases, vec!["app_db", "app_logs"]);
    assert_eq!(result.restored_count(), 2);
    assert_eq!(result.skipped.len(), 1);
    assert_eq!(result.skipped[0].name, "mysql");
    assert_eq!(result.skipped[0].reason, "system database");
    assert!(!result.transport_fallback_used);

    let calls = harness.sink.calls();
    assert_eq!(calls.len(), 1);
    let (args, stream) = &calls[0];
    assert!(args.contains(&"--force".to_string()));
    assert!(!args.contains(&"--skip-ssl".to_string()));
    assert!(stream.starts_with("-- MySQL dump 10.13\nSET NAMES utf8mb4;\n"));
    assert!(stream.contains("USE `app_db`;\nCREATE TABLE users"));
    assert!(stream.contains("USE `app_logs`;\nCREATE TABLE events"));
    assert!(!stream.contains("USE `mysql`"));
    assert!(!stream.contains("INSERT INTO user VALUES"));

    assert_eq!(*harness.progress.started.lock().unwrap(), vec!["app_db", "app_logs"]);
    assert_eq!(*harness.progress.completed.lock().unwrap(), vec!["app_db", "app_logs"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_enumerated_set_matches_streamed_set() {
    let dump = "\
USE `b`;\nSELECT 1;\nUSE `a`;\nSELECT 2;\nUSE `scratch`;\nSELECT 3;\n\
USE `b`;\nSELECT 4;\nUSE `performance_schema`;\nSELECT 5;\n";
    let dir = tempfile::tempdir().unwrap();
    let source = write_dump(dir.path(), "all.sql", dump);
    let harness = Harness::new(FakeTarget::default(), RecordingSink::default());
    let filter = FilterPolicy::new()
        .with_skip_system_databases(true)
        .with_excluded(["scratch"]);

    let result = harness
        .executor(options(&source).with_filter(filter))
        .execute(&CancellationToken::new())
        .await
        .unwrap();

    let enumerated: BTreeSet<String> = result.databases.iter().cloned().collect();
    let streamed: BTreeSet<String> = harness.progress.started.lock().unwrap().iter().cloned().collect();
    assert_eq!(enumerated, streamed);
    assert_eq!(result.restored_count(), enumerated.len());
    // Switch order, not sorted order.
    assert_eq!(*harness.progress.started.lock().unwrap(), vec!["b", "a"]);

    let (_, stream) = &harness.sink.calls()[0];
    assert!(stream.contains("SELECT 4;"));
    assert!(!stream.contains("SELECT 3;"));
    assert!(!stream.contains("SELECT 5;"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_only_system_databases_is_nothing_to_restore() {
    let dump = "USE `mysql`;\nSELECT 1;\nUSE `sys`;\nSELECT 2;\n";
    let dir = tempfile::tempdir().unwrap();
    let source = write_dump(dir.path(), "system.sql", dump);
    let harness = Harness::new(FakeTarget::default(), RecordingSink::default());

    let err = harness
        .executor(options(&source))
        .execute(&CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err.cause(), DbRestoreError::NoDatabasesToRestore { .. }));
    assert!(err.cause().to_string().contains("Nothing to restore"));
    assert_eq!(err.partial_result().unwrap().skipped.len(), 2);
    assert!(harness.target.checks().is_empty());
    assert!(harness.sink.calls().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_drop_failure_continues_to_streaming() {
    let dump = "USE `one`;\nSELECT 1;\nUSE `two`;\nSELECT 2;\nUSE `three`;\nSELECT 3;\n";
    let dir = tempfile::tempdir().unwrap();
    let source = write_dump(dir.path(), "all.sql", dump);
    let mut target = FakeTarget::with_existing(&["one", "two", "three"]);
    target.failing_drops.insert("three".to_string());
    let harness = Harness::new(target, RecordingSink::default());

    let result = harness
        .executor(options(&source).with_drop_target(true))
        .execute(&CancellationToken::new())
        .await
        .unwrap();

    // Enumeration is sorted: one, three, two; the second drop fails.
    assert_eq!(*harness.target.drops.lock().unwrap(), vec!["one", "three", "two"]);
    assert_eq!(result.safety.dropped, vec!["one", "two"]);
    assert_eq!(result.safety.drop_failures.len(), 1);
    assert_eq!(result.safety.drop_failures[0].database_name, "three");
    assert_eq!(result.safety.backed_up.len(), 3);
    assert!(result.backup_file().is_some());
    assert_eq!(harness.sink.calls().len(), 1);
    assert_eq!(result.restored_count(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_backup_failure_with_stop_on_error_aborts_before_streaming() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_dump(dir.path(), "all.sql", DUMP);
    let mut harness = Harness::new(FakeTarget::with_existing(&["app_db"]), RecordingSink::default());
    harness.backup = Arc::new(FakeBackup {
        fail: true,
        ..FakeBackup::default()
    });

    let err = harness
        .executor(options(&source).with_stop_on_error(true).with_drop_target(true))
        .execute(&CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err.cause(), DbRestoreError::BackupFailed { databases: 1, .. }));
    assert!(harness.target.drops.lock().unwrap().is_empty());
    assert!(harness.sink.calls().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tls_mismatch_retries_exactly_once_with_skip_ssl() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_dump(dir.path(), "all.sql", DUMP);
    let harness = Harness::new(
        FakeTarget::default(),
        RecordingSink::replying(&[Some(TLS_MISMATCH), None]),
    );

    let result = harness
        .executor(options(&source))
        .execute(&CancellationToken::new())
        .await
        .unwrap();

    let calls = harness.sink.calls();
    assert_eq!(calls.len(), 2);
    assert!(!calls[0].0.contains(&"--skip-ssl".to_string()));
    assert_eq!(calls[1].0.last().map(String::as_str), Some("--skip-ssl"));
    // The retry reopens the dump and streams it again from the start.
    assert_eq!(calls[0].1, calls[1].1);
    assert!(result.transport_fallback_used);
    assert_eq!(result.restored_count(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_second_tls_failure_is_not_retried_again() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_dump(dir.path(), "all.sql", DUMP);
    let harness = Harness::new(
        FakeTarget::default(),
        RecordingSink::replying(&[Some(TLS_MISMATCH), Some(TLS_MISMATCH), None]),
    );

    let err = harness
        .executor(options(&source))
        .execute(&CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err.cause(), DbRestoreError::Ingestion { .. }));
    assert_eq!(harness.sink.calls().len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_other_client_failures_are_not_retried() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_dump(dir.path(), "all.sql", DUMP);
    let harness = Harness::new(
        FakeTarget::default(),
        RecordingSink::replying(&[Some("ERROR 1045 (28000): Access denied for user 'restore'"), None]),
    );

    let err = harness
        .executor(options(&source))
        .execute(&CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(harness.sink.calls().len(), 1);
    let message = err.cause().to_string();
    assert!(message.starts_with("mariadb command error: exit status: 1"));
    assert!(message.contains("Access denied"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_streaming_failure_reports_backup_and_drops() {
    let dump = "USE `one`;\nSELECT 1;\nUSE `two`;\nSELECT 2;\n";
    let dir = tempfile::tempdir().unwrap();
    let source = write_dump(dir.path(), "all.sql", dump);
    let harness = Harness::new(
        FakeTarget::with_existing(&["one", "two"]),
        RecordingSink::replying(&[Some("ERROR 1045 (28000): Access denied for user 'restore'")]),
    );

    let err = harness
        .executor(options(&source).with_drop_target(true))
        .execute(&CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        DbRestoreError::RunStopped {
            stage: RestorePhase::Streaming,
            ..
        }
    ));
    assert!(matches!(err.cause(), DbRestoreError::Ingestion { .. }));
    assert!(!err.is_cancelled());

    let partial = err.partial_result().unwrap();
    assert!(!partial.success);
    assert_eq!(partial.phase, RestorePhase::Failed);
    assert!(partial.error.as_deref().unwrap().contains("Access denied"));
    assert_eq!(partial.safety.backed_up, vec!["one", "two"]);
    assert_eq!(
        partial.backup_file(),
        Some(&PathBuf::from("/var/backups/dbrestore/pre_restore_OPS-7.sql.zst"))
    );
    assert_eq!(partial.safety.dropped, vec!["one", "two"]);
    assert_eq!(*harness.backup.batches.lock().unwrap(), vec![vec!["one", "two"]]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_drop_failure_with_stop_on_error_keeps_partial_report() {
    let dump = "USE `one`;\nSELECT 1;\nUSE `two`;\nSELECT 2;\n";
    let dir = tempfile::tempdir().unwrap();
    let source = write_dump(dir.path(), "all.sql", dump);
    let mut target = FakeTarget::with_existing(&["one", "two"]);
    target.failing_drops.insert("two".to_string());
    let harness = Harness::new(target, RecordingSink::default());

    let err = harness
        .executor(options(&source).with_drop_target(true).with_stop_on_error(true))
        .execute(&CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err.cause(), DbRestoreError::DropFailed { .. }));
    let partial = err.partial_result().unwrap();
    assert_eq!(partial.safety.dropped, vec!["one"]);
    assert!(partial.backup_file().is_some());
    assert!(harness.sink.calls().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_missing_grants_file_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_dump(dir.path(), "all.sql", DUMP);
    let harness = Harness::new(FakeTarget::default(), RecordingSink::default());

    let result = harness
        .executor(options(&source).with_grants_file(Some(dir.path().join("absent.sql"))))
        .execute(&CancellationToken::new())
        .await
        .unwrap();

    assert!(result.success);
    assert!(!result.grants_restored);
    assert_eq!(harness.sink.calls().len(), 1);
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unreadable_grants_location_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_dump(dir.path(), "all.sql", DUMP);
    // A path below a regular file cannot be checked.
    let grants = source.join("grants.sql");
    let harness = Harness::new(FakeTarget::default(), RecordingSink::default());

    let result = harness
        .executor(options(&source).with_grants_file(Some(grants)))
        .execute(&CancellationToken::new())
        .await
        .unwrap();

    assert!(result.success);
    assert!(!result.grants_restored);
    assert_eq!(harness.sink.calls().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancellation_unblocks_streaming_and_maps_to_none() {
    // The client never reads; only cancellation can end the run.
    let mut dump = String::from("USE `big`;\n");
    for i in 0..20_000 {
        dump.push_str(&format!("INSERT INTO t VALUES ({});\n", i));
    }
    let dir = tempfile::tempdir().unwrap();
    let source = write_dump(dir.path(), "big.sql", &dump);

    let executor = RestoreAllExecutor::new(
        options(&source),
        Arc::new(FakeTarget::default()),
        Arc::new(FakeBackup::default()),
        Arc::new(StuckSink),
    );

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let outcome = tokio::time::timeout(
        Duration::from_secs(10),
        run_with_lifecycle(&cancel, executor.execute(&cancel)),
    )
    .await
    .expect("restore did not stop after cancellation")
    .unwrap();
    assert!(outcome.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dry_run_touches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_dump(dir.path(), "all.sql", DUMP);
    let harness = Harness::new(FakeTarget::with_existing(&["app_db"]), RecordingSink::default());

    let result = harness
        .executor(options(&source).with_dry_run(true).with_drop_target(true))
        .execute(&CancellationToken::new())
        .await
        .unwrap();

    assert!(harness.target.checks().is_empty());
    assert!(harness.sink.calls().is_empty());
    assert!(harness.backup.batches.lock().unwrap().is_empty());

    let report = result.dry_run.as_ref().unwrap();
    assert_eq!(report.databases.len(), 2);
    assert_eq!(report.databases[0].name, "app_db");
    assert_eq!(report.databases[0].line_count, 3);
    assert_eq!(report.databases[1].name, "app_logs");
    assert_eq!(report.preamble_lines, 2);
    assert_eq!(report.total_lines, 10);
    assert_eq!(result.restored_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_grants_file_is_applied_after_stream() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_dump(dir.path(), "all.sql", DUMP);
    let grants = write_dump(
        dir.path(),
        "grants.sql",
        "CREATE USER 'app'@'%';\nGRANT ALL ON app_db.* TO 'app'@'%';\n",
    );
    let harness = Harness::new(FakeTarget::default(), RecordingSink::default());

    let result = harness
        .executor(options(&source).with_grants_file(Some(grants)))
        .execute(&CancellationToken::new())
        .await
        .unwrap();

    assert!(result.grants_restored);
    let calls = harness.sink.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[1].1.starts_with("CREATE USER 'app'@'%';"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_grants_failure_is_only_a_warning() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_dump(dir.path(), "all.sql", DUMP);
    let grants = write_dump(dir.path(), "grants.sql", "GRANT nonsense;\n");
    let harness = Harness::new(
        FakeTarget::default(),
        RecordingSink::replying(&[None, Some("ERROR 1064 (42000): syntax error")]),
    );

    let result = harness
        .executor(options(&source).with_grants_file(Some(grants)))
        .execute(&CancellationToken::new())
        .await
        .unwrap();

    assert!(result.success);
    assert!(!result.grants_restored);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_encrypted_source_without_key_fails_before_target_access() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_dump(dir.path(), "all.sql.enc", "not really encrypted");
    let harness = Harness::new(FakeTarget::default(), RecordingSink::default());

    let err = harness
        .executor(options(&source))
        .execute(&CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err.cause(), DbRestoreError::DecryptionUnavailable { .. }));
    assert!(harness.target.checks().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_missing_source_is_setup_fault() {
    let harness = Harness::new(FakeTarget::default(), RecordingSink::default());
    let err = harness
        .executor(options(Path::new("/nonexistent/dump.sql")))
        .execute(&CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err.cause(), DbRestoreError::Io { .. }));
    assert!(harness.sink.calls().is_empty());
}

#[cfg(all(feature = "compression", feature = "encryption"))]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_compressed_encrypted_source_restores() {
    use dbrestore_core::encryption::EncryptingWriter;
    use std::io::Write;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("all.sql.gz.enc");
    let file = std::fs::File::create(&path).unwrap();
    let encrypted = EncryptingWriter::new(file, "dump-key").unwrap();
    let mut gzip = flate2::write::GzEncoder::new(encrypted, flate2::Compression::default());
    gzip.write_all(DUMP.as_bytes()).unwrap();
    gzip.finish().unwrap().finish().unwrap();

    let harness = Harness::new(FakeTarget::default(), RecordingSink::default());
    let result = harness
        .executor(options(&path).with_encryption_key(Some("dump-key".to_string())))
        .execute(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.restored_count(), 2);
    assert!(harness.sink.calls()[0].1.contains("INSERT INTO events VALUES (10);"));

    let wrong = Harness::new(FakeTarget::default(), RecordingSink::default());
    let err = wrong
        .executor(options(&path).with_encryption_key(Some("wrong".to_string())))
        .execute(&CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err.cause(), DbRestoreError::Decryption { .. }));
    assert!(wrong.sink.calls().is_empty());
}
