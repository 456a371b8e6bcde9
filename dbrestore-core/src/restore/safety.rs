//! Pre-restore safety stage: existence checks, backup, then drops.
//!
//! Capabilities only report success or failure of one unit of work. Whether
//! a failure aborts the run is decided here, through [`ErrorPolicy`].

use crate::adapters::{BackupOps, DatabaseOps};
use crate::error::DbRestoreError;
use crate::models::{BackupOptions, DatabaseFailure, RestoreOptions, SafetyReport};
use crate::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// What to do when a per-database safety step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Abort the whole restore
    StopOnError,
    /// Record the failure and carry on
    Continue,
}

impl ErrorPolicy {
    /// Maps the `stop_on_error` option.
    pub fn from_stop_on_error(stop_on_error: bool) -> Self {
        if stop_on_error {
            Self::StopOnError
        } else {
            Self::Continue
        }
    }
}

/// Races `operation` against `cancel`.
pub(crate) async fn until_cancelled<T>(
    cancel: &CancellationToken,
    stage: &str,
    operation: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(DbRestoreError::cancelled(stage)),
        result = operation => result,
    }
}

/// Time a backup gets to remove its partial artifact once cancelled.
const BACKUP_CANCEL_GRACE: Duration = Duration::from_secs(10);

/// Like [`until_cancelled`], but once `cancel` fires `operation` keeps
/// running for up to `grace` so it can clean up after itself.
pub(crate) async fn until_cancelled_with_grace<T>(
    cancel: &CancellationToken,
    stage: &str,
    grace: Duration,
    operation: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::pin!(operation);
    tokio::select! {
        biased;
        () = cancel.cancelled() => {
            match tokio::time::timeout(grace, &mut operation).await {
                Ok(result) => result,
                Err(_) => {
                    warn!("{} did not stop within {:?} of cancellation", stage, grace);
                    Err(DbRestoreError::cancelled(stage))
                }
            }
        }
        result = &mut operation => result,
    }
}

/// Runs the safety stage over the enumerated databases.
pub struct SafetyCoordinator {
    database: Arc<dyn DatabaseOps>,
    backup: Arc<dyn BackupOps>,
    policy: ErrorPolicy,
    drop_target: bool,
    skip_backup: bool,
    backup_options: BackupOptions,
    label: String,
}

impl SafetyCoordinator {
    pub fn new(
        database: Arc<dyn DatabaseOps>,
        backup: Arc<dyn BackupOps>,
        options: &RestoreOptions,
    ) -> Self {
        Self {
            database,
            backup,
            policy: ErrorPolicy::from_stop_on_error(options.stop_on_error),
            drop_target: options.drop_target,
            skip_backup: options.skip_backup,
            backup_options: options.backup.clone(),
            label: options.ticket.clone(),
        }
    }

    /// Checks which databases exist, backs them up and drops them as
    /// configured.
    ///
    /// # Errors
    /// Under [`ErrorPolicy::StopOnError`] the first failure is returned as
    /// `SafetyCheck`, `BackupFailed` or `DropFailed`. Databases dropped
    /// before a drop failure stay dropped. Cancellation is always returned.
    pub async fn run(&self, databases: &[String], cancel: &CancellationToken) -> Result<SafetyReport> {
        let mut report = SafetyReport::default();
        self.run_into(databases, cancel, &mut report).await?;
        Ok(report)
    }

    /// Same as [`SafetyCoordinator::run`], recording progress into `report`
    /// so the backup file and the drops survive a failure.
    pub async fn run_into(
        &self,
        databases: &[String],
        cancel: &CancellationToken,
        report: &mut SafetyReport,
    ) -> Result<()> {
        self.check_existing(databases, cancel, report).await?;
        info!(
            "{} of {} database(s) already exist on the target",
            report.existing.len(),
            databases.len()
        );

        if report.existing.is_empty() {
            return Ok(());
        }

        if self.skip_backup {
            warn!("Skipping pre-restore backup of {} existing database(s)", report.existing.len());
        } else {
            self.backup_existing(cancel, report).await?;
        }

        if self.drop_target {
            self.drop_existing(cancel, report).await?;
        }

        Ok(())
    }

    async fn check_existing(
        &self,
        databases: &[String],
        cancel: &CancellationToken,
        report: &mut SafetyReport,
    ) -> Result<()> {
        for name in databases {
            let checked = until_cancelled(cancel, "existence check", self.database.database_exists(name)).await;
            match checked {
                Ok(true) => report.existing.push(name.clone()),
                Ok(false) => {}
                Err(error) if error.is_cancelled() => return Err(error),
                Err(error) => match self.policy {
                    ErrorPolicy::StopOnError => {
                        return Err(DbRestoreError::SafetyCheck {
                            database: name.clone(),
                            source: Box::new(error),
                        });
                    }
                    ErrorPolicy::Continue => {
                        warn!("Existence check failed for {}: {}", name, error);
                        report.check_failures.push(DatabaseFailure::new(name, &error));
                    }
                },
            }
        }
        Ok(())
    }

    async fn backup_existing(&self, cancel: &CancellationToken, report: &mut SafetyReport) -> Result<()> {
        let outcome = until_cancelled_with_grace(
            cancel,
            "pre-restore backup",
            BACKUP_CANCEL_GRACE,
            self.backup
                .backup_databases(&report.existing, &self.backup_options, &self.label, cancel),
        )
        .await;

        match outcome {
            Ok(path) => {
                info!("✓ Pre-restore backup written to {}", path.display());
                report.backed_up = report.existing.clone();
                report.backup_file = Some(path);
                Ok(())
            }
            Err(error) if error.is_cancelled() => Err(error),
            Err(error) => match self.policy {
                ErrorPolicy::StopOnError => Err(DbRestoreError::BackupFailed {
                    databases: report.existing.len(),
                    source: Box::new(error),
                }),
                ErrorPolicy::Continue => {
                    warn!("Pre-restore backup failed, continuing without one: {}", error);
                    report.backup_error = Some(error.to_string());
                    Ok(())
                }
            },
        }
    }

    async fn drop_existing(&self, cancel: &CancellationToken, report: &mut SafetyReport) -> Result<()> {
        let targets = report.existing.clone();
        for name in &targets {
            let dropped = until_cancelled(cancel, "drop", self.database.drop_database(name)).await;
            match dropped {
                Ok(()) => {
                    info!("Dropped database {}", name);
                    report.dropped.push(name.clone());
                }
                Err(error) if error.is_cancelled() => return Err(error),
                Err(error) => match self.policy {
                    ErrorPolicy::StopOnError => {
                        return Err(DbRestoreError::DropFailed {
                            database: name.clone(),
                            dropped: report.dropped.clone(),
                            source: Box::new(error),
                        });
                    }
                    ErrorPolicy::Continue => {
                        warn!("Failed to drop {}, continuing: {}", name, error);
                        report.drop_failures.push(DatabaseFailure::new(name, &error));
                    }
                },
            }
        }
        info!("Dropped {} of {} database(s)", report.dropped.len(), targets.len());
        Ok(())
    }
}
