//! Pre-restore backups with `mariadb-dump`/`mysqldump`.
//!
//! The dump tool's stdout is compressed and optionally encrypted on the way
//! to disk. A failed or cancelled backup never leaves a partial artifact.
//! A dump rejected for a TLS mismatch is retried once with `--skip-ssl`.

use super::client::resolve_tool;
use crate::adapters::BackupOps;
use crate::error::DbRestoreError;
use crate::models::{BackupCompression, BackupOptions};
use crate::restore::transport::{SKIP_SSL_FLAG, is_transport_mismatch, with_transport_fallback};
use crate::security::ProfileInfo;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// Dump binaries tried in order.
pub const DUMP_CANDIDATES: [&str; 2] = ["mariadb-dump", "mysqldump"];

const ZSTD_LEVEL: i32 = 3;
const COPY_BUFFER_SIZE: usize = 256 * 1024;
/// Chunks buffered between the dump's stdout and the artifact writer.
const WRITE_QUEUE_DEPTH: usize = 8;

/// Arguments for dumping `databases` from the target described by `profile`.
///
/// The password is never part of the argument list.
pub fn build_dump_args(profile: &ProfileInfo, databases: &[String]) -> Vec<String> {
    dump_args(profile, databases, false)
}

fn dump_args(profile: &ProfileInfo, databases: &[String], skip_ssl: bool) -> Vec<String> {
    let mut options = vec![
        format!("--host={}", profile.host),
        format!("--port={}", profile.port),
    ];
    let user = profile.credentials.username();
    if !user.is_empty() {
        options.push(format!("--user={}", user));
    }
    options.extend(
        ["--single-transaction", "--routines", "--triggers", "--events"].map(String::from),
    );
    // Options must precede the database list.
    let mut args = if skip_ssl {
        with_transport_fallback(&options)
    } else {
        options
    };
    args.push("--databases".to_string());
    args.extend(databases.iter().cloned());
    args
}

/// File name for a backup artifact:
/// `pre_restore_<label>_<YYYYmmdd_HHMMSS>.sql[.zst][.enc]`.
///
/// Characters outside `[A-Za-z0-9_-]` in the label are replaced with `_`.
pub fn backup_file_name(label: &str, timestamp: DateTime<Utc>, options: &BackupOptions) -> String {
    let label: String = label
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let label = if label.is_empty() { "restore".to_string() } else { label };

    let mut name = format!("pre_restore_{}_{}.sql", label, timestamp.format("%Y%m%d_%H%M%S"));
    if options.compression == BackupCompression::Zstd {
        name.push_str(".zst");
    }
    if options.encryption_key.is_some() {
        name.push_str(".enc");
    }
    name
}

/// Backup writer using the server's dump tool.
pub struct MysqldumpBackup {
    program: PathBuf,
    program_args: Vec<String>,
    profile: ProfileInfo,
}

impl std::fmt::Debug for MysqldumpBackup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MysqldumpBackup")
            .field("program", &self.program)
            .field("target", &self.profile.to_safe_string())
            .finish()
    }
}

impl MysqldumpBackup {
    /// Resolves the dump tool on `PATH`.
    pub fn new(profile: &ProfileInfo) -> Result<Self> {
        let program = resolve_tool(&DUMP_CANDIDATES)?;
        debug!("Using dump tool {}", program.display());
        Ok(Self::with_program(program, Vec::new(), profile.clone()))
    }

    /// Uses an explicit program; `program_args` come before the dump arguments.
    pub fn with_program(
        program: impl Into<PathBuf>,
        program_args: Vec<String>,
        profile: ProfileInfo,
    ) -> Self {
        Self {
            program: program.into(),
            program_args,
            profile,
        }
    }
}

/// A writer layer that must be finalized in order.
trait FinishWrite: Write + Send {
    fn finish_layer(self: Box<Self>) -> std::io::Result<()>;
}

impl FinishWrite for BufWriter<File> {
    fn finish_layer(self: Box<Self>) -> std::io::Result<()> {
        let file = (*self).into_inner().map_err(std::io::IntoInnerError::into_error)?;
        file.sync_all()
    }
}

#[cfg(feature = "encryption")]
impl FinishWrite for crate::security::encryption::EncryptingWriter<Box<dyn FinishWrite>> {
    fn finish_layer(self: Box<Self>) -> std::io::Result<()> {
        (*self).finish()?.finish_layer()
    }
}

#[cfg(feature = "compression")]
impl FinishWrite for zstd::stream::write::Encoder<'static, Box<dyn FinishWrite>> {
    fn finish_layer(self: Box<Self>) -> std::io::Result<()> {
        (*self).finish()?.finish_layer()
    }
}

fn open_artifact(
    path: &Path,
    compression: BackupCompression,
    key: Option<&str>,
) -> Result<Box<dyn FinishWrite>> {
    let file = File::create(path)
        .map_err(|e| DbRestoreError::io(format!("Failed to create {}", path.display()), e))?;
    let mut writer: Box<dyn FinishWrite> = Box::new(BufWriter::new(file));

    if let Some(key) = key {
        #[cfg(feature = "encryption")]
        {
            writer = Box::new(crate::security::encryption::EncryptingWriter::new(writer, key)?);
        }
        #[cfg(not(feature = "encryption"))]
        {
            let _ = key;
            return Err(DbRestoreError::unsupported_feature(
                "encrypted backups",
                "encryption",
            ));
        }
    }

    if compression == BackupCompression::Zstd {
        #[cfg(feature = "compression")]
        {
            writer = Box::new(
                zstd::stream::write::Encoder::new(writer, ZSTD_LEVEL)
                    .map_err(|e| DbRestoreError::io("Failed to start zstd encoder", e))?,
            );
        }
        #[cfg(not(feature = "compression"))]
        {
            return Err(DbRestoreError::unsupported_feature(
                "compressed backups",
                "compression",
            ));
        }
    }

    Ok(writer)
}

fn tool_name(program: &Path) -> String {
    program
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "dump".to_string())
}

struct DumpJob {
    program: PathBuf,
    args: Vec<String>,
    password: Option<Zeroizing<String>>,
    path: PathBuf,
    compression: BackupCompression,
    key: Option<Zeroizing<String>>,
}

/// Writes chunks from `chunks` into a new artifact at `path` until the
/// sender goes away, then finalizes every layer.
fn write_artifact(
    path: &Path,
    compression: BackupCompression,
    key: Option<&str>,
    mut chunks: mpsc::Receiver<Vec<u8>>,
) -> Result<u64> {
    let mut writer = open_artifact(path, compression, key)?;
    let mut total = 0u64;
    while let Some(chunk) = chunks.blocking_recv() {
        writer
            .write_all(&chunk)
            .map_err(|e| DbRestoreError::from_stream_error("Failed to write backup", e))?;
        total += chunk.len() as u64;
    }
    writer
        .finish_layer()
        .map_err(|e| DbRestoreError::from_stream_error("Failed to finalize backup", e))?;
    Ok(total)
}

/// Runs the dump tool once, streaming its stdout into the artifact.
///
/// The child is killed as soon as `cancel` fires, even while it produces no
/// output.
async fn run_dump(job: DumpJob, cancel: &CancellationToken) -> Result<u64> {
    let tool = tool_name(&job.program);

    let mut command = Command::new(&job.program);
    command
        .args(&job.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(password) = &job.password {
        command.env("MYSQL_PWD", password.as_str());
    }

    let mut child = command
        .spawn()
        .map_err(|e| DbRestoreError::io(format!("Failed to start {}", tool), e))?;
    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| DbRestoreError::configuration("dump stdout was not captured"))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| DbRestoreError::configuration("dump stderr was not captured"))?;
    let stderr_task = tokio::spawn(async move {
        let mut captured = Vec::new();
        let _ = stderr.read_to_end(&mut captured).await;
        String::from_utf8_lossy(&captured).trim().to_string()
    });

    let (chunks, receiver) = mpsc::channel::<Vec<u8>>(WRITE_QUEUE_DEPTH);
    let DumpJob {
        path,
        compression,
        key,
        ..
    } = job;
    let writer_task = tokio::task::spawn_blocking(move || {
        write_artifact(&path, compression, key.as_deref().map(String::as_str), receiver)
    });

    let copy = async {
        let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
        loop {
            let n = stdout
                .read(&mut buffer)
                .await
                .map_err(|e| DbRestoreError::io(format!("Failed to read {} output", tool), e))?;
            if n == 0 {
                break;
            }
            if chunks.send(buffer[..n].to_vec()).await.is_err() {
                return Err(DbRestoreError::PipeClosed {
                    context: "backup writer stopped".to_string(),
                });
            }
        }
        child
            .wait()
            .await
            .map_err(|e| DbRestoreError::io(format!("Failed to wait for {}", tool), e))
    };

    let copied: Result<ExitStatus> = tokio::select! {
        biased;
        () = cancel.cancelled() => Err(DbRestoreError::cancelled("pre-restore backup")),
        copied = copy => copied,
    };
    drop(chunks);

    if copied.is_err() {
        let _ = child.kill().await;
        // Descendants of the tool may still hold stderr open.
        stderr_task.abort();
    }
    let written = writer_task
        .await
        .map_err(|e| DbRestoreError::configuration(format!("Backup writer failed: {}", e)))
        .and_then(|result| result);

    let status = match copied {
        Ok(status) => status,
        Err(error) => {
            return Err(match (error, written) {
                (DbRestoreError::PipeClosed { .. }, Err(write_error)) => write_error,
                (error, _) => error,
            });
        }
    };

    let stderr = stderr_task.await.unwrap_or_default();
    if !status.success() {
        return Err(DbRestoreError::Ingestion {
            client: tool,
            status: status.to_string(),
            stderr,
        });
    }
    if !stderr.is_empty() {
        debug!("{} reported: {}", tool, stderr);
    }
    written
}

impl MysqldumpBackup {
    fn job(&self, databases: &[String], path: &Path, options: &BackupOptions, skip_ssl: bool) -> DumpJob {
        let mut args = self.program_args.clone();
        args.extend(dump_args(&self.profile, databases, skip_ssl));
        DumpJob {
            program: self.program.clone(),
            args,
            password: self
                .profile
                .credentials
                .password()
                .map(|p| Zeroizing::new(p.to_string())),
            path: path.to_path_buf(),
            compression: options.compression,
            key: options.encryption_key.clone(),
        }
    }
}

#[async_trait]
impl BackupOps for MysqldumpBackup {
    async fn backup_databases(
        &self,
        databases: &[String],
        options: &BackupOptions,
        label: &str,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        if databases.is_empty() {
            return Err(DbRestoreError::configuration("No databases to back up"));
        }

        tokio::fs::create_dir_all(&options.output_dir)
            .await
            .map_err(|e| {
                DbRestoreError::io(
                    format!("Failed to create backup directory {}", options.output_dir.display()),
                    e,
                )
            })?;

        let path = options
            .output_dir
            .join(backup_file_name(label, Utc::now(), options));

        info!("Backing up {} database(s) to {}", databases.len(), path.display());
        let mut outcome = run_dump(self.job(databases, &path, options, false), cancel).await;
        if let Err(error) = &outcome
            && !cancel.is_cancelled()
            && is_transport_mismatch(error)
        {
            warn!(
                "{} rejected transport security; retrying the backup with {}",
                tool_name(&self.program),
                SKIP_SSL_FLAG
            );
            outcome = run_dump(self.job(databases, &path, options, true), cancel).await;
        }

        match outcome {
            Ok(bytes) => {
                info!("✓ Backup written ({} bytes of SQL)", bytes);
                Ok(path)
            }
            Err(error) => {
                if let Err(e) = tokio::fs::remove_file(&path).await
                    && e.kind() != std::io::ErrorKind::NotFound
                {
                    warn!("Failed to remove partial backup {}: {}", path.display(), e);
                }
                Err(error)
            }
        }
    }
}
