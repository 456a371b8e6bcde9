//! Ingestion through the `mariadb`/`mysql` command-line client.
//!
//! The client reads the filtered dump on stdin. The password travels in the
//! `MYSQL_PWD` environment variable so it never shows up in process
//! listings; stdout is discarded and stderr is captured for error reports.

use crate::adapters::{IngestionInput, IngestionSink};
use crate::error::DbRestoreError;
use crate::security::ProfileInfo;
use crate::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use zeroize::Zeroizing;

/// Client binaries tried in order.
pub const CLIENT_CANDIDATES: [&str; 2] = ["mariadb", "mysql"];

/// Environment variable the client reads its password from.
const PASSWORD_ENV: &str = "MYSQL_PWD";

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Finds the first candidate present on `PATH`.
///
/// # Errors
/// Returns a configuration error naming every candidate if none is found.
pub fn resolve_tool(candidates: &[&str]) -> Result<PathBuf> {
    candidates
        .iter()
        .find_map(|name| which::which(name).ok())
        .ok_or_else(|| {
            DbRestoreError::configuration(format!(
                "None of the required tools were found on PATH: {}",
                candidates.join(", ")
            ))
        })
}

/// Spawns the MySQL client and feeds it the restore stream.
pub struct MySqlClientSink {
    program: PathBuf,
    password: Option<Zeroizing<String>>,
}

impl std::fmt::Debug for MySqlClientSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MySqlClientSink")
            .field("program", &self.program)
            .field("has_password", &self.password.is_some())
            .finish()
    }
}

impl MySqlClientSink {
    /// Resolves the client binary and takes the password from `profile`.
    pub fn new(profile: &ProfileInfo) -> Result<Self> {
        let program = resolve_tool(&CLIENT_CANDIDATES)?;
        debug!("Using ingestion client {}", program.display());
        Ok(Self::with_program(
            program,
            profile.credentials.password().map(str::to_string),
        ))
    }

    /// Uses an explicit client binary.
    pub fn with_program(program: impl Into<PathBuf>, password: Option<String>) -> Self {
        Self {
            program: program.into(),
            password: password.map(Zeroizing::new),
        }
    }

    /// Short client name used in error messages (`mariadb`, `mysql`).
    pub fn client_name(&self) -> String {
        client_name(&self.program)
    }
}

fn client_name(program: &Path) -> String {
    program
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.display().to_string())
}

enum FeedError {
    /// Reading the restore stream failed; the child must not finish
    Input(DbRestoreError),
    /// The child closed its stdin early
    StdinClosed,
    Stdin(std::io::Error),
}

async fn feed(input: &mut IngestionInput, stdin: &mut ChildStdin) -> std::result::Result<u64, FeedError> {
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let n = input
            .read(&mut buffer)
            .await
            .map_err(|e| FeedError::Input(DbRestoreError::from_stream_error("Failed to read restore stream", e)))?;
        if n == 0 {
            break;
        }
        stdin.write_all(&buffer[..n]).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::BrokenPipe {
                FeedError::StdinClosed
            } else {
                FeedError::Stdin(e)
            }
        })?;
        total += n as u64;
    }
    stdin.flush().await.map_err(FeedError::Stdin)?;
    Ok(total)
}

#[async_trait]
impl IngestionSink for MySqlClientSink {
    async fn execute(
        &self,
        args: &[String],
        mut input: IngestionInput,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let client = self.client_name();
        let mut command = Command::new(&self.program);
        command
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(password) = &self.password {
            command.env(PASSWORD_ENV, password.as_str());
        }

        let mut child = command
            .spawn()
            .map_err(|e| DbRestoreError::io(format!("Failed to start {}", client), e))?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| DbRestoreError::configuration("client stdin was not captured"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| DbRestoreError::configuration("client stderr was not captured"))?;

        let stderr_task = tokio::spawn(async move {
            let mut captured = Vec::new();
            let _ = stderr.read_to_end(&mut captured).await;
            String::from_utf8_lossy(&captured).trim().to_string()
        });

        let fed = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(DbRestoreError::cancelled("ingestion"));
            }
            fed = feed(&mut input, &mut stdin) => fed,
        };
        drop(stdin);

        let closed_early = match fed {
            Ok(bytes) => {
                debug!("Fed {} bytes to {}", bytes, client);
                false
            }
            Err(FeedError::Input(error)) => {
                warn!("Restore stream failed; stopping {}", client);
                let _ = child.kill().await;
                return Err(error);
            }
            Err(FeedError::StdinClosed) => true,
            Err(FeedError::Stdin(e)) => {
                let _ = child.kill().await;
                return Err(DbRestoreError::io(format!("Failed to write to {} stdin", client), e));
            }
        };

        let status = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(DbRestoreError::cancelled("ingestion"));
            }
            status = child.wait() => status
                .map_err(|e| DbRestoreError::io(format!("Failed to wait for {}", client), e))?,
        };
        let stderr = stderr_task.await.unwrap_or_default();

        if !status.success() {
            return Err(DbRestoreError::Ingestion {
                client,
                status: status.to_string(),
                stderr,
            });
        }
        if closed_early {
            return Err(DbRestoreError::Ingestion {
                client,
                status: "exited before reading all input".to_string(),
                stderr,
            });
        }
        Ok(())
    }
}
