//! Streaming restore-all tool.
//!
//! Restores every database found in a full MySQL/MariaDB dump into a target
//! server, backing up and optionally dropping existing databases first.
//!
//! # Security Guarantees
//! - Credentials never appear in logs or on client command lines
//! - Existing databases are backed up before they are dropped
//! - Authenticated decryption of encrypted dumps

use anyhow::Context;
use clap::Parser;
use dbrestore::{Cli, Command, RestoreAllArgs, TestArgs, render_summary};
use dbrestore_core::adapters::mysql::{
    CLIENT_CANDIDATES, DUMP_CANDIDATES, MySqlClientSink, MySqlTarget, MysqldumpBackup,
};
use dbrestore_core::logging::init_logging_with_format;
use dbrestore_core::models::RestoreResult;
use dbrestore_core::restore::lifecycle::FORCED_EXIT_CODE;
use dbrestore_core::restore::{SignalHandlers, run_with_lifecycle};
use dbrestore_core::{DatabaseOps, RestoreAllExecutor};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    init_logging_with_format(cli.global.verbose, cli.global.quiet, cli.global.log_format())?;

    match &cli.command {
        Command::RestoreAll(args) => restore_all(args, cli.global.quiet).await,
        Command::Test(args) => test_connection(args).await,
    }
}

async fn restore_all(args: &RestoreAllArgs, quiet: bool) -> anyhow::Result<ExitCode> {
    let profile = args.target.profile()?;
    let key = args.resolve_encryption_key()?;
    let options = args.restore_options(profile.clone(), key)?;

    info!(
        "Restoring {} into {}",
        options.source_file.display(),
        profile.to_safe_string()
    );

    let target = Arc::new(MySqlTarget::connect_lazy(&profile)?);

    // A dry run never touches the target, so client tools need not be installed.
    let (sink, backup) = if options.dry_run {
        (
            MySqlClientSink::with_program(CLIENT_CANDIDATES[0], None),
            MysqldumpBackup::with_program(DUMP_CANDIDATES[0], Vec::new(), profile.clone()),
        )
    } else {
        target
            .test_connection()
            .await
            .context("Target server is not reachable")?;
        let backup = if options.skip_backup {
            MysqldumpBackup::with_program(DUMP_CANDIDATES[0], Vec::new(), profile.clone())
        } else {
            MysqldumpBackup::new(&profile)?
        };
        (MySqlClientSink::new(&profile)?, backup)
    };

    let executor = RestoreAllExecutor::new(
        options,
        Arc::clone(&target) as Arc<dyn DatabaseOps>,
        Arc::new(backup),
        Arc::new(sink),
    );

    let cancel = CancellationToken::new();
    let handlers = SignalHandlers::install(cancel.clone());
    let outcome = run_with_lifecycle(&cancel, executor.execute(&cancel)).await;
    handlers.shutdown().await;
    target.close().await;

    let result = match outcome {
        Ok(Some(result)) => result,
        Ok(None) => {
            warn!("Restore did not complete");
            return Ok(ExitCode::from(u8::try_from(FORCED_EXIT_CODE).unwrap_or(1)));
        }
        Err(error) => {
            // Still show what was backed up or dropped before the failure.
            if let Some(partial) = error.partial_result() {
                print_result(partial, args.json, quiet)?;
            }
            return Err(error.into());
        }
    };

    print_result(&result, args.json, quiet)?;
    Ok(ExitCode::SUCCESS)
}

fn print_result(result: &RestoreResult, json: bool, quiet: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
    } else if !quiet {
        println!("{}", render_summary(result));
    }
    Ok(())
}

async fn test_connection(args: &TestArgs) -> anyhow::Result<ExitCode> {
    let profile = args.target.profile()?;
    info!("Testing connection to {}", profile.to_safe_string());

    let target = MySqlTarget::connect_lazy(&profile)?;
    let listed = async {
        target.test_connection().await?;
        target.list_databases().await
    }
    .await;
    target.close().await;
    let databases = listed?;

    println!("✓ Connection test successful");
    println!("  {} databases visible:", databases.len());
    for name in &databases {
        println!("  - {}", name);
    }
    Ok(ExitCode::SUCCESS)
}
