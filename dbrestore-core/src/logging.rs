//! Tracing setup for the dbrestore binary.
//!
//! Verbosity flags pick the default level. `DBRESTORE_LOG` accepts
//! `tracing_subscriber` filter directives and replaces that default unless
//! quiet mode is on. Logs always go to stderr so stdout carries only results.

use crate::Result;
use crate::error::DbRestoreError;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Environment variable holding filter directives.
pub const LOG_ENV: &str = "DBRESTORE_LOG";

/// Output format of log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

/// Maps CLI verbosity flags to a level. `quiet` wins over any `-v`.
pub fn level_for(verbose: u8, quiet: bool) -> Level {
    if quiet {
        return Level::ERROR;
    }
    match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

fn filter_for(level: Level, quiet: bool, directives: Option<&str>) -> EnvFilter {
    let fallback = || EnvFilter::new(level.to_string());
    match directives.map(str::trim) {
        Some(directives) if !quiet && !directives.is_empty() => {
            EnvFilter::try_new(directives).unwrap_or_else(|_| fallback())
        }
        _ => fallback(),
    }
}

/// Initializes text logging from the verbosity flags.
///
/// # Example
/// ```rust,no_run
/// use dbrestore_core::logging::init_logging;
///
/// // DEBUG unless DBRESTORE_LOG says otherwise
/// init_logging(1, false).expect("Failed to initialize logging");
/// ```
///
/// # Errors
/// Returns a configuration error if a global subscriber is already set.
pub fn init_logging(verbose: u8, quiet: bool) -> Result<()> {
    init_logging_with_format(verbose, quiet, LogFormat::Text)
}

/// Initializes logging in the given format.
///
/// # Errors
/// Returns a configuration error if a global subscriber is already set.
pub fn init_logging_with_format(verbose: u8, quiet: bool, format: LogFormat) -> Result<()> {
    let directives = std::env::var(LOG_ENV).ok();
    let filter = filter_for(level_for(verbose, quiet), quiet, directives.as_deref());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    let installed = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| {
        DbRestoreError::configuration(format!("Failed to initialize logging: {}", e))
    })
}
