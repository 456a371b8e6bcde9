//! Line scanner for SQL dumps with database-switch detection.
//!
//! Dumps produced by `mysqldump --all-databases` select each database with a
//! ``USE `name`;`` line before its statements. The scanner tracks the most
//! recent switch so every line can be attributed to a database. It is a
//! prefix matcher, not a SQL parser.
//!
//! Lines can be very long (extended INSERTs), so the line buffer grows up to
//! a configurable limit. A line over the limit is an error, never silently
//! truncated.

use crate::error::DbRestoreError;
use crate::models::{DatabasePlan, DryRunReport, RestoreStats, SkippedDatabase};
use crate::restore::filter::FilterPolicy;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::{BufRead, BufReader, Read, Write};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Default maximum line size (100 MiB).
pub const DEFAULT_MAX_LINE_SIZE: usize = 100 * 1024 * 1024;

/// Initial read buffer for the scanner (1 MiB).
pub const INITIAL_LINE_BUFFER: usize = 1024 * 1024;

/// Buffered writer size used when forwarding to the ingestion pipe (4 MiB).
pub const FORWARD_BUFFER_SIZE: usize = 4 * 1024 * 1024;

const SWITCH_PREFIX: &[u8] = b"USE `";

/// Extracts the database name from a switch statement.
///
/// Returns `None` unless the line starts with ``USE ` ``, followed by a
/// non-empty identifier and a closing backtick. Anything after the closing
/// backtick is ignored.
///
/// # Example
/// ```rust
/// use dbrestore_core::restore::scanner::parse_switch_marker;
///
/// assert_eq!(parse_switch_marker(b"USE `shop`;").as_deref(), Some("shop"));
/// assert_eq!(parse_switch_marker(b"USE ``;"), None);
/// assert_eq!(parse_switch_marker(b"-- USE `shop`;"), None);
/// ```
pub fn parse_switch_marker(line: &[u8]) -> Option<String> {
    let rest = line.strip_prefix(SWITCH_PREFIX)?;
    let end = rest.iter().position(|&b| b == b'`')?;
    if end == 0 {
        return None;
    }
    Some(String::from_utf8_lossy(&rest[..end]).into_owned())
}

/// Classification of a scanned line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// A database switch; [`StatementScanner::current_database`] was updated
    Switch,
    /// Any other line
    Data,
}

/// Line-oriented scanner over a decoded dump.
pub struct StatementScanner<R> {
    reader: BufReader<R>,
    line: Vec<u8>,
    max_line_size: usize,
    line_number: u64,
    current_database: Option<String>,
}

impl<R: Read> StatementScanner<R> {
    /// Creates a scanner with the default 100 MiB line limit.
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::with_capacity(INITIAL_LINE_BUFFER, reader),
            line: Vec::new(),
            max_line_size: DEFAULT_MAX_LINE_SIZE,
            line_number: 0,
            current_database: None,
        }
    }

    /// Overrides the maximum line size.
    pub fn with_max_line_size(mut self, max_line_size: usize) -> Self {
        self.max_line_size = max_line_size.max(1);
        self
    }

    /// Advances to the next line.
    ///
    /// Returns `Ok(None)` at end of input. A trailing `\r` is stripped, and a
    /// final line without a terminator is still returned.
    ///
    /// # Errors
    /// [`DbRestoreError::LineTooLong`] if a line exceeds the limit, or the
    /// underlying read error (decryption, decompression, I/O).
    pub fn next_line(&mut self) -> crate::Result<Option<LineKind>> {
        self.line.clear();
        let mut saw_bytes = false;

        loop {
            let available = self.reader.fill_buf().map_err(|e| {
                DbRestoreError::from_stream_error(
                    format!("Failed to read dump near line {}", self.line_number + 1),
                    e,
                )
            })?;
            if available.is_empty() {
                break;
            }
            saw_bytes = true;

            let (chunk, consumed, complete) = match available.iter().position(|&b| b == b'\n') {
                Some(pos) => (&available[..pos], pos + 1, true),
                None => (available, available.len(), false),
            };

            if self.line.len() + chunk.len() > self.max_line_size {
                return Err(DbRestoreError::LineTooLong {
                    line_number: self.line_number + 1,
                    limit: self.max_line_size,
                });
            }
            self.line.extend_from_slice(chunk);
            self.reader.consume(consumed);

            if complete {
                break;
            }
        }

        if !saw_bytes {
            return Ok(None);
        }

        self.line_number += 1;
        if self.line.last() == Some(&b'\r') {
            self.line.pop();
        }

        match parse_switch_marker(&self.line) {
            Some(name) => {
                trace!("Line {}: switch to database {}", self.line_number, name);
                self.current_database = Some(name);
                Ok(Some(LineKind::Switch))
            }
            None => Ok(Some(LineKind::Data)),
        }
    }

    /// Current line without its terminator.
    pub fn line(&self) -> &[u8] {
        &self.line
    }

    /// Database selected by the most recent switch statement.
    pub fn current_database(&self) -> Option<&str> {
        self.current_database.as_deref()
    }

    /// 1-based number of the current line.
    pub fn line_number(&self) -> u64 {
        self.line_number
    }
}

fn check_cancelled(cancel: &CancellationToken, stage: &str) -> crate::Result<()> {
    if cancel.is_cancelled() {
        return Err(DbRestoreError::cancelled(stage));
    }
    Ok(())
}

/// Databases found by the enumeration pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Enumeration {
    /// Kept databases, sorted
    pub databases: Vec<String>,
    /// Skipped databases with reasons, sorted by name
    pub skipped: Vec<SkippedDatabase>,
}

/// Pass 1: collects the distinct databases the policy keeps.
///
/// Only switch statements are inspected; data lines are skipped over.
pub fn enumerate_databases<R: Read>(
    reader: R,
    policy: &FilterPolicy,
    cancel: &CancellationToken,
) -> crate::Result<Enumeration> {
    let mut scanner = StatementScanner::new(reader);
    let mut kept = BTreeSet::new();
    let mut skipped = BTreeMap::new();

    while let Some(kind) = scanner.next_line()? {
        check_cancelled(cancel, "database enumeration")?;
        if kind != LineKind::Switch {
            continue;
        }
        let Some(name) = scanner.current_database() else {
            continue;
        };
        match policy.should_skip(name) {
            Some(reason) => {
                skipped
                    .entry(name.to_string())
                    .or_insert_with(|| reason.to_string());
            }
            None => {
                kept.insert(name.to_string());
            }
        }
    }

    debug!(
        "Enumerated {} database(s), skipped {} across {} lines",
        kept.len(),
        skipped.len(),
        scanner.line_number()
    );

    Ok(Enumeration {
        databases: kept.into_iter().collect(),
        skipped: skipped
            .into_iter()
            .map(|(name, reason)| SkippedDatabase { name, reason })
            .collect(),
    })
}

/// Dry-run analysis: per-database line counts and skipped databases.
pub fn analyze_dump<R: Read>(
    reader: R,
    policy: &FilterPolicy,
    cancel: &CancellationToken,
) -> crate::Result<DryRunReport> {
    let mut scanner = StatementScanner::new(reader);
    let mut order: Vec<String> = Vec::new();
    let mut counts: HashMap<String, u64> = HashMap::new();
    let mut skipped = BTreeMap::new();
    let mut report = DryRunReport::default();
    let mut skipping = false;

    while let Some(kind) = scanner.next_line()? {
        check_cancelled(cancel, "dry-run analysis")?;
        report.total_lines += 1;

        if kind == LineKind::Switch
            && let Some(name) = scanner.current_database()
        {
            match policy.should_skip(name) {
                Some(reason) => {
                    skipping = true;
                    skipped
                        .entry(name.to_string())
                        .or_insert_with(|| reason.to_string());
                }
                None => {
                    skipping = false;
                    if !counts.contains_key(name) {
                        order.push(name.to_string());
                    }
                }
            }
        }

        if skipping {
            continue;
        }
        match scanner.current_database() {
            Some(name) => *counts.entry(name.to_string()).or_insert(0) += 1,
            None => report.preamble_lines += 1,
        }
    }

    report.databases = order
        .into_iter()
        .map(|name| {
            let line_count = counts.get(&name).copied().unwrap_or(0);
            DatabasePlan { name, line_count }
        })
        .collect();
    report.skipped = skipped
        .into_iter()
        .map(|(name, reason)| SkippedDatabase { name, reason })
        .collect();
    Ok(report)
}

/// Pass 2: forwards every kept line to `output`.
///
/// Lines before the first switch statement are forwarded. After a switch to
/// a skipped database, lines are dropped until the next switch to a kept
/// one. `on_database` is called once per distinct kept database, in the
/// order the switches appear.
///
/// The output is wrapped in a 4 MiB buffer and flushed before returning.
pub fn stream_filtered<R, W, F>(
    reader: R,
    policy: &FilterPolicy,
    output: W,
    cancel: &CancellationToken,
    mut on_database: F,
) -> crate::Result<RestoreStats>
where
    R: Read,
    W: Write,
    F: FnMut(&str),
{
    let mut scanner = StatementScanner::new(reader);
    let mut writer = std::io::BufWriter::with_capacity(FORWARD_BUFFER_SIZE, output);
    let mut restored: BTreeSet<String> = BTreeSet::new();
    let mut stats = RestoreStats::default();
    let mut skipping = false;

    while let Some(kind) = scanner.next_line()? {
        check_cancelled(cancel, "restore streaming")?;

        if kind == LineKind::Switch
            && let Some(name) = scanner.current_database()
        {
            skipping = policy.should_skip(name).is_some();
            if !skipping && restored.insert(name.to_string()) {
                debug!("Streaming database {}", name);
                on_database(name);
            }
        }

        if skipping {
            continue;
        }

        let line = scanner.line();
        writer
            .write_all(line)
            .and_then(|()| writer.write_all(b"\n"))
            .map_err(|e| DbRestoreError::from_stream_error("Failed to write to ingestion stdin", e))?;
        stats.lines_forwarded += 1;
        stats.bytes_forwarded += line.len() as u64 + 1;
    }

    writer
        .flush()
        .map_err(|e| DbRestoreError::from_stream_error("Failed to flush ingestion stdin", e))?;
    stats.restored_count = restored.len();
    Ok(stats)
}
