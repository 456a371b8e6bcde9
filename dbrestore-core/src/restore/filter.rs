//! Database keep/skip policy shared by the enumeration and streaming passes.
//!
//! The decision is a pure function of the database name and the policy, so
//! both passes select exactly the same databases.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Server-internal schemas that a restore-all never needs to recreate.
pub const SYSTEM_DATABASES: [&str; 4] = [
    "mysql",
    "sys",
    "information_schema",
    "performance_schema",
];

/// Why a database is left out of the restore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// Listed in the exclude set
    ExcludedByUser,
    /// A system schema while system databases are skipped
    SystemDatabase,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ExcludedByUser => f.write_str("excluded by user"),
            Self::SystemDatabase => f.write_str("system database"),
        }
    }
}

/// Returns true if `name` is one of the fixed system schemas.
///
/// The comparison ignores ASCII case; server-side schema names are
/// case-insensitive on the platforms that ship these schemas.
pub fn is_system_database(name: &str) -> bool {
    SYSTEM_DATABASES
        .iter()
        .any(|system| system.eq_ignore_ascii_case(name))
}

/// Keep/skip rules for databases found in a dump.
///
/// # Example
/// ```rust
/// use dbrestore_core::restore::filter::{FilterPolicy, SkipReason};
///
/// let policy = FilterPolicy::new()
///     .with_skip_system_databases(true)
///     .with_excluded(["scratch"]);
///
/// assert_eq!(policy.should_skip("mysql"), Some(SkipReason::SystemDatabase));
/// assert_eq!(policy.should_skip("scratch"), Some(SkipReason::ExcludedByUser));
/// assert_eq!(policy.should_skip("app"), None);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterPolicy {
    /// Exact, case-sensitive names to exclude
    pub exclude_databases: BTreeSet<String>,
    /// Skip the fixed set of system schemas
    pub skip_system_databases: bool,
}

impl FilterPolicy {
    /// Creates a policy that keeps everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether system databases are skipped.
    pub fn with_skip_system_databases(mut self, skip: bool) -> Self {
        self.skip_system_databases = skip;
        self
    }

    /// Adds names to the exclude set. Blank entries are ignored.
    pub fn with_excluded<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.exclude_databases.extend(
            names
                .into_iter()
                .map(|name| name.as_ref().trim().to_string())
                .filter(|name| !name.is_empty()),
        );
        self
    }

    /// Decides whether `name` is skipped. `None` means keep.
    ///
    /// An explicit exclusion is reported ahead of the system rule.
    pub fn should_skip(&self, name: &str) -> Option<SkipReason> {
        if self.exclude_databases.contains(name) {
            return Some(SkipReason::ExcludedByUser);
        }
        if self.skip_system_databases && is_system_database(name) {
            return Some(SkipReason::SystemDatabase);
        }
        None
    }

    /// Convenience inverse of [`FilterPolicy::should_skip`].
    pub fn keeps(&self, name: &str) -> bool {
        self.should_skip(name).is_none()
    }
}
