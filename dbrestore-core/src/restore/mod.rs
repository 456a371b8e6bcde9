//! Restore-all engine.
//!
//! # Module Structure
//! - `pipeline`: opens a dump and stacks decryption and decompression
//! - `scanner`: line scanner with the enumeration, analysis and streaming passes
//! - `filter`: which databases are kept
//! - `pipe`: bounded, cancellable pipe between producer and ingestion
//! - `progress`: per-database progress relay
//! - `safety`: existence checks, backup and drops before streaming
//! - `transport`: client arguments and the TLS fallback predicate
//! - `executor`: the two-pass orchestrator
//! - `lifecycle`: signal handling and outcome classification

pub mod executor;
pub mod filter;
pub mod lifecycle;
pub mod pipe;
pub mod pipeline;
pub mod progress;
pub mod safety;
pub mod scanner;
pub mod transport;

pub use executor::RestoreAllExecutor;
pub use filter::{FilterPolicy, SkipReason, is_system_database};
pub use lifecycle::{LifecycleController, ShutdownState, SignalHandlers, run_with_lifecycle};
pub use pipeline::{PreparedReader, open_and_prepare_reader};
pub use progress::{LoggingProgress, ProgressSink};
pub use safety::{ErrorPolicy, SafetyCoordinator};
