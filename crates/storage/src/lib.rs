//! Task ledger for gridq.
//!
//! This crate provides the `Ledger` trait, the contract every worker uses to
//! claim and report tasks, with a SQLite implementation that is safe to share
//! between independent processes.

#![warn(missing_docs)]

pub mod trait_;
pub mod retry;
pub mod sqlite_ledger;

pub use trait_::{Ledger, StorageError, Result};
pub use retry::RetryPolicy;
pub use sqlite_ledger::{JournalMode, LedgerOptions, SqliteLedger, SCHEMA_VERSION, SUMMARY_QUERY};

/// File name of the ledger inside a run directory.
pub const LEDGER_FILE: &str = "ledger.db";

/// Ledger location for a run directory.
pub fn ledger_path(run_dir: impl AsRef<std::path::Path>) -> std::path::PathBuf {
    run_dir.as_ref().join(LEDGER_FILE)
}
