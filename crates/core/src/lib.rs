//! gridq core data models.
//!
//! This crate defines the task records shared by every worker, the config
//! merge used to project a task payload into a base configuration, and the
//! task-source parser.

#![warn(missing_docs)]

// Core identities
mod id;

// Task ledger records
mod task;
mod summary;

// Inputs
pub mod config;
pub mod source;

// Re-exports
pub use id::{TaskId, WorkerId};
pub use task::{Task, TaskStatus, ParseStatusError};
pub use summary::{Summary, StatusStats};
pub use config::{merge, validate_key_path, ConfigError};
pub use source::{load_tasks, parse_task_lines, SourceError};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;

/// Render a timestamp the way the ledger stores it.
///
/// Fixed microsecond precision in UTC, so lexical order equals time order
/// and `MIN`/`MAX` over the stored text are meaningful in plain SQL.
pub fn format_time(t: &Time) -> String {
    t.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

/// Parse a timestamp produced by [`format_time`].
pub fn parse_time(s: &str) -> Option<Time> {
    chrono::DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&chrono::Utc))
}

/// Current time, truncated to the precision the ledger keeps.
pub fn now() -> Time {
    let now = chrono::Utc::now();
    parse_time(&format_time(&now)).unwrap_or(now)
}
