//! Ledger trait abstraction.

use async_trait::async_trait;
use gridq_core::{Summary, Task, TaskId, TaskStatus, WorkerId};
use serde_json::Value;

/// Error type for ledger operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Result export error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// SQLite error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Lock contention outlasted the retry budget
    #[error("ledger still locked after {attempts} attempts: {message}")]
    Contention {
        /// Attempts made
        attempts: u32,
        /// Last database error
        message: String,
    },

    /// Ledger written by an incompatible schema version
    #[error("ledger schema version {found} is not supported (expected {expected})")]
    IncompatibleSchema {
        /// Version found on disk
        found: i64,
        /// Version this build writes
        expected: i64,
    },

    /// Re-initialization with a different task list
    #[error("task {id} already exists in the ledger with a different payload")]
    Mismatch {
        /// First conflicting task
        id: TaskId,
    },

    /// Completion or failure reported by a worker that does not hold the claim
    #[error("task {id} is {status} under {holder:?}, not running under {owner}")]
    Ownership {
        /// Task reported on
        id: TaskId,
        /// Worker that reported
        owner: WorkerId,
        /// Current status
        status: TaskStatus,
        /// Current claim holder
        holder: Option<WorkerId>,
    },

    /// Item not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Stored data could not be decoded
    #[error("corrupt ledger record: {0}")]
    Corrupt(String),
}

/// Persistent, concurrently accessible store of task records.
///
/// All mutation goes through `claim_next`, `complete`, `fail` and the
/// explicit `requeue`. Reads never take an exclusive lock.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Atomically move the lowest pending task to `running` under `owner`.
    ///
    /// Returns `None` when nothing is pending. Concurrent callers never
    /// receive the same task.
    async fn claim_next(&self, owner: &WorkerId) -> Result<Option<Task>>;

    /// Mark a task `done`. The task must be `running` under `owner`.
    async fn complete(&self, id: TaskId, owner: &WorkerId, result: &Value) -> Result<()>;

    /// Mark a task `failed`. The task must be `running` under `owner`.
    async fn fail(&self, id: TaskId, owner: &WorkerId, error: &str) -> Result<()>;

    /// Per-status counts and timestamps.
    async fn summary(&self) -> Result<Summary>;

    /// Load a task by ID.
    async fn get(&self, id: TaskId) -> Result<Option<Task>>;

    /// List tasks, optionally restricted to one status, ordered by id.
    async fn list(&self, status: Option<TaskStatus>) -> Result<Vec<Task>>;

    /// Number of pending tasks.
    async fn pending_count(&self) -> Result<u64>;

    /// Return tasks in the given statuses to `pending`, clearing their claim.
    ///
    /// This is the manual recovery path; workers never call it.
    async fn requeue(&self, statuses: &[TaskStatus]) -> Result<u64>;
}
