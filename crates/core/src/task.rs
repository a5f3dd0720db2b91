//! Task model - one record in the ledger.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use crate::id::{TaskId, WorkerId};
use crate::Time;

/// A task is one parameter value to run the task body against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier
    pub id: TaskId,

    /// Value merged into the base configuration
    pub payload: Value,

    /// Current status
    pub status: TaskStatus,

    /// Worker holding (or last holding) the claim
    pub owner: Option<WorkerId>,

    /// When the task was enqueued
    pub ts_enqueued: Time,

    /// When a worker claimed the task
    pub ts_claimed: Option<Time>,

    /// When the task reached `done` or `failed`
    pub ts_finished: Option<Time>,

    /// Value returned by the task body
    pub result: Option<Value>,

    /// Failure detail, set only when `failed`
    pub error: Option<String>,
}

impl Task {
    /// Whether the task reached a terminal status.
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Lifecycle status of a task.
///
/// Ordered by lifecycle position; summaries list statuses in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting for a worker
    Pending,
    /// Claimed by a worker
    Running,
    /// Task body returned normally
    Done,
    /// Task body returned an error
    Failed,
}

impl TaskStatus {
    /// All statuses in lifecycle order.
    pub const ALL: [TaskStatus; 4] = [
        TaskStatus::Pending,
        TaskStatus::Running,
        TaskStatus::Done,
        TaskStatus::Failed,
    ];

    /// The text stored in the ledger.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
        }
    }

    /// Whether no further transition happens through the worker protocol.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Unknown status text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown task status: {0}")]
pub struct ParseStatusError(pub String);

impl std::str::FromStr for TaskStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "done" => Ok(TaskStatus::Done),
            "failed" => Ok(TaskStatus::Failed),
            _ => Err(ParseStatusError(s.to_string())),
        }
    }
}
