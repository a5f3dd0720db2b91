//! Identifiers for tasks and workers.

use serde::{Deserialize, Serialize};

/// Unique identifier for a Task.
///
/// Assigned at enqueue time from the payload's position in the task list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(i64);

impl TaskId {
    /// Wrap a raw id.
    pub fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// The raw integer stored in the ledger.
    pub fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for TaskId {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for TaskId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Identifier of the worker holding a claim.
///
/// Rendered as `host:pid`, extended with `:array-index` when running as a
/// scheduler array element and `/slot` for in-process pool workers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(String);

impl WorkerId {
    /// Identifier for the current process.
    pub fn current() -> Self {
        let host = std::env::var("HOSTNAME")
            .ok()
            .filter(|h| !h.is_empty())
            .or_else(|| {
                hostname::get()
                    .ok()
                    .map(|h| h.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| "local".to_string());
        Self(format!("{}:{}", host, std::process::id()))
    }

    /// Append the scheduler array index.
    pub fn with_array_index(self, index: u32) -> Self {
        Self(format!("{}:{}", self.0, index))
    }

    /// Append a pool slot number.
    pub fn with_slot(self, slot: usize) -> Self {
        Self(format!("{}/{}", self.0, slot))
    }

    /// Borrow the textual form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for WorkerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for WorkerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_id_suffixes() {
        let id = WorkerId::from("node7:4242").with_array_index(3);
        assert_eq!(id.as_str(), "node7:4242:3");

        let slot = WorkerId::from("node7:4242").with_slot(1);
        assert_eq!(slot.to_string(), "node7:4242/1");
    }

    #[test]
    fn test_current_worker_contains_pid() {
        let id = WorkerId::current();
        assert!(id.as_str().ends_with(&format!(":{}", std::process::id())));
    }

    #[test]
    fn test_task_id_parse() {
        let id: TaskId = "17".parse().unwrap();
        assert_eq!(id.get(), 17);
        assert!("x".parse::<TaskId>().is_err());
    }
}
