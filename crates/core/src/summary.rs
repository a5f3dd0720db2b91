//! Aggregate view over a ledger.

use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};
use crate::task::TaskStatus;
use crate::Time;

/// Count and time span of the tasks in one status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusStats {
    /// Number of tasks
    pub count: u64,
    /// Earliest timestamp among these tasks
    pub first: Option<Time>,
    /// Latest timestamp among these tasks
    pub last: Option<Time>,
}

/// Per-status counts and timestamps for one run.
///
/// Every status is present, with a zero count if no task holds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    /// Stats keyed by status
    pub by_status: BTreeMap<TaskStatus, StatusStats>,
}

impl Default for Summary {
    fn default() -> Self {
        Self {
            by_status: TaskStatus::ALL
                .iter()
                .map(|s| (*s, StatusStats::default()))
                .collect(),
        }
    }
}

impl Summary {
    /// Record the stats for one status.
    pub fn insert(&mut self, status: TaskStatus, stats: StatusStats) {
        self.by_status.insert(status, stats);
    }

    /// Number of tasks in a status.
    pub fn count(&self, status: TaskStatus) -> u64 {
        self.by_status.get(&status).map(|s| s.count).unwrap_or(0)
    }

    /// Number of tasks in the ledger.
    pub fn total(&self) -> u64 {
        self.by_status.values().map(|s| s.count).sum()
    }

    /// True when nothing is pending or running.
    pub fn is_drained(&self) -> bool {
        self.count(TaskStatus::Pending) == 0 && self.count(TaskStatus::Running) == 0
    }
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{:<8} {:>7}  {:<27}  {:<27}", "STATUS", "COUNT", "FIRST", "LAST")?;
        for (status, stats) in &self.by_status {
            let first = stats.first.as_ref().map(crate::format_time).unwrap_or_else(|| "-".into());
            let last = stats.last.as_ref().map(crate::format_time).unwrap_or_else(|| "-".into());
            writeln!(f, "{:<8} {:>7}  {:<27}  {:<27}", status, stats.count, first, last)?;
        }
        write!(f, "{:<8} {:>7}", "total", self.total())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_has_every_status() {
        let summary = Summary::default();
        assert_eq!(summary.by_status.len(), 4);
        assert_eq!(summary.total(), 0);
        assert!(summary.is_drained());
    }

    #[test]
    fn test_counts_and_drained() {
        let mut summary = Summary::default();
        summary.insert(TaskStatus::Done, StatusStats { count: 3, ..Default::default() });
        summary.insert(TaskStatus::Running, StatusStats { count: 1, ..Default::default() });

        assert_eq!(summary.count(TaskStatus::Done), 3);
        assert_eq!(summary.total(), 4);
        assert!(!summary.is_drained());
        assert!(summary.to_string().contains("running"));
    }
}
