//! Local dispatcher.
//!
//! Starts N workers on this machine against one ledger and waits for all of
//! them. Workers are either tokio tasks in this process (any `TaskBody`) or
//! separate `gridq worker` processes (command bodies from a run manifest).
//! A worker that dies mid-task leaves that task `running`; the dispatch still
//! completes and reports it in the summary.

use gridq_core::{validate_key_path, Summary, WorkerId};
use gridq_storage::{Ledger, LedgerOptions, SqliteLedger};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::body::TaskBody;
use crate::error::Result;
use crate::run::RunDir;
use crate::worker::{Worker, WorkerReport};

/// Outcome of a local dispatch.
#[derive(Debug, Clone)]
pub struct DispatchReport {
    /// Ledger summary after every worker stopped
    pub summary: Summary,
    /// Reports of workers that drained normally
    pub workers: Vec<WorkerReport>,
    /// Workers that panicked, errored or exited non-zero
    pub crashed: usize,
}

/// Runs a fixed number of workers on the local machine.
#[derive(Debug, Clone)]
pub struct LocalDispatcher {
    worker_count: usize,
    options: LedgerOptions,
}

impl LocalDispatcher {
    /// Create a dispatcher. A count of zero is treated as one.
    pub fn new(worker_count: usize) -> Self {
        Self {
            worker_count: worker_count.max(1),
            options: LedgerOptions::default(),
        }
    }

    /// Use these ledger options for every worker.
    pub fn with_options(mut self, options: LedgerOptions) -> Self {
        self.options = options;
        self
    }

    /// Number of workers started per dispatch.
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Initialize the ledger at `ledger_path` and drain it with in-process workers.
    ///
    /// Each worker opens its own connection pool and claims under
    /// `host:pid/slot`.
    pub async fn run(
        &self,
        ledger_path: &Path,
        base: Value,
        payloads: &[Value],
        key_path: &str,
        body: Arc<dyn TaskBody>,
    ) -> Result<DispatchReport> {
        validate_key_path(&base, key_path)?;
        let ledger = SqliteLedger::initialize(ledger_path, payloads, self.options.clone()).await?;

        info!(
            "Dispatching {} tasks to {} local workers",
            payloads.len(),
            self.worker_count
        );

        let base = Arc::new(base);
        let mut workers = JoinSet::new();
        for slot in 0..self.worker_count {
            let path = ledger_path.to_path_buf();
            let options = self.options.clone();
            let base = base.clone();
            let key_path = key_path.to_string();
            let body = body.clone();

            workers.spawn(run_slot(path, options, slot, base, key_path, body));
        }

        let mut reports = Vec::new();
        let mut crashed = 0;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(report)) => reports.push(report),
                Ok(Err(e)) => {
                    error!("Worker stopped: {}", e);
                    crashed += 1;
                }
                Err(e) => {
                    error!("Worker crashed: {}", e);
                    crashed += 1;
                }
            }
        }

        let summary = ledger.summary().await?;
        ledger.close().await;
        Ok(DispatchReport {
            summary,
            workers: reports,
            crashed,
        })
    }

    /// Drain a prepared run directory with `gridq worker` processes.
    ///
    /// `exe` is the `gridq` binary. The run directory must already hold a
    /// manifest and ledger (see [`RunDir::prepare`]).
    pub async fn run_processes(&self, run_dir: &RunDir, exe: &Path) -> Result<DispatchReport> {
        let manifest = run_dir.read_manifest().await?;

        info!(
            "Starting {} worker processes for {}",
            self.worker_count,
            run_dir.root().display()
        );

        let mut children = Vec::with_capacity(self.worker_count);
        for slot in 0..self.worker_count {
            let child = Command::new(exe)
                .arg("worker")
                .arg("--run-dir")
                .arg(run_dir.root())
                .kill_on_drop(true)
                .spawn()?;
            children.push((slot, child));
        }

        let mut crashed = 0;
        for (slot, mut child) in children {
            let status = child.wait().await?;
            if !status.success() {
                warn!("Worker process {} exited with {}", slot, status);
                crashed += 1;
            }
        }

        let ledger = SqliteLedger::open(&run_dir.ledger_path(), manifest.ledger_options()).await?;
        let summary = ledger.summary().await?;
        ledger.close().await;
        Ok(DispatchReport {
            summary,
            workers: Vec::new(),
            crashed,
        })
    }
}

async fn run_slot(
    path: PathBuf,
    options: LedgerOptions,
    slot: usize,
    base: Arc<Value>,
    key_path: String,
    body: Arc<dyn TaskBody>,
) -> Result<WorkerReport> {
    let ledger = SqliteLedger::open(&path, options).await?;
    let id = WorkerId::current().with_slot(slot);
    let mut worker = Worker::new(id, Arc::new(ledger.clone()), base, key_path, body);
    let report = worker.run().await;
    ledger.close().await;
    report
}

/// Initialize a ledger in `run_dir` and drain it with `worker_count` in-process workers.
pub async fn run_local(
    run_dir: &Path,
    base: Value,
    payloads: &[Value],
    key_path: &str,
    worker_count: usize,
    body: Arc<dyn TaskBody>,
) -> Result<Summary> {
    let report = LocalDispatcher::new(worker_count)
        .run(&RunDir::new(run_dir).ledger_path(), base, payloads, key_path, body)
        .await?;
    Ok(report.summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::FnBody;
    use anyhow::bail;
    use gridq_core::TaskStatus;
    use serde_json::json;
    use std::collections::HashSet;

    fn base() -> Value {
        json!({"param": 0, "seed": 1})
    }

    fn doubler() -> Arc<dyn TaskBody> {
        Arc::new(FnBody::new(|cfg: Value| {
            Ok(json!(cfg["param"].as_i64().unwrap_or(0) * 2))
        }))
    }

    #[tokio::test]
    async fn test_two_workers_drain_five_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let payloads: Vec<Value> = (1..=5).map(|i| json!(i)).collect();

        let report = LocalDispatcher::new(2)
            .run(&dir.path().join("ledger.db"), base(), &payloads, "param", doubler())
            .await
            .unwrap();

        assert_eq!(report.summary.count(TaskStatus::Done), 5);
        assert_eq!(report.summary.total(), 5);
        assert_eq!(report.crashed, 0);
        assert_eq!(report.workers.len(), 2);
        assert_eq!(report.workers.iter().map(|w| w.completed).sum::<u64>(), 5);

        let ledger = SqliteLedger::open(&dir.path().join("ledger.db"), LedgerOptions::default())
            .await
            .unwrap();
        let results: HashSet<i64> = ledger
            .list(Some(TaskStatus::Done))
            .await
            .unwrap()
            .into_iter()
            .filter_map(|t| t.result.and_then(|r| r.as_i64()))
            .collect();
        assert_eq!(results, HashSet::from([2, 4, 6, 8, 10]));
    }

    #[tokio::test]
    async fn test_run_local_single_failure() {
        let dir = tempfile::tempdir().unwrap();
        let body: Arc<dyn TaskBody> = Arc::new(FnBody::new(|_: Value| bail!("no convergence")));

        let summary = run_local(dir.path(), base(), &[json!(1)], "param", 1, body)
            .await
            .unwrap();
        assert_eq!(summary.count(TaskStatus::Failed), 1);
        assert_eq!(summary.total(), 1);
    }

    #[tokio::test]
    async fn test_panicking_worker_leaves_task_running() {
        let dir = tempfile::tempdir().unwrap();
        let payloads: Vec<Value> = (1..=6).map(|i| json!(i)).collect();
        let body: Arc<dyn TaskBody> = Arc::new(FnBody::new(|cfg: Value| {
            let p = cfg["param"].as_i64().unwrap_or(0);
            if p == 3 {
                panic!("worker killed");
            }
            Ok(json!(p))
        }));

        let report = LocalDispatcher::new(2)
            .run(&dir.path().join("ledger.db"), base(), &payloads, "param", body)
            .await
            .unwrap();

        assert_eq!(report.crashed, 1);
        assert_eq!(report.summary.count(TaskStatus::Running), 1);
        assert_eq!(report.summary.count(TaskStatus::Done), 5);
    }

    #[tokio::test]
    async fn test_bad_key_path_runs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        let err = LocalDispatcher::new(2)
            .run(&path, base(), &[json!(1)], "params", doubler())
            .await
            .unwrap_err();
        assert!(matches!(err, crate::WorkerError::Config(_)));
        assert!(!path.exists());
    }
}
