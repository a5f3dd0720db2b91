//! Worker loop.
//!
//! A worker repeatedly claims the next pending task, merges its payload into
//! the base configuration, runs the body and records the outcome. It stops
//! when nothing is pending. The loop is the same for a local pool slot, a
//! local worker process and a cluster array element.

use gridq_core::{merge, Task, TaskId, WorkerId};
use gridq_storage::Ledger;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::body::TaskBody;
use crate::error::Result;

/// Where a worker is in its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// About to claim
    Idle,
    /// Running the body for a claimed task
    Executing(TaskId),
    /// Nothing left to claim
    Draining,
}

/// What one worker did before draining.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerReport {
    /// Worker identity
    pub owner: WorkerId,
    /// Tasks completed
    pub completed: u64,
    /// Tasks failed
    pub failed: u64,
}

/// A single pull-based worker.
pub struct Worker {
    id: WorkerId,
    ledger: Arc<dyn Ledger>,
    base: Arc<Value>,
    key_path: String,
    body: Arc<dyn TaskBody>,
    state: WorkerState,
    report: WorkerReport,
}

impl Worker {
    /// Create a worker.
    pub fn new(
        id: WorkerId,
        ledger: Arc<dyn Ledger>,
        base: Arc<Value>,
        key_path: impl Into<String>,
        body: Arc<dyn TaskBody>,
    ) -> Self {
        let report = WorkerReport {
            owner: id.clone(),
            completed: 0,
            failed: 0,
        };
        Self {
            id,
            ledger,
            base,
            key_path: key_path.into(),
            body,
            state: WorkerState::Idle,
            report,
        }
    }

    /// Worker identity.
    pub fn id(&self) -> &WorkerId {
        &self.id
    }

    /// Current state.
    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Claim and process one task.
    ///
    /// Returns `false` once nothing is pending; the worker is then draining.
    pub async fn step(&mut self) -> Result<bool> {
        if self.state == WorkerState::Draining {
            return Ok(false);
        }

        let Some(task) = self.ledger.claim_next(&self.id).await? else {
            self.state = WorkerState::Draining;
            return Ok(false);
        };

        self.state = WorkerState::Executing(task.id);
        debug!("Worker {} executing task {}", self.id, task.id);

        match self.execute(&task).await {
            Ok(result) => {
                self.ledger.complete(task.id, &self.id, &result).await?;
                self.report.completed += 1;
            }
            Err(e) => {
                let mut message = format!("{:#}", e);
                if message.trim().is_empty() {
                    message = "task body failed".to_string();
                }
                error!("Task {} failed on {}: {}", task.id, self.id, message);
                self.ledger.fail(task.id, &self.id, &message).await?;
                self.report.failed += 1;
            }
        }

        self.state = WorkerState::Idle;
        Ok(true)
    }

    /// Process tasks until the ledger has nothing pending.
    ///
    /// Ledger errors stop the worker; body errors do not.
    pub async fn run(&mut self) -> Result<WorkerReport> {
        info!("Worker {} started", self.id);
        while self.step().await? {}
        info!(
            "Worker {} draining: {} done, {} failed",
            self.id, self.report.completed, self.report.failed
        );
        Ok(self.report.clone())
    }

    async fn execute(&self, task: &Task) -> anyhow::Result<Value> {
        let config = merge(&self.base, &self.key_path, task.payload.clone())?;
        self.body.run(config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::FnBody;
    use anyhow::bail;
    use gridq_core::TaskStatus;
    use gridq_storage::SqliteLedger;
    use serde_json::json;

    fn base() -> Arc<Value> {
        Arc::new(json!({"model": {"param": 0, "name": "m"}}))
    }

    async fn worker_for(payloads: &[Value], body: Arc<dyn TaskBody>) -> (Worker, Arc<SqliteLedger>) {
        let ledger = Arc::new(SqliteLedger::in_memory(payloads).await.unwrap());
        let worker = Worker::new(
            WorkerId::from("test:1"),
            ledger.clone(),
            base(),
            "model.param",
            body,
        );
        (worker, ledger)
    }

    #[tokio::test]
    async fn test_failing_body_is_recorded() {
        let body = Arc::new(FnBody::new(|_: Value| bail!("diverged")));
        let (mut worker, ledger) = worker_for(&[json!(1)], body).await;

        let report = worker.run().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.completed, 0);

        let summary = ledger.summary().await.unwrap();
        assert_eq!(summary.count(TaskStatus::Failed), 1);
        let task = ledger.get(TaskId::new(0)).await.unwrap().unwrap();
        assert!(task.error.unwrap().contains("diverged"));
    }

    #[tokio::test]
    async fn test_worker_continues_after_failure() {
        let body = Arc::new(FnBody::new(|cfg: Value| {
            let p = cfg["model"]["param"].as_i64().unwrap_or(0);
            if p == 2 {
                bail!("bad param {}", p);
            }
            Ok(json!(p * 10))
        }));
        let (mut worker, ledger) = worker_for(&[json!(1), json!(2), json!(3)], body).await;

        let report = worker.run().await.unwrap();
        assert_eq!((report.completed, report.failed), (2, 1));
        assert_eq!(worker.state(), WorkerState::Draining);

        let done = ledger.list(Some(TaskStatus::Done)).await.unwrap();
        let results: Vec<_> = done.into_iter().filter_map(|t| t.result).collect();
        assert_eq!(results, vec![json!(10), json!(30)]);
    }

    #[tokio::test]
    async fn test_body_sees_merged_config() {
        let body = Arc::new(FnBody::new(|cfg: Value| Ok(cfg)));
        let (mut worker, ledger) = worker_for(&[json!({"nested": true})], body).await;
        worker.run().await.unwrap();

        let task = ledger.get(TaskId::new(0)).await.unwrap().unwrap();
        assert_eq!(
            task.result,
            Some(json!({"model": {"param": {"nested": true}, "name": "m"}}))
        );
    }

    #[tokio::test]
    async fn test_merge_failure_fails_the_task() {
        let ledger = Arc::new(SqliteLedger::in_memory(&[json!(1), json!(2)]).await.unwrap());
        let body = Arc::new(FnBody::new(|cfg: Value| Ok(cfg)));
        let mut worker = Worker::new(
            WorkerId::from("test:1"),
            ledger.clone(),
            base(),
            "model.missing.param",
            body,
        );

        let report = worker.run().await.unwrap();
        assert_eq!(report.failed, 2);
        let task = ledger.get(TaskId::new(1)).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.unwrap().contains("missing"));
    }

    #[tokio::test]
    async fn test_empty_ledger_drains_immediately() {
        let body = Arc::new(FnBody::new(|cfg: Value| Ok(cfg)));
        let (mut worker, _ledger) = worker_for(&[], body).await;
        assert_eq!(worker.state(), WorkerState::Idle);
        assert!(!worker.step().await.unwrap());
        assert_eq!(worker.state(), WorkerState::Draining);
        assert!(!worker.step().await.unwrap());
    }
}
