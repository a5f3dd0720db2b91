//! SQLite ledger backend for gridq.
//!
//! One database file per run. Every worker process opens its own pool on the
//! same file; the claim is a single `UPDATE … RETURNING` statement so two
//! workers can never observe the same pending row and both take it.

use async_trait::async_trait;
use gridq_core::{format_time, now, parse_time, StatusStats, Summary, Task, TaskId, TaskStatus, Time, WorkerId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use super::retry::RetryPolicy;
use super::trait_::{Ledger, Result, StorageError};

/// Schema version written to `PRAGMA user_version`.
pub const SCHEMA_VERSION: i64 = 1;

/// Per-status count and time span.
///
/// Safe to run from any SQLite client while workers are active.
pub const SUMMARY_QUERY: &str = "SELECT status,
       COUNT(*) AS count,
       MIN(COALESCE(ts_claimed, ts_enqueued)) AS first,
       MAX(COALESCE(ts_finished, ts_claimed, ts_enqueued)) AS last
FROM tasks
GROUP BY status
ORDER BY status";

const CREATE_TASKS: &str = "CREATE TABLE IF NOT EXISTS tasks (
    id INTEGER PRIMARY KEY,
    payload TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'running', 'done', 'failed')),
    owner TEXT,
    ts_enqueued TEXT NOT NULL,
    ts_claimed TEXT,
    ts_finished TEXT,
    result TEXT,
    error TEXT
)";

const CREATE_STATUS_INDEX: &str = "CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status, id)";

const INSERT_TASK: &str =
    "INSERT OR IGNORE INTO tasks (id, payload, status, ts_enqueued) VALUES (?, ?, 'pending', ?)";

const CLAIM_NEXT: &str = "UPDATE tasks
SET status = 'running', owner = ?, ts_claimed = ?
WHERE id = (SELECT id FROM tasks WHERE status = 'pending' ORDER BY id LIMIT 1)
  AND status = 'pending'
RETURNING id, payload, status, owner, ts_enqueued, ts_claimed, ts_finished, result, error";

const FINISH_TASK: &str = "UPDATE tasks
SET status = ?, ts_finished = ?, result = ?, error = ?
WHERE id = ? AND status = 'running' AND owner = ?";

const REQUEUE: &str = "UPDATE tasks
SET status = 'pending', owner = NULL, ts_claimed = NULL, ts_finished = NULL, result = NULL, error = NULL
WHERE status = ?";

const SELECT_TASK: &str = "SELECT id, payload, status, owner, ts_enqueued, ts_claimed, ts_finished, result, error
FROM tasks WHERE id = ?";

const SELECT_ALL: &str = "SELECT id, payload, status, owner, ts_enqueued, ts_claimed, ts_finished, result, error
FROM tasks ORDER BY id";

const SELECT_BY_STATUS: &str = "SELECT id, payload, status, owner, ts_enqueued, ts_claimed, ts_finished, result, error
FROM tasks WHERE status = ? ORDER BY id";

const SELECT_FINISHED: &str = "SELECT id, payload, status, owner, ts_enqueued, ts_claimed, ts_finished, result, error
FROM tasks WHERE status IN ('done', 'failed') ORDER BY ts_finished, id";

/// SQLite journal mode for the ledger file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalMode {
    /// Write-ahead log; readers never block writers
    #[default]
    Wal,
    /// Rollback journal; for network filesystems without shared memory
    Delete,
}

impl From<JournalMode> for SqliteJournalMode {
    fn from(mode: JournalMode) -> Self {
        match mode {
            JournalMode::Wal => SqliteJournalMode::Wal,
            JournalMode::Delete => SqliteJournalMode::Delete,
        }
    }
}

impl std::str::FromStr for JournalMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "wal" => Ok(JournalMode::Wal),
            "delete" => Ok(JournalMode::Delete),
            other => Err(format!("unknown journal mode `{}` (expected wal or delete)", other)),
        }
    }
}

/// Connection settings for a ledger.
#[derive(Debug, Clone)]
pub struct LedgerOptions {
    /// Journal mode
    pub journal_mode: JournalMode,
    /// How long SQLite itself waits on a lock before reporting busy
    pub busy_timeout: Duration,
    /// Connections per process
    pub max_connections: u32,
    /// Application-level retry on top of the busy timeout
    pub retry: RetryPolicy,
}

impl Default for LedgerOptions {
    fn default() -> Self {
        Self {
            journal_mode: JournalMode::Wal,
            busy_timeout: Duration::from_secs(15),
            max_connections: 4,
            retry: RetryPolicy::default(),
        }
    }
}

/// SQLite ledger implementation.
#[derive(Debug, Clone)]
pub struct SqliteLedger {
    /// Database connection pool
    pool: SqlitePool,
    /// Database file, `None` when in memory
    path: Option<PathBuf>,
    retry: RetryPolicy,
}

impl SqliteLedger {
    /// Create (or resume) the ledger at `path` with one pending task per payload.
    ///
    /// Payloads get ids `0..n` in list order. Initializing over an existing
    /// ledger keeps its records as long as their payloads match.
    pub async fn initialize(path: &Path, payloads: &[Value], options: LedgerOptions) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let pool = Self::connect(path, true, &options).await?;
        prepare_schema(&pool).await?;

        let ledger = Self {
            pool,
            path: Some(path.to_path_buf()),
            retry: options.retry,
        };
        let existing = ledger.insert_payloads(payloads).await?;

        info!(
            "Initialized ledger {} with {} tasks ({} already present)",
            path.display(),
            payloads.len(),
            existing
        );
        Ok(ledger)
    }

    /// Attach to an existing ledger.
    pub async fn open(path: &Path, options: LedgerOptions) -> Result<Self> {
        if !path.exists() {
            return Err(StorageError::NotFound(format!("ledger {}", path.display())));
        }

        let pool = Self::connect(path, false, &options).await?;
        let version = user_version(&pool).await?;
        if version != SCHEMA_VERSION {
            return Err(StorageError::IncompatibleSchema {
                found: version,
                expected: SCHEMA_VERSION,
            });
        }

        debug!("Opened ledger {}", path.display());
        Ok(Self {
            pool,
            path: Some(path.to_path_buf()),
            retry: options.retry,
        })
    }

    /// Create an in-memory ledger for testing.
    pub async fn in_memory(payloads: &[Value]) -> Result<Self> {
        let options: SqliteConnectOptions = "sqlite::memory:".parse()?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        prepare_schema(&pool).await?;

        let ledger = Self {
            pool,
            path: None,
            retry: RetryPolicy::default(),
        };
        ledger.insert_payloads(payloads).await?;
        Ok(ledger)
    }

    async fn connect(path: &Path, create: bool, options: &LedgerOptions) -> Result<SqlitePool> {
        let connect = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(create)
            .journal_mode(options.journal_mode.into())
            .busy_timeout(options.busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(options.max_connections.max(1))
            .connect_with(connect)
            .await?;
        Ok(pool)
    }

    /// Insert missing payloads, returning how many were already present.
    async fn insert_payloads(&self, payloads: &[Value]) -> Result<usize> {
        let existing: Vec<(i64, String)> = sqlx::query_as("SELECT id, payload FROM tasks ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        for (id, stored) in &existing {
            let expected = usize::try_from(*id).ok().and_then(|i| payloads.get(i));
            let same = match expected {
                Some(payload) => serde_json::from_str::<Value>(stored)
                    .map(|v| &v == payload)
                    .unwrap_or(false),
                None => false,
            };
            if !same {
                return Err(StorageError::Mismatch { id: TaskId::new(*id) });
            }
        }

        let enqueued_at = format_time(&now());
        let mut tx = self.pool.begin().await?;
        for (i, payload) in payloads.iter().enumerate() {
            sqlx::query(INSERT_TASK)
                .bind(i as i64)
                .bind(serde_json::to_string(payload)?)
                .bind(&enqueued_at)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        Ok(existing.len())
    }

    /// Database file backing this ledger.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Write every finished task, ordered by completion, to a YAML file.
    ///
    /// The file is replaced atomically. Returns the number of records written.
    pub async fn export_results(&self, output: &Path) -> Result<usize> {
        let pool = &self.pool;
        let rows = self
            .retry
            .run("export", move || async move { sqlx::query(SELECT_FINISHED).fetch_all(pool).await })
            .await?;
        let tasks = rows.iter().map(decode_task).collect::<Result<Vec<_>>>()?;

        let yaml = serde_yaml::to_string(&tasks)?;
        let file_name = output
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "results.yaml".to_string());
        let tmp = output.with_file_name(format!(".{}.tmp-{}", file_name, std::process::id()));
        tokio::fs::write(&tmp, yaml.as_bytes()).await?;
        tokio::fs::rename(&tmp, output).await?;

        info!("Exported {} finished tasks to {}", tasks.len(), output.display());
        Ok(tasks.len())
    }

    /// Close the pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn finish(
        &self,
        id: TaskId,
        owner: &WorkerId,
        status: TaskStatus,
        result: Option<&str>,
        error: Option<&str>,
    ) -> Result<()> {
        let pool = &self.pool;
        let owner_str = owner.as_str();
        let status_str = status.as_str();

        let affected = self
            .retry
            .run("finish", move || async move {
                sqlx::query(FINISH_TASK)
                    .bind(status_str)
                    .bind(format_time(&now()))
                    .bind(result)
                    .bind(error)
                    .bind(id.get())
                    .bind(owner_str)
                    .execute(pool)
                    .await
                    .map(|r| r.rows_affected())
            })
            .await?;

        if affected == 1 {
            debug!("Task {} -> {} by {}", id, status, owner);
            return Ok(());
        }

        match self.get(id).await? {
            Some(task) => Err(StorageError::Ownership {
                id,
                owner: owner.clone(),
                status: task.status,
                holder: task.owner,
            }),
            None => Err(StorageError::NotFound(format!("task {}", id))),
        }
    }
}

#[async_trait]
impl Ledger for SqliteLedger {
    async fn claim_next(&self, owner: &WorkerId) -> Result<Option<Task>> {
        let pool = &self.pool;
        let owner_str = owner.as_str();

        let row = self
            .retry
            .run("claim", move || async move {
                sqlx::query(CLAIM_NEXT)
                    .bind(owner_str)
                    .bind(format_time(&now()))
                    .fetch_optional(pool)
                    .await
            })
            .await?;

        let task = row.as_ref().map(decode_task).transpose()?;
        if let Some(task) = &task {
            debug!("Task {} claimed by {}", task.id, owner);
        }
        Ok(task)
    }

    async fn complete(&self, id: TaskId, owner: &WorkerId, result: &Value) -> Result<()> {
        let encoded = serde_json::to_string(result)?;
        self.finish(id, owner, TaskStatus::Done, Some(&encoded), None).await
    }

    async fn fail(&self, id: TaskId, owner: &WorkerId, error: &str) -> Result<()> {
        self.finish(id, owner, TaskStatus::Failed, None, Some(error)).await
    }

    async fn summary(&self) -> Result<Summary> {
        let pool = &self.pool;
        let rows = self
            .retry
            .run("summary", move || async move { sqlx::query(SUMMARY_QUERY).fetch_all(pool).await })
            .await?;

        let mut summary = Summary::default();
        for row in rows {
            let status = decode_status(&row.try_get::<String, _>("status")?)?;
            let count: i64 = row.try_get("count")?;
            let first = decode_time(row.try_get("first")?)?;
            let last = decode_time(row.try_get("last")?)?;
            summary.insert(
                status,
                StatusStats {
                    count: count.max(0) as u64,
                    first,
                    last,
                },
            );
        }
        Ok(summary)
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>> {
        let pool = &self.pool;
        let row = self
            .retry
            .run("get", move || async move {
                sqlx::query(SELECT_TASK).bind(id.get()).fetch_optional(pool).await
            })
            .await?;
        row.as_ref().map(decode_task).transpose()
    }

    async fn list(&self, status: Option<TaskStatus>) -> Result<Vec<Task>> {
        let pool = &self.pool;
        let rows = self
            .retry
            .run("list", move || async move {
                match status {
                    Some(status) => {
                        sqlx::query(SELECT_BY_STATUS)
                            .bind(status.as_str())
                            .fetch_all(pool)
                            .await
                    }
                    None => sqlx::query(SELECT_ALL).fetch_all(pool).await,
                }
            })
            .await?;
        rows.iter().map(decode_task).collect()
    }

    async fn pending_count(&self) -> Result<u64> {
        let pool = &self.pool;
        let count: i64 = self
            .retry
            .run("pending_count", move || async move {
                sqlx::query_scalar("SELECT COUNT(*) FROM tasks WHERE status = 'pending'")
                    .fetch_one(pool)
                    .await
            })
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn requeue(&self, statuses: &[TaskStatus]) -> Result<u64> {
        let pool = &self.pool;
        let total = self
            .retry
            .run("requeue", move || async move {
                let mut tx = pool.begin().await?;
                let mut total = 0;
                for status in statuses.iter().filter(|s| **s != TaskStatus::Pending) {
                    total += sqlx::query(REQUEUE)
                        .bind(status.as_str())
                        .execute(&mut *tx)
                        .await?
                        .rows_affected();
                }
                tx.commit().await?;
                Ok::<u64, sqlx::Error>(total)
            })
            .await?;

        info!("Requeued {} tasks", total);
        Ok(total)
    }
}

async fn user_version(pool: &SqlitePool) -> Result<i64> {
    let version: i64 = sqlx::query_scalar("PRAGMA user_version").fetch_one(pool).await?;
    Ok(version)
}

/// Create the schema on a fresh file, or verify the version of an existing one.
async fn prepare_schema(pool: &SqlitePool) -> Result<()> {
    let version = user_version(pool).await?;
    if version == SCHEMA_VERSION {
        return Ok(());
    }
    if version != 0 {
        return Err(StorageError::IncompatibleSchema {
            found: version,
            expected: SCHEMA_VERSION,
        });
    }

    // Unversioned file that already has a tasks table was not written by us.
    let foreign: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'tasks'")
            .fetch_one(pool)
            .await?;
    if foreign > 0 {
        return Err(StorageError::IncompatibleSchema {
            found: 0,
            expected: SCHEMA_VERSION,
        });
    }

    let set_version = format!("PRAGMA user_version = {}", SCHEMA_VERSION);
    let mut tx = pool.begin().await?;
    sqlx::query(CREATE_TASKS).execute(&mut *tx).await?;
    sqlx::query(CREATE_STATUS_INDEX).execute(&mut *tx).await?;
    sqlx::query(&set_version).execute(&mut *tx).await?;
    tx.commit().await?;
    Ok(())
}

fn decode_status(raw: &str) -> Result<TaskStatus> {
    raw.parse()
        .map_err(|e: gridq_core::ParseStatusError| StorageError::Corrupt(e.to_string()))
}

fn decode_time(raw: Option<String>) -> Result<Option<Time>> {
    match raw {
        Some(s) => parse_time(&s)
            .map(Some)
            .ok_or_else(|| StorageError::Corrupt(format!("bad timestamp `{}`", s))),
        None => Ok(None),
    }
}

fn decode_task(row: &SqliteRow) -> Result<Task> {
    let id: i64 = row.try_get("id")?;
    let payload: String = row.try_get("payload")?;
    let status: String = row.try_get("status")?;
    let owner: Option<String> = row.try_get("owner")?;
    let result: Option<String> = row.try_get("result")?;

    Ok(Task {
        id: TaskId::new(id),
        payload: serde_json::from_str(&payload)?,
        status: decode_status(&status)?,
        owner: owner.map(WorkerId::from),
        ts_enqueued: decode_time(row.try_get("ts_enqueued")?)?
            .ok_or_else(|| StorageError::Corrupt(format!("task {} has no enqueue time", id)))?,
        ts_claimed: decode_time(row.try_get("ts_claimed")?)?,
        ts_finished: decode_time(row.try_get("ts_finished")?)?,
        result: result.map(|r| serde_json::from_str(&r)).transpose()?,
        error: row.try_get("error")?,
    })
}
