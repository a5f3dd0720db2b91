//! Run directory and run manifest.
//!
//! A run directory holds the ledger, the manifest describing how to execute
//! its tasks, and the scheduler log directories. Anything that can see the
//! directory (a local worker process, a cluster array element) can rebuild
//! its worker from it.

use gridq_core::{load_tasks, now, validate_key_path, Time, WorkerId};
use gridq_storage::{ledger_path, JournalMode, LedgerOptions, SqliteLedger};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::body::CommandBody;
use crate::error::{Result, WorkerError};
use crate::worker::{Worker, WorkerReport};

/// Manifest file name inside a run directory.
pub const MANIFEST_FILE: &str = "run.yaml";

/// Everything a worker needs besides the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    /// Fully resolved base configuration
    pub base: Value,
    /// Dot path each task payload is written to
    pub key_path: String,
    /// Program and arguments run per task
    pub command: Vec<String>,
    /// Directory the command runs from
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Ledger journal mode
    #[serde(default)]
    pub journal_mode: JournalMode,
    /// When the run was prepared
    pub created_at: Time,
}

impl RunManifest {
    /// Create a manifest.
    pub fn new(base: Value, key_path: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            base,
            key_path: key_path.into(),
            command,
            working_dir: None,
            journal_mode: JournalMode::default(),
            created_at: now(),
        }
    }

    /// Body that runs this manifest's command.
    pub fn body(&self) -> CommandBody {
        let body = CommandBody::new(self.command.clone());
        match &self.working_dir {
            Some(dir) => body.with_working_dir(dir),
            None => body,
        }
    }

    /// Ledger options matching this run.
    pub fn ledger_options(&self) -> LedgerOptions {
        LedgerOptions {
            journal_mode: self.journal_mode,
            ..LedgerOptions::default()
        }
    }
}

/// A run directory on (possibly shared) disk.
#[derive(Debug, Clone)]
pub struct RunDir {
    root: PathBuf,
}

impl RunDir {
    /// Wrap a directory path. Nothing is created yet.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Ledger database path.
    pub fn ledger_path(&self) -> PathBuf {
        ledger_path(&self.root)
    }

    /// Manifest path.
    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    /// Write the manifest, replacing any previous one atomically.
    pub async fn write_manifest(&self, manifest: &RunManifest) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        let yaml = serde_yaml::to_string(manifest)?;
        let tmp = self.root.join(format!(".{}.tmp-{}", MANIFEST_FILE, std::process::id()));
        tokio::fs::write(&tmp, yaml.as_bytes()).await?;
        tokio::fs::rename(&tmp, self.manifest_path()).await?;
        Ok(())
    }

    /// Read the manifest.
    pub async fn read_manifest(&self) -> Result<RunManifest> {
        let path = self.manifest_path();
        if !path.exists() {
            return Err(WorkerError::MissingManifest(path));
        }
        let text = tokio::fs::read_to_string(&path).await?;
        Ok(serde_yaml::from_str(&text)?)
    }

    /// Validate the key path, write the manifest and create (or resume) the ledger.
    ///
    /// The key path is checked before anything touches disk.
    pub async fn prepare(&self, manifest: &RunManifest, payloads: &[Value]) -> Result<SqliteLedger> {
        validate_key_path(&manifest.base, &manifest.key_path)?;
        if manifest.command.is_empty() {
            return Err(WorkerError::EmptyCommand);
        }

        self.write_manifest(manifest).await?;
        let ledger =
            SqliteLedger::initialize(&self.ledger_path(), payloads, manifest.ledger_options()).await?;

        info!(
            "Prepared run {} ({} tasks into `{}`)",
            self.root.display(),
            payloads.len(),
            manifest.key_path
        );
        Ok(ledger)
    }

    /// Same as [`RunDir::prepare`], reading payloads from a task source file.
    pub async fn prepare_from_file(&self, manifest: &RunManifest, tasks: &Path) -> Result<SqliteLedger> {
        let payloads = load_tasks(tasks)?;
        self.prepare(manifest, &payloads).await
    }

    /// Run one worker against this directory's ledger until it drains.
    pub async fn run_worker(&self, id: WorkerId) -> Result<WorkerReport> {
        let manifest = self.read_manifest().await?;
        let ledger = SqliteLedger::open(&self.ledger_path(), manifest.ledger_options()).await?;

        let mut worker = Worker::new(
            id,
            Arc::new(ledger.clone()),
            Arc::new(manifest.base.clone()),
            manifest.key_path.clone(),
            Arc::new(manifest.body()),
        );
        let report = worker.run().await;
        ledger.close().await;
        report
    }
}
