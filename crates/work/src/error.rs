//! Worker and dispatcher errors.

use gridq_core::{ConfigError, SourceError};
use gridq_storage::StorageError;

/// Result alias for the execution layer.
pub type Result<T> = std::result::Result<T, WorkerError>;

/// Errors that stop a worker or a dispatch.
///
/// Task body failures are not here: they are recorded on the task and the
/// worker moves on.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// Ledger unreachable, corrupt, contended or ownership violated
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Key path does not resolve in the base configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Task source could not be read
    #[error(transparent)]
    Source(#[from] SourceError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Run manifest could not be read or written
    #[error("run manifest error: {0}")]
    Manifest(#[from] serde_yaml::Error),

    /// Run directory has no manifest
    #[error("no run manifest at {0}")]
    MissingManifest(std::path::PathBuf),

    /// Nothing to execute
    #[error("task command is empty")]
    EmptyCommand,
}
