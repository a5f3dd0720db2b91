//! Cluster backend errors.

use std::path::PathBuf;

/// Result alias for the cluster backend.
pub type Result<T> = std::result::Result<T, ClusterError>;

/// Errors raised while configuring, rendering or submitting a job array.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    /// Invalid cluster configuration
    #[error("invalid cluster config: {0}")]
    Config(String),

    /// The scheduler rejected the script; it stays on disk for resubmission
    #[error("submission of {} failed ({status}): {stderr}", script.display())]
    Submission {
        /// Script left on disk
        script: PathBuf,
        /// Exit status of the submit command
        status: String,
        /// Captured stderr
        stderr: String,
    },

    /// The scheduler accepted the script but printed no job id
    #[error("no job id in scheduler output for {}: {stdout:?}", script.display())]
    MissingJobId {
        /// Script submitted
        script: PathBuf,
        /// Captured stdout
        stdout: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Cluster config file could not be parsed
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
