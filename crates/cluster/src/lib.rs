//! Batch-scheduler backend for gridq.
//!
//! Renders a job-array script whose elements each run one `gridq worker`
//! against a shared run directory, and submits it to SLURM or PBS. The two
//! schedulers differ only in the table held by [`SchedulerKind`].

#![warn(missing_docs)]

pub mod error;
pub mod config;
pub mod scheduler;
pub mod script;
pub mod backend;

pub use error::{ClusterError, Result};
pub use config::{BindMount, ClusterConfig, Containerization};
pub use scheduler::SchedulerKind;
pub use script::{render_script, Entrypoint};
pub use backend::{ClusterBackend, JobHandle};
