//! Execution layer for gridq.
//!
//! Task bodies, the pull-based worker loop, the local dispatcher and the run
//! directory that ties a ledger to the configuration its workers need.

#![warn(missing_docs)]

pub mod body;
pub mod error;
pub mod worker;
pub mod dispatcher;
pub mod run;

pub use body::{CommandBody, FnBody, TaskBody, CONFIG_ENV};
pub use error::{Result, WorkerError};
pub use worker::{Worker, WorkerReport, WorkerState};
pub use dispatcher::{run_local, DispatchReport, LocalDispatcher};
pub use run::{RunDir, RunManifest};
