//! Submission to a batch scheduler.

use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{info, warn};
use ulid::Ulid;

use crate::config::ClusterConfig;
use crate::error::{ClusterError, Result};
use crate::scheduler::SchedulerKind;
use crate::script::{render_script, Entrypoint};

/// A submitted job array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobHandle {
    /// Scheduler that accepted the job
    pub kind: SchedulerKind,
    /// Scheduler job id
    pub job_id: String,
    /// Script that was submitted
    pub script: PathBuf,
}

/// A scheduler bound to one run directory.
#[derive(Debug, Clone)]
pub struct ClusterBackend {
    kind: SchedulerKind,
    config: ClusterConfig,
    run_dir: PathBuf,
    working_dir: Option<PathBuf>,
}

impl ClusterBackend {
    /// Create a backend. A relative run directory is resolved against the
    /// current directory, since array elements start elsewhere.
    pub fn new(kind: SchedulerKind, config: ClusterConfig, run_dir: &Path) -> Result<Self> {
        config.validate()?;
        if kind == SchedulerKind::Pbs && config.array_limit.is_some() {
            warn!("array_limit is not supported by PBS and will be ignored");
        }

        let run_dir = if run_dir.is_absolute() {
            run_dir.to_path_buf()
        } else {
            std::env::current_dir()?.join(run_dir)
        };

        Ok(Self {
            kind,
            config,
            run_dir,
            working_dir: None,
        })
    }

    /// Directory the task commands run from. Containerized elements get it
    /// bind-mounted at the same path.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Load the config from a YAML file.
    pub fn from_file(kind: SchedulerKind, config_path: &Path, run_dir: &Path) -> Result<Self> {
        Self::new(kind, ClusterConfig::load(config_path)?, run_dir)
    }

    /// Scheduler kind.
    pub fn kind(&self) -> SchedulerKind {
        self.kind
    }

    /// Backend configuration.
    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Directory for scripts and scheduler logs.
    pub fn log_dir(&self) -> PathBuf {
        self.run_dir.join(self.kind.log_dir_name())
    }

    /// What each array element runs: the configured worker executable, or
    /// this binary.
    pub fn entrypoint(&self) -> Result<Entrypoint> {
        let worker_exe = match &self.config.worker_exe {
            Some(exe) => exe.clone(),
            None => std::env::current_exe()?,
        };
        Ok(Entrypoint {
            worker_exe,
            run_dir: self.run_dir.clone(),
            working_dir: self.working_dir.clone(),
        })
    }

    /// Render the submission script.
    pub fn render(&self) -> Result<String> {
        render_script(self.kind, &self.config, &self.entrypoint()?)
    }

    /// Write `script` into the log directory and submit it.
    ///
    /// On rejection the script stays on disk and its path is in the error.
    pub async fn submit(&self, script: &str) -> Result<JobHandle> {
        let log_dir = self.log_dir();
        tokio::fs::create_dir_all(&log_dir).await?;

        let path = log_dir.join(format!("job_{}.{}", Ulid::new(), self.kind.script_extension()));
        tokio::fs::write(&path, script).await?;

        let (program, extra_args) = self.submit_program();
        let output = Command::new(&program)
            .args(&extra_args)
            .arg(&path)
            .current_dir(&self.run_dir)
            .output()
            .await
            .map_err(|e| ClusterError::Submission {
                script: path.clone(),
                status: "not started".to_string(),
                stderr: format!("failed to run `{}`: {}", program, e),
            })?;

        if !output.status.success() {
            return Err(ClusterError::Submission {
                script: path,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let job_id = self
            .kind
            .parse_job_id(&stdout)
            .ok_or_else(|| ClusterError::MissingJobId {
                script: path.clone(),
                stdout: stdout.clone(),
            })?;

        info!(
            "Submitted {} job {} ({} elements) from {}",
            self.kind,
            job_id,
            self.config.array_parallelism,
            path.display()
        );
        Ok(JobHandle {
            kind: self.kind,
            job_id,
            script: path,
        })
    }

    /// Render and submit in one step.
    pub async fn submit_run(&self) -> Result<JobHandle> {
        let script = self.render()?;
        self.submit(&script).await
    }

    fn submit_program(&self) -> (String, Vec<String>) {
        if let Some(custom) = &self.config.submit_command {
            let mut words = custom.split_whitespace().map(str::to_string);
            if let Some(program) = words.next() {
                return (program, words.collect());
            }
        }
        (self.kind.submit_command().to_string(), Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(kind: SchedulerKind, submit: &str, run_dir: &Path) -> ClusterBackend {
        let config = ClusterConfig {
            worker_exe: Some(PathBuf::from("/usr/local/bin/gridq")),
            submit_command: Some(submit.to_string()),
            array_parallelism: 2,
            ..Default::default()
        };
        ClusterBackend::new(kind, config, run_dir).unwrap()
    }

    #[tokio::test]
    async fn test_submit_parses_slurm_job_id() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(SchedulerKind::Slurm, "echo Submitted batch job 4242", dir.path());

        let handle = backend.submit_run().await.unwrap();
        assert_eq!(handle.job_id, "4242");
        assert_eq!(handle.kind, SchedulerKind::Slurm);
        assert!(handle.script.starts_with(dir.path().join("slurm_logs")));
        assert_eq!(handle.script.extension().unwrap(), "slurm");

        let written = std::fs::read_to_string(&handle.script).unwrap();
        assert!(written.contains("#SBATCH --array=0-1"));
        assert!(written.contains("/usr/local/bin/gridq worker"));
    }

    #[tokio::test]
    async fn test_submit_parses_pbs_job_id() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(SchedulerKind::Pbs, "echo 981[].pbs01", dir.path());

        let handle = backend.submit_run().await.unwrap();
        assert_eq!(handle.job_id, "981[].pbs01");
        assert!(handle.script.starts_with(dir.path().join("pbs_logs")));
    }

    #[tokio::test]
    async fn test_rejected_submission_keeps_script() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(SchedulerKind::Slurm, "false", dir.path());

        match backend.submit_run().await {
            Err(ClusterError::Submission { script, .. }) => assert!(script.exists()),
            other => panic!("expected submission error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_output_has_no_job_id() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(SchedulerKind::Pbs, "true", dir.path());
        assert!(matches!(
            backend.submit_run().await,
            Err(ClusterError::MissingJobId { .. })
        ));
    }

    #[test]
    fn test_working_dir_reaches_container_mounts() {
        let config = ClusterConfig {
            worker_exe: Some(PathBuf::from("/usr/local/bin/gridq")),
            containerization: Some(crate::config::Containerization::Docker),
            container_image: Some("lab/app".into()),
            ..Default::default()
        };
        let backend = ClusterBackend::new(SchedulerKind::Pbs, config, Path::new("/shared/runs/a"))
            .unwrap()
            .with_working_dir("/shared/work");

        assert_eq!(backend.entrypoint().unwrap().working_dir, Some(PathBuf::from("/shared/work")));
        assert!(backend.render().unwrap().contains("-v /shared/work:/shared/work"));
    }

    #[test]
    fn test_relative_run_dir_becomes_absolute() {
        let backend = ClusterBackend::new(SchedulerKind::Slurm, ClusterConfig::default(), Path::new("runs/a")).unwrap();
        assert!(backend.log_dir().is_absolute());
        assert!(backend.log_dir().ends_with("runs/a/slurm_logs"));
    }
}
