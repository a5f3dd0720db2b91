//! Cluster configuration file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ClusterError, Result};

/// Container runtime used to run each array element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Containerization {
    /// `singularity exec --bind host:container IMAGE …`
    Singularity,
    /// `docker run --rm -v host:container IMAGE …`
    Docker,
}

/// A `host:container` bind mount. A bare path mounts at the same location.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BindMount {
    /// Path on the compute node
    pub host: String,
    /// Path inside the container
    pub container: String,
}

impl BindMount {
    /// Mount a path at the same location inside the container.
    pub fn same(path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            host: path.clone(),
            container: path,
        }
    }

    /// `host:container`
    pub fn as_arg(&self) -> String {
        format!("{}:{}", self.host, self.container)
    }
}

impl std::str::FromStr for BindMount {
    type Err = ClusterError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || ClusterError::Config(format!("bind mount `{}` is not `host:container`", s));
        match s.split_once(':') {
            None if !s.is_empty() => Ok(Self::same(s)),
            Some((host, container)) if !host.is_empty() && !container.is_empty() && !container.contains(':') => {
                Ok(Self {
                    host: host.to_string(),
                    container: container.to_string(),
                })
            }
            _ => Err(invalid()),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_parallelism() -> u32 {
    1
}

/// Settings for one scheduler submission, loaded from YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterConfig {
    /// Lines placed at the top of the script (directives, module loads, …)
    #[serde(default)]
    pub startup_lines: Vec<String>,

    /// Redirect scheduler stdout/stderr into the run's log directory
    #[serde(default = "default_true")]
    pub configure_logging: bool,

    /// Run the worker inside a container
    #[serde(default)]
    pub containerization: Option<Containerization>,

    /// Image for `containerization`
    #[serde(default)]
    pub container_image: Option<String>,

    /// Extra `host:container` mounts; the run directory is always mounted
    #[serde(default)]
    pub bind_mounts: Vec<String>,

    /// Number of array elements
    #[serde(default = "default_parallelism")]
    pub array_parallelism: u32,

    /// Maximum elements running at once (SLURM only)
    #[serde(default)]
    pub array_limit: Option<u32>,

    /// Program invoked by each array element; defaults to the running binary
    #[serde(default)]
    pub worker_exe: Option<PathBuf>,

    /// Replaces `sbatch` / `qsub`. Split on whitespace with no shell
    /// quoting, so quotes are rejected; wrap anything fancier in a script.
    #[serde(default)]
    pub submit_command: Option<String>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            startup_lines: Vec::new(),
            configure_logging: true,
            containerization: None,
            container_image: None,
            bind_mounts: Vec::new(),
            array_parallelism: 1,
            array_limit: None,
            worker_exe: None,
            submit_command: None,
        }
    }
}

impl ClusterConfig {
    /// Load and validate a YAML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: ClusterConfig = serde_yaml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check field combinations serde cannot.
    pub fn validate(&self) -> Result<()> {
        if self.array_parallelism == 0 {
            return Err(ClusterError::Config("array_parallelism must be at least 1".into()));
        }
        if self.array_limit == Some(0) {
            return Err(ClusterError::Config("array_limit must be at least 1".into()));
        }
        if let Some(runtime) = self.containerization {
            match self.container_image.as_deref() {
                Some(image) if !image.trim().is_empty() => {}
                _ => {
                    return Err(ClusterError::Config(format!(
                        "containerization {:?} requires container_image",
                        runtime
                    )))
                }
            }
        }
        if let Some(cmd) = &self.submit_command {
            if cmd.trim().is_empty() {
                return Err(ClusterError::Config("submit_command is empty".into()));
            }
            if cmd.contains(['"', '\'']) {
                return Err(ClusterError::Config(format!(
                    "submit_command `{}` cannot contain quotes",
                    cmd
                )));
            }
        }
        self.mounts().map(|_| ())
    }

    /// Parsed bind mounts.
    pub fn mounts(&self) -> Result<Vec<BindMount>> {
        self.bind_mounts.iter().map(|m| m.parse()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_minimal_yaml() {
        let config: ClusterConfig = serde_yaml::from_str("startup_lines: ['#SBATCH -p short']").unwrap();
        assert!(config.configure_logging);
        assert_eq!(config.array_parallelism, 1);
        assert_eq!(config.containerization, None);
        config.validate().unwrap();
    }

    #[test]
    fn test_load_full_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slurm.yaml");
        std::fs::write(
            &path,
            "startup_lines:\n  - '#SBATCH --time=01:00:00'\n  - module load gcc\n\
             configure_logging: false\ncontainerization: singularity\n\
             container_image: /images/app.sif\nbind_mounts: ['/data:/mnt/data', /scratch]\n\
             array_parallelism: 8\narray_limit: 2\n",
        )
        .unwrap();

        let config = ClusterConfig::load(&path).unwrap();
        assert_eq!(config.containerization, Some(Containerization::Singularity));
        assert_eq!(config.array_limit, Some(2));
        assert_eq!(
            config.mounts().unwrap(),
            vec![
                BindMount {
                    host: "/data".into(),
                    container: "/mnt/data".into()
                },
                BindMount::same("/scratch"),
            ]
        );
    }

    #[test]
    fn test_container_requires_image() {
        let config = ClusterConfig {
            containerization: Some(Containerization::Docker),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ClusterError::Config(_))));
    }

    #[test]
    fn test_rejects_bad_values() {
        for config in [
            ClusterConfig {
                array_parallelism: 0,
                ..Default::default()
            },
            ClusterConfig {
                bind_mounts: vec!["a:b:c".into()],
                ..Default::default()
            },
            ClusterConfig {
                bind_mounts: vec![":/x".into()],
                ..Default::default()
            },
            ClusterConfig {
                submit_command: Some("sbatch --comment 'two words'".into()),
                ..Default::default()
            },
        ] {
            assert!(matches!(config.validate(), Err(ClusterError::Config(_))));
        }
    }

    #[test]
    fn test_plain_submit_command_is_accepted() {
        let config = ClusterConfig {
            submit_command: Some("sbatch --parsable -p short".into()),
            ..Default::default()
        };
        config.validate().unwrap();
    }

    #[test]
    fn test_unknown_field_is_an_error() {
        let result: std::result::Result<ClusterConfig, _> = serde_yaml::from_str("array_paralelism: 4");
        assert!(result.is_err());
    }
}
