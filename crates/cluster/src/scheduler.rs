//! Per-scheduler tables.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::LazyLock;

static SBATCH_JOB_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Submitted batch job (\S+)").expect("valid regex"));

/// Supported batch schedulers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerKind {
    /// SLURM (`sbatch`)
    Slurm,
    /// PBS Pro / OpenPBS (`qsub`)
    Pbs,
}

impl SchedulerKind {
    /// Lowercase scheduler name.
    pub fn name(self) -> &'static str {
        match self {
            SchedulerKind::Slurm => "slurm",
            SchedulerKind::Pbs => "pbs",
        }
    }

    /// Prefix of a directive line.
    pub fn directive_prefix(self) -> &'static str {
        match self {
            SchedulerKind::Slurm => "#SBATCH",
            SchedulerKind::Pbs => "#PBS",
        }
    }

    /// Environment variable carrying the array index inside an element.
    pub fn array_index_var(self) -> &'static str {
        match self {
            SchedulerKind::Slurm => "SLURM_ARRAY_TASK_ID",
            SchedulerKind::Pbs => "PBS_ARRAY_INDEX",
        }
    }

    /// Default submission program.
    pub fn submit_command(self) -> &'static str {
        match self {
            SchedulerKind::Slurm => "sbatch",
            SchedulerKind::Pbs => "qsub",
        }
    }

    /// Extension of generated scripts.
    pub fn script_extension(self) -> &'static str {
        self.name()
    }

    /// Log directory name inside the run directory.
    pub fn log_dir_name(self) -> &'static str {
        match self {
            SchedulerKind::Slurm => "slurm_logs",
            SchedulerKind::Pbs => "pbs_logs",
        }
    }

    /// Whether a user-supplied line already declares a job array.
    pub fn is_array_directive(self, line: &str) -> bool {
        let line = line.trim();
        let Some(rest) = line.strip_prefix(self.directive_prefix()) else {
            return false;
        };
        let mut options = rest.split_whitespace();
        match self {
            SchedulerKind::Slurm => options.any(|o| o == "-a" || o.starts_with("--array")),
            SchedulerKind::Pbs => options.any(|o| o == "-J" || o == "-t" || o.starts_with("-J")),
        }
    }

    /// Array directive for `elements` array elements.
    ///
    /// PBS has no running-element limit, so `limit` only applies to SLURM.
    /// PBS rejects single-element arrays; `None` means no directive is needed.
    pub fn array_directive(self, elements: u32, limit: Option<u32>) -> Option<String> {
        let last = elements.saturating_sub(1);
        match self {
            SchedulerKind::Slurm => Some(match limit {
                Some(limit) => format!("#SBATCH --array=0-{}%{}", last, limit),
                None => format!("#SBATCH --array=0-{}", last),
            }),
            SchedulerKind::Pbs if elements > 1 => Some(format!("#PBS -J 0-{}", last)),
            SchedulerKind::Pbs => None,
        }
    }

    /// Stdout/stderr directives into `log_dir`.
    pub fn log_directives(self, log_dir: &Path) -> Vec<String> {
        let dir = log_dir.display();
        match self {
            SchedulerKind::Slurm => vec![
                format!("#SBATCH --output={}/slurm_%A_%a.out", dir),
                format!("#SBATCH --error={}/slurm_%A_%a.err", dir),
            ],
            SchedulerKind::Pbs => vec![
                format!("#PBS -o {}/pbs.out", dir),
                format!("#PBS -e {}/pbs.err", dir),
            ],
        }
    }

    /// Extract the job id from the submit command's stdout.
    ///
    /// `sbatch` prints `Submitted batch job <id>` (or `<id>;<cluster>` with
    /// `--parsable`); `qsub` prints the id alone.
    pub fn parse_job_id(self, stdout: &str) -> Option<String> {
        let stdout = stdout.trim();
        if self == SchedulerKind::Slurm {
            if let Some(caps) = SBATCH_JOB_RE.captures(stdout) {
                return Some(caps[1].to_string());
            }
        }
        stdout
            .split_whitespace()
            .next()
            .and_then(|token| token.split(';').next())
            .filter(|id| !id.is_empty())
            .map(str::to_string)
    }
}

impl std::fmt::Display for SchedulerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_user_array_directives() {
        let slurm = SchedulerKind::Slurm;
        assert!(slurm.is_array_directive("#SBATCH --array=0-9"));
        assert!(slurm.is_array_directive("  #SBATCH -a 0-3"));
        assert!(!slurm.is_array_directive("#SBATCH --time=1:00:00"));
        assert!(!slurm.is_array_directive("#PBS -J 0-9"));

        let pbs = SchedulerKind::Pbs;
        assert!(pbs.is_array_directive("#PBS -J 0-9"));
        assert!(pbs.is_array_directive("#PBS -J0-9"));
        assert!(!pbs.is_array_directive("#PBS -l walltime=1:00:00"));
    }

    #[test]
    fn test_array_directives() {
        assert_eq!(
            SchedulerKind::Slurm.array_directive(4, None).as_deref(),
            Some("#SBATCH --array=0-3")
        );
        assert_eq!(
            SchedulerKind::Slurm.array_directive(10, Some(2)).as_deref(),
            Some("#SBATCH --array=0-9%2")
        );
        assert_eq!(
            SchedulerKind::Pbs.array_directive(4, Some(2)).as_deref(),
            Some("#PBS -J 0-3")
        );
        assert_eq!(SchedulerKind::Pbs.array_directive(1, None), None);
    }

    #[test]
    fn test_parse_job_ids() {
        let slurm = SchedulerKind::Slurm;
        assert_eq!(slurm.parse_job_id("Submitted batch job 4242\n").as_deref(), Some("4242"));
        assert_eq!(slurm.parse_job_id("4242;cluster1").as_deref(), Some("4242"));
        assert_eq!(slurm.parse_job_id("  "), None);
        assert_eq!(
            slurm.parse_job_id("sbatch: note: defaults applied\nSubmitted batch job 77 on cluster gpu\n").as_deref(),
            Some("77")
        );

        let pbs = SchedulerKind::Pbs;
        assert_eq!(pbs.parse_job_id("1234[].pbsserver\n").as_deref(), Some("1234[].pbsserver"));
    }
}
