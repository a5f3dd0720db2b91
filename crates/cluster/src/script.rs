//! Job-array script rendering.
//!
//! Rendering is pure: the same config and entrypoint always give the same
//! script, and nothing touches disk until submission.

use std::collections::HashSet;
use std::path::PathBuf;

use crate::config::{BindMount, ClusterConfig, Containerization};
use crate::error::{ClusterError, Result};
use crate::scheduler::SchedulerKind;

/// What each array element runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entrypoint {
    /// `gridq` binary as seen from the compute node (or container)
    pub worker_exe: PathBuf,
    /// Absolute run directory on the shared filesystem
    pub run_dir: PathBuf,
    /// Directory task commands run from, mounted into containers
    pub working_dir: Option<PathBuf>,
}

/// Quote a word for bash unless it is plainly safe.
fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-+=/.,:@%".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

fn worker_args(kind: SchedulerKind, entry: &Entrypoint) -> String {
    format!(
        "worker --run-dir {} --array-index \"${{{}:-0}}\"",
        shell_quote(&entry.run_dir.to_string_lossy()),
        kind.array_index_var()
    )
}

/// Run directory and working directory first, then configured mounts,
/// without duplicates.
fn all_mounts(config: &ClusterConfig, entry: &Entrypoint) -> Result<Vec<BindMount>> {
    let mut seen = HashSet::new();
    let mut mounts = Vec::new();
    let own = std::iter::once(&entry.run_dir)
        .chain(entry.working_dir.as_ref())
        .map(|dir| BindMount::same(dir.to_string_lossy()));
    for mount in own.chain(config.mounts()?) {
        if seen.insert(mount.clone()) {
            mounts.push(mount);
        }
    }
    Ok(mounts)
}

fn mount_flags(runtime: Containerization, mounts: &[BindMount]) -> String {
    let flag = match runtime {
        Containerization::Singularity => "--bind",
        Containerization::Docker => "-v",
    };
    mounts
        .iter()
        .map(|m| format!("{} {}", flag, shell_quote(&m.as_arg())))
        .collect::<Vec<_>>()
        .join(" ")
}

fn runtime_prefix(runtime: Containerization) -> &'static str {
    match runtime {
        Containerization::Singularity => "singularity exec",
        Containerization::Docker => "docker run --rm",
    }
}

/// Render the submission script for `kind`.
///
/// Layout: shebang, the caller's directive lines, the array directive (unless
/// the caller declared one), log directives, the caller's remaining startup
/// lines, then the worker invocation.
pub fn render_script(kind: SchedulerKind, config: &ClusterConfig, entry: &Entrypoint) -> Result<String> {
    let prefix = kind.directive_prefix();
    let (directives, commands): (Vec<&String>, Vec<&String>) = config
        .startup_lines
        .iter()
        .filter(|l| !l.starts_with("#!"))
        .partition(|l| l.trim_start().starts_with(prefix));

    let mut lines = vec!["#!/bin/bash".to_string()];
    lines.extend(directives.iter().map(|l| l.to_string()));

    if !directives.iter().any(|l| kind.is_array_directive(l)) {
        lines.extend(kind.array_directive(config.array_parallelism, config.array_limit));
    }

    if config.configure_logging {
        lines.extend(kind.log_directives(&entry.run_dir.join(kind.log_dir_name())));
    }

    if !commands.is_empty() {
        lines.push(String::new());
        lines.extend(commands.iter().map(|l| l.to_string()));
    }
    lines.push(String::new());

    let exe = shell_quote(&entry.worker_exe.to_string_lossy());
    let args = worker_args(kind, entry);

    match config.containerization {
        None => lines.push(format!("{} {}", exe, args)),
        Some(runtime) => {
            let image = config
                .container_image
                .as_deref()
                .ok_or_else(|| ClusterError::Config("containerization requires container_image".into()))?;
            let mounts = all_mounts(config, entry)?;
            let flags = mount_flags(runtime, &mounts);

            match kind {
                SchedulerKind::Slurm => {
                    lines.push(format!("GRIDQ_IMAGE={}", shell_quote(image)));
                    lines.push(format!("GRIDQ_MOUNTS=({})", flags));
                    lines.push(format!(
                        "{} \"${{GRIDQ_MOUNTS[@]}}\" \"$GRIDQ_IMAGE\" {} {}",
                        runtime_prefix(runtime),
                        exe,
                        args
                    ));
                }
                SchedulerKind::Pbs => {
                    lines.push(format!(
                        "GRIDQ_WORKER=({} {} {} {})",
                        runtime_prefix(runtime),
                        flags,
                        shell_quote(image),
                        exe
                    ));
                    lines.push(format!("\"${{GRIDQ_WORKER[@]}}\" {}", args));
                }
            }
        }
    }

    let mut script = lines.join("\n");
    script.push('\n');
    Ok(script)
}
