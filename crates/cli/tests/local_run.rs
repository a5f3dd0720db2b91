//! End-to-end runs of the `gridq` binary with local worker processes.

use std::path::Path;
use std::process::{Command, Output};

fn gridq(cwd: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_gridq"))
        .args(args)
        .current_dir(cwd)
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

/// Count for `status` in a printed summary table.
fn count(stdout: &[u8], status: &str) -> u64 {
    String::from_utf8_lossy(stdout)
        .lines()
        .find_map(|line| {
            let mut cols = line.split_whitespace();
            (cols.next() == Some(status)).then(|| cols.next()).flatten()
        })
        .and_then(|n| n.parse().ok())
        .unwrap_or_else(|| panic!("no `{}` row in:\n{}", status, String::from_utf8_lossy(stdout)))
}

fn write_inputs(dir: &Path, tasks: usize) {
    std::fs::write(dir.join("base.yaml"), "model:\n  lr: 0.0\n").unwrap();
    let lines: Vec<String> = (1..=tasks).map(|i| format!("0.{}", i)).collect();
    std::fs::write(dir.join("tasks.txt"), lines.join("\n")).unwrap();
}

#[test]
fn test_worker_processes_drain_task_file() {
    let dir = tempfile::tempdir().unwrap();
    write_inputs(dir.path(), 5);

    let out = gridq(
        dir.path(),
        &[
            "run", "--config", "base.yaml", "--tasks", "tasks.txt", "--task_to", "model.lr",
            "--n_jobs", "2", "--", "sh", "-c", "cat \"$GRIDQ_CONFIG\"",
        ],
    );
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(count(&out.stdout, "done"), 5);
    assert_eq!(count(&out.stdout, "total"), 5);
    assert!(dir.path().join(".gridq/run.yaml").exists());

    let status = gridq(dir.path(), &["status"]);
    assert!(status.status.success());
    assert_eq!(count(&status.stdout, "done"), 5);
    assert_eq!(count(&status.stdout, "pending"), 0);

    let results = gridq(dir.path(), &["results"]);
    assert!(results.status.success());
    let exported = std::fs::read_to_string(dir.path().join(".gridq/results.yaml")).unwrap();
    assert!(exported.contains("lr: 0.3"));
}

#[test]
fn test_killed_worker_leaves_task_running() {
    let dir = tempfile::tempdir().unwrap();
    write_inputs(dir.path(), 3);

    // The task command kills the worker process that started it.
    let out = gridq(
        dir.path(),
        &[
            "run", "--config", "base.yaml", "--tasks", "tasks.txt", "--task_to", "model.lr",
            "--n_jobs", "1", "--", "sh", "-c", "kill -9 $PPID",
        ],
    );
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(count(&out.stdout, "running"), 1);
    assert_eq!(count(&out.stdout, "pending"), 2);

    let requeue = gridq(dir.path(), &["requeue", "--running"]);
    assert!(requeue.status.success());
    let status = gridq(dir.path(), &["status"]);
    assert_eq!(count(&status.stdout, "pending"), 3);
    assert_eq!(count(&status.stdout, "running"), 0);
}
