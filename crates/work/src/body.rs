//! Task bodies - what a worker runs against each merged configuration.

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use serde_json::Value;
use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

/// Environment variable holding the path of the merged config file.
pub const CONFIG_ENV: &str = "GRIDQ_CONFIG";

/// Placeholder replaced by the merged config file path in command arguments.
const CONFIG_PLACEHOLDER: &str = "{config}";

/// Unit of work executed once per task.
///
/// An `Err` is recorded as the task's failure; it never stops the worker.
#[async_trait]
pub trait TaskBody: Send + Sync {
    /// Run against the task's merged configuration.
    async fn run(&self, config: Value) -> anyhow::Result<Value>;
}

/// Body backed by a plain closure.
pub struct FnBody<F> {
    f: F,
}

impl<F> FnBody<F>
where
    F: Fn(Value) -> anyhow::Result<Value> + Send + Sync,
{
    /// Wrap a closure.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> TaskBody for FnBody<F>
where
    F: Fn(Value) -> anyhow::Result<Value> + Send + Sync,
{
    async fn run(&self, config: Value) -> anyhow::Result<Value> {
        (self.f)(config)
    }
}

/// Body that runs an external program.
///
/// The merged configuration is written as JSON to a temporary file. Its path
/// is exported as `GRIDQ_CONFIG` and substituted for `{config}` in the
/// arguments. On exit 0, stdout is the result: parsed as JSON when possible,
/// kept as a string otherwise, `null` when empty.
#[derive(Debug, Clone)]
pub struct CommandBody {
    argv: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl CommandBody {
    /// Create a body from a program and its arguments.
    pub fn new(argv: Vec<String>) -> Self {
        Self {
            argv,
            working_dir: None,
        }
    }

    /// Run the program from `dir`.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Program and arguments.
    pub fn argv(&self) -> &[String] {
        &self.argv
    }
}

#[async_trait]
impl TaskBody for CommandBody {
    async fn run(&self, config: Value) -> anyhow::Result<Value> {
        let (program, args) = self
            .argv
            .split_first()
            .ok_or_else(|| anyhow!("task command is empty"))?;

        let mut file = tempfile::Builder::new()
            .prefix("gridq-config-")
            .suffix(".json")
            .tempfile()
            .context("failed to create config file")?;
        file.write_all(serde_json::to_string_pretty(&config)?.as_bytes())?;
        file.flush()?;
        let config_path = file.path().to_string_lossy().into_owned();

        let mut cmd = Command::new(program);
        cmd.args(args.iter().map(|a| a.replace(CONFIG_PLACEHOLDER, &config_path)));
        cmd.env(CONFIG_ENV, &config_path);
        cmd.stdin(Stdio::null());
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let output = cmd
            .output()
            .await
            .with_context(|| format!("failed to start `{}`", program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("`{}` exited with {}: {}", program, output.status, stderr.trim());
        }

        Ok(parse_stdout(&String::from_utf8_lossy(&output.stdout)))
    }
}

fn parse_stdout(stdout: &str) -> Value {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string()))
}
