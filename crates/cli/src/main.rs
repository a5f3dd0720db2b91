//! gridq CLI - distribute parameterized tasks over local or cluster workers.

use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Args, Parser, Subcommand};
use gridq_cluster::{ClusterBackend, ClusterConfig, SchedulerKind};
use gridq_core::{Summary, TaskStatus, WorkerId};
use gridq_storage::{JournalMode, Ledger, LedgerOptions, SqliteLedger, SUMMARY_QUERY};
use gridq_work::{LocalDispatcher, RunDir, RunManifest, WorkerError};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gridq")]
#[command(about = "Run a task list across local workers or a SLURM/PBS job array", long_about = None)]
struct Cli {
    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enqueue tasks and run them locally or submit a job array
    Run(RunArgs),
    /// Drain a run directory (started by `run` or by an array element)
    Worker {
        /// Run directory
        #[arg(long)]
        run_dir: PathBuf,
        /// Scheduler array index, used in the worker id
        #[arg(long)]
        array_index: Option<u32>,
    },
    /// Show per-status counts
    Status {
        /// Run directory
        #[arg(long, default_value = ".gridq")]
        run_dir: PathBuf,
        /// List the tasks in this status
        #[arg(long)]
        list: Option<TaskStatus>,
        /// Print the SQL summary query and exit
        #[arg(long)]
        query: bool,
    },
    /// Export finished tasks to YAML
    Results {
        /// Run directory
        #[arg(long, default_value = ".gridq")]
        run_dir: PathBuf,
        /// Output file (default: <run_dir>/results.yaml)
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Return failed and/or orphaned running tasks to pending
    Requeue(RequeueArgs),
    /// Print the submission script without submitting
    Render(RenderArgs),
}

#[derive(Args)]
#[command(group(ArgGroup::new("mode").required(true).args(["n_jobs", "slurm_config", "pbs_config"])))]
struct RunArgs {
    /// Base configuration (YAML or JSON)
    #[arg(long)]
    config: PathBuf,
    /// Task source: one value per line, or a YAML/JSON list
    #[arg(long)]
    tasks: PathBuf,
    /// Dot path in the base configuration each task value is written to
    #[arg(long = "task_to")]
    task_to: String,
    /// Local worker processes (0 = one per CPU)
    #[arg(long = "n_jobs")]
    n_jobs: Option<usize>,
    /// Submit a SLURM job array with this cluster config
    #[arg(long = "slurm_config")]
    slurm_config: Option<PathBuf>,
    /// Submit a PBS job array with this cluster config
    #[arg(long = "pbs_config")]
    pbs_config: Option<PathBuf>,
    /// Run directory holding the ledger and logs
    #[arg(long, default_value = ".gridq")]
    run_dir: PathBuf,
    /// Ledger journal mode: wal or delete (default: wal locally, delete for
    /// cluster runs, whose ledger sits on a network filesystem)
    #[arg(long)]
    journal_mode: Option<JournalMode>,
    /// Command run per task; `{config}` is replaced by the merged config path
    #[arg(last = true, required = true)]
    command: Vec<String>,
}

#[derive(Args)]
#[command(group(ArgGroup::new("which").required(true).multiple(true).args(["failed", "running"])))]
struct RequeueArgs {
    /// Run directory
    #[arg(long, default_value = ".gridq")]
    run_dir: PathBuf,
    /// Requeue failed tasks
    #[arg(long)]
    failed: bool,
    /// Requeue tasks left running by dead workers
    #[arg(long)]
    running: bool,
}

#[derive(Args)]
#[command(group(ArgGroup::new("scheduler").required(true).args(["slurm_config", "pbs_config"])))]
struct RenderArgs {
    /// SLURM cluster config
    #[arg(long = "slurm_config")]
    slurm_config: Option<PathBuf>,
    /// PBS cluster config
    #[arg(long = "pbs_config")]
    pbs_config: Option<PathBuf>,
    /// Run directory
    #[arg(long, default_value = ".gridq")]
    run_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Run(args) => run(args).await?,
        Commands::Worker { run_dir, array_index } => {
            let mut id = WorkerId::current();
            if let Some(index) = array_index {
                id = id.with_array_index(index);
            }
            let report = RunDir::new(run_dir).run_worker(id).await?;
            info!(
                "Worker {} finished: {} done, {} failed",
                report.owner, report.completed, report.failed
            );
        }
        Commands::Status { run_dir, list, query } => {
            if query {
                println!("{};", SUMMARY_QUERY);
                return Ok(());
            }
            let ledger = open_ledger(&RunDir::new(run_dir)).await?;
            match list {
                Some(status) => {
                    let tasks = ledger.list(Some(status)).await?;
                    println!("Tasks ({})", tasks.len());
                    for task in tasks {
                        println!(
                            "  {} | {} | {} | {}",
                            task.id,
                            task.owner.map(|o| o.to_string()).unwrap_or_else(|| "-".into()),
                            task.payload,
                            task.error.unwrap_or_default(),
                        );
                    }
                }
                None => print_summary(&ledger.summary().await?),
            }
        }
        Commands::Results { run_dir, output } => {
            let run_dir = RunDir::new(run_dir);
            let output = output.unwrap_or_else(|| run_dir.root().join("results.yaml"));
            let ledger = open_ledger(&run_dir).await?;
            let count = ledger.export_results(&output).await?;
            println!("Wrote {} results to {}", count, output.display());
        }
        Commands::Requeue(args) => {
            let mut statuses = Vec::new();
            if args.failed {
                statuses.push(TaskStatus::Failed);
            }
            if args.running {
                statuses.push(TaskStatus::Running);
            }
            let ledger = open_ledger(&RunDir::new(args.run_dir)).await?;
            let count = ledger.requeue(&statuses).await?;
            println!("Requeued {} tasks", count);
        }
        Commands::Render(args) => {
            let (kind, config) = scheduler_choice(args.slurm_config, args.pbs_config)?;
            let run_dir = RunDir::new(&args.run_dir);
            let working_dir = match run_dir.read_manifest().await {
                Ok(manifest) => manifest.working_dir,
                Err(WorkerError::MissingManifest(_)) => None,
                Err(e) => return Err(e.into()),
            };
            let working_dir = match working_dir {
                Some(dir) => dir,
                None => std::env::current_dir()?,
            };
            let backend = ClusterBackend::from_file(kind, &config, run_dir.root())?.with_working_dir(working_dir);
            print!("{}", backend.render()?);
        }
    }

    Ok(())
}

/// Where the tasks of a run execute.
enum Backend {
    /// Worker processes on this machine
    Local { worker_count: usize },
    /// A scheduler job array
    Cluster { kind: SchedulerKind, config: ClusterConfig },
}

impl RunArgs {
    /// Resolve the mode flags, loading and validating any cluster config.
    fn backend(&self) -> Result<Backend> {
        if let Some(n_jobs) = self.n_jobs {
            let worker_count = if n_jobs == 0 { num_cpus::get() } else { n_jobs };
            return Ok(Backend::Local { worker_count });
        }
        let (kind, path) = scheduler_choice(self.slurm_config.clone(), self.pbs_config.clone())?;
        let config = ClusterConfig::load(&path)
            .with_context(|| format!("cannot load cluster config {}", path.display()))?;
        Ok(Backend::Cluster { kind, config })
    }

    /// Journal mode for `backend`. WAL needs shared memory on one host, so
    /// cluster runs default to DELETE.
    fn journal_mode(&self, backend: &Backend) -> JournalMode {
        match (self.journal_mode, backend) {
            (Some(JournalMode::Wal), Backend::Cluster { .. }) => {
                warn!("WAL journal mode is not safe when array elements share the ledger over a network filesystem");
                JournalMode::Wal
            }
            (Some(mode), _) => mode,
            (None, Backend::Local { .. }) => JournalMode::Wal,
            (None, Backend::Cluster { .. }) => JournalMode::Delete,
        }
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let backend = args.backend()?;
    let base = load_base_config(&args.config)?;
    let journal_mode = args.journal_mode(&backend);
    let working_dir = std::env::current_dir()?;
    let mut manifest = RunManifest::new(base, args.task_to, args.command);
    manifest.journal_mode = journal_mode;
    manifest.working_dir = Some(working_dir.clone());

    let run_dir = RunDir::new(&args.run_dir);
    let ledger = run_dir.prepare_from_file(&manifest, &args.tasks).await?;
    let pending = ledger.pending_count().await?;
    ledger.close().await;

    if pending == 0 {
        info!("Nothing pending in {}", run_dir.root().display());
        return Ok(());
    }

    match backend {
        Backend::Local { worker_count } => {
            let exe = std::env::current_exe().context("cannot locate the gridq binary")?;
            let report = LocalDispatcher::new(worker_count)
                .with_options(manifest.ledger_options())
                .run_processes(&run_dir, &exe)
                .await?;
            if report.crashed > 0 {
                warn!("{} worker processes did not exit cleanly", report.crashed);
            }
            print_summary(&report.summary);
        }
        Backend::Cluster { kind, config } => {
            let cluster = ClusterBackend::new(kind, config, run_dir.root())?.with_working_dir(working_dir);
            let handle = cluster.submit_run().await?;
            println!("Submitted {} job {}", handle.kind, handle.job_id);
            println!("  Script: {}", handle.script.display());
            println!("  Status: gridq status --run-dir {}", run_dir.root().display());
        }
    }
    Ok(())
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Parse a YAML or JSON file into a configuration value.
fn load_base_config(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read config {}", path.display()))?;
    let value: Value = serde_yaml::from_str(&text)
        .with_context(|| format!("cannot parse config {}", path.display()))?;
    if !value.is_object() {
        bail!("config {} must be a mapping", path.display());
    }
    Ok(value)
}

fn scheduler_choice(slurm: Option<PathBuf>, pbs: Option<PathBuf>) -> Result<(SchedulerKind, PathBuf)> {
    match (slurm, pbs) {
        (Some(path), None) => Ok((SchedulerKind::Slurm, path)),
        (None, Some(path)) => Ok((SchedulerKind::Pbs, path)),
        _ => bail!("exactly one of --slurm_config and --pbs_config is required"),
    }
}

async fn open_ledger(run_dir: &RunDir) -> Result<SqliteLedger> {
    let options = match run_dir.read_manifest().await {
        Ok(manifest) => manifest.ledger_options(),
        Err(WorkerError::MissingManifest(_)) => LedgerOptions::default(),
        Err(e) => return Err(e).context("cannot read run manifest"),
    };
    Ok(SqliteLedger::open(&run_dir.ledger_path(), options).await?)
}

fn print_summary(summary: &Summary) {
    println!("{}", summary);
}
