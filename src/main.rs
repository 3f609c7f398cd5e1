use std::collections::HashSet;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use foreman::config::Config;
use foreman::coordination::{resolve_help, write_override_completion, Coordinator, ProgressSnapshot};
use foreman::core::{TaskGraph, TaskId};
use foreman::mailbox::{MailboxLayout, Worker, WorkerId, DEFAULT_BASE_DIR};
use foreman::manifest::Manifest;
use foreman::{flog, Result};

/// Foreman - filesystem-mailbox task coordinator for independent workers
#[derive(Parser, Debug)]
#[command(name = "foreman")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    FOREMAN_DEBUG=1     Enable debug logging (alternative to --debug)")]
pub struct Cli {
    /// Enable debug logging (writes to ~/.foreman/foreman.log)
    #[arg(short = 'd', long)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Coordination commands
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run the coordinator loop against a task manifest
    Run {
        /// Path to the task manifest (JSON)
        #[arg(long, short = 'm')]
        manifest: PathBuf,

        /// Coordination directory (the mailbox tree)
        #[arg(long, default_value = DEFAULT_BASE_DIR)]
        dir: PathBuf,

        /// Path to the coordinator config (TOML)
        #[arg(long, default_value = "foreman.toml")]
        config: PathBuf,
    },

    /// Run a worker loop under one of the pool identities
    Worker {
        /// Worker identity (1..=pool size)
        #[arg(long)]
        id: u8,

        /// Coordination directory (the mailbox tree)
        #[arg(long, default_value = DEFAULT_BASE_DIR)]
        dir: PathBuf,

        /// Path to the coordinator config (TOML)
        #[arg(long, default_value = "foreman.toml")]
        config: PathBuf,
    },

    /// Validate a manifest and print the dry-run execution plan
    Plan {
        /// Path to the task manifest (JSON)
        #[arg(long, short = 'm')]
        manifest: PathBuf,
    },

    /// Show the latest progress snapshot and per-directory counts
    Status {
        /// Coordination directory (the mailbox tree)
        #[arg(long, default_value = DEFAULT_BASE_DIR)]
        dir: PathBuf,
    },

    /// Attach guidance to a help request and republish the task
    Resolve {
        /// The task id waiting in help-me/
        task_id: String,

        /// Updated instructions for the next worker
        #[arg(long, short = 'g')]
        guidance: String,

        /// Coordination directory (the mailbox tree)
        #[arg(long, default_value = DEFAULT_BASE_DIR)]
        dir: PathBuf,
    },

    /// Operator override: record a task as completed so dependents unblock
    Skip {
        /// The task id to mark completed
        task_id: String,

        /// Note recorded in the completion annotation
        #[arg(long, default_value = "skipped by operator")]
        note: String,

        /// Coordination directory (the mailbox tree)
        #[arg(long, default_value = DEFAULT_BASE_DIR)]
        dir: PathBuf,
    },

    /// Delete the coordination directory tree
    Reset {
        /// Coordination directory (the mailbox tree)
        #[arg(long, default_value = DEFAULT_BASE_DIR)]
        dir: PathBuf,

        /// Delete even if workers still hold claims
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    foreman::log::init_with_debug(cli.debug);

    match cli.command {
        Command::Run { manifest, dir, config } => run_coordinator(manifest, dir, config),
        Command::Worker { id, dir, config } => run_worker(id, dir, config),
        Command::Plan { manifest } => run_plan(manifest),
        Command::Status { dir } => run_status(dir),
        Command::Resolve { task_id, guidance, dir } => run_resolve(task_id, guidance, dir),
        Command::Skip { task_id, note, dir } => run_skip(task_id, note, dir),
        Command::Reset { dir, force } => run_reset(dir, force),
    }
}

/// Run the coordinator until all tasks are terminal or the operator
/// interrupts with Ctrl-C. On interrupt, in-flight claims are left as-is.
fn run_coordinator(manifest_path: PathBuf, dir: PathBuf, config_path: PathBuf) -> Result<()> {
    flog!(
        "Run command: manifest={}, dir={}",
        manifest_path.display(),
        dir.display()
    );

    let config = Config::load_from(&config_path)?;
    let manifest = Manifest::load(&manifest_path)?;
    let layout = MailboxLayout::new(&dir);
    let mut coordinator = Coordinator::from_manifest(&manifest, layout, config)?;

    let rt = tokio::runtime::Runtime::new()?;
    let snapshot = rt.block_on(async {
        let cancel = CancellationToken::new();
        let signal_cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                signal_cancel.cancel();
            }
        });
        coordinator.run(cancel).await
    })?;

    println!();
    println!("Coordinator finished.");
    print_snapshot(&snapshot);
    Ok(())
}

/// Run a worker identity's claim loop. Without a configured executor every
/// claimed task is routed to the help queue for a human to pick up.
fn run_worker(id: u8, dir: PathBuf, config_path: PathBuf) -> Result<()> {
    flog!("Worker command: id={}, dir={}", id, dir.display());

    let config = Config::load_from(&config_path)?;
    let worker_id = WorkerId::new(id, config.worker_pool)?;
    let layout = MailboxLayout::new(&dir);
    layout.ensure(config.worker_pool)?;

    println!("{} watching {}", worker_id, layout.open_dir().display());

    let worker = Worker::with_default_executor(worker_id, layout);
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let cancel = CancellationToken::new();
        let signal_cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                signal_cancel.cancel();
            }
        });
        worker.run(cancel).await
    })?;

    println!("{} stopped", worker_id);
    Ok(())
}

/// Validate the manifest and print the plan: tasks in dependency order plus
/// the initial frontier. Nothing is written.
fn run_plan(manifest_path: PathBuf) -> Result<()> {
    let manifest = Manifest::load(&manifest_path)?;
    let graph = TaskGraph::load(&manifest)?;

    println!(
        "Manifest OK: {} tasks, {} edges, {} resources",
        graph.task_count(),
        graph.edge_count(),
        manifest.resources.len()
    );
    println!();
    println!("Execution order:");
    for task in graph.topological_order()? {
        let deps = graph.predecessors(&task.id);
        if deps.is_empty() {
            println!("  {} - {}", task.id, task.title);
        } else {
            let dep_list: Vec<&str> = deps.iter().map(|d| d.as_str()).collect();
            println!("  {} - {} (after {})", task.id, task.title, dep_list.join(", "));
        }
    }

    let ready = graph.ready_tasks(&HashSet::new(), &HashSet::new());
    println!();
    println!("Initial frontier ({} task(s)):", ready.len());
    for id in ready {
        println!("  {}", id);
    }
    Ok(())
}

/// Print the latest stats snapshot plus live per-directory counts.
fn run_status(dir: PathBuf) -> Result<()> {
    let layout = MailboxLayout::new(&dir);

    match ProgressSnapshot::read_from(&layout.stats_dir())? {
        Some(snapshot) => {
            println!("Last snapshot ({}):", snapshot.timestamp.format("%Y-%m-%d %H:%M:%S UTC"));
            println!("  {}", snapshot);
        }
        None => println!("No snapshot written yet."),
    }

    println!();
    println!("Directory counts:");
    for (label, path) in [
        ("open", layout.open_dir()),
        ("finished", layout.finished_dir()),
        ("failed", layout.failed_dir()),
        ("help", layout.help_dir()),
    ] {
        println!("  {:>8}: {}", label, layout.list_entries(&path)?.len());
    }

    Ok(())
}

/// Republish a help-state task into open-tasks with operator guidance.
fn run_resolve(task_id: String, guidance: String, dir: PathBuf) -> Result<()> {
    let layout = MailboxLayout::new(&dir);
    let envelope = resolve_help(&layout, &TaskId::new(task_id), &guidance)?;
    println!(
        "Republished {} (retry {}) with guidance.",
        envelope.task_id, envelope.retry_count
    );
    Ok(())
}

/// Record a synthetic completion for a task so its dependents unblock.
fn run_skip(task_id: String, note: String, dir: PathBuf) -> Result<()> {
    let layout = MailboxLayout::new(&dir);
    let id = TaskId::new(task_id);
    write_override_completion(&layout, &id, &note)?;
    println!("Recorded override completion for {}.", id);
    Ok(())
}

/// Delete the coordination tree. Refuses while workers hold claims unless
/// forced.
fn run_reset(dir: PathBuf, force: bool) -> Result<()> {
    flog!("Reset command: dir={}, force={}", dir.display(), force);

    if !dir.exists() {
        println!("Nothing to reset: {} does not exist.", dir.display());
        return Ok(());
    }

    // Count claims in every worker directory on disk, whatever pool size
    // created them.
    let layout = MailboxLayout::new(&dir);
    let mut claimed = 0usize;
    for entry in std::fs::read_dir(&dir)? {
        let path = entry?.path();
        let is_worker_dir = path.is_dir()
            && path
                .file_name()
                .and_then(|name| name.to_str())
                .map(|name| name.starts_with("worker-"))
                .unwrap_or(false);
        if is_worker_dir {
            claimed += layout.list_entries(&path)?.len();
        }
    }

    if claimed > 0 && !force {
        println!(
            "Refusing to reset: {} claim(s) still sit in worker directories.",
            claimed
        );
        println!("Use 'foreman reset --force' to delete them anyway.");
        return Ok(());
    }

    std::fs::remove_dir_all(&dir)?;
    println!("Removed {}.", dir.display());
    Ok(())
}

fn print_snapshot(snapshot: &ProgressSnapshot) {
    println!("  Completed: {}/{}", snapshot.completed, snapshot.total);
    println!("  Failed:    {}", snapshot.failed);
    println!("  Help:      {}", snapshot.help_requests);
    println!("  Progress:  {:.1}%", snapshot.completion_pct);
}
