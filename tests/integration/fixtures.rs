//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Building manifests and mailbox trees in temporary directories
//! - Scripted executors with per-task outcomes

use std::collections::HashMap;
use tempfile::TempDir;

use foreman::config::Config;
use foreman::coordination::Coordinator;
use foreman::core::{Task, TaskId};
use foreman::mailbox::{Envelope, Executor, MailboxLayout, Outcome, Worker, WorkerId};
use foreman::manifest::{Edge, Manifest, ResourceSpec};

/// A mailbox tree in a temporary directory.
pub struct TestBed {
    /// Keeps the temporary directory alive for the test's duration.
    pub temp_dir: TempDir,
    /// Layout rooted inside the temporary directory.
    pub layout: MailboxLayout,
}

impl TestBed {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let layout = MailboxLayout::new(temp_dir.path().join("coordination"));
        Self { temp_dir, layout }
    }

    /// A fast-polling config suitable for tests.
    pub fn config() -> Config {
        Config {
            poll_interval_ms: 10,
            stuck_claim_secs: 0,
            ..Default::default()
        }
    }

    /// Build a coordinator over this bed's layout.
    pub fn coordinator(&self, manifest: &Manifest) -> Coordinator {
        Coordinator::from_manifest(manifest, self.layout.clone(), Self::config())
            .expect("Failed to build coordinator")
    }

    /// Build a worker with a scripted executor over this bed's layout.
    pub fn worker(&self, id: u8, executor: ScriptedExecutor) -> Worker {
        Worker::new(
            WorkerId::new(id, Config::default().worker_pool).expect("bad worker id"),
            self.layout.clone(),
            Box::new(executor),
        )
        .with_poll_interval(std::time::Duration::from_millis(10))
    }
}

/// Build a manifest from id lists and edge pairs.
pub fn manifest(tasks: &[&str], edges: &[(&str, &str)]) -> Manifest {
    Manifest {
        tasks: tasks
            .iter()
            .map(|id| Task::new(*id, &format!("{} title", id)))
            .collect(),
        edges: edges
            .iter()
            .map(|(from, to)| Edge {
                from: TaskId::new(*from),
                to: TaskId::new(*to),
            })
            .collect(),
        resources: HashMap::new(),
    }
}

/// Build a manifest where every task requires the given resources.
pub fn manifest_with_resources(
    tasks: &[&str],
    edges: &[(&str, &str)],
    resources: &[(&str, ResourceSpec)],
    requirements: &[&str],
) -> Manifest {
    let mut m = manifest(tasks, edges);
    m.resources = resources
        .iter()
        .map(|(name, spec)| (name.to_string(), *spec))
        .collect();
    for task in m.tasks.iter_mut() {
        task.resources = requirements.iter().map(|r| r.to_string()).collect();
    }
    m
}

/// Executor with a fixed outcome per task id; unknown ids complete.
pub struct ScriptedExecutor {
    outcomes: HashMap<TaskId, Outcome>,
}

impl ScriptedExecutor {
    /// Completes every task with a generic summary.
    pub fn completing() -> Self {
        Self {
            outcomes: HashMap::new(),
        }
    }

    /// Override the outcome for one task id.
    pub fn with_outcome(mut self, id: &str, outcome: Outcome) -> Self {
        self.outcomes.insert(TaskId::new(id), outcome);
        self
    }
}

impl Executor for ScriptedExecutor {
    fn execute(&self, envelope: &Envelope) -> Outcome {
        self.outcomes
            .get(&envelope.task_id)
            .cloned()
            .unwrap_or_else(|| Outcome::Completed(format!("{} done", envelope.task_id)))
    }
}
