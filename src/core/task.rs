//! Task data model for the dependency graph.
//!
//! Tasks are immutable units of work loaded once from the manifest. The
//! coordinator tracks each task's mutable lifecycle separately in an
//! `ExecutionRecord`, so the task definition itself never changes after
//! load.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::mailbox::WorkerId;

/// Unique identifier for a task, as declared in the manifest.
///
/// Manifest ids are free-form strings (e.g. "P1.T001"); this newtype keeps
/// them from mixing with other strings in signatures.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Structured completion criteria for a task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefinitionOfDone {
    /// Concrete criteria that must all hold for the task to count as done.
    #[serde(default)]
    pub criteria: Vec<String>,
    /// Condition at which the worker should stop and report completion.
    #[serde(default)]
    pub stop_when: String,
}

/// An immutable unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier from the manifest.
    pub id: TaskId,
    /// Human-readable title.
    pub title: String,
    /// Detailed description of what the task should accomplish.
    #[serde(default)]
    pub description: String,
    /// Structured completion criteria.
    #[serde(default)]
    pub definition_of_done: DefinitionOfDone,
    /// Names of resources this task must hold while running.
    #[serde(default)]
    pub resources: Vec<String>,
}

impl Task {
    /// Create a task with just an id and title; used by tests and repair
    /// injection. Manifest tasks come in through serde.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: TaskId::new(id),
            title: title.into(),
            description: String::new(),
            definition_of_done: DefinitionOfDone::default(),
            resources: Vec::new(),
        }
    }

    /// Attach a description, builder-style.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Attach resource requirements, builder-style.
    pub fn with_resources(mut self, resources: Vec<String>) -> Self {
        self.resources = resources;
        self
    }
}

/// Lifecycle state of a task as observed by the coordinator.
///
/// Tasks move Pending -> Published -> Claimed -> terminal. Help is the one
/// state that can route back to Published via operator intervention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Not yet dispatched; dependencies may or may not be satisfied.
    Pending,
    /// Envelope written to open-tasks, waiting for a claim.
    Published,
    /// Claimed into a worker's private directory.
    Claimed,
    /// Worker requested help; waiting for operator guidance.
    Help,
    /// Observed in finished-tasks.
    Completed,
    /// Observed in failed-tasks.
    Failed,
}

impl TaskState {
    /// Whether the mailbox protocol will never move this task again without
    /// manual intervention.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskState::Pending => write!(f, "pending"),
            TaskState::Published => write!(f, "published"),
            TaskState::Claimed => write!(f, "claimed"),
            TaskState::Help => write!(f, "help"),
            TaskState::Completed => write!(f, "completed"),
            TaskState::Failed => write!(f, "failed"),
        }
    }
}

/// Per-task mutable state owned exclusively by the coordinator process.
///
/// Records are rebuilt from the directory tree on restart; they are working
/// state, not the source of truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// The task this record tracks.
    pub task_id: TaskId,
    /// Current lifecycle state.
    pub state: TaskState,
    /// Resources currently held on behalf of this task.
    pub held_resources: Vec<String>,
    /// Worker that claimed the task, once known.
    pub worker: Option<WorkerId>,
    /// When the task was published into open-tasks.
    pub published_at: Option<DateTime<Utc>>,
    /// When the task was first observed claimed.
    pub claimed_at: Option<DateTime<Utc>>,
    /// When the task was observed in a terminal directory.
    pub ended_at: Option<DateTime<Utc>>,
    /// Times the task has been republished (help round-trips, stuck requeues).
    pub retry_count: u32,
    /// Do not republish before this instant (circuit-breaker cooldown).
    pub cooldown_until: Option<DateTime<Utc>>,
    /// Failure reason, preserved verbatim from the worker's annotation.
    pub failure: Option<String>,
}

impl ExecutionRecord {
    /// Create a fresh record in Pending state.
    pub fn new(task_id: TaskId) -> Self {
        Self {
            task_id,
            state: TaskState::Pending,
            held_resources: Vec::new(),
            worker: None,
            published_at: None,
            claimed_at: None,
            ended_at: None,
            retry_count: 0,
            cooldown_until: None,
            failure: None,
        }
    }

    /// Record publication into open-tasks.
    pub fn published(&mut self, resources: Vec<String>) {
        self.state = TaskState::Published;
        self.held_resources = resources;
        self.published_at = Some(Utc::now());
    }

    /// Record an observed claim by a worker.
    pub fn claimed(&mut self, worker: WorkerId) {
        self.state = TaskState::Claimed;
        self.worker = Some(worker);
        self.claimed_at = Some(Utc::now());
    }

    /// Record an observed completion.
    pub fn completed(&mut self) {
        self.state = TaskState::Completed;
        self.ended_at = Some(Utc::now());
    }

    /// Record an observed failure with the reason preserved verbatim.
    pub fn failed(&mut self, reason: &str) {
        self.state = TaskState::Failed;
        self.failure = Some(reason.to_string());
        self.ended_at = Some(Utc::now());
    }

    /// Record an observed help request.
    pub fn help_requested(&mut self) {
        self.state = TaskState::Help;
    }

    /// Record a republication (help resolution or stuck requeue).
    pub fn republished(&mut self) {
        self.state = TaskState::Published;
        self.worker = None;
        self.claimed_at = None;
        self.retry_count += 1;
        self.published_at = Some(Utc::now());
    }

    /// Whether the cooldown gate currently blocks publication.
    pub fn in_cooldown(&self) -> bool {
        self.cooldown_until
            .map(|until| Utc::now() < until)
            .unwrap_or(false)
    }
}
