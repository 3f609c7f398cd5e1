//! Dispatch envelopes: the on-disk form of a task.
//!
//! An envelope is self-describing: it carries the full task payload, the
//! coordination metadata a worker needs, and plain-language instructions for
//! the state transitions, so any process that can read JSON and rename files
//! is a valid worker. Workers append terminal annotations; they never rewrite
//! the original payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use uuid::Uuid;

use crate::core::task::{Task, TaskId};
use crate::mailbox::WorkerId;
use crate::Result;

/// Transition instructions embedded in every envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instructions {
    pub on_complete: String,
    pub on_failure: String,
    pub on_help_needed: String,
    pub working_dir: String,
}

impl Instructions {
    fn for_task(task_id: &TaskId) -> Self {
        Self {
            on_complete: format!(
                "Add a completion annotation and move this file to finished-tasks/{}.json",
                task_id
            ),
            on_failure: format!(
                "Add a failure annotation with error details and move this file to failed-tasks/{}.json",
                task_id
            ),
            on_help_needed: format!(
                "Add a help annotation explaining the issue and move this file to help-me/{}.json",
                task_id
            ),
            working_dir: format!(
                "worker-NNN/{}.json (where NNN is your worker id)",
                task_id
            ),
        }
    }
}

/// Completion annotation written by the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub summary: String,
    pub completed_by: String,
    pub completed_at: DateTime<Utc>,
}

/// Failure annotation written by the worker. The error text is preserved
/// verbatim for later inspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub error: String,
    pub failed_by: String,
    pub failed_at: DateTime<Utc>,
}

/// Help annotation written by the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelpRequest {
    pub request: String,
    pub requested_by: String,
    pub requested_at: DateTime<Utc>,
}

/// The serialized form of a task plus coordination metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// The task this envelope dispatches.
    pub task_id: TaskId,
    /// Unique id for this publication; a help republish gets a new one.
    pub dispatch_id: Uuid,
    /// When the coordinator published this envelope.
    pub created_at: DateTime<Utc>,
    /// The full, immutable task payload.
    pub task: Task,
    /// Dependencies that were complete at publication time.
    pub dependencies_completed: Vec<TaskId>,
    /// Resources the coordinator acquired on this task's behalf.
    pub held_resources: Vec<String>,
    /// Times this task has been republished.
    pub retry_count: u32,
    /// Transition instructions for the claiming worker.
    pub instructions: Instructions,
    /// Operator guidance attached when a help request is resolved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guidance: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion: Option<Completion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help: Option<HelpRequest>,
}

impl Envelope {
    /// Create a fresh envelope for publication.
    pub fn new(task: Task, dependencies_completed: Vec<TaskId>, held_resources: Vec<String>) -> Self {
        let task_id = task.id.clone();
        Self {
            instructions: Instructions::for_task(&task_id),
            task_id,
            dispatch_id: Uuid::new_v4(),
            created_at: Utc::now(),
            task,
            dependencies_completed,
            held_resources,
            retry_count: 0,
            guidance: None,
            completion: None,
            failure: None,
            help: None,
        }
    }

    /// Append a completion annotation.
    pub fn annotate_completed(&mut self, worker: &str, summary: &str) {
        self.completion = Some(Completion {
            summary: summary.to_string(),
            completed_by: worker.to_string(),
            completed_at: Utc::now(),
        });
    }

    /// Append a failure annotation.
    pub fn annotate_failed(&mut self, worker: &str, error: &str) {
        self.failure = Some(Failure {
            error: error.to_string(),
            failed_by: worker.to_string(),
            failed_at: Utc::now(),
        });
    }

    /// Append a help annotation.
    pub fn annotate_help(&mut self, worker: WorkerId, request: &str) {
        self.help = Some(HelpRequest {
            request: request.to_string(),
            requested_by: worker.name(),
            requested_at: Utc::now(),
        });
    }

    /// Prepare a help-state envelope for republication: attach guidance,
    /// clear the help annotation, stamp a new dispatch id, and bump the
    /// retry count.
    pub fn resolve_with_guidance(&mut self, guidance: &str) {
        self.guidance = Some(guidance.to_string());
        self.help = None;
        self.dispatch_id = Uuid::new_v4();
        self.retry_count += 1;
        self.created_at = Utc::now();
    }

    /// Serialize to pretty JSON at the given path.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Read an envelope back from disk.
    pub fn read_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}
