//! Rolling frontier state.
//!
//! The frontier is the set of tasks whose dependencies are satisfied and
//! which have not yet been dispatched. It is recomputed from scratch on
//! every scheduling tick rather than incrementally patched; task counts are
//! small, and a fresh computation cannot drift from the completion state.

use std::collections::HashSet;

use crate::core::graph::TaskGraph;
use crate::core::task::TaskId;

/// Completion and dispatch bookkeeping driving the frontier computation.
///
/// Rebuilt from the durable directory tree on coordinator restart; this
/// struct is working state, not the source of truth.
#[derive(Debug, Clone, Default)]
pub struct FrontierState {
    completed: HashSet<TaskId>,
    failed: HashSet<TaskId>,
    dispatched: HashSet<TaskId>,
}

impl FrontierState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completion. Returns true if this is the first time the task
    /// was seen completed.
    pub fn mark_completed(&mut self, id: TaskId) -> bool {
        self.dispatched.remove(&id);
        self.failed.remove(&id);
        self.completed.insert(id)
    }

    /// Record a failure. Returns true on first observation.
    pub fn mark_failed(&mut self, id: TaskId) -> bool {
        self.dispatched.remove(&id);
        if self.completed.contains(&id) {
            // First terminal placement wins; a completion already observed
            // is never downgraded.
            return false;
        }
        self.failed.insert(id)
    }

    /// Record that a task was published or observed in flight.
    pub fn mark_dispatched(&mut self, id: TaskId) {
        self.dispatched.insert(id);
    }

    pub fn is_completed(&self, id: &TaskId) -> bool {
        self.completed.contains(id)
    }

    pub fn is_failed(&self, id: &TaskId) -> bool {
        self.failed.contains(id)
    }

    pub fn is_dispatched(&self, id: &TaskId) -> bool {
        self.dispatched.contains(id)
    }

    pub fn completed(&self) -> &HashSet<TaskId> {
        &self.completed
    }

    pub fn failed(&self) -> &HashSet<TaskId> {
        &self.failed
    }

    pub fn dispatched_count(&self) -> usize {
        self.dispatched.len()
    }

    /// Compute the current frontier: every task with all predecessors
    /// completed that is not itself completed, failed, or in flight.
    ///
    /// Dependents of a failed task never appear here; a failure permanently
    /// blocks its subtree unless the operator records an override
    /// completion.
    pub fn ready_tasks(&self, graph: &TaskGraph) -> Vec<TaskId> {
        let mut excluded: HashSet<TaskId> = self.dispatched.clone();
        excluded.extend(self.failed.iter().cloned());
        let mut ready = graph.ready_tasks(&self.completed, &excluded);
        ready.sort();
        ready
    }

    /// Whether every task has reached a terminal state.
    pub fn all_terminal(&self, graph: &TaskGraph) -> bool {
        let mut terminal = self.completed.clone();
        terminal.extend(self.failed.iter().cloned());
        graph.all_in(&terminal)
    }
}
